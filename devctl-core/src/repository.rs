use crate::config::{default_path, ConfigFile};
use crate::discovery::{discover, DiscoveryOptions};
use crate::error::{DevctlError, Result};
use crate::runtime::{Client, Factory, OpContext, PluginSpec, RequestMeta};
use log::warn;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct RepositoryOptions {
    pub repo_root: PathBuf,
    /// Defaults to `<repo_root>/.devctl.yaml`.
    pub config_path: Option<PathBuf>,
    pub cwd: Option<PathBuf>,
    pub dry_run: bool,
    pub scan_plugins_dir: bool,
}

/// Everything needed to bring up the plugins of one repository for a run.
#[derive(Debug, Clone)]
pub struct Repository {
    pub root: PathBuf,
    pub config_path: PathBuf,
    pub config: ConfigFile,
    pub specs: Vec<PluginSpec>,
    pub spec_by_id: HashMap<String, PluginSpec>,
    pub request: RequestMeta,
}

impl Repository {
    pub fn load(opts: RepositoryOptions) -> Result<Self> {
        let root = if opts.repo_root.is_absolute() {
            opts.repo_root.clone()
        } else {
            std::env::current_dir()?.join(&opts.repo_root)
        };
        let config_path = opts.config_path.clone().unwrap_or_else(|| default_path(&root));
        let config = ConfigFile::load_optional(&config_path)?;

        let specs = discover(
            &config,
            &DiscoveryOptions {
                repo_root: root.clone(),
                scan_plugins_dir: opts.scan_plugins_dir,
            },
        )?;
        let spec_by_id = specs.iter().map(|s| (s.id.clone(), s.clone())).collect();
        let cwd = opts.cwd.clone().unwrap_or_else(|| root.clone());
        let request = RequestMeta {
            repo_root: root.display().to_string(),
            cwd: cwd.display().to_string(),
            dry_run: opts.dry_run,
        };

        Ok(Self {
            root,
            config_path,
            config,
            specs,
            spec_by_id,
            request,
        })
    }

    pub fn is_strict(&self) -> bool {
        self.config.is_strict()
    }

    /// Starts every plugin in run order.
    ///
    /// If one fails, the ones already running are closed before the error
    /// is returned.
    pub async fn start_clients(&self, factory: &Factory) -> Result<Vec<Arc<dyn Client>>> {
        let mut clients: Vec<Arc<dyn Client>> = Vec::with_capacity(self.specs.len());
        for spec in &self.specs {
            match factory.start(spec, self.request.clone()).await {
                Ok(client) => clients.push(Arc::new(client)),
                Err(e) => {
                    let _ = close_clients(&clients).await;
                    return Err(e);
                }
            }
        }
        Ok(clients)
    }
}

/// Closes every client, returning the first error seen.
pub async fn close_clients(clients: &[Arc<dyn Client>]) -> Result<()> {
    let ctx = OpContext::new();
    let mut first: Option<DevctlError> = None;
    for client in clients {
        if let Err(e) = client.close(&ctx).await {
            warn!("closing plugin {}: {}", client.id(), e);
            first.get_or_insert(e);
        }
    }
    match first {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
