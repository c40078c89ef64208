use super::client::{drain_stderr, PluginClient};
use super::context::RequestMeta;
use super::spec::PluginSpec;
use crate::error::{DevctlError, Result};
use crate::process::terminate_group;
use log::{debug, info, warn};
use plugin_protocol::{decode_handshake, ProtocolError};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

#[derive(Debug, Clone)]
pub struct FactoryOptions {
    pub handshake_timeout: Duration,
    pub shutdown_timeout: Duration,
}

impl Default for FactoryOptions {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(2),
            shutdown_timeout: Duration::from_secs(2),
        }
    }
}

/// Spawns plugin processes and hands back clients whose handshake passed.
#[derive(Debug, Clone, Default)]
pub struct Factory {
    options: FactoryOptions,
}

impl Factory {
    pub fn new(options: FactoryOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &FactoryOptions {
        &self.options
    }

    /// Starts `spec` and waits for its handshake.
    ///
    /// The child leads a new process group and inherits our environment with
    /// the plugin's own env layered on top. Any handshake failure tears the
    /// whole group down.
    pub async fn start(&self, spec: &PluginSpec, meta: RequestMeta) -> Result<PluginClient> {
        let mut cmd = Command::new(&spec.path);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);
        if !spec.workdir.as_os_str().is_empty() {
            cmd.current_dir(&spec.workdir);
        }

        debug!("spawning plugin {}: {}", spec.id, spec.path.display());
        let mut child = cmd.spawn().map_err(|e| DevctlError::PluginStart {
            plugin_id: spec.id.clone(),
            message: format!("spawn {}: {}", spec.path.display(), e),
        })?;

        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(drain_stderr(spec.id.clone(), stderr)));
        let stdout = match child.stdout.take() {
            Some(out) => out,
            None => {
                self.teardown(spec, &mut child).await;
                return Err(DevctlError::PluginStart {
                    plugin_id: spec.id.clone(),
                    message: "stdout not captured".to_string(),
                });
            }
        };
        let mut stdout = BufReader::new(stdout);

        let handshake = match self.read_handshake(spec, &mut stdout).await {
            Ok(hs) => hs,
            Err(e) => {
                warn!("plugin {} rejected: {}", spec.id, e);
                self.teardown(spec, &mut child).await;
                if let Some(task) = stderr_task {
                    task.abort();
                }
                return Err(e);
            }
        };

        info!(
            "plugin {} ready ({} ops, {} streams, {} commands)",
            spec.id,
            handshake.capabilities.ops.len(),
            handshake.capabilities.streams.len(),
            handshake.capabilities.commands.len()
        );
        Ok(PluginClient::start(
            spec.clone(),
            handshake,
            meta,
            child,
            stdout,
            stderr_task,
            self.options.shutdown_timeout,
        ))
    }

    async fn read_handshake(
        &self,
        spec: &PluginSpec,
        stdout: &mut BufReader<tokio::process::ChildStdout>,
    ) -> Result<plugin_protocol::Handshake> {
        let mut line = String::new();
        let read = tokio::time::timeout(self.options.handshake_timeout, stdout.read_line(&mut line))
            .await
            .map_err(|_| DevctlError::HandshakeTimeout {
                plugin_id: spec.id.clone(),
                timeout: self.options.handshake_timeout,
            })?;
        match read {
            Ok(0) => Err(ProtocolError::invalid_handshake(format!(
                "plugin {} exited before its handshake",
                spec.id
            ))
            .into()),
            Ok(_) => Ok(decode_handshake(&line)?),
            Err(e) => Err(ProtocolError::stdout_contamination(format!(
                "plugin {}: unreadable handshake: {}",
                spec.id, e
            ))
            .into()),
        }
    }

    async fn teardown(&self, spec: &PluginSpec, child: &mut Child) {
        if let Some(pid) = child.id() {
            if let Err(e) = terminate_group(pid as i32, self.options.shutdown_timeout).await {
                warn!("plugin {}: teardown failed: {}", spec.id, e);
            }
        }
        let _ = tokio::time::timeout(Duration::from_secs(1), child.wait()).await;
    }
}
