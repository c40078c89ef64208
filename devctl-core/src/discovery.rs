use crate::config::ConfigFile;
use crate::error::{DevctlError, Result};
use crate::runtime::{sort_specs, PluginSpec};
use log::debug;
use std::collections::HashSet;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Executables in `<repo>/plugins/` with this prefix are picked up.
pub const PLUGIN_PREFIX: &str = "devctl-";

/// Priority given to plugins found by the directory scan.
pub const SCANNED_PRIORITY: i64 = 1000;

#[derive(Debug, Clone, Default)]
pub struct DiscoveryOptions {
    pub repo_root: PathBuf,
    pub scan_plugins_dir: bool,
}

/// Turns the config file (plus an optional directory scan) into plugin
/// specs in run order.
pub fn discover(cfg: &ConfigFile, opts: &DiscoveryOptions) -> Result<Vec<PluginSpec>> {
    let mut specs = Vec::with_capacity(cfg.plugins.len());
    let mut seen = HashSet::new();

    for entry in &cfg.plugins {
        let id = entry.id.trim();
        if id.is_empty() {
            return Err(DevctlError::Discovery("plugin entry without id".into()));
        }
        if !seen.insert(id.to_string()) {
            return Err(DevctlError::Discovery(format!("duplicate plugin id {:?}", id)));
        }
        if entry.path.trim().is_empty() {
            return Err(DevctlError::Discovery(format!("plugin {:?} has no path", id)));
        }
        specs.push(PluginSpec {
            id: id.to_string(),
            path: resolve_path(&opts.repo_root, id, &entry.path)?,
            args: entry.args.clone(),
            env: entry.env.clone(),
            workdir: resolve_workdir(&opts.repo_root, &entry.workdir),
            priority: entry.priority,
        });
    }

    if opts.scan_plugins_dir {
        for spec in scan_dir(&opts.repo_root.join("plugins"), &opts.repo_root)? {
            if seen.insert(spec.id.clone()) {
                specs.push(spec);
            } else {
                debug!("plugin {} already configured, skipping scanned copy", spec.id);
            }
        }
    }

    sort_specs(&mut specs);
    Ok(specs)
}

/// Absolute paths are kept, paths with a separator are repo-relative and
/// must exist, bare names are left for `PATH` lookup at spawn time.
fn resolve_path(repo_root: &Path, id: &str, raw: &str) -> Result<PathBuf> {
    let path = Path::new(raw);
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    if raw.contains('/') {
        let joined = repo_root.join(path);
        if !joined.exists() {
            return Err(DevctlError::Discovery(format!(
                "plugin {:?}: {} does not exist",
                id,
                joined.display()
            )));
        }
        return Ok(joined);
    }
    Ok(path.to_path_buf())
}

fn resolve_workdir(repo_root: &Path, raw: &str) -> PathBuf {
    if raw.is_empty() {
        return repo_root.to_path_buf();
    }
    let path = Path::new(raw);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        repo_root.join(path)
    }
}

fn scan_dir(dir: &Path, repo_root: &Path) -> Result<Vec<PluginSpec>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut found = Vec::new();
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        let id = match name.strip_prefix(PLUGIN_PREFIX) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => continue,
        };
        let meta = entry.metadata()?;
        if !meta.is_file() || meta.permissions().mode() & 0o111 == 0 {
            continue;
        }
        found.push(PluginSpec {
            id,
            path: entry.path(),
            workdir: repo_root.to_path_buf(),
            priority: SCANNED_PRIORITY,
            ..PluginSpec::default()
        });
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PluginEntry;

    fn entry(id: &str, path: &str, priority: i64) -> PluginEntry {
        PluginEntry {
            id: id.into(),
            path: path.into(),
            priority,
            ..PluginEntry::default()
        }
    }

    fn opts(root: &Path) -> DiscoveryOptions {
        DiscoveryOptions {
            repo_root: root.to_path_buf(),
            scan_plugins_dir: false,
        }
    }

    #[test]
    fn resolves_paths_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("tools")).unwrap();
        std::fs::write(dir.path().join("tools/p.sh"), "").unwrap();
        let cfg = ConfigFile {
            plugins: vec![
                entry("b", "/usr/bin/b", 10),
                entry("a", "tools/p.sh", 10),
                entry("c", "on-path", 5),
            ],
            ..ConfigFile::default()
        };
        let specs = discover(&cfg, &opts(dir.path())).unwrap();
        let ids: Vec<_> = specs.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["c", "a", "b"]);
        assert_eq!(specs[0].path, PathBuf::from("on-path"));
        assert_eq!(specs[1].path, dir.path().join("tools/p.sh"));
        assert_eq!(specs[1].workdir, dir.path());
    }

    #[test]
    fn rejects_bad_entries() {
        let dir = tempfile::tempdir().unwrap();
        let dup = ConfigFile {
            plugins: vec![entry("a", "x", 0), entry("a", "y", 0)],
            ..ConfigFile::default()
        };
        assert!(discover(&dup, &opts(dir.path())).is_err());

        let missing = ConfigFile {
            plugins: vec![entry("a", "./nope/plugin", 0)],
            ..ConfigFile::default()
        };
        assert!(discover(&missing, &opts(dir.path())).is_err());

        let no_path = ConfigFile {
            plugins: vec![entry("a", "", 0)],
            ..ConfigFile::default()
        };
        assert!(discover(&no_path, &opts(dir.path())).is_err());
    }

    #[test]
    fn scans_plugins_dir() {
        let dir = tempfile::tempdir().unwrap();
        let plugins = dir.path().join("plugins");
        std::fs::create_dir_all(&plugins).unwrap();
        for name in ["devctl-lint", "devctl-web", "README"] {
            let p = plugins.join(name);
            std::fs::write(&p, "#!/bin/sh\n").unwrap();
            std::fs::set_permissions(&p, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        std::fs::write(plugins.join("devctl-notexec"), "").unwrap();

        let cfg = ConfigFile {
            plugins: vec![entry("web", "/opt/web", 0)],
            ..ConfigFile::default()
        };
        let specs = discover(
            &cfg,
            &DiscoveryOptions {
                repo_root: dir.path().to_path_buf(),
                scan_plugins_dir: true,
            },
        )
        .unwrap();
        let ids: Vec<_> = specs.iter().map(|s| (s.id.as_str(), s.priority)).collect();
        assert_eq!(ids, [("web", 0), ("lint", SCANNED_PRIORITY)]);
    }
}
