use crate::error::{DevctlError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = ".devctl.yaml";

/// Contents of `.devctl.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub plugins: Vec<PluginEntry>,
    #[serde(default)]
    pub strictness: Strictness,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginEntry {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub workdir: String,
    #[serde(default)]
    pub priority: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strictness {
    #[default]
    Warn,
    Error,
}

pub fn default_path(repo_root: &Path) -> PathBuf {
    repo_root.join(CONFIG_FILE_NAME)
}

impl ConfigFile {
    pub fn from_yaml(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml_bw::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            DevctlError::Config(format!("read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&text)
            .map_err(|e| DevctlError::Config(format!("parse {}: {}", path.display(), e)))
    }

    /// Like [`ConfigFile::load`], but a missing file yields an empty config.
    pub fn load_optional(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn is_strict(&self) -> bool {
        self.strictness == Strictness::Error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_file() {
        let cfg = ConfigFile::from_yaml(
            r#"
plugins:
  - id: web
    path: ./plugins/web.sh
    args: ["--fast"]
    env:
      LOG_LEVEL: debug
      camelCaseKey: kept
    workdir: web
    priority: 5
  - id: db
    path: devctl-db
strictness: error
"#,
        )
        .unwrap();
        assert!(cfg.is_strict());
        assert_eq!(cfg.plugins.len(), 2);
        let web = &cfg.plugins[0];
        assert_eq!(web.args, vec!["--fast".to_string()]);
        assert_eq!(web.env.get("camelCaseKey").map(String::as_str), Some("kept"));
        assert_eq!(web.priority, 5);
        assert_eq!(cfg.plugins[1].priority, 0);
    }

    #[test]
    fn missing_file_is_empty_config() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ConfigFile::load_optional(&default_path(dir.path())).unwrap();
        assert!(cfg.plugins.is_empty());
        assert!(!cfg.is_strict());
        assert!(ConfigFile::load(&default_path(dir.path())).is_err());
    }

    #[test]
    fn rejects_unknown_strictness() {
        assert!(ConfigFile::from_yaml("strictness: loud\n").is_err());
    }
}
