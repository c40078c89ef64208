//! On-disk record of what `up` started, read back by `down` and `status`.

mod exit_info;
mod sanitize;
mod tail;

pub use exit_info::{read_exit_info, write_exit_info, ExitInfo};
pub use sanitize::{is_sensitive_key, sanitize_env, REDACTED, SENSITIVE_TOKENS};
pub use tail::{tail_lines, DEFAULT_TAIL_BYTES, DEFAULT_TAIL_LINES};

pub use crate::process::process_alive;

use crate::error::{DevctlError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const STATE_DIR: &str = ".devctl";
pub const STATE_FILE: &str = "state.json";
pub const LOGS_DIR: &str = "logs";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub repo_root: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub services: Vec<ServiceRecord>,
}

impl State {
    pub fn new(repo_root: impl Into<String>, services: Vec<ServiceRecord>) -> Self {
        Self {
            repo_root: repo_root.into(),
            created_at: Utc::now(),
            services,
        }
    }

    pub fn service(&self, name: &str) -> Option<&ServiceRecord> {
        self.services.iter().find(|s| s.name == name)
    }
}

/// What the supervisor knows about one running service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub name: String,
    /// Leader of the service's process group.
    pub pid: i32,
    /// In wrapper mode, the wrapped child, which leads its own group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_pid: Option<i32>,
    pub command: Vec<String>,
    pub cwd: String,
    /// Sanitized: sensitive values are redacted.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    pub stdout_log: PathBuf,
    pub stderr_log: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_info: Option<PathBuf>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_url: Option<String>,
}

impl ServiceRecord {
    pub fn alive(&self) -> bool {
        process_alive(self.pid)
    }
}

pub fn state_dir(repo_root: &Path) -> PathBuf {
    repo_root.join(STATE_DIR)
}

pub fn state_path(repo_root: &Path) -> PathBuf {
    state_dir(repo_root).join(STATE_FILE)
}

pub fn logs_dir(repo_root: &Path) -> PathBuf {
    state_dir(repo_root).join(LOGS_DIR)
}

pub fn exists(repo_root: &Path) -> bool {
    state_path(repo_root).is_file()
}

/// Loads `<repo>/.devctl/state.json`.
///
/// # Returns
///
/// * `Ok(State)` when the file exists and parses.
/// * `Err` if it is missing, unreadable or malformed.
pub fn load(repo_root: &Path) -> Result<State> {
    let path = state_path(repo_root);
    let file = std::fs::File::open(&path)
        .map_err(|e| DevctlError::State(format!("open {}: {}", path.display(), e)))?;
    let reader = std::io::BufReader::new(file);
    serde_json::from_reader(reader)
        .map_err(|e| DevctlError::State(format!("parse {}: {}", path.display(), e)))
}

/// Writes the state as pretty JSON, creating `.devctl/` first.
///
/// The document lands in a temporary file that is renamed over the target,
/// so readers never observe a half-written state.
pub fn save(repo_root: &Path, state: &State) -> Result<()> {
    let path = state_path(repo_root);
    std::fs::create_dir_all(state_dir(repo_root))?;

    let json = serde_json::to_string_pretty(state)?;
    let temp_path = path.with_extension("json.tmp");
    let mut temp_file = std::fs::File::create(&temp_path)?;
    temp_file.write_all(json.as_bytes())?;
    temp_file.sync_all()?;
    std::fs::rename(&temp_path, &path)?;
    Ok(())
}

/// Deletes the state file. A missing file is fine.
pub fn remove(repo_root: &Path) -> Result<()> {
    match std::fs::remove_file(state_path(repo_root)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Status of one recorded service as seen right now.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub name: String,
    pub pid: i32,
    pub alive: bool,
    pub stdout_log: PathBuf,
    pub stderr_log: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit: Option<ExitInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stderr_tail: Vec<String>,
}

/// Probes every recorded service. Dead ones carry their exit info when a
/// wrapper wrote one, otherwise the last `tail` lines of their stderr.
pub fn service_status(state: &State, tail: usize) -> Vec<ServiceStatus> {
    state
        .services
        .iter()
        .map(|rec| {
            let alive = rec.alive();
            let exit = match (&rec.exit_info, alive) {
                (Some(path), false) => read_exit_info(path).ok(),
                _ => None,
            };
            let stderr_tail = if !alive && exit.is_none() {
                tail_lines(&rec.stderr_log, tail, DEFAULT_TAIL_BYTES).unwrap_or_default()
            } else {
                Vec::new()
            };
            ServiceStatus {
                name: rec.name.clone(),
                pid: rec.pid,
                alive,
                stdout_log: rec.stdout_log.clone(),
                stderr_log: rec.stderr_log.clone(),
                exit,
                stderr_tail,
            }
        })
        .collect()
}
