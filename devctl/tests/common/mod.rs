#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use devctl_core::process::process_alive;
use devctl_core::runtime::{Factory, FactoryOptions, PluginClient, PluginSpec, RequestMeta};
use tempfile::TempDir;

pub const FIXTURE: &str = env!("CARGO_BIN_EXE_devctl-fixture-plugin");
pub const HTTP_ECHO: &str = env!("CARGO_BIN_EXE_http-echo");
pub const CRASH_AFTER: &str = env!("CARGO_BIN_EXE_crash-after");
pub const DEVCTL: &str = env!("CARGO_BIN_EXE_devctl");

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// One plugin entry in a generated `.devctl.yaml`.
pub struct Entry {
    pub id: &'static str,
    pub args: Vec<String>,
    pub env: Vec<(&'static str, String)>,
    pub priority: i64,
}

impl Entry {
    pub fn new(id: &'static str, args: &[&str]) -> Self {
        Self {
            id,
            args: args.iter().map(|s| s.to_string()).collect(),
            env: Vec::new(),
            priority: 0,
        }
    }

    pub fn env(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.env.push((key, value.into()));
        self
    }

    pub fn priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }
}

/// A scratch repository whose config runs the fixture plugin.
pub fn repo(entries: &[Entry]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let mut yaml = String::from("plugins:\n");
    for e in entries {
        yaml.push_str(&format!("  - id: {}\n    path: {}\n", e.id, FIXTURE));
        yaml.push_str(&format!("    priority: {}\n", e.priority));
        let args: Vec<String> = e.args.iter().map(|a| format!("{:?}", a)).collect();
        yaml.push_str(&format!("    args: [{}]\n", args.join(", ")));
        if !e.env.is_empty() {
            yaml.push_str("    env:\n");
            for (k, v) in &e.env {
                yaml.push_str(&format!("      {}: {:?}\n", k, v));
            }
        }
    }
    std::fs::write(dir.path().join(".devctl.yaml"), yaml).unwrap();
    dir
}

pub fn fixture_spec(id: &str, mode: &str) -> PluginSpec {
    let mut spec = PluginSpec::new(id, FIXTURE);
    spec.args = vec![mode.to_string()];
    spec
}

pub async fn start_fixture(mode: &str) -> devctl_core::Result<PluginClient> {
    let factory = Factory::new(FactoryOptions::default());
    factory.start(&fixture_spec(mode, mode), RequestMeta::default()).await
}

pub async fn wait_gone(pid: i32, within: Duration) -> bool {
    let deadline = Instant::now() + within;
    while Instant::now() < deadline {
        if !process_alive(pid) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    !process_alive(pid)
}

pub fn state_file(root: &Path) -> PathBuf {
    devctl_core::state::state_path(root)
}
