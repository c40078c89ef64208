use crate::error::{DevctlError, Result};
use crate::patch::ConfigPatch;
use plugin_protocol::ErrorBody;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// One service in the launch plan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cwd: String,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthCheck>,
}

/// Readiness probe declared by a plugin for a service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthCheck {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub address: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub timeout_ms: u64,
}

fn is_zero(v: &u64) -> bool {
    *v == 0
}

/// A health check resolved to something the supervisor can poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
    Tcp { address: String },
    Http { url: String },
}

impl HealthCheck {
    pub fn tcp(address: impl Into<String>) -> Self {
        Self {
            kind: "tcp".into(),
            address: address.into(),
            ..Self::default()
        }
    }

    pub fn http(url: impl Into<String>) -> Self {
        Self {
            kind: "http".into(),
            url: url.into(),
            ..Self::default()
        }
    }

    /// Resolves the check for `service`. An http check without a url
    /// falls back to its address.
    pub fn probe(&self, service: &str) -> Result<Probe> {
        match self.kind.as_str() {
            "tcp" if !self.address.is_empty() => Ok(Probe::Tcp {
                address: self.address.clone(),
            }),
            "http" => {
                let url = if self.url.is_empty() { &self.address } else { &self.url };
                if url.is_empty() {
                    return Err(DevctlError::service(service, "http health check without url"));
                }
                Ok(Probe::Http { url: url.clone() })
            }
            "tcp" => Err(DevctlError::service(service, "tcp health check without address")),
            other => Err(DevctlError::service(
                service,
                format!("unknown health check type {:?}", other),
            )),
        }
    }

    /// Per-check override of the supervisor's readiness timeout.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LaunchPlan {
    #[serde(default)]
    pub services: Vec<ServiceSpec>,
}

impl LaunchPlan {
    pub fn names(&self) -> Vec<String> {
        self.services.iter().map(|s| s.name.clone()).collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub name: String,
    pub ok: bool,
    #[serde(default)]
    pub duration_ms: u64,
}

/// Output of `build.run` and `prepare.run`, and their merge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepsResult {
    #[serde(default)]
    pub steps: Vec<StepResult>,
    #[serde(default)]
    pub artifacts: BTreeMap<String, String>,
}

pub type BuildResult = StepsResult;
pub type PrepareResult = StepsResult;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidateResult {
    #[serde(default)]
    pub valid: bool,
    #[serde(default)]
    pub errors: Vec<ErrorBody>,
    #[serde(default)]
    pub warnings: Vec<ErrorBody>,
}

/// Wire shapes of the phase ops.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct ConfigInput<'a> {
    pub config: &'a crate::patch::Config,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct MutateOutput {
    #[serde(default)]
    pub config_patch: ConfigPatch,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct CommandInput<'a> {
    pub name: &'a str,
    pub argv: &'a [String],
    pub config: &'a crate::patch::Config,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct CommandOutput {
    #[serde(default)]
    pub exit_code: i32,
    #[serde(default)]
    pub message: Option<String>,
}
