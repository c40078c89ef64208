use plugin_protocol::errors::{E_RUNTIME, E_UNSUPPORTED};
use plugin_protocol::ProtocolError;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DevctlError>;

/// A plugin answered a request with `ok = false`.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("plugin {plugin_id}: {op} failed: {code}: {message}")]
pub struct OpError {
    pub plugin_id: String,
    pub op: String,
    pub code: String,
    pub message: String,
    pub details: Option<Value>,
}

#[derive(Debug, Error)]
pub enum DevctlError {
    /// Session-fatal framing failure.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Op(#[from] OpError),

    #[error("plugin {plugin_id} does not support op {op:?}")]
    Unsupported { plugin_id: String, op: String },

    #[error("plugin {plugin_id}: {op} returned unusable output: {message}")]
    BadOutput {
        plugin_id: String,
        op: String,
        message: String,
    },

    #[error("plugin {plugin_id}: failed to start: {message}")]
    PluginStart { plugin_id: String, message: String },

    #[error("plugin {plugin_id}: no handshake within {timeout:?}")]
    HandshakeTimeout {
        plugin_id: String,
        timeout: Duration,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("empty dotted key")]
    EmptyKey,

    #[error("cannot {action} {key:?}: path segment {segment:?} is not an object")]
    NotAnObject {
        action: &'static str,
        key: String,
        segment: String,
    },

    #[error("service name collision: {0}")]
    ServiceCollision(String),

    #[error("launch plan contains a service with an empty name")]
    EmptyServiceName,

    #[error("validation failed")]
    ValidationFailed,

    #[error("invalid config: {0}")]
    Config(String),

    #[error("plugin discovery: {0}")]
    Discovery(String),

    #[error("service {service}: {message}")]
    Service { service: String, message: String },

    #[error("service {service}: not ready after {timeout:?}")]
    ReadyTimeout { service: String, timeout: Duration },

    #[error("state: {0}")]
    State(String),

    #[error("command {name:?}: {message}")]
    Command { name: String, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml_bw::Error),
}

impl DevctlError {
    pub fn service(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Service {
            service: service.into(),
            message: message.into(),
        }
    }

    /// The wire code attached to this error, if any.
    pub fn code(&self) -> Option<&str> {
        match self {
            DevctlError::Protocol(e) => Some(e.code),
            DevctlError::Op(e) => Some(e.code.as_str()),
            DevctlError::Unsupported { .. } => Some(E_UNSUPPORTED),
            DevctlError::BadOutput { .. } => Some(E_RUNTIME),
            _ => None,
        }
    }

    pub fn is_deadline(&self) -> bool {
        matches!(self, DevctlError::DeadlineExceeded)
    }
}
