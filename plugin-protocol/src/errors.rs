use thiserror::Error;

pub const E_PROTOCOL_STDOUT_CONTAMINATION: &str = "E_PROTOCOL_STDOUT_CONTAMINATION";
pub const E_PROTOCOL_INVALID_JSON: &str = "E_PROTOCOL_INVALID_JSON";
pub const E_PROTOCOL_UNEXPECTED_FRAME: &str = "E_PROTOCOL_UNEXPECTED_FRAME";
pub const E_PROTOCOL_INVALID_HANDSHAKE: &str = "E_PROTOCOL_INVALID_HANDSHAKE";
pub const E_UNSUPPORTED: &str = "E_UNSUPPORTED";
pub const E_RUNTIME: &str = "E_RUNTIME";

/// A framing or session failure, tagged with one of the reserved codes.
///
/// Protocol errors end the plugin session: every in-flight request fails
/// with a copy of the error that killed the reader.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct ProtocolError {
    pub code: &'static str,
    pub message: String,
}

impl ProtocolError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn stdout_contamination(msg: impl Into<String>) -> Self {
        Self::new(E_PROTOCOL_STDOUT_CONTAMINATION, msg)
    }

    pub fn invalid_json(msg: impl Into<String>) -> Self {
        Self::new(E_PROTOCOL_INVALID_JSON, msg)
    }

    pub fn unexpected_frame(msg: impl Into<String>) -> Self {
        Self::new(E_PROTOCOL_UNEXPECTED_FRAME, msg)
    }

    pub fn invalid_handshake(msg: impl Into<String>) -> Self {
        Self::new(E_PROTOCOL_INVALID_HANDSHAKE, msg)
    }

    pub fn runtime(msg: impl Into<String>) -> Self {
        Self::new(E_RUNTIME, msg)
    }
}
