//! Line codec: one JSON object per line, newline terminated.

use crate::errors::ProtocolError;
use crate::messages::{Event, Frame, Response};
use crate::model::Handshake;
use crate::validate::validate_handshake;
use serde_json::Value;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Frames a plugin is allowed to send once the handshake is done.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Response(Response),
    Event(Event),
}

pub fn encode_frame(frame: &Frame) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = serde_json::to_vec(frame)
        .map_err(|e| ProtocolError::runtime(format!("encode {} frame: {}", frame.kind(), e)))?;
    buf.push(b'\n');
    Ok(buf)
}

/// Writes one frame and flushes, so the peer always sees whole lines.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let buf = encode_frame(frame)?;
    writer
        .write_all(&buf)
        .await
        .map_err(|e| ProtocolError::runtime(format!("write {} frame: {}", frame.kind(), e)))?;
    writer
        .flush()
        .await
        .map_err(|e| ProtocolError::runtime(format!("flush: {}", e)))
}

/// Parses a single line into a frame.
///
/// Lines that are not JSON objects with a string `type` are
/// `E_PROTOCOL_INVALID_JSON`; a well formed object of an unknown type is
/// `E_PROTOCOL_UNEXPECTED_FRAME`.
pub fn decode_frame(line: &str) -> Result<Frame, ProtocolError> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Err(ProtocolError::invalid_json("empty line"));
    }
    let value: Value = serde_json::from_str(line)
        .map_err(|e| ProtocolError::invalid_json(format!("{}: {}", e, preview(line))))?;
    let kind = match value.get("type") {
        Some(Value::String(kind)) => kind.clone(),
        _ => {
            return Err(ProtocolError::invalid_json(format!(
                "frame without a string type: {}",
                preview(line)
            )))
        }
    };
    if !matches!(kind.as_str(), "handshake" | "request" | "response" | "event") {
        return Err(ProtocolError::unexpected_frame(format!(
            "unknown frame type {:?}",
            kind
        )));
    }
    serde_json::from_value(value)
        .map_err(|e| ProtocolError::invalid_json(format!("bad {} frame: {}", kind, e)))
}

/// Decodes a line read from a plugin after its handshake was accepted.
pub fn decode_incoming(line: &str) -> Result<Incoming, ProtocolError> {
    match decode_frame(line)? {
        Frame::Response(resp) => Ok(Incoming::Response(resp)),
        Frame::Event(ev) => Ok(Incoming::Event(ev)),
        other => Err(ProtocolError::unexpected_frame(format!(
            "unexpected {} frame after handshake",
            other.kind()
        ))),
    }
}

/// Decodes and validates the very first line a plugin prints.
///
/// Anything that is not JSON at all means the plugin polluted its stdout
/// before speaking the protocol.
pub fn decode_handshake(line: &str) -> Result<Handshake, ProtocolError> {
    let line = line.trim_end_matches(['\r', '\n']);
    if serde_json::from_str::<Value>(line).is_err() {
        return Err(ProtocolError::stdout_contamination(format!(
            "first stdout line is not JSON: {}",
            preview(line)
        )));
    }
    let hs = match decode_frame(line) {
        Ok(Frame::Handshake(hs)) => hs,
        Ok(other) => {
            return Err(ProtocolError::invalid_handshake(format!(
                "expected handshake, got {} frame",
                other.kind()
            )))
        }
        Err(e) => return Err(ProtocolError::invalid_handshake(e.message)),
    };
    validate_handshake(&hs)?;
    Ok(hs)
}

fn preview(line: &str) -> String {
    const MAX: usize = 120;
    if line.len() <= MAX {
        return line.to_string();
    }
    let mut end = MAX;
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &line[..end])
}
