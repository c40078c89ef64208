use crate::errors::ProtocolError;
use crate::model::{Handshake, PROTOCOL_VERSION};
use std::collections::HashSet;

/// Checks a decoded handshake before the host accepts the plugin.
///
/// # Returns
///
/// * `Ok(())` when the version matches, the name is set, op and command
///   names are unique and every command argument has a name and a type.
/// * `Err` tagged `E_PROTOCOL_INVALID_HANDSHAKE` otherwise.
pub fn validate_handshake(hs: &Handshake) -> Result<(), ProtocolError> {
    if hs.protocol_version != PROTOCOL_VERSION {
        return Err(ProtocolError::invalid_handshake(format!(
            "unsupported protocol_version {:?} (want {:?})",
            hs.protocol_version, PROTOCOL_VERSION
        )));
    }
    if hs.plugin_name.trim().is_empty() {
        return Err(ProtocolError::invalid_handshake("missing plugin_name"));
    }

    let mut ops = HashSet::new();
    for op in &hs.capabilities.ops {
        if op.is_empty() {
            return Err(ProtocolError::invalid_handshake("empty op name"));
        }
        if !ops.insert(op.as_str()) {
            return Err(ProtocolError::invalid_handshake(format!(
                "duplicate op {:?}",
                op
            )));
        }
    }

    let mut commands = HashSet::new();
    for cmd in &hs.capabilities.commands {
        if cmd.name.trim().is_empty() {
            return Err(ProtocolError::invalid_handshake("command with empty name"));
        }
        if !commands.insert(cmd.name.as_str()) {
            return Err(ProtocolError::invalid_handshake(format!(
                "duplicate command {:?}",
                cmd.name
            )));
        }
        for arg in &cmd.args_spec {
            if arg.name.trim().is_empty() || arg.kind.trim().is_empty() {
                return Err(ProtocolError::invalid_handshake(format!(
                    "command {:?}: argument needs a name and a type",
                    cmd.name
                )));
            }
        }
    }
    Ok(())
}
