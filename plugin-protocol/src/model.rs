use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The only protocol version this runtime speaks.
pub const PROTOCOL_VERSION: &str = "v2";

/// First frame a plugin writes on stdout.
///
/// Declares who the plugin is and what it can do. The host refuses to talk
/// to a plugin whose handshake does not pass [`crate::validate::validate_handshake`].
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Handshake {
    pub protocol_version: String,
    pub plugin_name: String,
    #[serde(default)]
    pub capabilities: Capabilities,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "crate::messages::present"
    )]
    pub declares: Option<Value>,
}

impl Handshake {
    pub fn new(plugin_name: impl Into<String>, capabilities: Capabilities) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.to_string(),
            plugin_name: plugin_name.into(),
            capabilities,
            declares: None,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Capabilities {
    #[serde(default)]
    pub ops: Vec<String>,
    #[serde(default)]
    pub streams: Vec<String>,
    #[serde(default)]
    pub commands: Vec<CommandSpec>,
}

impl Capabilities {
    pub fn with_ops<I, S>(ops: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ops: ops.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn has_op(&self, op: &str) -> bool {
        self.ops.iter().any(|o| o == op)
    }

    pub fn has_stream(&self, op: &str) -> bool {
        self.streams.iter().any(|o| o == op)
    }
}

/// A user-facing command a plugin contributes, run through `command.run`.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct CommandSpec {
    pub name: String,
    #[serde(default)]
    pub help: String,
    #[serde(default)]
    pub args_spec: Vec<CommandArg>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct CommandArg {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Operation names the host pipeline calls when a plugin declares them.
pub mod ops {
    pub const CONFIG_MUTATE: &str = "config.mutate";
    pub const BUILD_RUN: &str = "build.run";
    pub const PREPARE_RUN: &str = "prepare.run";
    pub const VALIDATE_RUN: &str = "validate.run";
    pub const LAUNCH_PLAN: &str = "launch.plan";
    pub const COMMAND_RUN: &str = "command.run";
}
