use super::types::{CommandInput, CommandOutput};
use crate::error::{DevctlError, Result};
use crate::patch::Config;
use crate::runtime::{call_typed, Client, OpContext};
use log::warn;
use plugin_protocol::model::ops;
use plugin_protocol::CommandSpec;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Commands plugins contribute, each owned by the first plugin declaring it.
#[derive(Default)]
pub struct CommandRegistry {
    commands: BTreeMap<String, (CommandSpec, Arc<dyn Client>)>,
}

impl CommandRegistry {
    /// Indexes the commands of `clients`, taken in run order.
    pub fn collect(clients: &[Arc<dyn Client>]) -> Self {
        let mut commands: BTreeMap<String, (CommandSpec, Arc<dyn Client>)> = BTreeMap::new();
        for client in clients {
            for cmd in &client.handshake().capabilities.commands {
                if let Some((_, owner)) = commands.get(&cmd.name) {
                    warn!(
                        "command {} from {} ignored, already provided by {}",
                        cmd.name,
                        client.id(),
                        owner.id()
                    );
                    continue;
                }
                commands.insert(cmd.name.clone(), (cmd.clone(), client.clone()));
            }
        }
        Self { commands }
    }

    pub fn specs(&self) -> impl Iterator<Item = &CommandSpec> {
        self.commands.values().map(|(spec, _)| spec)
    }

    pub fn owner(&self, name: &str) -> Option<&str> {
        self.commands.get(name).map(|(_, c)| c.id())
    }

    /// Runs `name` through its owner's `command.run`.
    ///
    /// # Returns
    ///
    /// * `Ok(0)` when the plugin reports success.
    /// * `Err` for unknown commands, plugin failures and non-zero exit codes.
    pub async fn run(
        &self,
        ctx: &OpContext,
        name: &str,
        argv: &[String],
        config: &Config,
    ) -> Result<i32> {
        let (_, client) = self.commands.get(name).ok_or_else(|| DevctlError::Command {
            name: name.to_string(),
            message: "no plugin provides this command".to_string(),
        })?;
        let out: CommandOutput = call_typed(
            client.as_ref(),
            ctx,
            ops::COMMAND_RUN,
            &CommandInput { name, argv, config },
        )
        .await?;
        if out.exit_code != 0 {
            return Err(DevctlError::Command {
                name: name.to_string(),
                message: match out.message {
                    Some(m) => format!("exit code {}: {}", out.exit_code, m),
                    None => format!("exit code {}", out.exit_code),
                },
            });
        }
        Ok(out.exit_code)
    }
}
