//! Command executor - decodes and dispatches incoming commands

use anyhow::Result;
use async_trait::async_trait;
use comms_shared::{codec, Command, CommandKind};
use tokio::time::Instant;
use tracing::{info, warn};

use super::handlers::{self, HandlerContext, SimulationConfig};
use crate::dispatcher::MessageHandler;
use crate::state::SharedState;
use crate::telemetry::TelemetryPublisher;

/// Result of command execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResult {
    /// Command ran to completion
    Completed { message: String },
    /// Command refused in the current state; nothing changed
    Rejected { message: String },
    /// Command started but stopped partway
    Aborted { message: String },
    /// Unknown command name; logged only
    Ignored { message: String },
}

/// Executes commands received from the host
pub struct CommandExecutor {
    ctx: HandlerContext,
}

impl CommandExecutor {
    pub fn new(state: SharedState, telemetry: TelemetryPublisher, simulation: SimulationConfig) -> Self {
        Self {
            ctx: HandlerContext {
                state,
                telemetry,
                simulation,
            },
        }
    }

    /// Shared module state
    #[cfg(test)]
    pub fn state(&self) -> &SharedState {
        &self.ctx.state
    }

    /// Execute a decoded command
    pub async fn execute(&self, command: Command) -> CommandResult {
        let started = Instant::now();
        info!(
            "[CMD] Executing command: {} (counter={}, hash={:?})",
            command.name, command.counter, command.hash
        );

        let kind = CommandKind::from_name(&command.name);
        let name = command.name.clone();
        self.ctx.state.update(|state| state.record_command(command)).await;

        let result = match kind {
            Some(CommandKind::InspectPanel) => handlers::handle_inspect_panel(&self.ctx).await,
            Some(CommandKind::PerformManeuver) => handlers::handle_perform_maneuver(&self.ctx).await,
            Some(CommandKind::Resume) => handlers::handle_resume(&self.ctx).await,
            Some(CommandKind::HealthCheck) => handlers::handle_health_check(&self.ctx).await,
            Some(CommandKind::HeatAndClear) => handlers::handle_heat_and_clear(&self.ctx).await,
            Some(CommandKind::InjectFault) => handlers::handle_inject_fault(&self.ctx).await,
            None => CommandResult::Ignored {
                message: format!("unknown command '{}'", name),
            },
        };

        let elapsed = started.elapsed();
        match &result {
            CommandResult::Completed { message } => {
                info!("[CMD] {} completed in {:?}: {}", name, elapsed, message)
            }
            CommandResult::Rejected { message } => {
                warn!("[CMD] {} rejected: {}", name, message)
            }
            CommandResult::Aborted { message } => {
                warn!("[CMD] {} aborted after {:?}: {}", name, elapsed, message)
            }
            CommandResult::Ignored { message } => warn!("[CMD] {}", message),
        }
        result
    }
}

#[async_trait]
impl MessageHandler for CommandExecutor {
    async fn handle(&self, topic: &str, payload: &[u8]) -> Result<()> {
        match codec::decode_command(payload) {
            Ok(command) => {
                self.execute(command).await;
            }
            Err(e) => warn!("[CMD] Dropping undecodable command on {}: {}", topic, e),
        }
        Ok(())
    }
}
