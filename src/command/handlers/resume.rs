//! Resume handler

use comms_shared::{ModuleEvent, ModuleState, RecordKind, TransitionResult};
use tracing::{info, warn};

use super::HandlerContext;
use crate::command::CommandResult;

/// Handle RESUME
///
/// Returns the module to IDLE when the safety predicate holds. Otherwise the
/// state is left untouched, including a latched SAFE.
pub async fn handle_resume(ctx: &HandlerContext) -> CommandResult {
    let (result, snapshot) = ctx.state.transition(ModuleEvent::Resumed).await;
    report_resume(ctx, result, snapshot).await
}

/// Publish the outcome of a resume attempt
pub(super) async fn report_resume(
    ctx: &HandlerContext,
    result: TransitionResult,
    snapshot: ModuleState,
) -> CommandResult {
    match result {
        TransitionResult::Success(_) => {
            info!("[RESUME] Safe to resume panel operations");
            let record = ctx
                .telemetry
                .record("Resuming panel operations", snapshot)
                .kind(RecordKind::RetValue)
                .return_params(["Preparing to resume", "Safe to resume"]);
            ctx.report(record).await;
            CommandResult::Completed {
                message: "resumed".into(),
            }
        }
        TransitionResult::Invalid { from, .. } => {
            warn!(
                "[RESUME] Unsafe to resume: battery={}% temperature={:.1}C status={}",
                snapshot.battery_level, snapshot.temperature, from
            );
            let record = ctx
                .telemetry
                .record("Can not resume panel operations", snapshot)
                .kind(RecordKind::RetValue)
                .return_params(["Preparing to resume", "Unsafe to resume"]);
            ctx.report(record).await;
            CommandResult::Rejected {
                message: "unsafe to resume".into(),
            }
        }
    }
}
