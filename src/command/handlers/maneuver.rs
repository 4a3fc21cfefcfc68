//! Maneuver (thrust) handler

use comms_shared::{ModuleEvent, ModuleStatus, RecordKind, TransitionResult};
use tokio::time::sleep;
use tracing::{info, warn};

use super::HandlerContext;
use crate::command::CommandResult;

/// Progress is reported at every multiple of this percentage
const PROGRESS_REPORT_STEP: u32 = 20;

/// Handle PERFORM_MANEUVER
///
/// Runs 0..=100% in single-percent steps. Before every step the safety
/// predicate is re-evaluated against fresh state; a failed check, or SAFE
/// being latched by the heartbeat monitor mid-flight, aborts the maneuver.
/// An aborted maneuver leaves the status as it found it. While another
/// activity is still in flight, completion leaves the module ACTIVE.
pub async fn handle_perform_maneuver(ctx: &HandlerContext) -> CommandResult {
    let (result, snapshot) = ctx.state.transition(ModuleEvent::ManeuverStarted).await;
    if let TransitionResult::Invalid { from, .. } = result {
        warn!("[MANEUVER] Cannot start maneuver while module is {}", from);
        let record = ctx
            .telemetry
            .record("Thrust aborted", snapshot)
            .kind(RecordKind::RetValue)
            .return_params(["THRUST ABORTED: Mod in SAFE"]);
        ctx.report(record).await;
        return CommandResult::Rejected {
            message: format!("maneuver rejected, module is {}", from),
        };
    }

    let mut progress: Vec<String> = Vec::new();
    for percent in 0..=100u32 {
        let snapshot = ctx.state.snapshot().await;
        if !snapshot.is_safe() || snapshot.status() == ModuleStatus::Safe {
            let (_, snapshot) = ctx.state.transition(ModuleEvent::ActivityAborted).await;
            warn!(
                "[MANEUVER] Aborted at {}%: battery={}% temperature={:.1}C status={}",
                percent,
                snapshot.battery_level,
                snapshot.temperature,
                snapshot.status()
            );
            progress.push("THRUST ABORTED".to_string());
            let record = ctx
                .telemetry
                .record("Thrust aborted", snapshot)
                .kind(RecordKind::RetValue)
                .return_params(progress);
            ctx.report(record).await;
            return CommandResult::Aborted {
                message: format!("maneuver aborted at {}%", percent),
            };
        }

        if percent % PROGRESS_REPORT_STEP == 0 {
            progress.push(format!("Thrust in prog: {}%", percent));
            let record = ctx
                .telemetry
                .record("Thrust in progress", snapshot)
                .kind(RecordKind::RetValue)
                .return_params(progress.clone());
            ctx.report(record).await;
        }

        sleep(ctx.simulation.maneuver_step).await;
    }

    let (_, snapshot) = ctx.state.transition(ModuleEvent::ActivityFinished).await;
    info!("[MANEUVER] Complete");
    progress.push("Thrust Complete".to_string());
    let record = ctx
        .telemetry
        .record("Thrust Done", snapshot)
        .kind(RecordKind::RetValue)
        .return_params(progress);
    ctx.report(record).await;

    CommandResult::Completed {
        message: "maneuver complete".into(),
    }
}
