//! Panel inspection handler

use comms_shared::{ModuleEvent, RecordKind, TransitionResult};
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::HandlerContext;
use crate::command::CommandResult;

/// Handle INSPECT_PANEL
///
/// Only accepted from IDLE. The module stays ACTIVE for the simulated capture
/// and returns to IDLE once the image reference has been reported.
pub async fn handle_inspect_panel(ctx: &HandlerContext) -> CommandResult {
    let (result, snapshot) = ctx.state.transition(ModuleEvent::InspectionStarted).await;
    if let TransitionResult::Invalid { from, .. } = result {
        warn!(
            "[INSPECT] Cannot inspect panel while module is not IDLE. Current status: {}",
            from
        );
        let record = ctx
            .telemetry
            .record("Panel inspection aborted", snapshot)
            .kind(RecordKind::RetValue)
            .return_params(["INS ABORTED: Mod not IDLE"]);
        ctx.report(record).await;
        return CommandResult::Rejected {
            message: format!("inspection aborted, module is {}", from),
        };
    }

    let capture = ctx.simulation.capture_duration();
    debug!("[INSPECT] Capturing image ({:?})", capture);
    sleep(capture).await;

    let image = format!("uri://{}", Uuid::new_v4());
    info!("[INSPECT] Photograph taken: {}", image);

    let snapshot = ctx.state.snapshot().await;
    let record = ctx
        .telemetry
        .record("Photograph taken", snapshot)
        .kind(RecordKind::RetValue)
        .return_params(["OK", "image_captured", image.as_str()]);
    ctx.report(record).await;

    ctx.state.transition(ModuleEvent::ActivityFinished).await;

    CommandResult::Completed {
        message: format!("image captured: {}", image),
    }
}
