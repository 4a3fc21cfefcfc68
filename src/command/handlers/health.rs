//! Health check handler

use comms_shared::{ModuleEvent, RecordKind};
use tracing::info;

use super::HandlerContext;
use crate::command::CommandResult;

/// Handle HEALTH_CHECK
pub async fn handle_health_check(ctx: &HandlerContext) -> CommandResult {
    let snapshot = ctx.state.snapshot().await;
    let record = ctx
        .telemetry
        .record("Health check in progress", snapshot.clone());
    ctx.report(record).await;

    let params = [
        format!("BatteryLevel = {}", snapshot.battery_level),
        format!("Temperature = {:.6}", snapshot.temperature),
    ];
    info!("[HEALTH] {}, {}", params[0], params[1]);

    let (_, after) = ctx.state.transition(ModuleEvent::HealthChecked).await;
    let record = ctx
        .telemetry
        .record("Health check completed", after)
        .kind(RecordKind::RetValue)
        .return_params(params);
    ctx.report(record).await;

    CommandResult::Completed {
        message: "health check completed".into(),
    }
}
