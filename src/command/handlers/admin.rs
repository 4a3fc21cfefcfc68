//! Maintenance handlers: consumable reset and fault injection

use comms_shared::{safety, ModuleEvent, RecordKind};
use tracing::{info, warn};

use super::resume::report_resume;
use super::HandlerContext;
use crate::command::CommandResult;

/// Handle HEAT_AND_CLEAR
///
/// Resets battery and temperature and evaluates RESUME against the reset
/// values, all in one critical section.
pub async fn handle_heat_and_clear(ctx: &HandlerContext) -> CommandResult {
    let (result, snapshot) = ctx
        .state
        .update(|state| {
            state.recharge(safety::BATTERY_FULL_PERCENT, safety::TEMPERATURE_HEATED_C);
            let result = state.process_event(ModuleEvent::Resumed);
            (result, state.clone())
        })
        .await;
    info!(
        "[ADMIN] Module heated and cleared: battery={}% temperature={:.1}C",
        snapshot.battery_level, snapshot.temperature
    );
    report_resume(ctx, result, snapshot).await
}

/// Handle INJECT_FAULT
///
/// Drains the consumables and latches SAFE. Used to exercise fault handling
/// on the host side.
pub async fn handle_inject_fault(ctx: &HandlerContext) -> CommandResult {
    let (result, snapshot) = ctx
        .state
        .update(|state| {
            let result = state.inject_fault();
            (result, state.clone())
        })
        .await;
    warn!("[ADMIN] Fault injected ({:?})", result);

    let record = ctx
        .telemetry
        .record("Fault injected", snapshot)
        .kind(RecordKind::Fault)
        .return_params(["FAULT INJECTED"]);
    ctx.report(record).await;

    CommandResult::Completed {
        message: "fault injected, module in SAFE".into(),
    }
}
