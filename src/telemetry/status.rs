//! Periodic status report
//!
//! Every period the reporter probes the bus, publishes a STATUS record with
//! the current state and then applies simulated sensor drift. A failed probe
//! requests a graceful shutdown and ends the loop.

use std::sync::Arc;
use std::time::Duration;

use comms_shared::{ModuleState, RecordKind};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::state::SharedState;
use crate::task::{ShutdownReason, TaskHandle};
use crate::telemetry::TelemetryPublisher;
use crate::transport::MessageBus;

/// Outcome of one reporting round
#[derive(Debug, Clone, PartialEq)]
pub enum ReportOutcome {
    /// STATUS was published (or attempted) and drift applied
    Reported(ModuleState),
    /// The bus probe failed
    BusLost(String),
}

pub struct StatusReporter {
    bus: Arc<dyn MessageBus>,
    state: SharedState,
    telemetry: TelemetryPublisher,
    period: Duration,
    rng: StdRng,
}

impl StatusReporter {
    /// `seed` makes the drift sequence reproducible
    pub fn new(
        bus: Arc<dyn MessageBus>,
        state: SharedState,
        telemetry: TelemetryPublisher,
        period: Duration,
        seed: Option<u64>,
    ) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            bus,
            state,
            telemetry,
            period,
            rng,
        }
    }

    /// Run one round: probe, report, drift
    pub async fn report(&mut self) -> ReportOutcome {
        if let Err(e) = self.bus.ping().await {
            return ReportOutcome::BusLost(format!("{:#}", e));
        }

        let snapshot = self.state.snapshot().await;
        let record = self
            .telemetry
            .record("Status update", snapshot)
            .kind(RecordKind::Status);
        // publisher already logs failures
        let _ = self.telemetry.publish(record).await;

        let battery_delta: i64 = self.rng.gen_range(-5..5);
        let temperature_delta: f64 = self.rng.gen_range(-5.0..5.0);
        let drifted = self
            .state
            .update(|state| {
                state.apply_drift(battery_delta, temperature_delta);
                state.clone()
            })
            .await;
        debug!(
            "[STATUS] drift applied: battery={}% temperature={:.1}C",
            drifted.battery_level, drifted.temperature
        );
        ReportOutcome::Reported(drifted)
    }

    /// Spawn the reporting loop; a lost bus is reported on `fatal`
    pub fn start(mut self, fatal: mpsc::Sender<ShutdownReason>) -> TaskHandle {
        TaskHandle::spawn("STATUS", move |mut shutdown| async move {
            let mut ticker = interval(self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!("[STATUS] Reporting every {:?}", self.period);

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => {
                        if let ReportOutcome::BusLost(reason) = self.report().await {
                            error!("[STATUS] Bus probe failed: {}. Requesting shutdown", reason);
                            let _ = fatal.send(ShutdownReason::BusLost { reason }).await;
                            break;
                        }
                    }
                }
            }
        })
    }
}
