//! Command handlers for each command kind
//!
//! Handlers hold the state lock only long enough to transition or snapshot.
//! Simulated work (capture, maneuver steps) happens with the lock released.

mod admin;
mod health;
mod inspect;
mod maneuver;
mod resume;

pub use admin::{handle_heat_and_clear, handle_inject_fault};
pub use health::handle_health_check;
pub use inspect::handle_inspect_panel;
pub use maneuver::handle_perform_maneuver;
pub use resume::handle_resume;

use std::time::Duration;

use comms_shared::TelemetryRecord;
use rand::Rng;

use crate::state::SharedState;
use crate::telemetry::TelemetryPublisher;

/// Timing of the simulated work
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Shortest simulated image capture
    pub inspect_min: Duration,
    /// Longest simulated image capture
    pub inspect_max: Duration,
    /// Delay between maneuver progress steps
    pub maneuver_step: Duration,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            inspect_min: Duration::from_millis(200),
            inspect_max: Duration::from_millis(2000),
            maneuver_step: Duration::from_millis(50),
        }
    }
}

impl SimulationConfig {
    /// No simulated delays
    #[cfg(test)]
    pub fn instant() -> Self {
        Self {
            inspect_min: Duration::ZERO,
            inspect_max: Duration::ZERO,
            maneuver_step: Duration::ZERO,
        }
    }

    /// Random capture time within the configured bounds
    pub fn capture_duration(&self) -> Duration {
        if self.inspect_max <= self.inspect_min {
            return self.inspect_min;
        }
        rand::thread_rng().gen_range(self.inspect_min..=self.inspect_max)
    }
}

/// Context passed to command handlers
#[derive(Clone)]
pub struct HandlerContext {
    pub state: SharedState,
    pub telemetry: TelemetryPublisher,
    pub simulation: SimulationConfig,
}

impl HandlerContext {
    /// Publish a record. Failures are logged by the publisher and do not
    /// abort the command.
    pub async fn report(&self, record: TelemetryRecord) {
        let _ = self.telemetry.publish(record).await;
    }
}
