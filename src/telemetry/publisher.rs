//! Telemetry publisher
//!
//! Stamps records with a fresh message id, encodes them and publishes them on
//! the telemetry topic. Failures are logged here and returned to the caller.

use std::sync::Arc;

use anyhow::{Context, Result};
use comms_shared::{codec, ModuleState, TelemetryRecord};
use tracing::{debug, error};
use uuid::Uuid;

use crate::transport::MessageBus;

#[derive(Clone)]
pub struct TelemetryPublisher {
    bus: Arc<dyn MessageBus>,
    topic: String,
}

impl TelemetryPublisher {
    pub fn new(bus: Arc<dyn MessageBus>, topic: impl Into<String>) -> Self {
        Self {
            bus,
            topic: topic.into(),
        }
    }

    /// Start a record with a fresh id and the given state snapshot
    pub fn record(&self, message: impl Into<String>, state: ModuleState) -> TelemetryRecord {
        TelemetryRecord::new(Uuid::new_v4().to_string(), message, state)
    }

    /// Encode and publish a record
    pub async fn publish(&self, record: TelemetryRecord) -> Result<usize> {
        let result = self.try_publish(&record).await;
        match &result {
            Ok(receivers) => debug!(
                "[TELEMETRY] '{}' published to {} ({} receivers)",
                record.message, self.topic, receivers
            ),
            Err(e) => error!(
                "[TELEMETRY] failed to publish '{}' to {}: {:#}",
                record.message, self.topic, e
            ),
        }
        result
    }

    async fn try_publish(&self, record: &TelemetryRecord) -> Result<usize> {
        let payload = codec::encode_telemetry(record).context("encoding telemetry")?;
        self.bus.publish(&self.topic, payload).await
    }
}
