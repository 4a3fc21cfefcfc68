//! Module heartbeat beacon
//!
//! Publishes `{seq, ts}` on a fixed period, both as an expiring liveness key
//! and on the heartbeat broadcast topic.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;
use comms_shared::{now_rfc3339_nanos, safety, topics};
use serde::Serialize;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::task::TaskHandle;
use crate::transport::{LivenessStore, MessageBus};

#[derive(Debug, Clone)]
pub struct BeaconConfig {
    pub key: String,
    pub topic: String,
    pub interval: Duration,
}

impl Default for BeaconConfig {
    fn default() -> Self {
        Self {
            key: topics::MODULE_HEARTBEAT_KEY.to_string(),
            topic: topics::MODULE_HEARTBEAT.to_string(),
            interval: Duration::from_millis(safety::HEARTBEAT_PUBLISH_INTERVAL_MS),
        }
    }
}

impl BeaconConfig {
    /// Key lifetime, two publish periods
    pub fn ttl(&self) -> Duration {
        self.interval * 2
    }
}

#[derive(Debug, Serialize)]
struct Beat {
    seq: u64,
    ts: String,
}

pub struct HeartbeatBeacon {
    bus: Arc<dyn MessageBus>,
    liveness: Arc<dyn LivenessStore>,
    config: BeaconConfig,
    seq: u64,
}

impl HeartbeatBeacon {
    pub fn new(bus: Arc<dyn MessageBus>, liveness: Arc<dyn LivenessStore>, config: BeaconConfig) -> Self {
        Self {
            bus,
            liveness,
            config,
            seq: 0,
        }
    }

    /// Publish one heartbeat, returning its sequence number
    pub async fn beat(&mut self) -> Result<u64> {
        self.seq += 1;
        let payload = serde_json::to_string(&Beat {
            seq: self.seq,
            ts: now_rfc3339_nanos(),
        })?;

        self.liveness
            .store_heartbeat(&self.config.key, &payload, self.config.ttl())
            .await?;
        self.bus
            .publish(&self.config.topic, Bytes::from(payload))
            .await?;
        debug!("[BEACON] heartbeat {} sent", self.seq);
        Ok(self.seq)
    }

    pub fn start(mut self) -> TaskHandle {
        TaskHandle::spawn("BEACON", move |mut shutdown| async move {
            let mut ticker = interval(self.config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!("[BEACON] Publishing heartbeat every {:?}", self.config.interval);

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.beat().await {
                            warn!("[BEACON] Failed to publish heartbeat: {:#}", e);
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryBus;
    use serde_json::Value;

    #[tokio::test]
    async fn test_beat_stores_key_and_broadcasts() {
        let bus = Arc::new(MemoryBus::new());
        let mut beacon = HeartbeatBeacon::new(bus.clone(), bus.clone(), BeaconConfig::default());

        assert_eq!(beacon.beat().await.unwrap(), 1);
        assert_eq!(beacon.beat().await.unwrap(), 2);

        let stored: Value = serde_json::from_str(&bus.stored("heartbeat:latest").unwrap()).unwrap();
        assert_eq!(stored["seq"], 2);
        assert!(stored["ts"].as_str().unwrap().ends_with('Z'));
        assert_eq!(bus.published("heartbeat").len(), 2);
    }

    #[tokio::test]
    async fn test_key_expires_after_ttl() {
        let bus = Arc::new(MemoryBus::new());
        let config = BeaconConfig {
            interval: Duration::from_millis(10),
            ..Default::default()
        };
        let mut beacon = HeartbeatBeacon::new(bus.clone(), bus.clone(), config);

        beacon.beat().await.unwrap();
        assert!(bus.stored("heartbeat:latest").is_some());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(bus.stored("heartbeat:latest").is_none());
    }

    #[tokio::test]
    async fn test_failed_store_is_reported() {
        let bus = Arc::new(MemoryBus::new());
        bus.fail_liveness(true);
        let mut beacon = HeartbeatBeacon::new(bus.clone(), bus.clone(), BeaconConfig::default());
        assert!(beacon.beat().await.is_err());
    }
}
