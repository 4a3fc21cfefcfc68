//! Host heartbeat monitor
//!
//! Runs a background task that samples the host heartbeat list on a fixed
//! period. Consecutive identical samples count as missed heartbeats; past
//! the limit the module is forced into SAFE. A changed sample clears the
//! count and recovers a SAFE module to IDLE.

use std::sync::Arc;
use std::time::Duration;

use comms_shared::{safety, ModuleEvent, ModuleStatus, RecordKind};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::state::SharedState;
use crate::task::TaskHandle;
use crate::telemetry::TelemetryPublisher;
use crate::transport::LivenessStore;

#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Time between checks
    pub interval: Duration,
    /// Entries read from the host list per check
    pub sample_count: usize,
    /// Unchanged checks tolerated before entering SAFE
    pub missed_limit: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(safety::HEARTBEAT_CHECK_INTERVAL_MS),
            sample_count: safety::HEARTBEAT_SAMPLE_COUNT,
            missed_limit: safety::HEARTBEAT_MISSED_LIMIT,
        }
    }
}

/// What a single check decided
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Sample could not be read; nothing changed
    Skipped,
    /// Host heartbeat moved; `recovered` is set when SAFE was cleared
    Healthy { recovered: bool },
    /// Host heartbeat unchanged, still within the limit
    Warning { unchanged: u32 },
    /// Limit exceeded, SAFE latched
    Fault { unchanged: u32 },
}

pub struct HeartbeatMonitor {
    liveness: Arc<dyn LivenessStore>,
    state: SharedState,
    telemetry: TelemetryPublisher,
    config: HeartbeatConfig,
    last_sample: Vec<String>,
    unchanged_ticks: u32,
}

impl HeartbeatMonitor {
    pub fn new(
        liveness: Arc<dyn LivenessStore>,
        state: SharedState,
        telemetry: TelemetryPublisher,
        config: HeartbeatConfig,
    ) -> Self {
        Self {
            liveness,
            state,
            telemetry,
            config,
            last_sample: Vec::new(),
            unchanged_ticks: 0,
        }
    }

    #[cfg(test)]
    pub fn unchanged_ticks(&self) -> u32 {
        self.unchanged_ticks
    }

    /// Run one check
    pub async fn tick(&mut self) -> TickOutcome {
        let sample = match self.liveness.host_heartbeats(self.config.sample_count).await {
            Ok(sample) => sample,
            Err(e) => {
                error!("[HEARTBEAT] Error querying host heartbeat: {:#}", e);
                return TickOutcome::Skipped;
            }
        };

        if sample == self.last_sample {
            self.unchanged_ticks = self.unchanged_ticks.saturating_add(1);
        } else {
            self.unchanged_ticks = 0;
        }
        self.last_sample = sample;
        let unchanged = self.unchanged_ticks;

        if unchanged > self.config.missed_limit {
            error!("[HEARTBEAT] Host heartbeat has not updated for {} ticks", unchanged);
            let (_, snapshot) = self.state.transition(ModuleEvent::HeartbeatLost).await;
            let record = self
                .telemetry
                .record(format!("missed {} heartbeats, entering SAFE", unchanged), snapshot)
                .kind(RecordKind::Fault)
                .field("unchanged_ticks", unchanged);
            let _ = self.telemetry.publish(record).await;
            TickOutcome::Fault { unchanged }
        } else if unchanged == 0 {
            let (recovered, snapshot) = self
                .state
                .update(|state| {
                    let was_safe = state.status() == ModuleStatus::Safe;
                    state.process_event(ModuleEvent::HeartbeatRestored);
                    (was_safe, state.clone())
                })
                .await;
            if recovered {
                info!("[HEARTBEAT] Host heartbeat restored, leaving SAFE");
            } else {
                debug!("[HEARTBEAT] Host heartbeat healthy");
            }
            let record = self
                .telemetry
                .record("host heartbeat healthy", snapshot)
                .kind(RecordKind::Healthy)
                .field("recovered", recovered);
            let _ = self.telemetry.publish(record).await;
            TickOutcome::Healthy { recovered }
        } else {
            warn!("[HEARTBEAT] Host heartbeat unchanged for {} ticks", unchanged);
            let snapshot = self.state.snapshot().await;
            let record = self
                .telemetry
                .record(format!("host heartbeat unchanged for {} ticks", unchanged), snapshot)
                .kind(RecordKind::Warning)
                .field("unchanged_ticks", unchanged);
            let _ = self.telemetry.publish(record).await;
            TickOutcome::Warning { unchanged }
        }
    }

    /// Start the monitoring background task
    pub fn start(mut self) -> TaskHandle {
        TaskHandle::spawn("HEARTBEAT", move |mut shutdown| async move {
            let mut ticker = interval(self.config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(
                "[HEARTBEAT] Monitoring host every {:?} (limit {} unchanged)",
                self.config.interval, self.config.missed_limit
            );

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => {
                        self.tick().await;
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
    use comms_shared::{codec, topics, ModuleState};

    fn monitor(bus: Arc<MemoryBus>, state: SharedState) -> HeartbeatMonitor {
        let telemetry = TelemetryPublisher::new(bus.clone(), topics::TELEMETRY);
        HeartbeatMonitor::new(bus, state, telemetry, HeartbeatConfig::default())
    }

    fn last_record(bus: &MemoryBus) -> serde_json::Map<String, serde_json::Value> {
        let published = bus.published(topics::TELEMETRY);
        codec::decode_telemetry(published.last().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_changed_sample_is_healthy() {
        let bus = Arc::new(MemoryBus::new());
        let state = SharedState::new(ModuleState::new());
        let mut monitor = monitor(bus.clone(), state);

        bus.push_host_heartbeat("hb-1");
        assert_eq!(monitor.tick().await, TickOutcome::Healthy { recovered: false });
        bus.push_host_heartbeat("hb-2");
        assert_eq!(monitor.tick().await, TickOutcome::Healthy { recovered: false });
        assert_eq!(last_record(&bus)["type"], "HEALTHY");
    }

    #[tokio::test]
    async fn test_unchanged_ticks_warn_then_fault() {
        let bus = Arc::new(MemoryBus::new());
        let state = SharedState::new(ModuleState::new());
        let mut monitor = monitor(bus.clone(), state.clone());

        bus.push_host_heartbeat("hb-1");
        monitor.tick().await;

        for expected in 1..=3 {
            assert_eq!(
                monitor.tick().await,
                TickOutcome::Warning { unchanged: expected }
            );
            assert_eq!(last_record(&bus)["type"], "WARNING");
            assert_eq!(state.status().await, ModuleStatus::Idle);
        }

        assert_eq!(monitor.tick().await, TickOutcome::Fault { unchanged: 4 });
        assert_eq!(monitor.unchanged_ticks(), 4);
        assert_eq!(state.status().await, ModuleStatus::Safe);
        let record = last_record(&bus);
        assert_eq!(record["type"], "FAULT");
        assert_eq!(record["message"], "missed 4 heartbeats, entering SAFE");
    }

    #[tokio::test]
    async fn test_recovery_after_fault() {
        let bus = Arc::new(MemoryBus::new());
        let state = SharedState::new(ModuleState::new());
        let mut monitor = monitor(bus.clone(), state.clone());

        bus.push_host_heartbeat("hb-1");
        for _ in 0..5 {
            monitor.tick().await;
        }
        assert_eq!(state.status().await, ModuleStatus::Safe);

        bus.push_host_heartbeat("hb-2");
        assert_eq!(monitor.tick().await, TickOutcome::Healthy { recovered: true });
        assert_eq!(monitor.unchanged_ticks(), 0);
        assert_eq!(state.status().await, ModuleStatus::Idle);
    }

    #[tokio::test]
    async fn test_healthy_tick_keeps_active_status() {
        let bus = Arc::new(MemoryBus::new());
        let mut initial = ModuleState::new();
        initial.status = ModuleStatus::Active;
        let state = SharedState::new(initial);
        let mut monitor = monitor(bus.clone(), state.clone());

        bus.push_host_heartbeat("hb-1");
        monitor.tick().await;
        assert_eq!(state.status().await, ModuleStatus::Active);
    }

    #[tokio::test]
    async fn test_read_error_skips_tick() {
        let bus = Arc::new(MemoryBus::new());
        let state = SharedState::new(ModuleState::new());
        let mut monitor = monitor(bus.clone(), state.clone());

        bus.push_host_heartbeat("hb-1");
        monitor.tick().await;
        monitor.tick().await;
        assert_eq!(monitor.unchanged_ticks(), 1);
        let published = bus.published(topics::TELEMETRY).len();

        bus.fail_liveness(true);
        assert_eq!(monitor.tick().await, TickOutcome::Skipped);
        assert_eq!(monitor.unchanged_ticks(), 1);
        assert_eq!(bus.published(topics::TELEMETRY).len(), published);
    }

    #[tokio::test]
    async fn test_background_task_stops() {
        let bus = Arc::new(MemoryBus::new());
        let state = SharedState::new(ModuleState::new());
        let config = HeartbeatConfig {
            interval: Duration::from_millis(10),
            ..Default::default()
        };
        let telemetry = TelemetryPublisher::new(bus.clone(), topics::TELEMETRY);
        let handle = HeartbeatMonitor::new(bus.clone(), state, telemetry, config).start();

        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.stop().await;
        let published = bus.published(topics::TELEMETRY).len();
        assert!(published > 0);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(bus.published(topics::TELEMETRY).len(), published);
    }
}
