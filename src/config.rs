//! Module configuration
//!
//! Defaults mirror the constants in `comms_shared`. `ModuleConfig::from_env`
//! overlays `COMMS_*` environment variables (a `.env` file is loaded first).

use std::str::FromStr;
use std::time::Duration;

use comms_shared::{safety, topics};
use tracing::warn;

use crate::command::SimulationConfig;
use crate::dispatcher::DispatcherConfig;
use crate::safety::{BeaconConfig, HeartbeatConfig};
use crate::transport::MqttConfig;

/// Which bus implementation to run on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusBackend {
    Mqtt,
    Memory,
}

impl FromStr for BusBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mqtt" => Ok(BusBackend::Mqtt),
            "memory" | "mem" => Ok(BusBackend::Memory),
            other => Err(format!("unknown bus backend '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModuleConfig {
    pub module_id: String,
    pub backend: BusBackend,
    pub mqtt: MqttConfig,
    pub telemetry_topic: String,
    pub dispatcher: DispatcherConfig,
    pub heartbeat: HeartbeatConfig,
    pub beacon: BeaconConfig,
    pub status_interval: Duration,
    /// Fixed seed for the sensor drift generator
    pub drift_seed: Option<u64>,
    pub simulation: SimulationConfig,
}

impl Default for ModuleConfig {
    fn default() -> Self {
        let module_id = "comms-module-001".to_string();
        Self {
            mqtt: MqttConfig {
                client_id: module_id.clone(),
                ..Default::default()
            },
            module_id,
            backend: BusBackend::Mqtt,
            telemetry_topic: topics::TELEMETRY.to_string(),
            dispatcher: DispatcherConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            beacon: BeaconConfig::default(),
            status_interval: Duration::from_millis(safety::STATUS_INTERVAL_MS),
            drift_seed: None,
            simulation: SimulationConfig::default(),
        }
    }
}

impl ModuleConfig {
    /// Defaults overlaid with the process environment
    pub fn from_env() -> Self {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                warn!("Failed to load .env: {}", e);
            }
        }
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Apply `COMMS_*` overrides from `lookup`. Unparseable values are logged and skipped.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(id) = lookup("COMMS_MODULE_ID") {
            self.mqtt.client_id = id.clone();
            self.module_id = id;
        }
        if let Some(backend) = parse(&lookup, "COMMS_BUS") {
            self.backend = backend;
        }
        if let Some(host) = lookup("COMMS_MQTT_HOST") {
            self.mqtt.host = host;
        }
        if let Some(port) = parse(&lookup, "COMMS_MQTT_PORT") {
            self.mqtt.port = port;
        }
        if let Some(secs) = parse(&lookup, "COMMS_MQTT_KEEP_ALIVE_SECS") {
            self.mqtt.keep_alive = Duration::from_secs(secs);
        }
        if let Some(topic) = lookup("COMMS_COMMAND_TOPIC") {
            self.dispatcher.topics = vec![topic];
        }
        if let Some(topic) = lookup("COMMS_TELEMETRY_TOPIC") {
            self.telemetry_topic = topic;
        }
        if let Some(workers) = parse(&lookup, "COMMS_WORKERS") {
            self.dispatcher.workers = workers;
        }
        if let Some(capacity) = parse(&lookup, "COMMS_QUEUE_CAPACITY") {
            self.dispatcher.queue_capacity = capacity;
        }
        if let Some(ms) = parse(&lookup, "COMMS_HANDLER_TIMEOUT_MS") {
            self.dispatcher.handler_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse(&lookup, "COMMS_HEARTBEAT_CHECK_MS") {
            self.heartbeat.interval = Duration::from_millis(ms);
        }
        if let Some(count) = parse(&lookup, "COMMS_HEARTBEAT_SAMPLES") {
            self.heartbeat.sample_count = count;
        }
        if let Some(limit) = parse(&lookup, "COMMS_HEARTBEAT_MISSED_LIMIT") {
            self.heartbeat.missed_limit = limit;
        }
        if let Some(key) = lookup("COMMS_BEACON_KEY") {
            self.beacon.key = key;
        }
        if let Some(topic) = lookup("COMMS_BEACON_TOPIC") {
            self.beacon.topic = topic;
        }
        if let Some(ms) = parse(&lookup, "COMMS_BEACON_INTERVAL_MS") {
            self.beacon.interval = Duration::from_millis(ms);
        }
        if let Some(ms) = parse(&lookup, "COMMS_STATUS_INTERVAL_MS") {
            self.status_interval = Duration::from_millis(ms);
        }
        if let Some(seed) = parse(&lookup, "COMMS_DRIFT_SEED") {
            self.drift_seed = Some(seed);
        }
        if let Some(ms) = parse(&lookup, "COMMS_INSPECT_MIN_MS") {
            self.simulation.inspect_min = Duration::from_millis(ms);
        }
        if let Some(ms) = parse(&lookup, "COMMS_INSPECT_MAX_MS") {
            self.simulation.inspect_max = Duration::from_millis(ms);
        }
        if let Some(ms) = parse(&lookup, "COMMS_MANEUVER_STEP_MS") {
            self.simulation.maneuver_step = Duration::from_millis(ms);
        }
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Ignoring {}={:?}: {}", key, raw, e);
            None
        }
    }
}
