//! Communication Module Shared Types
//!
//! This crate provides the command envelope, telemetry record and module
//! state machine shared by the on-module runtime and host-side tooling.

pub mod codec;
pub mod state_machine;

use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{SecondsFormat, Utc};

pub use codec::{Command, CommandKind, DecodeError, EncodeError, RecordKind, TelemetryRecord};
pub use state_machine::{ModuleEvent, ModuleState, ModuleStatus, TransitionResult};

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Get current Unix timestamp in seconds
pub fn now_unix() -> i64 {
    Utc::now().timestamp()
}

/// Current time as an RFC 3339 string with second precision
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Current time as an RFC 3339 string with nanosecond precision
pub fn now_rfc3339_nanos() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Safety parameters for the module
pub mod safety {
    /// Minimum battery percentage for the module to be considered safe
    pub const BATTERY_MIN_PERCENT: u8 = 20;

    /// Temperature must be strictly above this to be considered safe.
    ///
    /// Higher-is-safer is unusual for a thermal limit. Product has not
    /// confirmed it; tests pin the current behaviour.
    pub const TEMPERATURE_MIN_SAFE_C: f64 = 60.0;

    /// Battery level at power-on and after a recharge
    pub const BATTERY_FULL_PERCENT: u8 = 100;

    /// Temperature at power-on
    pub const TEMPERATURE_INITIAL_C: f64 = 75.0;

    /// Temperature after HEAT_AND_CLEAR
    pub const TEMPERATURE_HEATED_C: f64 = 80.0;

    /// Lower bound of the operating temperature range
    pub const TEMPERATURE_FLOOR_C: f64 = -50.0;

    /// Upper bound of the operating temperature range
    pub const TEMPERATURE_CEILING_C: f64 = 100.0;

    /// Temperature substituted when drift falls below the floor
    pub const TEMPERATURE_FLOOR_RESET_C: f64 = -30.0;

    /// Temperature substituted when drift rises above the ceiling
    pub const TEMPERATURE_CEILING_RESET_C: f64 = 80.0;

    /// Battery level substituted when drift rises above full
    pub const BATTERY_CEILING_RESET_PERCENT: u8 = 80;

    /// Host heartbeat check interval in milliseconds
    pub const HEARTBEAT_CHECK_INTERVAL_MS: u64 = 500;

    /// Module heartbeat publish interval in milliseconds
    pub const HEARTBEAT_PUBLISH_INTERVAL_MS: u64 = 500;

    /// Number of host heartbeat samples read per check
    pub const HEARTBEAT_SAMPLE_COUNT: usize = 10;

    /// Consecutive unchanged checks tolerated before entering SAFE
    pub const HEARTBEAT_MISSED_LIMIT: u32 = 3;

    /// Status report and bus probe interval in milliseconds
    pub const STATUS_INTERVAL_MS: u64 = 1000;

    /// Per-invocation command handler budget in milliseconds
    pub const HANDLER_TIMEOUT_MS: u64 = 30_000;
}

/// Bus names used between host and module
pub mod topics {
    /// Inbound command topic
    pub const COMMAND: &str = "CMD_Q";

    /// Outbound telemetry topic
    pub const TELEMETRY: &str = "MODULE_Q";

    /// Module liveness key (value expires)
    pub const MODULE_HEARTBEAT_KEY: &str = "heartbeat:latest";

    /// Module liveness broadcast topic
    pub const MODULE_HEARTBEAT: &str = "heartbeat";

    /// Host liveness list, most-recent-first
    pub const HOST_HEARTBEAT: &str = "HOST_HEARTBEAT";
}
