//! Telemetry publishing and the periodic status report

pub mod publisher;
pub mod status;

pub use publisher::TelemetryPublisher;
pub use status::StatusReporter;
