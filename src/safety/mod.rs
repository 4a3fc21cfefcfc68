//! Safety Module
//!
//! Watches the host's liveness list and latches SAFE when the host goes
//! quiet, and publishes the module's own liveness beacon.

mod beacon;
mod monitor;

pub use beacon::{BeaconConfig, HeartbeatBeacon};
pub use monitor::{HeartbeatConfig, HeartbeatMonitor};
