//! Command execution for the module
//!
//! This module handles:
//! - Decoding command envelopes taken off the command topic
//! - Dispatching to the matching command handler
//! - Logging each command's outcome

mod executor;
pub mod handlers;

pub use executor::{CommandExecutor, CommandResult};
pub use handlers::SimulationConfig;
