//! Bus-to-handler dispatcher
//!
//! One subscription feeds a bounded queue drained by a fixed pool of workers.
//! Each message is handed to exactly one worker and each handler invocation
//! runs under its own time budget.

pub mod handler;
pub mod pool;

pub use handler::MessageHandler;
pub use pool::{Dispatcher, DispatcherConfig};
