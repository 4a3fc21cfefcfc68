//! Background task lifecycle shared by the periodic components

use std::future::Future;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Why the module is shutting down
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Operator interrupt
    Interrupted,
    /// Periodic bus probe failed
    BusLost { reason: String },
}

impl std::fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownReason::Interrupted => write!(f, "interrupted"),
            ShutdownReason::BusLost { reason } => write!(f, "bus connectivity lost: {}", reason),
        }
    }
}

/// Handle to stop a spawned background task
pub struct TaskHandle {
    name: &'static str,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl TaskHandle {
    /// Spawn `body`, handing it a receiver that flips to `true` on stop
    pub fn spawn<F, Fut>(name: &'static str, body: F) -> Self
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown, rx) = watch::channel(false);
        let task = tokio::spawn(body(rx));
        Self {
            name,
            shutdown,
            task,
        }
    }

    /// Signal the task and wait for it to return
    pub async fn stop(self) {
        self.shutdown.send_replace(true);
        if let Err(e) = self.task.await {
            error!("[{}] task ended abnormally: {}", self.name, e);
        }
        info!("[{}] stopped", self.name);
    }
}
