//! Single-owner handle over the module state
//!
//! Every read-modify-write of [`ModuleState`] runs inside one write-lock
//! critical section. Callers never hold the lock across simulated work or
//! bus I/O; they take a snapshot and release it.

use std::sync::Arc;

use comms_shared::{ModuleEvent, ModuleState, ModuleStatus, TransitionResult};
use tokio::sync::RwLock;

#[derive(Clone, Default)]
pub struct SharedState {
    inner: Arc<RwLock<ModuleState>>,
}

impl SharedState {
    pub fn new(state: ModuleState) -> Self {
        Self {
            inner: Arc::new(RwLock::new(state)),
        }
    }

    /// Copy of the current state
    pub async fn snapshot(&self) -> ModuleState {
        self.inner.read().await.clone()
    }

    /// Current status only
    pub async fn status(&self) -> ModuleStatus {
        self.inner.read().await.status()
    }

    /// Run a mutation under the write lock
    pub async fn update<R>(&self, mutate: impl FnOnce(&mut ModuleState) -> R) -> R {
        let mut guard = self.inner.write().await;
        mutate(&mut guard)
    }

    /// Process a state machine event, returning the result and the state it left behind
    pub async fn transition(&self, event: ModuleEvent) -> (TransitionResult, ModuleState) {
        self.update(|state| {
            let result = state.process_event(event);
            (result, state.clone())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_transition_returns_post_state() {
        let state = SharedState::new(ModuleState::new());
        let (result, after) = state.transition(ModuleEvent::InspectionStarted).await;
        assert_eq!(result, TransitionResult::Success(ModuleStatus::Active));
        assert_eq!(after.status(), ModuleStatus::Active);
        assert_eq!(state.status().await, ModuleStatus::Active);
    }

    #[tokio::test]
    async fn test_concurrent_updates_serialize() {
        let state = SharedState::new(ModuleState::new());
        state.update(|s| s.battery_level = 0).await;

        let mut tasks = Vec::new();
        for _ in 0..50 {
            let state = state.clone();
            tasks.push(tokio::spawn(async move {
                state
                    .update(|s| s.battery_level = (s.battery_level + 1).min(100))
                    .await
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(state.snapshot().await.battery_level, 50);
    }
}
