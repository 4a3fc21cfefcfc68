//! Transport trait abstraction for pluggable message bus backends

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

/// A message delivered by the bus
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Bytes,
}

impl BusMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Identifies an active subscription on a bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// An acknowledged subscription and its bounded delivery queue
pub struct Subscription {
    pub id: SubscriptionId,
    pub receiver: mpsc::Receiver<BusMessage>,
}

/// Publish/subscribe message bus shared by all components
#[async_trait]
pub trait MessageBus: Send + Sync + 'static {
    /// Subscribe to `topics`, returning once the subscription is acknowledged.
    ///
    /// Deliveries are queued up to `capacity`; beyond that the backend's own
    /// drop policy applies.
    async fn subscribe(&self, topics: &[String], capacity: usize) -> Result<Subscription>;

    /// Release a subscription. Unknown ids are ignored.
    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()>;

    /// Publish a payload, returning the number of local receivers reached when known
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<usize>;

    /// Probe connectivity
    async fn ping(&self) -> Result<()>;

    /// Close the connection gracefully
    async fn close(&self) -> Result<()> {
        Ok(())
    }

    /// Human-readable name for this backend
    fn name(&self) -> &'static str;
}

/// Liveness records exchanged with the host
#[async_trait]
pub trait LivenessStore: Send + Sync + 'static {
    /// Latest `count` host heartbeat entries, most-recent-first
    async fn host_heartbeats(&self, count: usize) -> Result<Vec<String>>;

    /// Store the module's own heartbeat under `key`, expiring after `ttl`
    async fn store_heartbeat(&self, key: &str, payload: &str, ttl: Duration) -> Result<()>;
}
