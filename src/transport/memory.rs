//! In-process message bus
//!
//! Routes publishes to local subscribers and keeps liveness lists and
//! expiring keys in memory. Used for local runs without a broker and as the
//! transport double in tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use comms_shared::topics;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::transport::traits::{
    BusMessage, LivenessStore, MessageBus, Subscription, SubscriptionId,
};

/// Longest host heartbeat list kept (older entries are trimmed)
#[cfg(test)]
const MAX_LIST_LEN: usize = 100;

/// Most recent publishes kept in the history
const HISTORY_LIMIT: usize = 256;

struct Subscriber {
    topics: HashSet<String>,
    sender: mpsc::Sender<BusMessage>,
}

#[derive(Default)]
struct Inner {
    subscribers: HashMap<SubscriptionId, Subscriber>,
    lists: HashMap<String, VecDeque<String>>,
    keys: HashMap<String, (String, Instant)>,
    history: VecDeque<BusMessage>,
}

/// Failure injection switches
#[derive(Default)]
struct Faults {
    subscribe: AtomicBool,
    publish: AtomicBool,
    ping: AtomicBool,
    liveness: AtomicBool,
}

/// In-memory broker implementing both bus traits
#[derive(Default)]
pub struct MemoryBus {
    inner: Mutex<Inner>,
    next_id: AtomicU64,
    faults: Faults,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Host-side and inspection hooks used by tests
#[cfg(test)]
impl MemoryBus {
    /// Prepend an entry to a list (host side of the liveness exchange)
    pub fn push_list(&self, key: &str, value: impl Into<String>) {
        let mut inner = self.inner.lock();
        let list = inner.lists.entry(key.to_string()).or_default();
        list.push_front(value.into());
        list.truncate(MAX_LIST_LEN);
    }

    /// Prepend a host heartbeat entry
    pub fn push_host_heartbeat(&self, value: impl Into<String>) {
        self.push_list(topics::HOST_HEARTBEAT, value);
    }

    /// Current value of an expiring key, if still live
    pub fn stored(&self, key: &str) -> Option<String> {
        let inner = self.inner.lock();
        inner
            .keys
            .get(key)
            .filter(|(_, expires_at)| Instant::now() < *expires_at)
            .map(|(value, _)| value.clone())
    }

    /// Payloads published on `topic` still in the history, oldest first
    pub fn published(&self, topic: &str) -> Vec<Bytes> {
        self.inner
            .lock()
            .history
            .iter()
            .filter(|m| m.topic == topic)
            .map(|m| m.payload.clone())
            .collect()
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }

    pub fn fail_subscribe(&self, fail: bool) {
        self.faults.subscribe.store(fail, Ordering::SeqCst);
    }

    pub fn fail_publish(&self, fail: bool) {
        self.faults.publish.store(fail, Ordering::SeqCst);
    }

    pub fn fail_ping(&self, fail: bool) {
        self.faults.ping.store(fail, Ordering::SeqCst);
    }

    pub fn fail_liveness(&self, fail: bool) {
        self.faults.liveness.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn subscribe(&self, topics: &[String], capacity: usize) -> Result<Subscription> {
        if self.faults.subscribe.load(Ordering::SeqCst) {
            return Err(anyhow!("subscribe refused by bus"));
        }
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        self.inner.lock().subscribers.insert(
            id,
            Subscriber {
                topics: topics.iter().cloned().collect(),
                sender,
            },
        );
        debug!("[MEMBUS] subscription {:?} on {:?}", id, topics);
        Ok(Subscription { id, receiver })
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        if self.inner.lock().subscribers.remove(&id).is_some() {
            debug!("[MEMBUS] subscription {:?} released", id);
        }
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Bytes) -> Result<usize> {
        if self.faults.publish.load(Ordering::SeqCst) {
            return Err(anyhow!("publish to {} refused by bus", topic));
        }
        let message = BusMessage::new(topic, payload);
        let mut inner = self.inner.lock();
        let mut delivered = 0;
        inner.subscribers.retain(|id, subscriber| {
            if !subscriber.topics.contains(topic) {
                return true;
            }
            match subscriber.sender.try_send(message.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    warn!("[MEMBUS] queue full for {:?}, dropping message on {}", id, topic);
                    true
                }
                Err(TrySendError::Closed(_)) => false,
            }
        });
        if inner.history.len() == HISTORY_LIMIT {
            inner.history.pop_front();
        }
        inner.history.push_back(message);
        Ok(delivered)
    }

    async fn ping(&self) -> Result<()> {
        if self.faults.ping.load(Ordering::SeqCst) {
            return Err(anyhow!("bus unreachable"));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[async_trait]
impl LivenessStore for MemoryBus {
    async fn host_heartbeats(&self, count: usize) -> Result<Vec<String>> {
        if self.faults.liveness.load(Ordering::SeqCst) {
            return Err(anyhow!("liveness list unavailable"));
        }
        let inner = self.inner.lock();
        Ok(inner
            .lists
            .get(topics::HOST_HEARTBEAT)
            .map(|list| list.iter().take(count).cloned().collect())
            .unwrap_or_default())
    }

    async fn store_heartbeat(&self, key: &str, payload: &str, ttl: Duration) -> Result<()> {
        if self.faults.liveness.load(Ordering::SeqCst) {
            return Err(anyhow!("liveness key unavailable"));
        }
        self.inner
            .lock()
            .keys
            .insert(key.to_string(), (payload.to_string(), Instant::now() + ttl));
        Ok(())
    }
}
