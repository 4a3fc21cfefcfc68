//! MQTT transport backed by rumqttc
//!
//! One background task polls the rumqttc event loop and routes incoming
//! publishes to subscription queues. Host heartbeats arriving on the host
//! liveness topic are kept in a most-recent-first list for the heartbeat
//! monitor.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use comms_shared::topics;
use parking_lot::Mutex;
use rumqttc::{
    AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, SubAck, SubscribeFilter,
    SubscribeReasonCode,
};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::transport::traits::{
    BusMessage, LivenessStore, MessageBus, Subscription, SubscriptionId,
};

/// Host heartbeat entries retained from the liveness topic
const HOST_HEARTBEAT_RETAINED: usize = 10;

/// Configuration for the MQTT connection
#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub client_id: String,
    pub host: String,
    pub port: u16,
    pub keep_alive: Duration,
    /// rumqttc request channel capacity
    pub request_capacity: usize,
    /// How long to wait for a SUBACK
    pub subscribe_timeout: Duration,
    /// Pause after an event loop error before polling again
    pub reconnect_delay: Duration,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            client_id: "comms-module".into(),
            host: "localhost".into(),
            port: 1883,
            keep_alive: Duration::from_secs(15),
            request_capacity: 64,
            subscribe_timeout: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(2),
        }
    }
}

struct Route {
    topics: HashSet<String>,
    sender: mpsc::Sender<BusMessage>,
}

/// State shared between the bus handle and the event loop task
#[derive(Default)]
struct Shared {
    connected: AtomicBool,
    routes: Mutex<HashMap<SubscriptionId, Route>>,
    pending_acks: Mutex<VecDeque<oneshot::Sender<Result<()>>>>,
    host_heartbeats: Mutex<VecDeque<String>>,
}

impl Shared {
    fn route(&self, topic: &str, payload: Bytes) {
        if topic == topics::HOST_HEARTBEAT {
            let mut list = self.host_heartbeats.lock();
            list.push_front(String::from_utf8_lossy(&payload).into_owned());
            list.truncate(HOST_HEARTBEAT_RETAINED);
        }

        let message = BusMessage::new(topic, payload);
        let mut routes = self.routes.lock();
        routes.retain(|id, route| {
            if !route.topics.contains(topic) {
                return true;
            }
            match route.sender.try_send(message.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    warn!("[MQTT] queue full for {:?}, dropping message on {}", id, topic);
                    true
                }
                Err(TrySendError::Closed(_)) => false,
            }
        });
    }

    fn complete_subscribe(&self, ack: SubAck) {
        let result = if ack
            .return_codes
            .iter()
            .any(|code| matches!(code, SubscribeReasonCode::Failure))
        {
            Err(anyhow!("broker rejected subscription (pkid={})", ack.pkid))
        } else {
            Ok(())
        };
        match self.pending_acks.lock().pop_front() {
            Some(waiter) => {
                let _ = waiter.send(result);
            }
            None => debug!("[MQTT] unsolicited SUBACK pkid={}", ack.pkid),
        }
    }
}

/// Message bus over an MQTT broker
pub struct MqttBus {
    config: MqttConfig,
    client: AsyncClient,
    shared: Arc<Shared>,
    next_id: AtomicU64,
    /// Serializes SUBSCRIBE/SUBACK pairs
    subscribe_lock: tokio::sync::Mutex<()>,
    event_task: Mutex<Option<JoinHandle<()>>>,
}

impl MqttBus {
    /// Create the client, start the event loop and subscribe to host liveness
    pub async fn connect(config: MqttConfig) -> Result<Self> {
        let mut opts = MqttOptions::new(config.client_id.clone(), config.host.clone(), config.port);
        opts.set_keep_alive(config.keep_alive);
        let (client, eventloop) = AsyncClient::new(opts, config.request_capacity);

        let shared = Arc::new(Shared::default());
        let task = tokio::spawn(event_loop(eventloop, shared.clone(), config.reconnect_delay));

        let bus = Self {
            config,
            client,
            shared,
            next_id: AtomicU64::new(0),
            subscribe_lock: tokio::sync::Mutex::new(()),
            event_task: Mutex::new(Some(task)),
        };

        bus.subscribe_filters(vec![topics::HOST_HEARTBEAT.to_string()])
            .await
            .context("subscribing to host heartbeat")?;
        info!(
            "[MQTT] connected to {}:{} as {}",
            bus.config.host, bus.config.port, bus.config.client_id
        );
        Ok(bus)
    }

    /// Send SUBSCRIBE and wait for the matching SUBACK
    async fn subscribe_filters(&self, topics: Vec<String>) -> Result<()> {
        let _guard = self.subscribe_lock.lock().await;
        let (tx, rx) = oneshot::channel();
        self.shared.pending_acks.lock().push_back(tx);

        let filters = topics
            .into_iter()
            .map(|topic| SubscribeFilter::new(topic, QoS::AtLeastOnce));
        if let Err(e) = self.client.subscribe_many(filters).await {
            self.shared.pending_acks.lock().pop_back();
            return Err(anyhow!("subscribe request failed: {}", e));
        }

        match tokio::time::timeout(self.config.subscribe_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(anyhow!("event loop stopped before SUBACK")),
            Err(_) => {
                self.shared.pending_acks.lock().pop_front();
                Err(anyhow!(
                    "no SUBACK within {:?}",
                    self.config.subscribe_timeout
                ))
            }
        }
    }
}

/// Poll the rumqttc event loop forever, routing incoming packets
async fn event_loop(mut eventloop: EventLoop, shared: Arc<Shared>, reconnect_delay: Duration) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                shared.connected.store(true, Ordering::SeqCst);
                info!("[MQTT] broker accepted connection");
            }
            Ok(Event::Incoming(Packet::Publish(p))) => {
                shared.route(&p.topic, p.payload);
            }
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                shared.complete_subscribe(ack);
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                shared.connected.store(false, Ordering::SeqCst);
                warn!("[MQTT] broker sent disconnect");
            }
            Ok(_) => {}
            Err(e) => {
                shared.connected.store(false, Ordering::SeqCst);
                error!("[MQTT] event loop error: {}", e);
                tokio::time::sleep(reconnect_delay).await;
            }
        }
    }
}

#[async_trait]
impl MessageBus for MqttBus {
    async fn subscribe(&self, topics: &[String], capacity: usize) -> Result<Subscription> {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let (sender, receiver) = mpsc::channel(capacity.max(1));

        // Route first so nothing delivered right after the SUBACK is lost
        self.shared.routes.lock().insert(
            id,
            Route {
                topics: topics.iter().cloned().collect(),
                sender,
            },
        );

        if let Err(e) = self.subscribe_filters(topics.to_vec()).await {
            self.shared.routes.lock().remove(&id);
            return Err(e);
        }
        Ok(Subscription { id, receiver })
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        let orphaned: Vec<String> = {
            let mut routes = self.shared.routes.lock();
            let Some(route) = routes.remove(&id) else {
                return Ok(());
            };
            route
                .topics
                .into_iter()
                .filter(|topic| topic != topics::HOST_HEARTBEAT)
                .filter(|topic| !routes.values().any(|r| r.topics.contains(topic)))
                .collect()
        };

        for topic in orphaned {
            self.client
                .unsubscribe(topic.clone())
                .await
                .map_err(|e| anyhow!("unsubscribe {} failed: {}", topic, e))?;
        }
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Bytes) -> Result<usize> {
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload.to_vec())
            .await
            .map_err(|e| anyhow!("publish to {} failed: {}", topic, e))?;
        Ok(0)
    }

    async fn ping(&self) -> Result<()> {
        if self.shared.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(anyhow!(
                "not connected to broker {}:{}",
                self.config.host,
                self.config.port
            ))
        }
    }

    async fn close(&self) -> Result<()> {
        let result = self
            .client
            .disconnect()
            .await
            .map_err(|e| anyhow!("disconnect failed: {}", e));
        // Give the event loop a moment to flush the DISCONNECT
        tokio::time::sleep(Duration::from_millis(100)).await;
        if let Some(task) = self.event_task.lock().take() {
            task.abort();
        }
        self.shared.connected.store(false, Ordering::SeqCst);
        result
    }

    fn name(&self) -> &'static str {
        "mqtt"
    }
}

#[async_trait]
impl LivenessStore for MqttBus {
    async fn host_heartbeats(&self, count: usize) -> Result<Vec<String>> {
        if !self.shared.connected.load(Ordering::SeqCst) {
            return Err(anyhow!("host heartbeats unavailable: broker not connected"));
        }
        Ok(self
            .shared
            .host_heartbeats
            .lock()
            .iter()
            .take(count)
            .cloned()
            .collect())
    }

    /// MQTT 3.1.1 has no message expiry, so the key is published retained and
    /// consumers judge staleness from its `ts` field.
    async fn store_heartbeat(&self, key: &str, payload: &str, _ttl: Duration) -> Result<()> {
        self.client
            .publish(key, QoS::AtMostOnce, true, payload.as_bytes().to_vec())
            .await
            .map_err(|e| anyhow!("heartbeat store on {} failed: {}", key, e))
    }
}
