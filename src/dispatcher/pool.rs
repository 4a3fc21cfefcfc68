//! Worker pool and lifecycle

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use comms_shared::{safety, topics};
use futures::future::join_all;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::dispatcher::MessageHandler;
use crate::transport::{BusMessage, MessageBus, SubscriptionId};

/// Default queue between the subscription and the workers
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub topics: Vec<String>,
    /// Worker count; 0 means one per available CPU
    pub workers: usize,
    /// Bounded queue size; 0 means the default
    pub queue_capacity: usize,
    /// Budget for each handler invocation
    pub handler_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            topics: vec![topics::COMMAND.to_string()],
            workers: default_workers(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            handler_timeout: Duration::from_millis(safety::HANDLER_TIMEOUT_MS),
        }
    }
}

/// One worker per available CPU
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Counters shared by all workers
#[derive(Debug, Default)]
pub struct DispatchStats {
    pub handled: AtomicU64,
    pub failed: AtomicU64,
    pub timed_out: AtomicU64,
    pub cancelled: AtomicU64,
}

impl DispatchStats {
    pub fn handled(&self) -> u64 {
        self.handled.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::SeqCst)
    }

    pub fn timed_out(&self) -> u64 {
        self.timed_out.load(Ordering::SeqCst)
    }

    pub fn cancelled(&self) -> u64 {
        self.cancelled.load(Ordering::SeqCst)
    }
}

pub struct Dispatcher;

impl Dispatcher {
    /// Subscribe and start the workers.
    ///
    /// Returns only after the bus has acknowledged the subscription. A refused
    /// subscription is returned as an error and no workers are started.
    pub async fn start(
        bus: Arc<dyn MessageBus>,
        config: DispatcherConfig,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<DispatcherHandle> {
        let workers = if config.workers == 0 {
            default_workers()
        } else {
            config.workers
        };
        let capacity = if config.queue_capacity == 0 {
            DEFAULT_QUEUE_CAPACITY
        } else {
            config.queue_capacity
        };

        let subscription = bus
            .subscribe(&config.topics, capacity)
            .await
            .with_context(|| format!("subscribing to {:?} on {}", config.topics, bus.name()))?;
        info!(
            "[DISPATCH] Subscribed to {:?} on {} ({} workers, queue {})",
            config.topics,
            bus.name(),
            workers,
            capacity
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let queue = Arc::new(Mutex::new(subscription.receiver));
        let stats = Arc::new(DispatchStats::default());

        let tasks = (1..=workers)
            .map(|id| {
                tokio::spawn(worker_loop(
                    id,
                    queue.clone(),
                    handler.clone(),
                    config.handler_timeout,
                    shutdown_rx.clone(),
                    stats.clone(),
                ))
            })
            .collect();

        Ok(DispatcherHandle {
            bus,
            shutdown_tx,
            stats,
            running: Mutex::new(Running {
                workers: tasks,
                subscription: Some(subscription.id),
            }),
        })
    }
}

struct Running {
    workers: Vec<JoinHandle<()>>,
    subscription: Option<SubscriptionId>,
}

/// Handle to a running dispatcher
pub struct DispatcherHandle {
    bus: Arc<dyn MessageBus>,
    shutdown_tx: watch::Sender<bool>,
    stats: Arc<DispatchStats>,
    running: Mutex<Running>,
}

impl DispatcherHandle {
    #[cfg(test)]
    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    /// Stop the dispatcher.
    ///
    /// Cancels in-flight handlers, waits for every worker to return, then
    /// releases the subscription. Safe to call more than once; later calls
    /// wait for the first to finish.
    pub async fn stop(&self) {
        self.shutdown_tx.send_replace(true);

        let mut running = self.running.lock().await;
        let workers = std::mem::take(&mut running.workers);
        if !workers.is_empty() {
            debug!("[DISPATCH] Waiting for {} workers", workers.len());
        }
        for result in join_all(workers).await {
            if let Err(e) = result {
                error!("[DISPATCH] worker ended abnormally: {}", e);
            }
        }

        if let Some(id) = running.subscription.take() {
            if let Err(e) = self.bus.unsubscribe(id).await {
                warn!("[DISPATCH] Failed to release subscription {:?}: {:#}", id, e);
            }
            info!(
                "[DISPATCH] Stopped: handled={} failed={} timed_out={} cancelled={}",
                self.stats.handled(),
                self.stats.failed(),
                self.stats.timed_out(),
                self.stats.cancelled()
            );
        }
    }
}

async fn next_message(queue: &Mutex<mpsc::Receiver<BusMessage>>) -> Option<BusMessage> {
    queue.lock().await.recv().await
}

async fn worker_loop(
    id: usize,
    queue: Arc<Mutex<mpsc::Receiver<BusMessage>>>,
    handler: Arc<dyn MessageHandler>,
    budget: Duration,
    mut shutdown: watch::Receiver<bool>,
    stats: Arc<DispatchStats>,
) {
    debug!("[DISPATCH] worker {} started", id);
    loop {
        if *shutdown.borrow() {
            break;
        }
        let message = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            message = next_message(&queue) => match message {
                Some(message) => message,
                None => break,
            },
        };

        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                stats.cancelled.fetch_add(1, Ordering::SeqCst);
                warn!("[DISPATCH] worker {} cancelled handler on {}", id, message.topic);
                break;
            }
            result = timeout(budget, handler.handle(&message.topic, &message.payload)) => match result {
                Ok(Ok(())) => {
                    stats.handled.fetch_add(1, Ordering::SeqCst);
                }
                Ok(Err(e)) => {
                    stats.failed.fetch_add(1, Ordering::SeqCst);
                    error!("[DISPATCH] worker {} handler error on {}: {:#}", id, message.topic, e);
                }
                Err(_) => {
                    stats.timed_out.fetch_add(1, Ordering::SeqCst);
                    warn!("[DISPATCH] worker {} handler exceeded {:?} on {}", id, budget, message.topic);
                }
            },
        }
    }
    debug!("[DISPATCH] worker {} stopped", id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryBus;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::AtomicUsize;

    /// Records invocations and optionally sleeps or fails
    #[derive(Default)]
    struct Probe {
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        delay: Duration,
        fail_on: Option<&'static [u8]>,
    }

    #[async_trait]
    impl MessageHandler for Probe {
        async fn handle(&self, _topic: &str, payload: &[u8]) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            match self.fail_on {
                Some(bad) if bad == payload => Err(anyhow!("rejected payload")),
                _ => Ok(()),
            }
        }
    }

    fn config(workers: usize, timeout: Duration) -> DispatcherConfig {
        DispatcherConfig {
            topics: vec!["CMD_Q".to_string()],
            workers,
            queue_capacity: 16,
            handler_timeout: timeout,
        }
    }

    async fn wait_for(mut done: impl FnMut() -> bool) {
        for _ in 0..200 {
            if done() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_messages_run_concurrently() {
        let bus = Arc::new(MemoryBus::new());
        let probe = Arc::new(Probe {
            delay: Duration::from_millis(100),
            ..Default::default()
        });
        let handle = Dispatcher::start(bus.clone(), config(4, Duration::from_secs(5)), probe.clone())
            .await
            .unwrap();

        for _ in 0..4 {
            bus.publish("CMD_Q", Bytes::from_static(b"{}")).await.unwrap();
        }
        wait_for(|| handle.stats().handled() == 4).await;
        assert!(probe.peak.load(Ordering::SeqCst) > 1);
        handle.stop().await;
    }

    #[tokio::test]
    async fn test_each_message_handled_once() {
        let bus = Arc::new(MemoryBus::new());
        let probe = Arc::new(Probe::default());
        let handle = Dispatcher::start(bus.clone(), config(3, Duration::from_secs(5)), probe.clone())
            .await
            .unwrap();

        for _ in 0..10 {
            bus.publish("CMD_Q", Bytes::from_static(b"{}")).await.unwrap();
        }
        wait_for(|| handle.stats().handled() == 10).await;
        assert_eq!(probe.calls.load(Ordering::SeqCst), 10);
        handle.stop().await;
    }

    #[tokio::test]
    async fn test_slow_handler_times_out_and_worker_continues() {
        let bus = Arc::new(MemoryBus::new());
        let probe = Arc::new(Probe {
            delay: Duration::from_millis(200),
            ..Default::default()
        });
        let handle = Dispatcher::start(bus.clone(), config(1, Duration::from_millis(20)), probe.clone())
            .await
            .unwrap();

        bus.publish("CMD_Q", Bytes::from_static(b"a")).await.unwrap();
        bus.publish("CMD_Q", Bytes::from_static(b"b")).await.unwrap();
        wait_for(|| handle.stats().timed_out() == 2).await;
        assert_eq!(probe.calls.load(Ordering::SeqCst), 2);
        handle.stop().await;
    }

    #[tokio::test]
    async fn test_handler_error_does_not_stop_worker() {
        let bus = Arc::new(MemoryBus::new());
        let probe = Arc::new(Probe {
            fail_on: Some(&b"bad"[..]),
            ..Default::default()
        });
        let handle = Dispatcher::start(bus.clone(), config(1, Duration::from_secs(5)), probe.clone())
            .await
            .unwrap();

        bus.publish("CMD_Q", Bytes::from_static(b"bad")).await.unwrap();
        bus.publish("CMD_Q", Bytes::from_static(b"good")).await.unwrap();
        wait_for(|| handle.stats().handled() == 1 && handle.stats().failed() == 1).await;
        handle.stop().await;
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_releases_subscription() {
        let bus = Arc::new(MemoryBus::new());
        let probe = Arc::new(Probe::default());
        let handle = Dispatcher::start(bus.clone(), config(2, Duration::from_secs(5)), probe.clone())
            .await
            .unwrap();
        assert_eq!(bus.subscriber_count(), 1);

        handle.stop().await;
        handle.stop().await;
        assert_eq!(bus.subscriber_count(), 0);

        bus.publish("CMD_Q", Bytes::from_static(b"{}")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stop_cancels_in_flight_handler() {
        let bus = Arc::new(MemoryBus::new());
        let probe = Arc::new(Probe {
            delay: Duration::from_secs(10),
            ..Default::default()
        });
        let handle = Dispatcher::start(bus.clone(), config(1, Duration::from_secs(30)), probe.clone())
            .await
            .unwrap();

        bus.publish("CMD_Q", Bytes::from_static(b"{}")).await.unwrap();
        wait_for(|| probe.calls.load(Ordering::SeqCst) == 1).await;

        tokio::time::timeout(Duration::from_secs(1), handle.stop())
            .await
            .expect("stop should not wait for the handler");
        assert_eq!(handle.stats().cancelled(), 1);
    }

    #[tokio::test]
    async fn test_queued_messages_not_handled_after_stop() {
        let bus = Arc::new(MemoryBus::new());
        let probe = Arc::new(Probe {
            delay: Duration::from_secs(10),
            ..Default::default()
        });
        let handle = Dispatcher::start(bus.clone(), config(1, Duration::from_secs(30)), probe.clone())
            .await
            .unwrap();

        // one in flight, the rest waiting in the queue
        for _ in 0..10 {
            bus.publish("CMD_Q", Bytes::from_static(b"{}")).await.unwrap();
        }
        wait_for(|| probe.calls.load(Ordering::SeqCst) == 1).await;

        handle.stop().await;
        let calls_at_stop = probe.calls.load(Ordering::SeqCst);
        assert_eq!(calls_at_stop, 1);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(probe.calls.load(Ordering::SeqCst), calls_at_stop);
        assert_eq!(handle.stats().handled(), 0);
    }

    #[tokio::test]
    async fn test_subscribe_failure_is_fatal() {
        let bus = Arc::new(MemoryBus::new());
        bus.fail_subscribe(true);
        let probe = Arc::new(Probe::default());

        let result = Dispatcher::start(bus.clone(), config(1, Duration::from_secs(1)), probe).await;
        assert!(result.is_err());
        assert_eq!(bus.subscriber_count(), 0);
    }
}
