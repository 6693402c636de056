//! The message bus
//!
//! Publishing validates the topic, appends the message to the bounded history
//! and enqueues it. Delivery happens in dispatch cycles: a cycle drains the
//! queue in priority-then-FIFO order and, for each message, runs every
//! matching handler concurrently before moving to the next message. Cycles
//! are driven either by the background loop started with
//! [`MessageBus::start`] or explicitly with [`MessageBus::dispatch_pending`].

use conductor_core::BusConfig;
use futures::future::join_all;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::dlq::{DeadLetterQueue, DlqConfig};
use crate::error::{BusError, BusResult, HandlerError};
use crate::handler::{HandlerStats, MessageFilter, MessageHandler, Subscription};
use crate::message::{Message, MessageId, MessagePriority};
use crate::metrics::{BusMetrics, BusMetricsCollector};
use crate::queue::DeliveryQueue;
use crate::sink::EventSink;
use crate::topic::{TopicPattern, validate_topic};

struct BusInner {
    config: BusConfig,
    subscriptions: RwLock<Vec<Subscription>>,
    stats: RwLock<HashMap<String, HandlerStats>>,
    queue: Mutex<DeliveryQueue>,
    history: RwLock<VecDeque<Message>>,
    sink: RwLock<Option<Arc<dyn EventSink>>>,
    dlq: DeadLetterQueue,
    metrics: BusMetricsCollector,
    cycle: Mutex<()>,
    notify: Arc<Notify>,
    running: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Topic-based publish/subscribe bus with priority delivery.
///
/// Cloning is cheap; clones share the same subscriptions, queue and history.
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<BusInner>,
}

impl MessageBus {
    /// Create a bus from configuration
    pub fn new(config: BusConfig) -> Self {
        let dlq = DeadLetterQueue::new(DlqConfig {
            max_size: config.dead_letter_capacity,
            ..Default::default()
        });
        let metrics = BusMetricsCollector::new(config.max_tracked_topics, 1000);

        Self {
            inner: Arc::new(BusInner {
                config,
                subscriptions: RwLock::new(Vec::new()),
                stats: RwLock::new(HashMap::new()),
                queue: Mutex::new(DeliveryQueue::new()),
                history: RwLock::new(VecDeque::new()),
                sink: RwLock::new(None),
                dlq,
                metrics,
                cycle: Mutex::new(()),
                notify: Arc::new(Notify::new()),
                running: AtomicBool::new(false),
                worker: Mutex::new(None),
            }),
        }
    }

    /// Create a bus with default configuration
    pub fn with_defaults() -> Self {
        Self::new(BusConfig::default())
    }

    /// Create a bus with default configuration and the given name
    pub fn named(name: impl Into<String>) -> Self {
        Self::new(BusConfig {
            name: name.into(),
            ..Default::default()
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn config(&self) -> &BusConfig {
        &self.inner.config
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Start the background delivery loop. Calling it again while running is
    /// a no-op.
    pub async fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            debug!(bus = %self.name(), "Message bus already running");
            return;
        }

        let weak: Weak<BusInner> = Arc::downgrade(&self.inner);
        let notify = Arc::clone(&self.inner.notify);
        let handle = tokio::spawn(async move {
            loop {
                notify.notified().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                if !inner.running.load(Ordering::SeqCst) {
                    break;
                }
                MessageBus { inner }.dispatch_pending().await;
            }
        });

        *self.inner.worker.lock().await = Some(handle);
        // Deliver anything published before start.
        self.inner.notify.notify_one();
        info!(bus = %self.name(), "Started message bus");
    }

    /// Stop the delivery loop and wait for the in-flight cycle to finish.
    /// Messages still queued stay queued. Idempotent.
    pub async fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }

        self.inner.notify.notify_one();
        let handle = self.inner.worker.lock().await.take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            warn!(bus = %self.name(), error = %e, "Delivery loop ended abnormally");
        }
        info!(bus = %self.name(), "Stopped message bus");
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    /// Subscribe `handler` to every topic matching `pattern`.
    ///
    /// Subscribing the same handler id to the same pattern again replaces the
    /// previous handler.
    pub async fn subscribe(
        &self,
        pattern: &str,
        handler_id: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> BusResult<()> {
        self.add_subscription(pattern, handler_id, handler, None)
            .await
    }

    /// Subscribe with a filter; messages the filter rejects are skipped
    /// without counting as deliveries.
    pub async fn subscribe_filtered(
        &self,
        pattern: &str,
        handler_id: &str,
        handler: Arc<dyn MessageHandler>,
        filter: MessageFilter,
    ) -> BusResult<()> {
        self.add_subscription(pattern, handler_id, handler, Some(filter))
            .await
    }

    async fn add_subscription(
        &self,
        pattern: &str,
        handler_id: &str,
        handler: Arc<dyn MessageHandler>,
        filter: Option<MessageFilter>,
    ) -> BusResult<()> {
        let parsed = TopicPattern::parse(pattern).map_err(|reason| BusError::InvalidPattern {
            pattern: pattern.to_string(),
            reason,
        })?;
        if handler_id.trim().is_empty() {
            return Err(BusError::InvalidHandlerId(handler_id.to_string()));
        }

        let subscription = Subscription {
            pattern: parsed,
            handler_id: handler_id.to_string(),
            handler,
            filter,
        };

        {
            let mut subs = self.inner.subscriptions.write().await;
            match subs
                .iter_mut()
                .find(|s| s.pattern.as_str() == pattern && s.handler_id == handler_id)
            {
                Some(existing) => *existing = subscription,
                None => subs.push(subscription),
            }
        }

        self.inner
            .stats
            .write()
            .await
            .entry(handler_id.to_string())
            .or_insert_with(|| HandlerStats::new(handler_id));

        info!(bus = %self.name(), handler_id, pattern, "Subscribed handler");
        Ok(())
    }

    /// Remove a subscription. Returns whether one existed.
    ///
    /// Stats for the handler id are dropped once it has no subscriptions left.
    pub async fn unsubscribe(&self, pattern: &str, handler_id: &str) -> bool {
        let (removed, still_subscribed) = {
            let mut subs = self.inner.subscriptions.write().await;
            let before = subs.len();
            subs.retain(|s| !(s.pattern.as_str() == pattern && s.handler_id == handler_id));
            let removed = subs.len() < before;
            (removed, subs.iter().any(|s| s.handler_id == handler_id))
        };

        if removed && !still_subscribed {
            self.inner.stats.write().await.remove(handler_id);
        }
        if removed {
            info!(bus = %self.name(), handler_id, pattern, "Unsubscribed handler");
        }
        removed
    }

    /// Distinct subscribed patterns, in first-subscription order
    pub async fn topics(&self) -> Vec<String> {
        let subs = self.inner.subscriptions.read().await;
        let mut seen = HashSet::new();
        subs.iter()
            .filter(|s| seen.insert(s.pattern.as_str()))
            .map(|s| s.pattern.as_str().to_string())
            .collect()
    }

    /// Handler ids subscribed to exactly `pattern`
    pub async fn subscribers(&self, pattern: &str) -> Vec<String> {
        self.inner
            .subscriptions
            .read()
            .await
            .iter()
            .filter(|s| s.pattern.as_str() == pattern)
            .map(|s| s.handler_id.clone())
            .collect()
    }

    /// Delivery statistics for a handler id
    pub async fn handler_stats(&self, handler_id: &str) -> Option<HandlerStats> {
        self.inner.stats.read().await.get(handler_id).cloned()
    }

    // ========================================================================
    // Publishing
    // ========================================================================

    /// Publish a payload. Returns the id of the enqueued message.
    pub async fn publish(
        &self,
        topic: &str,
        sender: &str,
        payload: Value,
        priority: MessagePriority,
    ) -> BusResult<MessageId> {
        self.publish_message(Message::new(topic, sender, payload).with_priority(priority))
            .await
    }

    /// Publish a fully built message
    pub async fn publish_message(&self, message: Message) -> BusResult<MessageId> {
        validate_topic(&message.topic).map_err(|reason| BusError::InvalidTopic {
            topic: message.topic.clone(),
            reason,
        })?;

        let id = message.id.clone();
        {
            let mut history = self.inner.history.write().await;
            history.push_back(message.clone());
            while history.len() > self.inner.config.max_history {
                history.pop_front();
            }
        }
        self.inner.metrics.record_publish(&message.topic).await;

        debug!(
            bus = %self.name(),
            message_id = %id,
            topic = %message.topic,
            priority = %message.priority,
            "Published message"
        );

        self.inner.queue.lock().await.push(message);
        self.inner.notify.notify_one();
        Ok(id)
    }

    /// Messages waiting for the next dispatch cycle
    pub async fn pending_count(&self) -> usize {
        self.inner.queue.lock().await.len()
    }

    // ========================================================================
    // Delivery
    // ========================================================================

    /// Run one dispatch cycle: deliver every queued message in
    /// priority-then-FIFO order. Returns the number of messages dispatched.
    ///
    /// Messages published while the cycle runs wait for the next one.
    pub async fn dispatch_pending(&self) -> usize {
        let _cycle = self.inner.cycle.lock().await;
        let batch = self.inner.queue.lock().await.drain_ordered();
        if batch.is_empty() {
            return 0;
        }

        for message in &batch {
            let started = Instant::now();
            self.deliver(message).await;
            self.forward(message).await;
            let micros = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX);
            self.inner.metrics.record_latency(micros).await;
        }

        self.inner.metrics.record_cycle().await;
        batch.len()
    }

    async fn deliver(&self, message: &Message) {
        let targets: Vec<(String, Arc<dyn MessageHandler>)> = {
            let subs = self.inner.subscriptions.read().await;
            let mut seen = HashSet::new();
            subs.iter()
                .filter(|s| s.accepts(message))
                .filter(|s| seen.insert(s.handler_id.clone()))
                .map(|s| (s.handler_id.clone(), Arc::clone(&s.handler)))
                .collect()
        };

        if targets.is_empty() {
            debug!(bus = %self.name(), topic = %message.topic, "No handlers for topic");
            self.inner.metrics.record_unrouted().await;
            return;
        }

        let runs = targets.into_iter().map(|(handler_id, handler)| {
            let msg = message.clone();
            async move {
                let outcome = tokio::spawn(async move { handler.handle(&msg).await }).await;
                let outcome = match outcome {
                    Ok(result) => result,
                    Err(join_error) => Err(HandlerError::new(format!(
                        "handler panicked: {}",
                        join_error
                    ))),
                };
                (handler_id, outcome)
            }
        });

        for (handler_id, outcome) in join_all(runs).await {
            match outcome {
                Ok(()) => {
                    if let Some(stats) = self.inner.stats.write().await.get_mut(&handler_id) {
                        stats.record_success();
                    }
                    self.inner.metrics.record_delivery().await;
                }
                Err(error) => {
                    warn!(
                        bus = %self.name(),
                        handler_id = %handler_id,
                        message_id = %message.id,
                        topic = %message.topic,
                        error = %error,
                        "Message delivery failed"
                    );
                    if let Some(stats) = self.inner.stats.write().await.get_mut(&handler_id) {
                        stats.record_failure();
                    }
                    self.inner.metrics.record_delivery_failure().await;
                    self.inner
                        .dlq
                        .add(message.clone(), handler_id, error.to_string())
                        .await;
                }
            }
        }
    }

    async fn forward(&self, message: &Message) {
        let sink = self.inner.sink.read().await.clone();
        let Some(sink) = sink else {
            return;
        };

        match sink
            .deliver(
                &message.topic,
                &message.sender,
                &message.payload,
                message.priority,
            )
            .await
        {
            Ok(()) => self.inner.metrics.record_forward(true).await,
            Err(error) => {
                warn!(
                    bus = %self.name(),
                    message_id = %message.id,
                    error = %error,
                    "Forwarding to event sink failed"
                );
                self.inner.metrics.record_forward(false).await;
            }
        }
    }

    /// Retry dead-lettered deliveries against their handlers.
    ///
    /// Entries whose handler is no longer subscribed are skipped. Successful
    /// replays are removed from the queue; failures bump the entry's retry
    /// count. Returns the number of successful replays.
    pub async fn replay_dead_letters(&self, limit: usize) -> usize {
        let entries = self.inner.dlq.get_retriable(limit).await;
        let mut replayed = 0;

        for entry in entries {
            let handler = {
                let subs = self.inner.subscriptions.read().await;
                subs.iter()
                    .find(|s| s.handler_id == entry.handler_id && s.accepts(&entry.message))
                    .map(|s| Arc::clone(&s.handler))
            };
            let Some(handler) = handler else {
                continue;
            };

            match handler.handle(&entry.message).await {
                Ok(()) => {
                    self.inner
                        .dlq
                        .remove(&entry.message.id, &entry.handler_id)
                        .await;
                    if let Some(stats) = self.inner.stats.write().await.get_mut(&entry.handler_id)
                    {
                        stats.record_success();
                    }
                    replayed += 1;
                }
                Err(error) => {
                    self.inner
                        .dlq
                        .mark_retried(&entry.message.id, &entry.handler_id, error.to_string())
                        .await;
                }
            }
        }

        if replayed > 0 {
            info!(bus = %self.name(), replayed, "Replayed dead letters");
        }
        replayed
    }

    // ========================================================================
    // Forwarding, history, introspection
    // ========================================================================

    /// Forward every dispatched message to `sink`, replacing any previous one
    pub async fn set_event_sink(&self, sink: Arc<dyn EventSink>) {
        *self.inner.sink.write().await = Some(sink);
        info!(bus = %self.name(), "Enabled event sink forwarding");
    }

    pub async fn clear_event_sink(&self) {
        *self.inner.sink.write().await = None;
    }

    /// The most recent `limit` published messages, oldest first, optionally
    /// restricted to one exact topic
    pub async fn message_history(&self, topic: Option<&str>, limit: usize) -> Vec<Message> {
        let history = self.inner.history.read().await;
        let mut matching: Vec<Message> = history
            .iter()
            .rev()
            .filter(|m| topic.is_none_or(|t| m.topic == t))
            .take(limit)
            .cloned()
            .collect();
        matching.reverse();
        matching
    }

    pub async fn clear_history(&self) {
        self.inner.history.write().await.clear();
        info!(bus = %self.name(), "Cleared message history");
    }

    pub fn dead_letters(&self) -> &DeadLetterQueue {
        &self.inner.dlq
    }

    pub async fn metrics(&self) -> BusMetrics {
        let mut snapshot = self.inner.metrics.snapshot().await;
        snapshot.dead_letters = self.inner.dlq.size().await;
        snapshot
    }
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus")
            .field("name", &self.inner.config.name)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}
