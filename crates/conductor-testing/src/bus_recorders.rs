//! Recorders for observing bus traffic in tests

use async_trait::async_trait;
use conductor_bus::{EventSink, HandlerError, HandlerResult, Message, MessageHandler, MessagePriority};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::mock_agents::lock;

/// A handler that stores every message it receives
#[derive(Debug, Clone, Default)]
pub struct CollectingHandler {
    messages: Arc<Mutex<Vec<Message>>>,
}

impl CollectingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<Message> {
        lock(&self.messages).clone()
    }

    /// Topics received, in delivery order
    pub fn topics(&self) -> Vec<String> {
        lock(&self.messages).iter().map(|m| m.topic.clone()).collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.messages).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.messages).is_empty()
    }

    pub fn clear(&self) {
        lock(&self.messages).clear();
    }

    /// Poll until at least `count` messages arrived or `timeout` elapsed.
    /// Returns whether the count was reached.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.len() >= count {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl MessageHandler for CollectingHandler {
    async fn handle(&self, message: &Message) -> HandlerResult {
        lock(&self.messages).push(message.clone());
        Ok(())
    }
}

/// One message as seen by an [`EventSink`]
#[derive(Debug, Clone, PartialEq)]
pub struct ForwardedEvent {
    pub topic: String,
    pub sender: String,
    pub payload: Value,
    pub priority: MessagePriority,
}

/// An event sink that records what it is given
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<ForwardedEvent>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent deliveries fail
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<ForwardedEvent> {
        lock(&self.events).clone()
    }

    pub fn topics(&self) -> Vec<String> {
        lock(&self.events).iter().map(|e| e.topic.clone()).collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.events).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.events).is_empty()
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn deliver(
        &self,
        topic: &str,
        sender: &str,
        payload: &Value,
        priority: MessagePriority,
    ) -> HandlerResult {
        if self.failing.load(Ordering::SeqCst) {
            return Err(HandlerError::new("sink unavailable"));
        }
        lock(&self.events).push(ForwardedEvent {
            topic: topic.to_string(),
            sender: sender.to_string(),
            payload: payload.clone(),
            priority,
        });
        Ok(())
    }
}
