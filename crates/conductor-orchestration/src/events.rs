//! Lifecycle events published by the orchestrators.
//!
//! Publishing is best effort: a bus error is logged and never fails the
//! orchestration step that emitted the event.

use conductor_bus::{MessageBus, MessagePriority};
use serde_json::Value;
use tracing::warn;

pub const HANDOFF_STARTED: &str = "handoff.started";
pub const HANDOFF_COMPLETED: &str = "handoff.completed";
pub const HANDOFF_FAILED: &str = "handoff.failed";

pub const CREW_TASK_STARTED: &str = "crew.task.started";
pub const CREW_TASK_COMPLETED: &str = "crew.task.completed";
pub const CREW_TASK_FAILED: &str = "crew.task.failed";
pub const CREW_EXECUTION_COMPLETED: &str = "crew.execution.completed";

pub const WORKFLOW_STARTED: &str = "workflow.started";
pub const WORKFLOW_NODE_COMPLETED: &str = "workflow.node.completed";
pub const WORKFLOW_NODE_FAILED: &str = "workflow.node.failed";
pub const WORKFLOW_PAUSED: &str = "workflow.paused";
pub const WORKFLOW_RESUMED: &str = "workflow.resumed";
pub const WORKFLOW_COMPLETED: &str = "workflow.completed";
pub const WORKFLOW_FAILED: &str = "workflow.failed";

/// Publishes events on behalf of one orchestrator.
///
/// Without a bus every emit is a no-op, so orchestrators can run standalone.
#[derive(Debug, Clone, Default)]
pub struct EventPublisher {
    bus: Option<MessageBus>,
    sender: String,
}

impl EventPublisher {
    pub fn new(bus: MessageBus, sender: impl Into<String>) -> Self {
        Self {
            bus: Some(bus),
            sender: sender.into(),
        }
    }

    /// A publisher that drops everything.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.bus.is_some()
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub async fn emit(&self, topic: &str, payload: Value) {
        self.emit_with_priority(topic, payload, MessagePriority::Normal)
            .await;
    }

    /// Failure events go out with HIGH priority.
    pub async fn emit_failure(&self, topic: &str, payload: Value) {
        self.emit_with_priority(topic, payload, MessagePriority::High)
            .await;
    }

    pub async fn emit_with_priority(&self, topic: &str, payload: Value, priority: MessagePriority) {
        let Some(bus) = &self.bus else {
            return;
        };
        if let Err(e) = bus.publish(topic, &self.sender, payload, priority).await {
            warn!(topic = %topic, sender = %self.sender, error = %e, "Failed to publish event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_disabled_publisher_is_noop() {
        let events = EventPublisher::disabled();
        assert!(!events.is_enabled());
        events.emit(HANDOFF_STARTED, json!({})).await;
    }

    #[tokio::test]
    async fn test_failure_events_are_high_priority() {
        let bus = MessageBus::with_defaults();
        let events = EventPublisher::new(bus.clone(), "handoff");

        events.emit(HANDOFF_COMPLETED, json!({"id": 1})).await;
        events.emit_failure(HANDOFF_FAILED, json!({"id": 2})).await;

        let history = bus.message_history(None, 10).await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].sender, "handoff");
        assert_eq!(history[1].priority, MessagePriority::High);
    }
}
