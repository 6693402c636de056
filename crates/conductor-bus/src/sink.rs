//! External event sinks.
//!
//! A sink receives every message the bus dispatches, after local handlers
//! ran, so a hosting platform can mirror orchestration events into its own
//! event system.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::HandlerResult;
use crate::message::MessagePriority;

/// Forwarding target for published messages.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn deliver(
        &self,
        topic: &str,
        sender: &str,
        payload: &Value,
        priority: MessagePriority,
    ) -> HandlerResult;
}
