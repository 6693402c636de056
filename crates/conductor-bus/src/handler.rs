//! Message handlers, subscriptions and per-handler statistics

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::error::HandlerResult;
use crate::message::Message;
use crate::topic::TopicPattern;

/// Receives messages delivered by the bus.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &Message) -> HandlerResult;
}

/// Adapter turning an async closure into a [`MessageHandler`].
pub struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(Message) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send,
{
    async fn handle(&self, message: &Message) -> HandlerResult {
        (self.f)(message.clone()).await
    }
}

/// Wrap an async closure as a shareable handler.
///
/// ```rust,ignore
/// bus.subscribe("alerts.#", "pager", handler_fn(|msg| async move {
///     println!("{}", msg.topic);
///     Ok(())
/// }))?;
/// ```
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn MessageHandler>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(FnHandler { f })
}

/// Predicate deciding whether a subscription sees a message.
pub type MessageFilter = Arc<dyn Fn(&Message) -> bool + Send + Sync>;

/// A handler bound to a topic pattern.
#[derive(Clone)]
pub struct Subscription {
    pub pattern: TopicPattern,
    pub handler_id: String,
    pub handler: Arc<dyn MessageHandler>,
    pub filter: Option<MessageFilter>,
}

impl Subscription {
    /// Whether this subscription should receive `message`.
    pub fn accepts(&self, message: &Message) -> bool {
        self.pattern.matches(&message.topic) && self.filter.as_ref().is_none_or(|f| f(message))
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("pattern", &self.pattern)
            .field("handler_id", &self.handler_id)
            .field("filtered", &self.filter.is_some())
            .finish_non_exhaustive()
    }
}

/// Delivery statistics for one handler id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerStats {
    pub handler_id: String,
    /// Messages handled successfully
    pub message_count: u64,
    /// Deliveries that returned an error or panicked
    pub error_count: u64,
    /// Time of the last successful delivery
    pub last_message_at: Option<DateTime<Utc>>,
}

impl HandlerStats {
    pub fn new(handler_id: impl Into<String>) -> Self {
        Self {
            handler_id: handler_id.into(),
            message_count: 0,
            error_count: 0,
            last_message_at: None,
        }
    }

    pub(crate) fn record_success(&mut self) {
        self.message_count = self.message_count.saturating_add(1);
        self.last_message_at = Some(Utc::now());
    }

    pub(crate) fn record_failure(&mut self) {
        self.error_count = self.error_count.saturating_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerError;
    use serde_json::json;

    #[tokio::test]
    async fn test_handler_fn() {
        let handler = handler_fn(|msg: Message| async move {
            if msg.payload["ok"] == json!(true) {
                Ok(())
            } else {
                Err(HandlerError::new("not ok"))
            }
        });

        let good = Message::new("t", "s", json!({"ok": true}));
        let bad = Message::new("t", "s", json!({"ok": false}));
        assert!(handler.handle(&good).await.is_ok());
        assert_eq!(
            handler.handle(&bad).await.unwrap_err(),
            HandlerError::new("not ok")
        );
    }

    #[test]
    fn test_subscription_filter() {
        let sub = Subscription {
            pattern: TopicPattern::parse("alerts.*").unwrap(),
            handler_id: "pager".to_string(),
            handler: handler_fn(|_: Message| async { Ok(()) }),
            filter: Some(Arc::new(|m: &Message| m.sender == "monitor")),
        };

        assert!(sub.accepts(&Message::new("alerts.disk", "monitor", json!({}))));
        assert!(!sub.accepts(&Message::new("alerts.disk", "someone", json!({}))));
        assert!(!sub.accepts(&Message::new("logs.disk", "monitor", json!({}))));
    }

    #[test]
    fn test_stats_counters() {
        let mut stats = HandlerStats::new("h");
        stats.record_success();
        stats.record_failure();
        assert_eq!(stats.message_count, 1);
        assert_eq!(stats.error_count, 1);
        assert!(stats.last_message_at.is_some());
    }
}
