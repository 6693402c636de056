//! # Conductor Bus
//!
//! Topic-based publish/subscribe for orchestration events.
//!
//! ## Features
//!
//! - **Wildcard topics**: `*` matches one segment, a trailing `#` matches any rest
//! - **Priority delivery**: CRITICAL before HIGH before NORMAL before LOW, FIFO within a level
//! - **Isolation**: a failing or panicking handler never blocks the others
//! - **Reliability**: failed deliveries land in a bounded dead-letter queue
//! - **Observability**: per-handler stats, bus metrics and message history
//! - **Forwarding**: every dispatched message can be relayed to an external [`EventSink`]
//!
//! ## Example
//!
//! ```rust
//! use conductor_bus::{handler_fn, Message, MessageBus, MessagePriority};
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let bus = MessageBus::with_defaults();
//! bus.subscribe("crew.task.*", "audit", handler_fn(|msg: Message| async move {
//!     assert_eq!(msg.sender, "crew-0");
//!     Ok(())
//! }))
//! .await
//! .unwrap();
//!
//! bus.publish("crew.task.completed", "crew-0", json!({"task": "t1"}), MessagePriority::High)
//!     .await
//!     .unwrap();
//! assert_eq!(bus.dispatch_pending().await, 1);
//! assert_eq!(bus.handler_stats("audit").await.unwrap().message_count, 1);
//! # });
//! ```

pub mod bus;
pub mod dlq;
pub mod error;
pub mod handler;
pub mod message;
pub mod metrics;
pub mod queue;
pub mod sink;
pub mod topic;

pub use bus::MessageBus;
pub use dlq::{DeadLetterQueue, DlqConfig, DlqEntry, DlqStats};
pub use error::{BusError, BusResult, HandlerError, HandlerResult};
pub use handler::{FnHandler, HandlerStats, MessageFilter, MessageHandler, Subscription, handler_fn};
pub use message::{Message, MessageId, MessagePriority};
pub use metrics::{BusMetrics, BusMetricsCollector, LatencyStats};
pub use queue::DeliveryQueue;
pub use sink::EventSink;
pub use topic::{TopicError, TopicPattern, validate_topic};
