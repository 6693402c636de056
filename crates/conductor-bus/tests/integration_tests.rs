//! Integration tests for conductor-bus

use conductor_bus::{HandlerError, Message, MessageBus, MessageFilter, MessagePriority, handler_fn};
use conductor_testing::{CollectingHandler, RecordingSink};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[tokio::test]
async fn test_wildcard_routing() {
    let bus = MessageBus::with_defaults();
    let tasks = CollectingHandler::new();
    let everything = CollectingHandler::new();

    bus.subscribe("tasks.*", "tasks", Arc::new(tasks.clone()))
        .await
        .unwrap();
    bus.subscribe("#", "everything", Arc::new(everything.clone()))
        .await
        .unwrap();

    for topic in ["tasks.created", "tasks.a.b", "other"] {
        bus.publish(topic, "test", json!({}), MessagePriority::Normal)
            .await
            .unwrap();
    }
    bus.dispatch_pending().await;

    assert_eq!(tasks.topics(), vec!["tasks.created"]);
    assert_eq!(everything.len(), 3);
}

#[tokio::test]
async fn test_handler_receives_once_when_patterns_overlap() {
    let bus = MessageBus::with_defaults();
    let handler = CollectingHandler::new();
    bus.subscribe("crew.#", "audit", Arc::new(handler.clone()))
        .await
        .unwrap();
    bus.subscribe("crew.task.*", "audit", Arc::new(handler.clone()))
        .await
        .unwrap();

    bus.publish("crew.task.started", "crew-0", json!({}), MessagePriority::Normal)
        .await
        .unwrap();
    bus.dispatch_pending().await;

    assert_eq!(handler.len(), 1);
    assert_eq!(bus.handler_stats("audit").await.unwrap().message_count, 1);
}

#[tokio::test]
async fn test_filtered_subscription() {
    let bus = MessageBus::with_defaults();
    let handler = CollectingHandler::new();
    let only_high: MessageFilter = Arc::new(|m: &Message| m.priority >= MessagePriority::High);

    bus.subscribe_filtered("alerts", "pager", Arc::new(handler.clone()), only_high)
        .await
        .unwrap();
    bus.publish("alerts", "mon", json!({"n": 1}), MessagePriority::Low)
        .await
        .unwrap();
    bus.publish("alerts", "mon", json!({"n": 2}), MessagePriority::Critical)
        .await
        .unwrap();
    bus.dispatch_pending().await;

    let received = handler.messages();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].payload["n"], 2);
    assert_eq!(bus.handler_stats("pager").await.unwrap().message_count, 1);
}

#[tokio::test]
async fn test_event_sink_forwarding() {
    let bus = MessageBus::with_defaults();
    let sink = RecordingSink::new();
    bus.set_event_sink(Arc::new(sink.clone())).await;

    bus.publish("workflow.started", "engine", json!({"run": "r1"}), MessagePriority::High)
        .await
        .unwrap();
    bus.dispatch_pending().await;

    let events = sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].topic, "workflow.started");
    assert_eq!(events[0].sender, "engine");
    assert_eq!(events[0].priority, MessagePriority::High);

    sink.set_failing(true);
    bus.publish("workflow.completed", "engine", json!({}), MessagePriority::Normal)
        .await
        .unwrap();
    bus.dispatch_pending().await;

    let metrics = bus.metrics().await;
    assert_eq!(metrics.forwarded_total, 1);
    assert_eq!(metrics.forward_failures_total, 1);
    assert_eq!(metrics.unrouted_total, 2);
}

#[tokio::test]
async fn test_replay_dead_letters() {
    let bus = MessageBus::with_defaults();
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    let recovers = handler_fn(move |_: Message| {
        let counter = Arc::clone(&counter);
        async move {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(HandlerError::new("transient"))
            } else {
                Ok(())
            }
        }
    });

    bus.subscribe("jobs", "worker", recovers).await.unwrap();
    bus.publish("jobs", "t", json!({}), MessagePriority::Normal)
        .await
        .unwrap();
    bus.dispatch_pending().await;
    assert_eq!(bus.dead_letters().size().await, 1);
    assert_eq!(bus.metrics().await.dead_letters, 1);

    assert_eq!(bus.replay_dead_letters(10).await, 1);
    assert_eq!(bus.dead_letters().size().await, 0);

    let stats = bus.handler_stats("worker").await.unwrap();
    assert_eq!(stats.error_count, 1);
    assert_eq!(stats.message_count, 1);
}

#[tokio::test]
async fn test_background_loop_delivers_in_priority_order() {
    let bus = MessageBus::with_defaults();
    let handler = CollectingHandler::new();
    bus.subscribe("#", "rec", Arc::new(handler.clone()))
        .await
        .unwrap();

    // Queue before the loop runs so all three share one cycle.
    bus.publish("low", "t", json!({}), MessagePriority::Low)
        .await
        .unwrap();
    bus.publish("critical", "t", json!({}), MessagePriority::Critical)
        .await
        .unwrap();
    bus.publish("normal", "t", json!({}), MessagePriority::Normal)
        .await
        .unwrap();

    bus.start().await;
    assert!(handler.wait_for(3, Duration::from_secs(2)).await);
    bus.stop().await;

    assert_eq!(handler.topics(), vec!["critical", "normal", "low"]);
}

#[tokio::test]
async fn test_subscribers_and_topics() {
    let bus = MessageBus::with_defaults();
    bus.subscribe("a.*", "h1", Arc::new(CollectingHandler::new()))
        .await
        .unwrap();
    bus.subscribe("a.*", "h2", Arc::new(CollectingHandler::new()))
        .await
        .unwrap();
    bus.subscribe("b", "h1", Arc::new(CollectingHandler::new()))
        .await
        .unwrap();

    assert_eq!(bus.topics().await, vec!["a.*", "b"]);
    assert_eq!(bus.subscribers("a.*").await, vec!["h1", "h2"]);
    assert!(bus.subscribers("c").await.is_empty());
}
