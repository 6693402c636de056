//! Priority-then-FIFO delivery queue

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::message::{Message, MessagePriority};

struct Queued {
    priority: MessagePriority,
    seq: u64,
    message: Message,
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    // Max-heap: higher priority first, then lower sequence number first.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Messages awaiting delivery.
///
/// Pops CRITICAL before HIGH before NORMAL before LOW; within a priority,
/// in push order.
#[derive(Default)]
pub struct DeliveryQueue {
    heap: BinaryHeap<Queued>,
    next_seq: u64,
}

impl DeliveryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: Message) {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        self.heap.push(Queued {
            priority: message.priority,
            seq,
            message,
        });
    }

    pub fn pop(&mut self) -> Option<Message> {
        self.heap.pop().map(|q| q.message)
    }

    /// Remove every queued message in delivery order.
    pub fn drain_ordered(&mut self) -> Vec<Message> {
        let mut out = Vec::with_capacity(self.heap.len());
        while let Some(message) = self.pop() {
            out.push(message);
        }
        out
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn msg(topic: &str, priority: MessagePriority) -> Message {
        Message::new(topic, "test", Value::Null).with_priority(priority)
    }

    #[test]
    fn test_priority_then_fifo() {
        let mut queue = DeliveryQueue::new();
        queue.push(msg("low", MessagePriority::Low));
        queue.push(msg("normal-1", MessagePriority::Normal));
        queue.push(msg("critical", MessagePriority::Critical));
        queue.push(msg("normal-2", MessagePriority::Normal));
        queue.push(msg("high", MessagePriority::High));

        let order: Vec<String> = queue.drain_ordered().into_iter().map(|m| m.topic).collect();
        assert_eq!(order, vec!["critical", "high", "normal-1", "normal-2", "low"]);
        assert!(queue.is_empty());
    }
}
