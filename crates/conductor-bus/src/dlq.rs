//! Dead-letter queue for failed deliveries
//!
//! Every delivery a handler rejects (error or panic) is recorded here with the
//! handler id and reason. Entries can be inspected, replayed through
//! [`crate::MessageBus::replay_dead_letters`] or discarded. The queue is
//! bounded; when full the oldest entry is dropped.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::message::{Message, MessageId};

/// Configuration for the dead-letter queue
#[derive(Debug, Clone)]
pub struct DlqConfig {
    /// Maximum number of entries kept
    pub max_size: usize,
    /// Time an entry stays eligible for replay (seconds)
    pub ttl_secs: u64,
    /// Replay attempts before an entry is considered exhausted
    pub max_retries: u32,
}

impl Default for DlqConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            ttl_secs: 86400,
            max_retries: 3,
        }
    }
}

/// A failed delivery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqEntry {
    pub message: Message,
    /// Handler that rejected the message
    pub handler_id: String,
    pub failure_reason: String,
    pub added_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub retry_count: u32,
}

impl DlqEntry {
    pub fn new(
        message: Message,
        handler_id: impl Into<String>,
        failure_reason: impl Into<String>,
        ttl_secs: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            message,
            handler_id: handler_id.into(),
            failure_reason: failure_reason.into(),
            added_at: now,
            expires_at: now + Duration::seconds(i64::try_from(ttl_secs).unwrap_or(i64::MAX)),
            retry_count: 0,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    pub fn has_exhausted_retries(&self, max_retries: u32) -> bool {
        self.retry_count >= max_retries
    }
}

/// Statistics for the dead-letter queue
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DlqStats {
    pub current_size: usize,
    /// Entries added over the queue's lifetime
    pub total_added: u64,
    /// Entries removed after a successful replay or explicit removal
    pub total_removed: u64,
    /// Entries dropped because the queue was full
    pub total_evicted: u64,
    /// Entries purged after expiring
    pub total_expired: u64,
}

/// Bounded store of failed deliveries
#[derive(Clone)]
pub struct DeadLetterQueue {
    config: DlqConfig,
    queue: Arc<RwLock<VecDeque<DlqEntry>>>,
    stats: Arc<RwLock<DlqStats>>,
}

impl DeadLetterQueue {
    pub fn new(config: DlqConfig) -> Self {
        Self {
            config,
            queue: Arc::new(RwLock::new(VecDeque::new())),
            stats: Arc::new(RwLock::new(DlqStats::default())),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DlqConfig::default())
    }

    /// Record a failed delivery
    pub async fn add(
        &self,
        message: Message,
        handler_id: impl Into<String>,
        failure_reason: impl Into<String>,
    ) {
        let mut queue = self.queue.write().await;
        let mut stats = self.stats.write().await;

        if queue.len() >= self.config.max_size {
            warn!("Dead-letter queue full, dropping oldest entry");
            queue.pop_front();
            stats.total_evicted = stats.total_evicted.saturating_add(1);
        }

        queue.push_back(DlqEntry::new(
            message,
            handler_id,
            failure_reason,
            self.config.ttl_secs,
        ));
        stats.total_added = stats.total_added.saturating_add(1);
        stats.current_size = queue.len();

        debug!(size = queue.len(), "Added failed delivery to dead-letter queue");
    }

    /// All entries, oldest first
    pub async fn list(&self) -> Vec<DlqEntry> {
        self.queue.read().await.iter().cloned().collect()
    }

    /// Entries recorded for one handler
    pub async fn for_handler(&self, handler_id: &str) -> Vec<DlqEntry> {
        self.queue
            .read()
            .await
            .iter()
            .filter(|entry| entry.handler_id == handler_id)
            .cloned()
            .collect()
    }

    /// Entries still eligible for replay
    pub async fn get_retriable(&self, limit: usize) -> Vec<DlqEntry> {
        self.queue
            .read()
            .await
            .iter()
            .filter(|entry| {
                !entry.is_expired() && !entry.has_exhausted_retries(self.config.max_retries)
            })
            .take(limit)
            .cloned()
            .collect()
    }

    /// Remove the entry for a message/handler pair. Returns whether one was removed.
    pub async fn remove(&self, message_id: &MessageId, handler_id: &str) -> bool {
        let mut queue = self.queue.write().await;
        let before = queue.len();
        queue.retain(|entry| !(&entry.message.id == message_id && entry.handler_id == handler_id));
        let removed = queue.len() < before;

        if removed {
            let mut stats = self.stats.write().await;
            stats.total_removed = stats.total_removed.saturating_add(1);
            stats.current_size = queue.len();
        }
        removed
    }

    /// Bump the retry count of an entry after a failed replay
    pub async fn mark_retried(&self, message_id: &MessageId, handler_id: &str, error: String) {
        let mut queue = self.queue.write().await;
        if let Some(entry) = queue
            .iter_mut()
            .find(|e| &e.message.id == message_id && e.handler_id == handler_id)
        {
            entry.retry_count = entry.retry_count.saturating_add(1);
            entry.failure_reason = error;
        }
    }

    /// Purge expired entries, returning how many were removed
    pub async fn cleanup_expired(&self) -> usize {
        let mut queue = self.queue.write().await;
        let before = queue.len();
        queue.retain(|entry| !entry.is_expired());
        let removed = before - queue.len();

        if removed > 0 {
            let mut stats = self.stats.write().await;
            stats.total_expired = stats.total_expired.saturating_add(removed as u64);
            stats.current_size = queue.len();
            debug!(removed, "Purged expired dead letters");
        }
        removed
    }

    pub async fn clear(&self) {
        let mut queue = self.queue.write().await;
        let cleared = queue.len();
        queue.clear();
        self.stats.write().await.current_size = 0;
        debug!(cleared, "Cleared dead-letter queue");
    }

    pub async fn stats(&self) -> DlqStats {
        self.stats.read().await.clone()
    }

    pub async fn size(&self) -> usize {
        self.queue.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn msg(n: u32) -> Message {
        Message::new("tasks.failed", "test", json!({ "n": n }))
    }

    #[tokio::test]
    async fn test_add_and_list() {
        let dlq = DeadLetterQueue::with_defaults();
        let message = msg(1);
        dlq.add(message.clone(), "worker", "boom").await;

        let entries = dlq.list().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message.id, message.id);
        assert_eq!(entries[0].handler_id, "worker");
        assert_eq!(dlq.for_handler("other").await.len(), 0);
    }

    #[tokio::test]
    async fn test_size_limit_evicts_oldest() {
        let dlq = DeadLetterQueue::new(DlqConfig {
            max_size: 3,
            ..Default::default()
        });

        for i in 0..5 {
            dlq.add(msg(i), "h", "fail").await;
        }

        let entries = dlq.list().await;
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].message.payload["n"], 2);

        let stats = dlq.stats().await;
        assert_eq!(stats.total_added, 5);
        assert_eq!(stats.total_evicted, 2);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_and_remove() {
        let dlq = DeadLetterQueue::new(DlqConfig {
            max_retries: 1,
            ..Default::default()
        });
        let message = msg(7);
        dlq.add(message.clone(), "h", "first").await;
        assert_eq!(dlq.get_retriable(10).await.len(), 1);

        dlq.mark_retried(&message.id, "h", "second".to_string()).await;
        assert!(dlq.get_retriable(10).await.is_empty());

        assert!(dlq.remove(&message.id, "h").await);
        assert!(!dlq.remove(&message.id, "h").await);
        assert_eq!(dlq.stats().await.total_removed, 1);
    }

    #[tokio::test]
    async fn test_expired_entries_purged() {
        let dlq = DeadLetterQueue::new(DlqConfig {
            ttl_secs: 0,
            ..Default::default()
        });
        dlq.add(msg(1), "h", "fail").await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        assert_eq!(dlq.cleanup_expired().await, 1);
        assert_eq!(dlq.size().await, 0);
    }
}
