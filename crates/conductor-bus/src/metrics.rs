//! Bus metrics
//!
//! Counters are cardinality-safe: only the first `max_topics` distinct topics
//! get their own publish counter, the remainder are folded into `other`.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Bucket for topics beyond the tracking limit
pub const OTHER_TOPICS: &str = "other";

/// Snapshot of bus counters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BusMetrics {
    pub messages_published_total: u64,
    /// Successful handler deliveries (one message may count several times)
    pub deliveries_total: u64,
    pub delivery_failures_total: u64,
    /// Messages dispatched with no matching subscription
    pub unrouted_total: u64,
    pub forwarded_total: u64,
    pub forward_failures_total: u64,
    pub dispatch_cycles_total: u64,
    /// Entries currently in the dead-letter queue
    pub dead_letters: usize,
    pub publishes_by_topic: HashMap<String, u64>,
    /// Per-message dispatch latency in microseconds
    pub dispatch_latency_us: LatencyStats,
}

/// Latency statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LatencyStats {
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub max: f64,
}

/// Collects [`BusMetrics`]
#[derive(Clone)]
pub struct BusMetricsCollector {
    metrics: Arc<RwLock<BusMetrics>>,
    max_topics: usize,
    latency_samples: Arc<RwLock<Vec<u64>>>,
    max_samples: usize,
}

impl BusMetricsCollector {
    pub fn new(max_topics: usize, max_samples: usize) -> Self {
        Self {
            metrics: Arc::new(RwLock::new(BusMetrics::default())),
            max_topics,
            latency_samples: Arc::new(RwLock::new(Vec::new())),
            max_samples,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(64, 1000)
    }

    pub async fn record_publish(&self, topic: &str) {
        let mut metrics = self.metrics.write().await;
        metrics.messages_published_total = metrics.messages_published_total.saturating_add(1);

        let key = if metrics.publishes_by_topic.contains_key(topic)
            || metrics.publishes_by_topic.len() < self.max_topics
        {
            topic
        } else {
            OTHER_TOPICS
        };
        let counter = metrics.publishes_by_topic.entry(key.to_string()).or_insert(0);
        *counter = counter.saturating_add(1);
    }

    pub async fn record_delivery(&self) {
        let mut metrics = self.metrics.write().await;
        metrics.deliveries_total = metrics.deliveries_total.saturating_add(1);
    }

    pub async fn record_delivery_failure(&self) {
        let mut metrics = self.metrics.write().await;
        metrics.delivery_failures_total = metrics.delivery_failures_total.saturating_add(1);
    }

    pub async fn record_unrouted(&self) {
        let mut metrics = self.metrics.write().await;
        metrics.unrouted_total = metrics.unrouted_total.saturating_add(1);
    }

    pub async fn record_forward(&self, success: bool) {
        let mut metrics = self.metrics.write().await;
        if success {
            metrics.forwarded_total = metrics.forwarded_total.saturating_add(1);
        } else {
            metrics.forward_failures_total = metrics.forward_failures_total.saturating_add(1);
        }
    }

    pub async fn record_cycle(&self) {
        let mut metrics = self.metrics.write().await;
        metrics.dispatch_cycles_total = metrics.dispatch_cycles_total.saturating_add(1);
    }

    /// Record the time taken to dispatch one message
    pub async fn record_latency(&self, micros: u64) {
        let mut samples = self.latency_samples.write().await;
        samples.push(micros);
        if samples.len() > self.max_samples {
            let excess = samples.len() - self.max_samples;
            samples.drain(0..excess);
        }

        let mut sorted = samples.clone();
        drop(samples);
        sorted.sort_unstable();

        let Some(&max) = sorted.last() else {
            return;
        };
        let at = |q: f64| sorted[((sorted.len() as f64 * q) as usize).min(sorted.len() - 1)] as f64;

        let mut metrics = self.metrics.write().await;
        metrics.dispatch_latency_us = LatencyStats {
            p50: at(0.50),
            p95: at(0.95),
            p99: at(0.99),
            max: max as f64,
        };
    }

    pub async fn snapshot(&self) -> BusMetrics {
        self.metrics.read().await.clone()
    }

    pub async fn reset(&self) {
        *self.metrics.write().await = BusMetrics::default();
        self.latency_samples.write().await.clear();
    }
}
