//! Daemon Metrics Collection
//!
//! Counters and latency tracking for the dispatcher. Logged as a snapshot on
//! shutdown.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Atomic counter for thread-safe incrementing
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Running count, mean and maximum of observed durations
#[derive(Debug, Default)]
pub struct Latency {
    count: AtomicU64,
    sum_micros: AtomicU64,
    max_micros: AtomicU64,
}

impl Latency {
    pub fn observe(&self, duration: Duration) {
        let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_micros.fetch_add(micros, Ordering::Relaxed);
        self.max_micros.fetch_max(micros, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn mean_ms(&self) -> f64 {
        let count = self.count();
        if count == 0 {
            return 0.0;
        }
        self.sum_micros.load(Ordering::Relaxed) as f64 / count as f64 / 1000.0
    }

    pub fn max_ms(&self) -> f64 {
        self.max_micros.load(Ordering::Relaxed) as f64 / 1000.0
    }
}

/// All daemon metrics
#[derive(Debug, Default)]
pub struct DaemonMetrics {
    // Dispatcher
    pub requests_total: Counter,
    pub requests_malformed: Counter,
    pub requests_invalid: Counter,
    pub replies_undelivered: Counter,

    // Catalog
    pub documents_added: Counter,
    pub documents_removed: Counter,
    pub index_errors: Counter,

    // Search
    pub searches_total: Counter,
    pub search_latency: Latency,
    pub search_workers_spawned: Counter,
    pub search_workers_failed: Counter,
    pub cache_hits: Counter,

    // Line count
    pub line_counts_total: Counter,
}

impl DaemonMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a shareable metrics instance
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Take a snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_total: self.requests_total.get(),
            requests_malformed: self.requests_malformed.get(),
            requests_invalid: self.requests_invalid.get(),
            replies_undelivered: self.replies_undelivered.get(),
            documents_added: self.documents_added.get(),
            documents_removed: self.documents_removed.get(),
            index_errors: self.index_errors.get(),
            searches_total: self.searches_total.get(),
            search_latency_mean_ms: self.search_latency.mean_ms(),
            search_latency_max_ms: self.search_latency.max_ms(),
            search_workers_spawned: self.search_workers_spawned.get(),
            search_workers_failed: self.search_workers_failed.get(),
            cache_hits: self.cache_hits.get(),
            line_counts_total: self.line_counts_total.get(),
        }
    }
}

/// Point-in-time copy of [`DaemonMetrics`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub requests_malformed: u64,
    pub requests_invalid: u64,
    pub replies_undelivered: u64,
    pub documents_added: u64,
    pub documents_removed: u64,
    pub index_errors: u64,
    pub searches_total: u64,
    pub search_latency_mean_ms: f64,
    pub search_latency_max_ms: f64,
    pub search_workers_spawned: u64,
    pub search_workers_failed: u64,
    pub cache_hits: u64,
    pub line_counts_total: u64,
}
