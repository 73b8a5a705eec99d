//! Process-wide counters

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Metrics handle for recording counters
#[derive(Debug, Default)]
pub struct Metrics {
    uploads_accepted: AtomicU64,
    downloads_served: AtomicU64,
    records_reclaimed: AtomicU64,
    reclaim_failures: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upload_accepted(&self) {
        self.uploads_accepted.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "uploads_accepted", "Metric incremented");
    }

    pub fn download_served(&self) {
        self.downloads_served.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "downloads_served", "Metric incremented");
    }

    pub fn records_reclaimed(&self, count: u64) {
        self.records_reclaimed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn reclaim_failures(&self, count: u64) {
        self.reclaim_failures.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uploads_accepted: self.uploads_accepted.load(Ordering::Relaxed),
            downloads_served: self.downloads_served.load(Ordering::Relaxed),
            records_reclaimed: self.records_reclaimed.load(Ordering::Relaxed),
            reclaim_failures: self.reclaim_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub uploads_accepted: u64,
    pub downloads_served: u64,
    pub records_reclaimed: u64,
    pub reclaim_failures: u64,
}
