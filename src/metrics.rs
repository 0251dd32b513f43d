//! Process-lifetime metrics snapshot (C14).
//!
//! A set of atomic counters/gauges shared behind an `Arc`, updated by the
//! pipeline, queue service and workers. `snapshot()` is the only operation
//! that crosses threads to read the whole set at once; it never blocks a hot
//! path on a lock held across I/O.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug)]
pub struct Metrics {
    started_at: Instant,
    active_downloads: AtomicI64,
    completed_total: AtomicU64,
    failed_total: AtomicU64,
    retried_total: AtomicU64,
    refresh_cycles_total: AtomicU64,
    episodes_discovered_total: AtomicU64,
    retention_deleted_total: AtomicU64,
    retention_bytes_freed_total: AtomicU64,
}

/// Point-in-time view returned by [`Metrics::snapshot`]; cheap to construct,
/// safe to serialize for an admin status response.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSnapshot {
    pub uptime_seconds: u64,
    pub active_downloads: i64,
    pub completed_total: u64,
    pub failed_total: u64,
    pub retried_total: u64,
    pub refresh_cycles_total: u64,
    pub episodes_discovered_total: u64,
    pub retention_deleted_total: u64,
    pub retention_bytes_freed_total: u64,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            started_at: Instant::now(),
            active_downloads: AtomicI64::new(0),
            completed_total: AtomicU64::new(0),
            failed_total: AtomicU64::new(0),
            retried_total: AtomicU64::new(0),
            refresh_cycles_total: AtomicU64::new(0),
            episodes_discovered_total: AtomicU64::new(0),
            retention_deleted_total: AtomicU64::new(0),
            retention_bytes_freed_total: AtomicU64::new(0),
        })
    }

    pub fn set_active_downloads(&self, count: i64) {
        self.active_downloads.store(count, Ordering::Relaxed);
    }

    pub fn record_completed(&self) {
        self.completed_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retried(&self) {
        self.retried_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_refresh_cycle(&self) {
        self.refresh_cycles_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_episodes_discovered(&self, n: u64) {
        self.episodes_discovered_total.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_retention(&self, deleted: u64, bytes_freed: u64) {
        self.retention_deleted_total.fetch_add(deleted, Ordering::Relaxed);
        self.retention_bytes_freed_total
            .fetch_add(bytes_freed, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_seconds: self.started_at.elapsed().as_secs(),
            active_downloads: self.active_downloads.load(Ordering::Relaxed),
            completed_total: self.completed_total.load(Ordering::Relaxed),
            failed_total: self.failed_total.load(Ordering::Relaxed),
            retried_total: self.retried_total.load(Ordering::Relaxed),
            refresh_cycles_total: self.refresh_cycles_total.load(Ordering::Relaxed),
            episodes_discovered_total: self.episodes_discovered_total.load(Ordering::Relaxed),
            retention_deleted_total: self.retention_deleted_total.load(Ordering::Relaxed),
            retention_bytes_freed_total: self.retention_bytes_freed_total.load(Ordering::Relaxed),
        }
    }
}
