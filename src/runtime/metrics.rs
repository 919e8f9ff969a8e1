//! Counters and latency samples for the synchronizer.
//!
//! The handle is cheap to clone; every clone feeds the same counters. All
//! counters are monotonically increasing.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::plan::PlanSummary;

pub mod snapshot;

pub use snapshot::MetricsSnapshot;

const RECENT_SAMPLES: usize = 100;

#[derive(Debug, Clone)]
pub struct SyncMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    syncs_committed: AtomicU64,
    attempts: AtomicU64,
    retries: AtomicU64,
    permanent_failures: AtomicU64,
    retries_exhausted: AtomicU64,
    module_operations: AtomicU64,
    lesson_operations: AtomicU64,
    references_cleared: AtomicU64,
    media_removed: AtomicU64,
    media_failures: AtomicU64,
    cache_invalidations: AtomicU64,
    cache_failures: AtomicU64,
    after_commit_dropped: AtomicU64,
    total_sync_time_us: AtomicU64,
    recent: RwLock<RecentSyncs>,
}

#[derive(Debug, Default)]
struct RecentSyncs {
    last_100_sync_times_us: VecDeque<u64>,
    last_sync_timestamp: Option<Instant>,
}

impl SyncMetrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner::default()),
        }
    }

    pub fn record_attempt(&self) {
        self.inner.attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.inner.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_commit(&self, summary: &PlanSummary, references_cleared: usize, duration: Duration) {
        self.inner.syncs_committed.fetch_add(1, Ordering::Relaxed);
        let modules = summary.module_creates + summary.module_updates + summary.module_deletes;
        let lessons = summary.lesson_creates + summary.lesson_updates + summary.lesson_deletes;
        self.inner
            .module_operations
            .fetch_add(modules as u64, Ordering::Relaxed);
        self.inner
            .lesson_operations
            .fetch_add(lessons as u64, Ordering::Relaxed);
        self.inner
            .references_cleared
            .fetch_add(references_cleared as u64, Ordering::Relaxed);

        let duration_us = duration.as_micros() as u64;
        self.inner
            .total_sync_time_us
            .fetch_add(duration_us, Ordering::Relaxed);

        let mut recent = self.inner.recent.write();
        recent.last_sync_timestamp = Some(Instant::now());
        if recent.last_100_sync_times_us.len() >= RECENT_SAMPLES {
            recent.last_100_sync_times_us.pop_front();
        }
        recent.last_100_sync_times_us.push_back(duration_us);
    }

    pub fn record_failure(&self) {
        self.inner.permanent_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_exhausted(&self) {
        self.inner.retries_exhausted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_media_removed(&self) {
        self.inner.media_removed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_media_failure(&self) {
        self.inner.media_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalidation(&self) {
        self.inner.cache_invalidations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalidation_failure(&self) {
        self.inner.cache_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped_task(&self) {
        self.inner
            .after_commit_dropped
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let syncs_committed = self.inner.syncs_committed.load(Ordering::Relaxed);
        let total_sync_time_us = self.inner.total_sync_time_us.load(Ordering::Relaxed);
        let avg_sync_time_us = if syncs_committed > 0 {
            total_sync_time_us / syncs_committed
        } else {
            0
        };

        let recent = self.inner.recent.read();
        let sync_p50_us = snapshot::calculate_percentile(&recent.last_100_sync_times_us, 50);
        let sync_p95_us = snapshot::calculate_percentile(&recent.last_100_sync_times_us, 95);
        let sync_p99_us = snapshot::calculate_percentile(&recent.last_100_sync_times_us, 99);
        let last_sync_secs = recent.last_sync_timestamp.map(|t| t.elapsed().as_secs());
        drop(recent);

        MetricsSnapshot {
            syncs_committed,
            attempts: self.inner.attempts.load(Ordering::Relaxed),
            retries: self.inner.retries.load(Ordering::Relaxed),
            permanent_failures: self.inner.permanent_failures.load(Ordering::Relaxed),
            retries_exhausted: self.inner.retries_exhausted.load(Ordering::Relaxed),
            module_operations: self.inner.module_operations.load(Ordering::Relaxed),
            lesson_operations: self.inner.lesson_operations.load(Ordering::Relaxed),
            references_cleared: self.inner.references_cleared.load(Ordering::Relaxed),
            media_removed: self.inner.media_removed.load(Ordering::Relaxed),
            media_failures: self.inner.media_failures.load(Ordering::Relaxed),
            cache_invalidations: self.inner.cache_invalidations.load(Ordering::Relaxed),
            cache_failures: self.inner.cache_failures.load(Ordering::Relaxed),
            after_commit_dropped: self.inner.after_commit_dropped.load(Ordering::Relaxed),
            avg_sync_time_us,
            sync_p50_us,
            sync_p95_us,
            sync_p99_us,
            last_sync_secs,
        }
    }
}

impl Default for SyncMetrics {
    fn default() -> Self {
        Self::new()
    }
}
