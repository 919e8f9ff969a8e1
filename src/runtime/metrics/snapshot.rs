use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Point-in-time copy of the synchronizer counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub syncs_committed: u64,
    pub attempts: u64,
    pub retries: u64,
    pub permanent_failures: u64,
    pub retries_exhausted: u64,
    pub module_operations: u64,
    pub lesson_operations: u64,
    pub references_cleared: u64,
    pub media_removed: u64,
    pub media_failures: u64,
    pub cache_invalidations: u64,
    pub cache_failures: u64,
    pub after_commit_dropped: u64,
    pub avg_sync_time_us: u64,
    pub sync_p50_us: u64,
    pub sync_p95_us: u64,
    pub sync_p99_us: u64,
    pub last_sync_secs: Option<u64>,
}

pub(crate) fn calculate_percentile(values: &VecDeque<u64>, percentile: u8) -> u64 {
    if values.is_empty() {
        return 0;
    }

    let mut sorted: Vec<_> = values.iter().copied().collect();
    sorted.sort_unstable();

    let index = ((percentile as f64 / 100.0) * (sorted.len() as f64 - 1.0)).round() as usize;
    sorted[index.min(sorted.len() - 1)]
}
