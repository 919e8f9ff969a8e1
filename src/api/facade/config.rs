use std::time::Duration;

use crate::error::{StoreError, StoreResult};

pub use crate::runtime::mutator::BatchLimits;
pub use crate::runtime::retry::RetryPolicy;

/// Configuration for a [`CourseTreeSynchronizer`](super::CourseTreeSynchronizer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Whole-attempt retry policy for transient store failures
    pub retry: RetryPolicy,
    /// Rows per batch; batch boundaries are deadline checkpoints
    pub batch: BatchLimits,
    /// Wall-clock budget of one attempt
    pub attempt_timeout: Duration,
    /// Capacity of the post-commit queue; overflowing tasks are dropped
    pub after_commit_queue: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            batch: BatchLimits::default(),
            attempt_timeout: Duration::from_secs(60),
            after_commit_queue: 1024,
        }
    }
}

impl SyncConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.retry.max_attempts = max_attempts;
        self
    }

    pub fn with_batch_limits(mut self, modules: usize, lessons: usize) -> Self {
        self.batch = BatchLimits { modules, lessons };
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn with_after_commit_queue(mut self, capacity: usize) -> Self {
        self.after_commit_queue = capacity;
        self
    }

    /// Rejects values the synchronizer cannot run with.
    pub fn validate(&self) -> StoreResult<()> {
        let checks: [(&'static str, u64); 4] = [
            ("retry.max_attempts", u64::from(self.retry.max_attempts)),
            ("batch.modules", self.batch.modules as u64),
            ("batch.lessons", self.batch.lessons as u64),
            ("after_commit_queue", self.after_commit_queue as u64),
        ];
        for (field, value) in checks {
            if value == 0 {
                return Err(StoreError::InvalidConfiguration {
                    field,
                    min: 1,
                    value,
                });
            }
        }
        if self.retry.initial_backoff > self.retry.max_backoff {
            return Err(StoreError::InvalidConfiguration {
                field: "retry.max_backoff",
                min: self.retry.initial_backoff.as_millis() as u64,
                value: self.retry.max_backoff.as_millis() as u64,
            });
        }
        Ok(())
    }
}
