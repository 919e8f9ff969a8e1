//! Bounded whole-attempt retry with exponential backoff.

use std::time::Duration;

use crate::error::{AttemptError, SyncError, SyncResult};
use crate::metrics::SyncMetrics;

/// How often, and how patiently, a failed attempt is re-run.
///
/// The delay after the n-th failed attempt is `initial_backoff * 2^(n-1)`,
/// capped at `max_backoff`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(25),
            max_backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts,
            initial_backoff,
            max_backoff,
        }
    }

    /// Retries without sleeping in between.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO, Duration::ZERO)
    }

    /// Delay to wait after the `failed_attempt`-th attempt failed (1-based).
    pub fn delay_for(&self, failed_attempt: u32) -> Duration {
        let exponent = failed_attempt.saturating_sub(1);
        let multiplier = 2u32.saturating_pow(exponent);
        self.initial_backoff
            .checked_mul(multiplier)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

/// Runs `attempt` until it succeeds, fails permanently, or the policy runs
/// out of attempts. Returns the value with the number of attempts used.
///
/// `attempt` receives the 1-based attempt number and must start from a clean
/// transaction every time.
pub(crate) fn run_with_retry<T>(
    policy: &RetryPolicy,
    metrics: &SyncMetrics,
    mut attempt: impl FnMut(u32) -> Result<T, AttemptError>,
) -> SyncResult<(T, u32)> {
    let max_attempts = policy.max_attempts.max(1);
    let mut number = 1;
    loop {
        metrics.record_attempt();
        match attempt(number) {
            Ok(value) => return Ok((value, number)),
            Err(AttemptError::Fatal(err)) => {
                metrics.record_failure();
                return Err(err);
            }
            Err(AttemptError::Transient(failure)) if number >= max_attempts => {
                tracing::error!(attempts = number, %failure, "Giving up after transient failures");
                metrics.record_exhausted();
                return Err(SyncError::RetriesExhausted {
                    attempts: number,
                    last: failure,
                });
            }
            Err(AttemptError::Transient(failure)) => {
                let delay = policy.delay_for(number);
                tracing::warn!(
                    attempt = number,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    %failure,
                    "Transient failure, retrying attempt"
                );
                metrics.record_retry();
                if !delay.is_zero() {
                    std::thread::sleep(delay);
                }
                number += 1;
            }
        }
    }
}
