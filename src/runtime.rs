//! Runtime protocols: attempt execution, retries, post-commit dispatch and
//! metrics collection.

pub mod after_commit;
pub(crate) mod cascade;
pub(crate) mod duration;
pub mod metrics;
pub mod mutator;
pub mod retry;

pub mod prelude {
    pub use super::after_commit::{AfterCommitDispatcher, AfterCommitTask};
    pub use super::metrics::{MetricsSnapshot, SyncMetrics};
    pub use super::mutator::BatchLimits;
    pub use super::retry::RetryPolicy;
}
