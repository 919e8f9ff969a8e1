//! High-level synchronizer facade and its configuration.

mod config;
mod core;


use serde::{Deserialize, Serialize};

use crate::error::SyncResult;
use crate::metrics::MetricsSnapshot;
use crate::plan::PlanSummary;
use crate::types::{Course, CourseDetails, CourseId, CoursePatch, CourseTree, ModuleSubmission};

pub use config::{BatchLimits, RetryPolicy, SyncConfig};
pub use self::core::CourseTreeSynchronizer;

/// Result of a committed sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOutcome {
    /// The course row as committed, aggregates included.
    pub course: Course,
    /// Effective operations performed by the committed attempt.
    pub summary: PlanSummary,
    /// Attempts used, counting the successful one.
    pub attempts: u32,
}

/// Entry point for reconciling submitted course trees with the store.
pub trait CourseTreeFacade: Send + Sync {
    /// Creates a course and its whole module/lesson tree atomically.
    ///
    /// The slug is taken from `details.slug` or derived from the title.
    ///
    /// # Errors
    ///
    /// `Validation`, `SlugConflict`, `RetriesExhausted` or `Store`.
    fn create_course_tree(
        &self,
        details: CourseDetails,
        modules: Vec<ModuleSubmission>,
    ) -> SyncResult<SyncOutcome>;

    /// Applies `patch` to the course and reconciles its tree with `modules`.
    ///
    /// Persisted modules and lessons absent from `modules` are deleted.
    /// Resubmitting the persisted tree unchanged performs no writes.
    ///
    /// # Errors
    ///
    /// `NotFound`, `Validation`, `SlugConflict`, `RetriesExhausted` or `Store`.
    fn update_course_tree(
        &self,
        course_id: CourseId,
        patch: CoursePatch,
        modules: Vec<ModuleSubmission>,
    ) -> SyncResult<SyncOutcome>;

    /// Reads a course with its ordered hierarchy.
    fn load_course_tree(&self, course_id: CourseId) -> SyncResult<CourseTree>;

    fn metrics(&self) -> MetricsSnapshot;

    /// Blocks until cache invalidation and media removal for every committed
    /// sync so far have run.
    fn flush_side_effects(&self);

    /// Drains post-commit work and refuses further syncs.
    fn close(&self) -> SyncResult<()>;
}
