//! # coursetree
//!
//! Transactional synchronization of course hierarchies (course, ordered
//! modules, ordered lessons) against a persistent store.
//!
//! ## Features
//!
//! - **Atomic reconciliation**: create, update, move and delete a whole tree in one transaction
//! - **Collision-free reordering**: sibling swaps and cycles go through a sentinel slot
//! - **Bounded retries**: write conflicts and timeouts re-run the whole attempt with backoff
//! - **Reference cleanup**: enrollment pointers are nulled before their target is deleted
//! - **Post-commit hooks**: cache invalidation and orphaned media removal off the caller's thread
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use coursetree::*;
//!
//! let store = Arc::new(LmdbCourseStore::new("./data")?);
//! let sync = CourseTreeSynchronizer::new(store, SyncConfig::default())?;
//!
//! let outcome = sync.create_course_tree(
//!     CourseDetails::new("Rust 101", UserId(7)),
//!     vec![ModuleSubmission::new("Ownership", 1).with_lesson(LessonSubmission::new(
//!         "Moves",
//!         1,
//!         600,
//!         LessonContent::Video { url: "videos/moves.mp4".to_string() },
//!     ))],
//! )?;
//!
//! // Resubmitting the persisted tree is a no-op.
//! let tree = sync.load_course_tree(outcome.course.id)?;
//! let again = sync.update_course_tree(
//!     outcome.course.id,
//!     CoursePatch::default(),
//!     tree.to_submission(),
//! )?;
//! assert!(again.summary.is_noop());
//!
//! sync.close()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! A runnable walkthrough lives in `demos/basic_usage.rs`
//! (`cargo run --example basic_usage`).

pub mod api;
pub mod collab;
pub mod plan;
pub mod runtime;
pub mod storage;

pub use crate::api::{error, facade, types};
pub use crate::runtime::metrics;

pub use api::error::{
    CollaboratorError, Constraint, StoreError, StoreResult, SyncError, SyncResult,
    TransientFailure, ValidationError,
};
pub use api::facade::{
    BatchLimits, CourseTreeFacade, CourseTreeSynchronizer, RetryPolicy, SyncConfig, SyncOutcome,
};
pub use api::types::*;
pub use collab::{CacheInvalidator, FsMediaStore, MediaStore, NoopCacheInvalidator, NoopMediaStore};
pub use plan::PlanSummary;
pub use runtime::after_commit::stale_patterns;
pub use runtime::metrics::{MetricsSnapshot, SyncMetrics};
pub use storage::fs::store_lock::StoreLockGuard;
pub use storage::{CourseStore, LmdbCourseStore, MemoryCourseStore, StoreReader, StoreTransaction};
