//! Public API surface for coursetree consumers.
//!
//! This module groups the domain types, error definitions and the facade trait
//! so callers can drive synchronizations without reaching into the planner,
//! runtime or storage internals.

pub mod error;
pub mod facade;
pub mod types;

pub mod prelude {
    pub use super::error::{StoreError, StoreResult, SyncError, SyncResult, ValidationError};
    pub use super::facade::{
        BatchLimits, CourseTreeFacade, CourseTreeSynchronizer, RetryPolicy, SyncConfig,
        SyncOutcome,
    };
    pub use super::types::*;
}
