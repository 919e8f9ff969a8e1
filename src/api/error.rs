use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::types::{CourseId, EntityKind, LessonId, ModuleId, Position};

pub type StoreResult<T> = Result<T, StoreError>;
pub type SyncResult<T> = Result<T, SyncError>;

/// Uniqueness constraints the store enforces eagerly on every write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    CourseSlug { slug: String },
    ModulePosition { course: CourseId, position: Position },
    LessonPosition { module: ModuleId, position: Position },
}

impl std::fmt::Display for Constraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Constraint::CourseSlug { slug } => write!(f, "course slug '{slug}'"),
            Constraint::ModulePosition { course, position } => {
                write!(f, "module position {position} in {course}")
            }
            Constraint::LessonPosition { module, position } => {
                write!(f, "lesson position {position} in {module}")
            }
        }
    }
}

/// Errors reported by a [`CourseStore`](crate::storage::CourseStore) backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("heed error: {0}")]
    Heed(#[from] heed::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("unique constraint violated: {constraint}")]
    UniqueViolation { constraint: Constraint },

    #[error("write conflict on {resource}")]
    WriteConflict { resource: String },

    #[error("transaction attempt exceeded its {budget:?} budget")]
    Timeout { budget: Duration },

    #[error("{entity} {id} does not exist")]
    MissingEntity { entity: EntityKind, id: u64 },

    #[error("{entity} {id} still owns {children} children")]
    ChildrenRemain {
        entity: EntityKind,
        id: u64,
        children: usize,
    },

    #[error("transaction already finished")]
    TransactionClosed,

    #[error("data directory locked at {path:?}")]
    StoreLocked { path: PathBuf },

    #[error("invalid configuration: {field} must be at least {min}, got {value}")]
    InvalidConfiguration {
        field: &'static str,
        min: u64,
        value: u64,
    },
}

impl StoreError {
    pub fn missing(entity: EntityKind, id: u64) -> Self {
        StoreError::MissingEntity { entity, id }
    }
}

/// Store failure expected to resolve when the whole attempt is re-run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransientFailure {
    #[error("write conflict: {0}")]
    WriteConflict(String),

    #[error("attempt exceeded {0:?}")]
    Timeout(Duration),
}

/// Structural problems in a submitted tree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{entity} title must not be empty")]
    EmptyTitle { entity: EntityKind },

    #[error("course slug derived from '{source_text}' is empty")]
    EmptySlug { source_text: String },

    #[error("{entity} position {position} is reserved")]
    ReservedPosition {
        entity: EntityKind,
        position: Position,
    },

    #[error("no free {entity} position at or after {requested}")]
    PositionsExhausted {
        entity: EntityKind,
        requested: Position,
    },

    #[error("{module} is not part of {course}")]
    ForeignModule { module: ModuleId, course: CourseId },

    #[error("{lesson} is not part of {}", parent_label(.parent))]
    ForeignLesson {
        lesson: LessonId,
        parent: Option<ModuleId>,
    },

    #[error("{0} submitted more than once")]
    DuplicateModule(ModuleId),

    #[error("{0} submitted more than once")]
    DuplicateLesson(LessonId),

    #[error("video lesson '{title}' has no media url")]
    MissingVideoUrl { title: String },

    #[error("text lesson '{title}' has an empty body")]
    EmptyTextBody { title: String },

    #[error("duration total overflows for {entity}")]
    DurationOverflow { entity: EntityKind },
}

fn parent_label(parent: &Option<ModuleId>) -> String {
    match parent {
        Some(module) => module.to_string(),
        None => "a new module".to_string(),
    }
}

/// Errors returned to callers of the synchronizer.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("invalid course tree: {0}")]
    Validation(#[from] ValidationError),

    #[error("slug '{slug}' is already used by another course")]
    SlugConflict { slug: String },

    #[error("{entity} {id} not found")]
    NotFound { entity: EntityKind, id: u64 },

    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: TransientFailure,
    },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("synchronizer is shut down")]
    ShuttingDown,
}

impl SyncError {
    /// True when the failure came from contention and resubmitting may succeed.
    pub fn is_retries_exhausted(&self) -> bool {
        matches!(self, SyncError::RetriesExhausted { .. })
    }

    pub fn not_found(entity: EntityKind, id: u64) -> Self {
        SyncError::NotFound { entity, id }
    }
}

/// Outcome of a single transaction attempt, split by retry eligibility.
#[derive(Debug)]
pub(crate) enum AttemptError {
    Transient(TransientFailure),
    Fatal(SyncError),
}

impl From<StoreError> for AttemptError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::WriteConflict { resource } => {
                AttemptError::Transient(TransientFailure::WriteConflict(resource))
            }
            StoreError::Timeout { budget } => {
                AttemptError::Transient(TransientFailure::Timeout(budget))
            }
            // Sibling positions are sequenced by the resolver, so a violation
            // here means another writer moved a sibling under us.
            StoreError::UniqueViolation {
                constraint:
                    constraint @ (Constraint::ModulePosition { .. }
                    | Constraint::LessonPosition { .. }),
            } => AttemptError::Transient(TransientFailure::WriteConflict(constraint.to_string())),
            StoreError::UniqueViolation {
                constraint: Constraint::CourseSlug { slug },
            } => AttemptError::Fatal(SyncError::SlugConflict { slug }),
            StoreError::MissingEntity { entity, id } => {
                AttemptError::Fatal(SyncError::NotFound { entity, id })
            }
            other => AttemptError::Fatal(SyncError::Store(other)),
        }
    }
}

impl From<SyncError> for AttemptError {
    fn from(err: SyncError) -> Self {
        AttemptError::Fatal(err)
    }
}

impl From<ValidationError> for AttemptError {
    fn from(err: ValidationError) -> Self {
        AttemptError::Fatal(SyncError::Validation(err))
    }
}

/// Failure reported by an external collaborator (media store, cache sink).
///
/// These are logged by the post-commit worker and never reach callers.
#[derive(Debug, Error)]
#[error("{service} failed: {reason}")]
pub struct CollaboratorError {
    pub service: &'static str,
    pub reason: String,
}

impl CollaboratorError {
    pub fn new(service: &'static str, reason: impl Into<String>) -> Self {
        Self {
            service,
            reason: reason.into(),
        }
    }
}
