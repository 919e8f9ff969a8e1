//! Transactional store contract and its backends.
//!
//! The synchronizer only talks to [`CourseStore`] and the transaction handles
//! it hands out. Backends must enforce sibling-position and slug uniqueness on
//! every write and must report contention (`WriteConflict`, `Timeout`)
//! distinctly from permanent failures.

pub mod fs;
pub mod lmdb;
pub mod memory;

pub use lmdb::LmdbCourseStore;
pub use memory::MemoryCourseStore;

use crate::error::StoreResult;
use crate::types::{
    Course, CourseId, CourseTree, Enrollment, EnrollmentId, Lesson, LessonId, MediaRef, Module,
    ModuleId, ModuleNode, NewCourse, NewLesson, NewModule, WeakRef,
};

/// Shared handle to a transactional backend.
pub trait CourseStore: Send + Sync {
    /// Opens a transaction. Dropping the handle without committing discards it.
    fn begin(&self) -> StoreResult<Box<dyn StoreTransaction + '_>>;

    /// Opens a read-only view of committed state. It never waits for writers.
    fn begin_read(&self) -> StoreResult<Box<dyn StoreReader + '_>>;
}

/// Reads available to both read-only views and write transactions.
pub trait StoreReader {
    fn course(&self, id: CourseId) -> StoreResult<Option<Course>>;
    fn course_by_slug(&self, slug: &str) -> StoreResult<Option<Course>>;
    fn module(&self, id: ModuleId) -> StoreResult<Option<Module>>;
    fn lesson(&self, id: LessonId) -> StoreResult<Option<Lesson>>;
    /// Modules owned by `course`, ordered by position.
    fn modules_of(&self, course: CourseId) -> StoreResult<Vec<Module>>;
    /// Lessons owned by `module`, ordered by position.
    fn lessons_of(&self, module: ModuleId) -> StoreResult<Vec<Lesson>>;
    fn enrollment(&self, id: EnrollmentId) -> StoreResult<Option<Enrollment>>;
    fn enrollments_referencing(&self, target: WeakRef) -> StoreResult<Vec<Enrollment>>;
    /// Whether any lesson, in any course, points at `media`.
    fn media_referenced(&self, media: &MediaRef) -> StoreResult<bool>;

    /// Reads a course with its whole hierarchy.
    fn course_tree(&self, id: CourseId) -> StoreResult<Option<CourseTree>> {
        let Some(course) = self.course(id)? else {
            return Ok(None);
        };

        let modules = self
            .modules_of(id)?
            .into_iter()
            .map(|module| {
                let lessons = self.lessons_of(module.id)?;
                Ok(ModuleNode { module, lessons })
            })
            .collect::<StoreResult<Vec<_>>>()?;

        Ok(Some(CourseTree { course, modules }))
    }
}

/// A single read-committed (or stronger) transaction.
///
/// Writes are checked against uniqueness constraints immediately; violations
/// come back as [`StoreError::UniqueViolation`](crate::error::StoreError::UniqueViolation)
/// and leave the transaction usable for rollback.
pub trait StoreTransaction: StoreReader {
    fn insert_course(&mut self, course: NewCourse) -> StoreResult<Course>;
    fn update_course(&mut self, course: &Course) -> StoreResult<()>;
    fn insert_module(&mut self, module: NewModule) -> StoreResult<Module>;
    fn update_module(&mut self, module: &Module) -> StoreResult<()>;
    /// Fails with `ChildrenRemain` while the module still owns lessons.
    fn delete_module(&mut self, id: ModuleId) -> StoreResult<()>;
    fn insert_lesson(&mut self, lesson: NewLesson) -> StoreResult<Lesson>;
    fn update_lesson(&mut self, lesson: &Lesson) -> StoreResult<()>;
    fn delete_lesson(&mut self, id: LessonId) -> StoreResult<()>;
    /// Inserts or replaces an enrollment. Its pointers must reference live rows.
    fn put_enrollment(&mut self, enrollment: &Enrollment) -> StoreResult<()>;

    fn commit(self: Box<Self>) -> StoreResult<()>;
    fn rollback(self: Box<Self>) -> StoreResult<()>;
}
