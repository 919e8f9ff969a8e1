//! In-process store with snapshot transactions and first-committer-wins
//! validation.
//!
//! Every transaction works on a private copy of the tables taken at `begin`
//! and records its writes in a log. At commit the log is replayed on top of
//! the latest committed state; if any resource it wrote was committed by
//! someone else after this transaction began, the commit fails with
//! `WriteConflict` and nothing is applied. Tree writes are tracked at course
//! granularity, so two concurrent syncs of the same course always conflict.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::error::{Constraint, StoreError, StoreResult};
use crate::types::{
    Course, CourseId, EntityKind, Enrollment, EnrollmentId, Lesson, LessonId, MediaRef, Module,
    ModuleId, NewCourse, NewLesson, NewModule, Position, WeakRef,
};

use super::{CourseStore, StoreReader, StoreTransaction};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Resource {
    Course(CourseId),
    Module(ModuleId),
    Lesson(LessonId),
    Enrollment(EnrollmentId),
    Slug(String),
}

impl Resource {
    fn describe(&self) -> String {
        match self {
            Resource::Course(id) => id.to_string(),
            Resource::Module(id) => id.to_string(),
            Resource::Lesson(id) => id.to_string(),
            Resource::Enrollment(id) => id.to_string(),
            Resource::Slug(slug) => format!("slug '{slug}'"),
        }
    }
}

#[derive(Debug, Clone)]
enum WriteOp {
    InsertCourse(Course),
    UpdateCourse(Course),
    InsertModule(Module),
    UpdateModule(Module),
    DeleteModule(ModuleId),
    InsertLesson(Lesson),
    UpdateLesson(Lesson),
    DeleteLesson(LessonId),
    PutEnrollment(Enrollment),
}

#[derive(Debug, Clone, Default)]
struct Tables {
    courses: BTreeMap<CourseId, Course>,
    modules: BTreeMap<ModuleId, Module>,
    lessons: BTreeMap<LessonId, Lesson>,
    enrollments: BTreeMap<EnrollmentId, Enrollment>,
    slugs: HashMap<String, CourseId>,
    module_slots: BTreeMap<(CourseId, Position), ModuleId>,
    lesson_slots: BTreeMap<(ModuleId, Position), LessonId>,
}

impl Tables {
    fn course_of_module(&self, id: ModuleId) -> StoreResult<CourseId> {
        self.modules
            .get(&id)
            .map(|module| module.course_id)
            .ok_or_else(|| StoreError::missing(EntityKind::Module, id.get()))
    }

    /// Resources written by `op`, resolved against the current state.
    fn resources(&self, op: &WriteOp) -> StoreResult<Vec<Resource>> {
        let resources = match op {
            WriteOp::InsertCourse(course) => vec![
                Resource::Course(course.id),
                Resource::Slug(course.slug.clone()),
            ],
            WriteOp::UpdateCourse(course) => {
                let mut touched = vec![Resource::Course(course.id)];
                if let Some(stored) = self.courses.get(&course.id) {
                    if stored.slug != course.slug {
                        touched.push(Resource::Slug(stored.slug.clone()));
                        touched.push(Resource::Slug(course.slug.clone()));
                    }
                }
                touched
            }
            WriteOp::InsertModule(module) | WriteOp::UpdateModule(module) => vec![
                Resource::Course(module.course_id),
                Resource::Module(module.id),
            ],
            WriteOp::DeleteModule(id) => {
                vec![
                    Resource::Course(self.course_of_module(*id)?),
                    Resource::Module(*id),
                ]
            }
            WriteOp::InsertLesson(lesson) | WriteOp::UpdateLesson(lesson) => vec![
                Resource::Course(self.course_of_module(lesson.module_id)?),
                Resource::Lesson(lesson.id),
            ],
            WriteOp::DeleteLesson(id) => {
                let lesson = self
                    .lessons
                    .get(id)
                    .ok_or_else(|| StoreError::missing(EntityKind::Lesson, id.get()))?;
                vec![
                    Resource::Course(self.course_of_module(lesson.module_id)?),
                    Resource::Lesson(*id),
                ]
            }
            WriteOp::PutEnrollment(enrollment) => {
                let mut touched = vec![Resource::Enrollment(enrollment.id)];
                if let Some(module) = enrollment.last_visited_module {
                    touched.push(Resource::Module(module));
                }
                if let Some(lesson) = enrollment.last_visited_lesson {
                    touched.push(Resource::Lesson(lesson));
                }
                touched
            }
        };
        Ok(resources)
    }

    fn apply(&mut self, op: &WriteOp) -> StoreResult<()> {
        match op {
            WriteOp::InsertCourse(course) => {
                if self.slugs.contains_key(&course.slug) {
                    return Err(slug_violation(&course.slug));
                }
                self.slugs.insert(course.slug.clone(), course.id);
                self.courses.insert(course.id, course.clone());
            }
            WriteOp::UpdateCourse(course) => {
                let stored = self
                    .courses
                    .get(&course.id)
                    .ok_or_else(|| StoreError::missing(EntityKind::Course, course.id.get()))?;
                if stored.slug != course.slug {
                    if self.slugs.contains_key(&course.slug) {
                        return Err(slug_violation(&course.slug));
                    }
                    let previous = stored.slug.clone();
                    self.slugs.remove(&previous);
                    self.slugs.insert(course.slug.clone(), course.id);
                }
                self.courses.insert(course.id, course.clone());
            }
            WriteOp::InsertModule(module) => {
                if !self.courses.contains_key(&module.course_id) {
                    return Err(StoreError::missing(
                        EntityKind::Course,
                        module.course_id.get(),
                    ));
                }
                let slot = (module.course_id, module.position);
                if self.module_slots.contains_key(&slot) {
                    return Err(module_violation(module));
                }
                self.module_slots.insert(slot, module.id);
                self.modules.insert(module.id, module.clone());
            }
            WriteOp::UpdateModule(module) => {
                let stored = self
                    .modules
                    .get(&module.id)
                    .ok_or_else(|| StoreError::missing(EntityKind::Module, module.id.get()))?;
                debug_assert_eq!(stored.course_id, module.course_id);
                if stored.position != module.position {
                    let slot = (module.course_id, module.position);
                    if self.module_slots.contains_key(&slot) {
                        return Err(module_violation(module));
                    }
                    self.module_slots
                        .remove(&(stored.course_id, stored.position));
                    self.module_slots.insert(slot, module.id);
                }
                self.modules.insert(module.id, module.clone());
            }
            WriteOp::DeleteModule(id) => {
                let stored = self
                    .modules
                    .get(id)
                    .ok_or_else(|| StoreError::missing(EntityKind::Module, id.get()))?;
                let children = self
                    .lesson_slots
                    .range((*id, Position::MIN)..=(*id, Position::MAX))
                    .count();
                if children > 0 {
                    return Err(StoreError::ChildrenRemain {
                        entity: EntityKind::Module,
                        id: id.get(),
                        children,
                    });
                }
                self.module_slots
                    .remove(&(stored.course_id, stored.position));
                self.modules.remove(id);
            }
            WriteOp::InsertLesson(lesson) => {
                if !self.modules.contains_key(&lesson.module_id) {
                    return Err(StoreError::missing(
                        EntityKind::Module,
                        lesson.module_id.get(),
                    ));
                }
                let slot = (lesson.module_id, lesson.position);
                if self.lesson_slots.contains_key(&slot) {
                    return Err(lesson_violation(lesson));
                }
                self.lesson_slots.insert(slot, lesson.id);
                self.lessons.insert(lesson.id, lesson.clone());
            }
            WriteOp::UpdateLesson(lesson) => {
                let stored = self
                    .lessons
                    .get(&lesson.id)
                    .ok_or_else(|| StoreError::missing(EntityKind::Lesson, lesson.id.get()))?;
                debug_assert_eq!(stored.module_id, lesson.module_id);
                if stored.position != lesson.position {
                    let slot = (lesson.module_id, lesson.position);
                    if self.lesson_slots.contains_key(&slot) {
                        return Err(lesson_violation(lesson));
                    }
                    self.lesson_slots
                        .remove(&(stored.module_id, stored.position));
                    self.lesson_slots.insert(slot, lesson.id);
                }
                self.lessons.insert(lesson.id, lesson.clone());
            }
            WriteOp::DeleteLesson(id) => {
                let stored = self
                    .lessons
                    .remove(id)
                    .ok_or_else(|| StoreError::missing(EntityKind::Lesson, id.get()))?;
                self.lesson_slots
                    .remove(&(stored.module_id, stored.position));
            }
            WriteOp::PutEnrollment(enrollment) => {
                if !self.courses.contains_key(&enrollment.course_id) {
                    return Err(StoreError::missing(
                        EntityKind::Course,
                        enrollment.course_id.get(),
                    ));
                }
                if let Some(module) = enrollment.last_visited_module {
                    if !self.modules.contains_key(&module) {
                        return Err(StoreError::missing(EntityKind::Module, module.get()));
                    }
                }
                if let Some(lesson) = enrollment.last_visited_lesson {
                    if !self.lessons.contains_key(&lesson) {
                        return Err(StoreError::missing(EntityKind::Lesson, lesson.get()));
                    }
                }
                self.enrollments.insert(enrollment.id, enrollment.clone());
            }
        }
        Ok(())
    }
}

fn slug_violation(slug: &str) -> StoreError {
    StoreError::UniqueViolation {
        constraint: Constraint::CourseSlug {
            slug: slug.to_string(),
        },
    }
}

fn module_violation(module: &Module) -> StoreError {
    StoreError::UniqueViolation {
        constraint: Constraint::ModulePosition {
            course: module.course_id,
            position: module.position,
        },
    }
}

fn lesson_violation(lesson: &Lesson) -> StoreError {
    StoreError::UniqueViolation {
        constraint: Constraint::LessonPosition {
            module: lesson.module_id,
            position: lesson.position,
        },
    }
}

#[derive(Debug, Default)]
struct Committed {
    tables: Tables,
    /// Commit sequence at which each resource was last written.
    last_write: HashMap<Resource, u64>,
    sequence: u64,
}

/// Shared in-memory backend.
#[derive(Debug, Default)]
pub struct MemoryCourseStore {
    committed: RwLock<Committed>,
    next_id: AtomicU64,
}

impl MemoryCourseStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn snapshot(&self) -> MemoryTransaction<'_> {
        let committed = self.committed.read();
        MemoryTransaction {
            store: self,
            begin_sequence: committed.sequence,
            working: committed.tables.clone(),
            log: Vec::new(),
            touched: HashSet::new(),
        }
    }

    /// Number of committed transactions so far.
    pub fn commit_sequence(&self) -> u64 {
        self.committed.read().sequence
    }
}

impl CourseStore for MemoryCourseStore {
    fn begin(&self) -> StoreResult<Box<dyn StoreTransaction + '_>> {
        Ok(Box::new(self.snapshot()))
    }

    fn begin_read(&self) -> StoreResult<Box<dyn StoreReader + '_>> {
        Ok(Box::new(self.snapshot()))
    }
}

struct MemoryTransaction<'s> {
    store: &'s MemoryCourseStore,
    begin_sequence: u64,
    working: Tables,
    log: Vec<WriteOp>,
    touched: HashSet<Resource>,
}

impl MemoryTransaction<'_> {
    fn write(&mut self, op: WriteOp) -> StoreResult<()> {
        let resources = self.working.resources(&op)?;
        self.working.apply(&op)?;
        self.touched.extend(resources);
        self.log.push(op);
        Ok(())
    }
}

impl StoreReader for MemoryTransaction<'_> {
    fn course(&self, id: CourseId) -> StoreResult<Option<Course>> {
        Ok(self.working.courses.get(&id).cloned())
    }

    fn course_by_slug(&self, slug: &str) -> StoreResult<Option<Course>> {
        Ok(self
            .working
            .slugs
            .get(slug)
            .and_then(|id| self.working.courses.get(id))
            .cloned())
    }

    fn module(&self, id: ModuleId) -> StoreResult<Option<Module>> {
        Ok(self.working.modules.get(&id).cloned())
    }

    fn lesson(&self, id: LessonId) -> StoreResult<Option<Lesson>> {
        Ok(self.working.lessons.get(&id).cloned())
    }

    fn modules_of(&self, course: CourseId) -> StoreResult<Vec<Module>> {
        Ok(self
            .working
            .module_slots
            .range((course, Position::MIN)..=(course, Position::MAX))
            .filter_map(|(_, id)| self.working.modules.get(id).cloned())
            .collect())
    }

    fn lessons_of(&self, module: ModuleId) -> StoreResult<Vec<Lesson>> {
        Ok(self
            .working
            .lesson_slots
            .range((module, Position::MIN)..=(module, Position::MAX))
            .filter_map(|(_, id)| self.working.lessons.get(id).cloned())
            .collect())
    }

    fn enrollment(&self, id: EnrollmentId) -> StoreResult<Option<Enrollment>> {
        Ok(self.working.enrollments.get(&id).cloned())
    }

    fn enrollments_referencing(&self, target: WeakRef) -> StoreResult<Vec<Enrollment>> {
        Ok(self
            .working
            .enrollments
            .values()
            .filter(|enrollment| enrollment.references(target))
            .cloned()
            .collect())
    }

    fn media_referenced(&self, media: &MediaRef) -> StoreResult<bool> {
        Ok(self
            .working
            .lessons
            .values()
            .any(|lesson| lesson.content.uses_media(media)))
    }

}

impl StoreTransaction for MemoryTransaction<'_> {
    fn insert_course(&mut self, course: NewCourse) -> StoreResult<Course> {
        let course = Course {
            id: CourseId(self.store.allocate_id()),
            slug: course.slug,
            title: course.title,
            owner: course.owner,
            total_duration: 0,
            published: course.published,
        };
        self.write(WriteOp::InsertCourse(course.clone()))?;
        Ok(course)
    }

    fn update_course(&mut self, course: &Course) -> StoreResult<()> {
        self.write(WriteOp::UpdateCourse(course.clone()))
    }

    fn insert_module(&mut self, module: NewModule) -> StoreResult<Module> {
        let module = Module {
            id: ModuleId(self.store.allocate_id()),
            course_id: module.course_id,
            title: module.title,
            position: module.position,
            duration: 0,
        };
        self.write(WriteOp::InsertModule(module.clone()))?;
        Ok(module)
    }

    fn update_module(&mut self, module: &Module) -> StoreResult<()> {
        self.write(WriteOp::UpdateModule(module.clone()))
    }

    fn delete_module(&mut self, id: ModuleId) -> StoreResult<()> {
        self.write(WriteOp::DeleteModule(id))
    }

    fn insert_lesson(&mut self, lesson: NewLesson) -> StoreResult<Lesson> {
        let lesson = Lesson {
            id: LessonId(self.store.allocate_id()),
            module_id: lesson.module_id,
            title: lesson.title,
            position: lesson.position,
            duration: lesson.duration,
            content: lesson.content,
        };
        self.write(WriteOp::InsertLesson(lesson.clone()))?;
        Ok(lesson)
    }

    fn update_lesson(&mut self, lesson: &Lesson) -> StoreResult<()> {
        self.write(WriteOp::UpdateLesson(lesson.clone()))
    }

    fn delete_lesson(&mut self, id: LessonId) -> StoreResult<()> {
        self.write(WriteOp::DeleteLesson(id))
    }

    fn put_enrollment(&mut self, enrollment: &Enrollment) -> StoreResult<()> {
        self.write(WriteOp::PutEnrollment(enrollment.clone()))
    }

    fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryTransaction {
            store,
            begin_sequence,
            log,
            touched,
            ..
        } = *self;
        if log.is_empty() {
            return Ok(());
        }

        let mut committed = store.committed.write();
        for resource in &touched {
            let last = committed.last_write.get(resource).copied().unwrap_or(0);
            if last > begin_sequence {
                return Err(StoreError::WriteConflict {
                    resource: resource.describe(),
                });
            }
        }

        let mut next = committed.tables.clone();
        for op in &log {
            next.apply(op).map_err(|err| match err {
                // The latest state no longer accepts the write: someone else
                // got there first.
                StoreError::UniqueViolation { constraint } => StoreError::WriteConflict {
                    resource: constraint.to_string(),
                },
                other => other,
            })?;
        }

        committed.sequence += 1;
        let sequence = committed.sequence;
        committed.tables = next;
        for resource in touched {
            committed.last_write.insert(resource, sequence);
        }
        Ok(())
    }

    fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}
