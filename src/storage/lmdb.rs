//! LMDB-backed store.
//!
//! LMDB admits a single write transaction at a time, so attempts against this
//! backend are serialized and never observe write conflicts; contention shows
//! up as waiting in [`CourseStore::begin`] instead. Read-only views use their
//! own LMDB read transactions and never wait.

use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use heed::{Env, RoTxn, RwTxn};

use crate::error::{Constraint, StoreError, StoreResult};
use crate::storage::fs::StoreLockGuard;
use crate::types::{
    Course, CourseId, EntityKind, Enrollment, EnrollmentId, Lesson, LessonId, MediaRef, Module,
    ModuleId, NewCourse, NewLesson, NewModule, Position, WeakRef,
};

use super::{CourseStore, StoreReader, StoreTransaction};

mod env;

use env::{EnvHandles, NamedDb, RowDb, SlotDb};

const NEXT_ID_KEY: &str = "next_id";

fn slot_key(parent: u64, position: Position) -> [u8; 12] {
    let mut key = [0u8; 12];
    key[..8].copy_from_slice(&parent.to_be_bytes());
    key[8..].copy_from_slice(&position.to_be_bytes());
    key
}

pub struct LmdbCourseStore {
    env: Arc<Env>,
    path: PathBuf,
    courses: RowDb<Course>,
    modules: RowDb<Module>,
    lessons: RowDb<Lesson>,
    enrollments: RowDb<Enrollment>,
    slugs: NamedDb,
    module_slots: SlotDb,
    lesson_slots: SlotDb,
    meta: NamedDb,
    // Dropped last so the environment is closed before the lock goes away.
    _lock: StoreLockGuard,
}

impl LmdbCourseStore {
    const DEFAULT_MAP_SIZE: usize = env::DEFAULT_MAP_SIZE;

    /// Opens (or creates) a store in `path` with the default 1 GiB map.
    pub fn new(path: impl AsRef<Path>) -> StoreResult<Self> {
        Self::new_with_map_size(path, Self::DEFAULT_MAP_SIZE)
    }

    /// Opens (or creates) a store in `path` with a custom map size in bytes.
    ///
    /// Fails with [`StoreError::StoreLocked`] while another store holds the
    /// directory.
    pub fn new_with_map_size(path: impl AsRef<Path>, map_size: usize) -> StoreResult<Self> {
        let path = path.as_ref();
        let lock = StoreLockGuard::acquire(path)?;
        let handles = env::open_rw(path, map_size)?;
        tracing::info!(path = ?path, map_size, "Opened course store");
        Ok(Self::from_handles(handles, lock))
    }

    fn from_handles(handles: EnvHandles, lock: StoreLockGuard) -> Self {
        Self {
            env: Arc::new(handles.env),
            path: handles.path,
            courses: handles.courses,
            modules: handles.modules,
            lessons: handles.lessons,
            enrollments: handles.enrollments,
            slugs: handles.slugs,
            module_slots: handles.module_slots,
            lesson_slots: handles.lesson_slots,
            meta: handles.meta,
            _lock: lock,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn effective_map_size(&self) -> usize {
        self.env.info().map_size
    }
}

impl CourseStore for LmdbCourseStore {
    fn begin(&self) -> StoreResult<Box<dyn StoreTransaction + '_>> {
        let txn = self.env.write_txn()?;
        Ok(Box::new(LmdbTransaction { store: self, txn }))
    }

    fn begin_read(&self) -> StoreResult<Box<dyn StoreReader + '_>> {
        let txn = self.env.read_txn()?;
        Ok(Box::new(LmdbTransaction {
            store: self,
            txn: ReadOnly(txn),
        }))
    }
}

/// Read-only LMDB transaction, viewed the same way as the read half of a
/// [`RwTxn`].
struct ReadOnly<'s>(RoTxn<'s>);

impl<'s> Deref for ReadOnly<'s> {
    type Target = RoTxn<'s>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

struct LmdbTransaction<'s, T = RwTxn<'s>> {
    store: &'s LmdbCourseStore,
    txn: T,
}

impl LmdbTransaction<'_> {
    fn allocate_id(&mut self) -> StoreResult<u64> {
        let next = self
            .store
            .meta
            .get(&self.txn, NEXT_ID_KEY)?
            .unwrap_or(0)
            + 1;
        self.store.meta.put(&mut self.txn, NEXT_ID_KEY, &next)?;
        Ok(next)
    }

    /// Claims `position` under `parent`, moving `id` off `previous` if given.
    fn claim_slot(
        &mut self,
        slots: SlotDb,
        parent: u64,
        id: u64,
        position: Position,
        previous: Option<Position>,
        violation: impl FnOnce() -> Constraint,
    ) -> StoreResult<()> {
        let key = slot_key(parent, position);
        if slots.get(&self.txn, &key[..])?.is_some() {
            return Err(StoreError::UniqueViolation {
                constraint: violation(),
            });
        }
        if let Some(previous) = previous {
            slots.delete(&mut self.txn, &slot_key(parent, previous)[..])?;
        }
        slots.put(&mut self.txn, &key[..], &id)?;
        Ok(())
    }
}

impl<'s, T: Deref<Target = RoTxn<'s>>> LmdbTransaction<'s, T> {
    fn children(&self, slots: &SlotDb, parent: u64) -> StoreResult<Vec<u64>> {
        let prefix = parent.to_be_bytes();
        let mut ids = Vec::new();
        for entry in slots.prefix_iter(&self.txn, &prefix[..])? {
            let (_, id) = entry?;
            ids.push(id);
        }
        Ok(ids)
    }

    fn require_course(&self, id: CourseId) -> StoreResult<Course> {
        self.course(id)?
            .ok_or_else(|| StoreError::missing(EntityKind::Course, id.get()))
    }

    fn require_module(&self, id: ModuleId) -> StoreResult<Module> {
        self.module(id)?
            .ok_or_else(|| StoreError::missing(EntityKind::Module, id.get()))
    }

    fn require_lesson(&self, id: LessonId) -> StoreResult<Lesson> {
        self.lesson(id)?
            .ok_or_else(|| StoreError::missing(EntityKind::Lesson, id.get()))
    }
}

impl<'s, T: Deref<Target = RoTxn<'s>>> StoreReader for LmdbTransaction<'s, T> {
    fn course(&self, id: CourseId) -> StoreResult<Option<Course>> {
        Ok(self.store.courses.get(&self.txn, &id.get())?)
    }

    fn course_by_slug(&self, slug: &str) -> StoreResult<Option<Course>> {
        match self.store.slugs.get(&self.txn, slug)? {
            Some(id) => self.course(CourseId(id)),
            None => Ok(None),
        }
    }

    fn module(&self, id: ModuleId) -> StoreResult<Option<Module>> {
        Ok(self.store.modules.get(&self.txn, &id.get())?)
    }

    fn lesson(&self, id: LessonId) -> StoreResult<Option<Lesson>> {
        Ok(self.store.lessons.get(&self.txn, &id.get())?)
    }

    fn modules_of(&self, course: CourseId) -> StoreResult<Vec<Module>> {
        self.children(&self.store.module_slots, course.get())?
            .into_iter()
            .map(|id| self.require_module(ModuleId(id)))
            .collect()
    }

    fn lessons_of(&self, module: ModuleId) -> StoreResult<Vec<Lesson>> {
        self.children(&self.store.lesson_slots, module.get())?
            .into_iter()
            .map(|id| self.require_lesson(LessonId(id)))
            .collect()
    }

    fn enrollment(&self, id: EnrollmentId) -> StoreResult<Option<Enrollment>> {
        Ok(self.store.enrollments.get(&self.txn, &id.get())?)
    }

    fn enrollments_referencing(&self, target: WeakRef) -> StoreResult<Vec<Enrollment>> {
        let mut found = Vec::new();
        for entry in self.store.enrollments.iter(&self.txn)? {
            let (_, enrollment) = entry?;
            if enrollment.references(target) {
                found.push(enrollment);
            }
        }
        Ok(found)
    }

    fn media_referenced(&self, media: &MediaRef) -> StoreResult<bool> {
        for entry in self.store.lessons.iter(&self.txn)? {
            let (_, lesson) = entry?;
            if lesson.content.uses_media(media) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl StoreTransaction for LmdbTransaction<'_> {
    fn insert_course(&mut self, course: NewCourse) -> StoreResult<Course> {
        if self.store.slugs.get(&self.txn, &course.slug)?.is_some() {
            return Err(StoreError::UniqueViolation {
                constraint: Constraint::CourseSlug { slug: course.slug },
            });
        }
        let course = Course {
            id: CourseId(self.allocate_id()?),
            slug: course.slug,
            title: course.title,
            owner: course.owner,
            total_duration: 0,
            published: course.published,
        };
        let store = self.store;
        store.slugs.put(&mut self.txn, &course.slug, &course.id.get())?;
        store.courses.put(&mut self.txn, &course.id.get(), &course)?;
        Ok(course)
    }

    fn update_course(&mut self, course: &Course) -> StoreResult<()> {
        let stored = self.require_course(course.id)?;
        let store = self.store;
        if stored.slug != course.slug {
            if store.slugs.get(&self.txn, &course.slug)?.is_some() {
                return Err(StoreError::UniqueViolation {
                    constraint: Constraint::CourseSlug {
                        slug: course.slug.clone(),
                    },
                });
            }
            store.slugs.delete(&mut self.txn, &stored.slug)?;
            store.slugs.put(&mut self.txn, &course.slug, &course.id.get())?;
        }
        store.courses.put(&mut self.txn, &course.id.get(), course)?;
        Ok(())
    }

    fn insert_module(&mut self, module: NewModule) -> StoreResult<Module> {
        self.require_course(module.course_id)?;
        let module = Module {
            id: ModuleId(self.allocate_id()?),
            course_id: module.course_id,
            title: module.title,
            position: module.position,
            duration: 0,
        };
        let store = self.store;
        self.claim_slot(
            store.module_slots,
            module.course_id.get(),
            module.id.get(),
            module.position,
            None,
            || Constraint::ModulePosition {
                course: module.course_id,
                position: module.position,
            },
        )?;
        store.modules.put(&mut self.txn, &module.id.get(), &module)?;
        Ok(module)
    }

    fn update_module(&mut self, module: &Module) -> StoreResult<()> {
        let stored = self.require_module(module.id)?;
        let store = self.store;
        if stored.position != module.position {
            self.claim_slot(
                store.module_slots,
                stored.course_id.get(),
                module.id.get(),
                module.position,
                Some(stored.position),
                || Constraint::ModulePosition {
                    course: stored.course_id,
                    position: module.position,
                },
            )?;
        }
        store.modules.put(&mut self.txn, &module.id.get(), module)?;
        Ok(())
    }

    fn delete_module(&mut self, id: ModuleId) -> StoreResult<()> {
        let stored = self.require_module(id)?;
        let store = self.store;
        let children = self.children(&store.lesson_slots, id.get())?.len();
        if children > 0 {
            return Err(StoreError::ChildrenRemain {
                entity: EntityKind::Module,
                id: id.get(),
                children,
            });
        }
        let key = slot_key(stored.course_id.get(), stored.position);
        store.module_slots.delete(&mut self.txn, &key[..])?;
        store.modules.delete(&mut self.txn, &id.get())?;
        Ok(())
    }

    fn insert_lesson(&mut self, lesson: NewLesson) -> StoreResult<Lesson> {
        self.require_module(lesson.module_id)?;
        let lesson = Lesson {
            id: LessonId(self.allocate_id()?),
            module_id: lesson.module_id,
            title: lesson.title,
            position: lesson.position,
            duration: lesson.duration,
            content: lesson.content,
        };
        let store = self.store;
        self.claim_slot(
            store.lesson_slots,
            lesson.module_id.get(),
            lesson.id.get(),
            lesson.position,
            None,
            || Constraint::LessonPosition {
                module: lesson.module_id,
                position: lesson.position,
            },
        )?;
        store.lessons.put(&mut self.txn, &lesson.id.get(), &lesson)?;
        Ok(lesson)
    }

    fn update_lesson(&mut self, lesson: &Lesson) -> StoreResult<()> {
        let stored = self.require_lesson(lesson.id)?;
        let store = self.store;
        if stored.position != lesson.position {
            self.claim_slot(
                store.lesson_slots,
                stored.module_id.get(),
                lesson.id.get(),
                lesson.position,
                Some(stored.position),
                || Constraint::LessonPosition {
                    module: stored.module_id,
                    position: lesson.position,
                },
            )?;
        }
        store.lessons.put(&mut self.txn, &lesson.id.get(), lesson)?;
        Ok(())
    }

    fn delete_lesson(&mut self, id: LessonId) -> StoreResult<()> {
        let stored = self.require_lesson(id)?;
        let store = self.store;
        let key = slot_key(stored.module_id.get(), stored.position);
        store.lesson_slots.delete(&mut self.txn, &key[..])?;
        store.lessons.delete(&mut self.txn, &id.get())?;
        Ok(())
    }

    fn put_enrollment(&mut self, enrollment: &Enrollment) -> StoreResult<()> {
        self.require_course(enrollment.course_id)?;
        if let Some(module) = enrollment.last_visited_module {
            self.require_module(module)?;
        }
        if let Some(lesson) = enrollment.last_visited_lesson {
            self.require_lesson(lesson)?;
        }
        let store = self.store;
        store
            .enrollments
            .put(&mut self.txn, &enrollment.id.get(), enrollment)?;
        Ok(())
    }

    fn commit(self: Box<Self>) -> StoreResult<()> {
        self.txn.commit()?;
        Ok(())
    }

    fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.txn.abort();
        Ok(())
    }
}
