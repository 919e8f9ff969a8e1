#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};

use parking_lot::Mutex;
use tempfile::{Builder, TempDir};

use coursetree::error::{CollaboratorError, StoreError, StoreResult};
use coursetree::types::{
    Course, CourseId, CourseTree, Enrollment, EnrollmentId, Lesson, LessonContent, LessonId,
    LessonSubmission, MediaRef, Module, ModuleId, ModuleSubmission, NewCourse, NewLesson,
    NewModule, UserId, WeakRef,
};
use coursetree::{
    CacheInvalidator, CourseStore, CourseTreeSynchronizer, MediaStore, MemoryCourseStore,
    RetryPolicy, StoreReader, StoreTransaction, SyncConfig,
};

static INIT_TRACING: Once = Once::new();

pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

fn testdata_root() -> PathBuf {
    let workspace_tmp = std::env::current_dir().unwrap().join("target/testdata");
    std::fs::create_dir_all(&workspace_tmp).unwrap();
    workspace_tmp
}

pub fn tempdir(name: &str) -> TempDir {
    Builder::new()
        .prefix(&format!("coursetree-{name}-"))
        .tempdir_in(testdata_root())
        .expect("failed to create tempdir")
}

pub fn video(url: &str) -> LessonContent {
    LessonContent::Video {
        url: url.to_string(),
    }
}

pub fn text(body: &str) -> LessonContent {
    LessonContent::Text {
        body: body.to_string(),
    }
}

/// `modules` modules of `lessons` lessons each, numbered from 1.
pub fn tree_submission(modules: u32, lessons: u32) -> Vec<ModuleSubmission> {
    (1..=modules)
        .map(|m| {
            (1..=lessons).fold(ModuleSubmission::new(format!("module {m}"), m), |module, l| {
                module.with_lesson(LessonSubmission::new(
                    format!("lesson {m}.{l}"),
                    l,
                    60 * u64::from(l),
                    video(&format!("videos/{m}-{l}.mp4")),
                ))
            })
        })
        .collect()
}

/// Synchronizer over `store` that retries without sleeping.
pub fn synchronizer<S: CourseStore + 'static>(store: Arc<S>) -> CourseTreeSynchronizer<S> {
    CourseTreeSynchronizer::new(store, fast_config()).unwrap()
}

pub fn fast_config() -> SyncConfig {
    SyncConfig::default().with_retry_policy(RetryPolicy::immediate(3))
}

/// Stores a learner whose progress points at `module` and `lesson`.
pub fn enroll(
    store: &dyn CourseStore,
    id: u64,
    course: CourseId,
    module: Option<ModuleId>,
    lesson: Option<LessonId>,
) -> StoreResult<()> {
    let mut txn = store.begin()?;
    txn.put_enrollment(&Enrollment {
        id: EnrollmentId(id),
        user: UserId(1000 + id),
        course_id: course,
        last_visited_module: module,
        last_visited_lesson: lesson,
    })?;
    txn.commit()
}

pub fn load_enrollment(store: &dyn CourseStore, id: u64) -> StoreResult<Option<Enrollment>> {
    store.begin_read()?.enrollment(EnrollmentId(id))
}

pub fn load_tree(store: &dyn CourseStore, id: CourseId) -> StoreResult<Option<CourseTree>> {
    store.begin_read()?.course_tree(id)
}

/// Wraps a [`MemoryCourseStore`] and fails the first `failures` commits that
/// carry writes with a write conflict.
pub struct FlakyStore {
    inner: MemoryCourseStore,
    remaining_failures: AtomicUsize,
    begins: AtomicUsize,
}

impl FlakyStore {
    pub fn new(failures: usize) -> Self {
        Self {
            inner: MemoryCourseStore::new(),
            remaining_failures: AtomicUsize::new(failures),
            begins: AtomicUsize::new(0),
        }
    }

    pub fn begins(&self) -> usize {
        self.begins.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &MemoryCourseStore {
        &self.inner
    }

    fn take_failure(&self) -> bool {
        self.remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }
}

impl CourseStore for FlakyStore {
    fn begin(&self) -> StoreResult<Box<dyn StoreTransaction + '_>> {
        self.begins.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FlakyTransaction {
            store: self,
            inner: self.inner.begin()?,
            wrote: false,
        }))
    }

    fn begin_read(&self) -> StoreResult<Box<dyn StoreReader + '_>> {
        self.inner.begin_read()
    }
}

struct FlakyTransaction<'s> {
    store: &'s FlakyStore,
    inner: Box<dyn StoreTransaction + 's>,
    wrote: bool,
}

impl FlakyTransaction<'_> {
    fn wrote<T>(&mut self, result: StoreResult<T>) -> StoreResult<T> {
        self.wrote = true;
        result
    }
}

impl StoreReader for FlakyTransaction<'_> {
    fn course(&self, id: CourseId) -> StoreResult<Option<Course>> {
        self.inner.course(id)
    }

    fn course_by_slug(&self, slug: &str) -> StoreResult<Option<Course>> {
        self.inner.course_by_slug(slug)
    }

    fn module(&self, id: ModuleId) -> StoreResult<Option<Module>> {
        self.inner.module(id)
    }

    fn lesson(&self, id: LessonId) -> StoreResult<Option<Lesson>> {
        self.inner.lesson(id)
    }

    fn modules_of(&self, course: CourseId) -> StoreResult<Vec<Module>> {
        self.inner.modules_of(course)
    }

    fn lessons_of(&self, module: ModuleId) -> StoreResult<Vec<Lesson>> {
        self.inner.lessons_of(module)
    }

    fn enrollment(&self, id: EnrollmentId) -> StoreResult<Option<Enrollment>> {
        self.inner.enrollment(id)
    }

    fn enrollments_referencing(&self, target: WeakRef) -> StoreResult<Vec<Enrollment>> {
        self.inner.enrollments_referencing(target)
    }

    fn media_referenced(&self, media: &MediaRef) -> StoreResult<bool> {
        self.inner.media_referenced(media)
    }
}

impl StoreTransaction for FlakyTransaction<'_> {
    fn insert_course(&mut self, course: NewCourse) -> StoreResult<Course> {
        let result = self.inner.insert_course(course);
        self.wrote(result)
    }

    fn update_course(&mut self, course: &Course) -> StoreResult<()> {
        let result = self.inner.update_course(course);
        self.wrote(result)
    }

    fn insert_module(&mut self, module: NewModule) -> StoreResult<Module> {
        let result = self.inner.insert_module(module);
        self.wrote(result)
    }

    fn update_module(&mut self, module: &Module) -> StoreResult<()> {
        let result = self.inner.update_module(module);
        self.wrote(result)
    }

    fn delete_module(&mut self, id: ModuleId) -> StoreResult<()> {
        let result = self.inner.delete_module(id);
        self.wrote(result)
    }

    fn insert_lesson(&mut self, lesson: NewLesson) -> StoreResult<Lesson> {
        let result = self.inner.insert_lesson(lesson);
        self.wrote(result)
    }

    fn update_lesson(&mut self, lesson: &Lesson) -> StoreResult<()> {
        let result = self.inner.update_lesson(lesson);
        self.wrote(result)
    }

    fn delete_lesson(&mut self, id: LessonId) -> StoreResult<()> {
        let result = self.inner.delete_lesson(id);
        self.wrote(result)
    }

    fn put_enrollment(&mut self, enrollment: &Enrollment) -> StoreResult<()> {
        let result = self.inner.put_enrollment(enrollment);
        self.wrote(result)
    }

    fn commit(self: Box<Self>) -> StoreResult<()> {
        if self.wrote && self.store.take_failure() {
            self.inner.rollback()?;
            return Err(StoreError::WriteConflict {
                resource: "injected".to_string(),
            });
        }
        self.inner.commit()
    }

    fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.inner.rollback()
    }
}

#[derive(Default)]
pub struct RecordingCacheInvalidator {
    pub calls: Mutex<Vec<Vec<String>>>,
}

impl RecordingCacheInvalidator {
    pub fn patterns(&self) -> Vec<String> {
        self.calls.lock().iter().flatten().cloned().collect()
    }
}

impl CacheInvalidator for RecordingCacheInvalidator {
    fn invalidate(&self, patterns: &[String]) -> Result<(), CollaboratorError> {
        self.calls.lock().push(patterns.to_vec());
        Ok(())
    }
}

/// Records deletions; references starting with `fail/` are rejected.
#[derive(Default)]
pub struct RecordingMediaStore {
    pub deleted: Mutex<Vec<MediaRef>>,
}

impl RecordingMediaStore {
    pub fn deleted(&self) -> Vec<MediaRef> {
        let mut deleted = self.deleted.lock().clone();
        deleted.sort();
        deleted
    }
}

impl MediaStore for RecordingMediaStore {
    fn delete(&self, media: &MediaRef) -> Result<(), CollaboratorError> {
        if media.as_str().starts_with("fail/") {
            return Err(CollaboratorError::new("media store", "rejected"));
        }
        self.deleted.lock().push(media.clone());
        Ok(())
    }
}
