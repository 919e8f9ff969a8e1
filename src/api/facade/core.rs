use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::collab::{CacheInvalidator, MediaStore, NoopCacheInvalidator, NoopMediaStore};
use crate::error::{StoreResult, SyncError, SyncResult};
use crate::metrics::{MetricsSnapshot, SyncMetrics};
use crate::runtime::after_commit::{AfterCommitDispatcher, AfterCommitTask};
use crate::runtime::mutator::{run_attempt, CourseTarget};
use crate::runtime::retry::run_with_retry;
use crate::storage::CourseStore;
use crate::types::{
    CourseDetails, CourseId, CoursePatch, CourseTree, EntityKind, ModuleSubmission,
};

use super::config::SyncConfig;
use super::{CourseTreeFacade, SyncOutcome};

/// Main implementation of the synchronizer facade.
///
/// Cloning is cheap; clones share the store, the metrics and the post-commit
/// worker. The worker stops once [`close`](CourseTreeFacade::close) is called
/// or the last clone is dropped.
pub struct CourseTreeSynchronizer<S: CourseStore + 'static> {
    store: Arc<S>,
    config: SyncConfig,
    metrics: SyncMetrics,
    dispatcher: Arc<AfterCommitDispatcher>,
    shutdown_state: Arc<AtomicBool>,
}

impl<S: CourseStore + 'static> Clone for CourseTreeSynchronizer<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: self.config.clone(),
            metrics: self.metrics.clone(),
            dispatcher: Arc::clone(&self.dispatcher),
            shutdown_state: Arc::clone(&self.shutdown_state),
        }
    }
}

impl<S: CourseStore + 'static> CourseTreeSynchronizer<S> {
    /// Creates a synchronizer whose post-commit hooks do nothing.
    pub fn new(store: Arc<S>, config: SyncConfig) -> StoreResult<Self> {
        Self::with_collaborators(
            store,
            config,
            Arc::new(NoopCacheInvalidator),
            Arc::new(NoopMediaStore),
        )
    }

    /// Creates a synchronizer notifying `cache` and `media` after each commit.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` when `config` does not validate, or an
    /// I/O error if the post-commit worker cannot be spawned.
    pub fn with_collaborators(
        store: Arc<S>,
        config: SyncConfig,
        cache: Arc<dyn CacheInvalidator>,
        media: Arc<dyn MediaStore>,
    ) -> StoreResult<Self> {
        config.validate()?;
        let metrics = SyncMetrics::new();
        let dispatcher =
            AfterCommitDispatcher::spawn(config.after_commit_queue, cache, media, metrics.clone())?;

        Ok(Self {
            store,
            config,
            metrics,
            dispatcher: Arc::new(dispatcher),
            shutdown_state: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Shared metrics handle.
    pub fn sync_metrics(&self) -> &SyncMetrics {
        &self.metrics
    }

    fn ensure_open(&self) -> SyncResult<()> {
        if self.shutdown_state.load(Ordering::Acquire) {
            return Err(SyncError::ShuttingDown);
        }
        Ok(())
    }

    fn sync(
        &self,
        target: CourseTarget<'_>,
        modules: &[ModuleSubmission],
    ) -> SyncResult<SyncOutcome> {
        self.ensure_open()?;
        let started = Instant::now();
        let store: &dyn CourseStore = self.store.as_ref();

        let result = run_with_retry(&self.config.retry, &self.metrics, |attempt| {
            tracing::debug!(attempt, modules = modules.len(), "Starting sync attempt");
            run_attempt(
                store,
                target,
                modules,
                self.config.batch,
                self.config.attempt_timeout,
            )
        });

        let (output, attempts) = match result {
            Ok(committed) => committed,
            Err(err) => {
                match &err {
                    SyncError::Store(_) => tracing::error!(%err, "Course tree sync failed"),
                    _ => tracing::warn!(%err, "Course tree sync rejected"),
                }
                return Err(err);
            }
        };

        let elapsed = started.elapsed();
        self.metrics
            .record_commit(&output.summary, output.references_cleared, elapsed);
        tracing::info!(
            course = %output.course.id,
            attempts,
            operations = output.summary.total(),
            module_creates = output.summary.module_creates,
            module_updates = output.summary.module_updates,
            module_deletes = output.summary.module_deletes,
            lesson_creates = output.summary.lesson_creates,
            lesson_updates = output.summary.lesson_updates,
            lesson_deletes = output.summary.lesson_deletes,
            references_cleared = output.references_cleared,
            elapsed_ms = elapsed.as_millis() as u64,
            "Course tree committed"
        );

        self.dispatcher.enqueue(AfterCommitTask::new(
            &output.course,
            output.previous_slug.as_deref(),
            output.orphaned_media,
        ));

        Ok(SyncOutcome {
            course: output.course,
            summary: output.summary,
            attempts,
        })
    }
}

impl<S: CourseStore + 'static> CourseTreeFacade for CourseTreeSynchronizer<S> {
    fn create_course_tree(
        &self,
        details: CourseDetails,
        modules: Vec<ModuleSubmission>,
    ) -> SyncResult<SyncOutcome> {
        self.sync(CourseTarget::Create(&details), &modules)
    }

    fn update_course_tree(
        &self,
        course_id: CourseId,
        patch: CoursePatch,
        modules: Vec<ModuleSubmission>,
    ) -> SyncResult<SyncOutcome> {
        self.sync(
            CourseTarget::Update {
                id: course_id,
                patch: &patch,
            },
            &modules,
        )
    }

    fn load_course_tree(&self, course_id: CourseId) -> SyncResult<CourseTree> {
        let reader = self.store.begin_read()?;
        reader
            .course_tree(course_id)?
            .ok_or_else(|| SyncError::not_found(EntityKind::Course, course_id.get()))
    }

    fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    fn flush_side_effects(&self) {
        self.dispatcher.flush();
    }

    fn close(&self) -> SyncResult<()> {
        if self
            .shutdown_state
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }
        self.dispatcher.shutdown();
        tracing::info!("Course tree synchronizer closed");
        Ok(())
    }
}
