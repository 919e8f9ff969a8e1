//! Post-commit side effects: cache invalidation and orphaned media removal.
//!
//! Committed syncs enqueue an [`AfterCommitTask`]; a dedicated worker thread
//! drains the queue and talks to the collaborators. Failures are logged and
//! counted, they never reach the caller whose sync already committed.

use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

use crate::collab::{CacheInvalidator, MediaStore};
use crate::error::StoreResult;
use crate::metrics::SyncMetrics;

mod queue;
mod task;

pub use queue::AfterCommitQueue;
pub use task::{stale_patterns, AfterCommitTask};

const WORKER_NAME: &str = "coursetree-after-commit";

struct Collaborators {
    cache: Arc<dyn CacheInvalidator>,
    media: Arc<dyn MediaStore>,
    metrics: SyncMetrics,
}

impl Collaborators {
    fn run(&self, task: AfterCommitTask) {
        if !task.patterns.is_empty() {
            match self.cache.invalidate(&task.patterns) {
                Ok(()) => {
                    self.metrics.record_invalidation();
                    tracing::debug!(
                        course = %task.course_id,
                        patterns = task.patterns.len(),
                        "Invalidated cache patterns"
                    );
                }
                Err(err) => {
                    self.metrics.record_invalidation_failure();
                    tracing::warn!(course = %task.course_id, %err, "Cache invalidation failed");
                }
            }
        }

        for media in &task.media {
            match self.media.delete(media) {
                Ok(()) => self.metrics.record_media_removed(),
                Err(err) => {
                    self.metrics.record_media_failure();
                    tracing::warn!(course = %task.course_id, %media, %err, "Media removal failed");
                }
            }
        }
    }
}

/// Owns the post-commit queue and its worker thread.
pub struct AfterCommitDispatcher {
    queue: Arc<AfterCommitQueue>,
    metrics: SyncMetrics,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AfterCommitDispatcher {
    pub fn spawn(
        capacity: usize,
        cache: Arc<dyn CacheInvalidator>,
        media: Arc<dyn MediaStore>,
        metrics: SyncMetrics,
    ) -> StoreResult<Self> {
        let queue = Arc::new(AfterCommitQueue::new(capacity));
        let collaborators = Collaborators {
            cache,
            media,
            metrics: metrics.clone(),
        };

        let worker_queue = Arc::clone(&queue);
        let handle = std::thread::Builder::new()
            .name(WORKER_NAME.to_string())
            .spawn(move || {
                while let Some(task) = worker_queue.pop() {
                    collaborators.run(task);
                    worker_queue.complete();
                }
                tracing::debug!("After-commit worker stopped");
            })?;

        Ok(Self {
            queue,
            metrics,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Queues `task` without blocking. Returns `false` when it had to be dropped.
    pub fn enqueue(&self, task: AfterCommitTask) -> bool {
        match self.queue.try_push(task) {
            Ok(()) => true,
            Err(task) => {
                self.metrics.record_dropped_task();
                tracing::warn!(
                    course = %task.course_id,
                    patterns = task.patterns.len(),
                    media = task.media.len(),
                    "After-commit queue full or stopped; dropping task"
                );
                false
            }
        }
    }

    /// Blocks until all queued work has run.
    pub fn flush(&self) {
        self.queue.wait_idle();
    }

    /// Drains the queue and joins the worker. Idempotent.
    pub fn shutdown(&self) {
        self.queue.stop();
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                tracing::error!("After-commit worker panicked");
            }
        }
    }
}

impl Drop for AfterCommitDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}
