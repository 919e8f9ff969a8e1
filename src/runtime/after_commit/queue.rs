use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Condvar, Mutex};

use super::task::AfterCommitTask;

struct QueueState {
    tasks: VecDeque<AfterCommitTask>,
    /// Tasks popped by the worker and not yet completed.
    in_flight: usize,
}

/// Bounded multi-producer queue feeding the post-commit worker.
///
/// Producers never block: a full or stopped queue hands the task back.
pub struct AfterCommitQueue {
    inner: Mutex<QueueState>,
    not_empty: Condvar,
    idle: Condvar,
    stopped: AtomicBool,
    max_size: usize,
}

impl AfterCommitQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            inner: Mutex::new(QueueState {
                tasks: VecDeque::new(),
                in_flight: 0,
            }),
            not_empty: Condvar::new(),
            idle: Condvar::new(),
            stopped: AtomicBool::new(false),
            max_size: max_size.max(1),
        }
    }

    pub fn try_push(&self, task: AfterCommitTask) -> Result<(), AfterCommitTask> {
        let mut state = self.inner.lock();
        if self.stopped.load(Ordering::Acquire) || state.tasks.len() >= self.max_size {
            return Err(task);
        }
        state.tasks.push_back(task);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Blocks until a task is available. Returns `None` once stopped and drained.
    pub fn pop(&self) -> Option<AfterCommitTask> {
        let mut state = self.inner.lock();
        loop {
            if let Some(task) = state.tasks.pop_front() {
                state.in_flight += 1;
                return Some(task);
            }

            if self.stopped.load(Ordering::Acquire) {
                return None;
            }

            self.not_empty.wait(&mut state);
        }
    }

    /// Marks a popped task as done.
    pub fn complete(&self) {
        let mut state = self.inner.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
        if state.tasks.is_empty() && state.in_flight == 0 {
            self.idle.notify_all();
        }
    }

    /// Waits until every queued task has been completed.
    pub fn wait_idle(&self) {
        let mut state = self.inner.lock();
        while !state.tasks.is_empty() || state.in_flight > 0 {
            self.idle.wait(&mut state);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stop(&self) {
        let _state = self.inner.lock();
        self.stopped.store(true, Ordering::Release);
        self.not_empty.notify_all();
    }
}
