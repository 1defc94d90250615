//! Task records and the handles callers hold.

use crate::error::TaskError;
use crate::types::TaskId;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

/// Lifecycle of a submitted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Submitted,
    Capturing,
    Queued,
    Running,
    /// Still running, past the hung threshold.
    Hung,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }

    pub fn is_running(self) -> bool {
        matches!(self, TaskState::Running | TaskState::Hung)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TaskState::Submitted => "submitted",
            TaskState::Capturing => "capturing",
            TaskState::Queued => "queued",
            TaskState::Running => "running",
            TaskState::Hung => "hung",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// Shared bookkeeping for one task, seen by the handle, the worker, and the
/// watchdog.
#[derive(Debug)]
pub(crate) struct TaskRecord {
    id: TaskId,
    submitted_at: Instant,
    state: Mutex<TaskState>,
    worker: Mutex<Option<String>>,
    interrupt: Arc<AtomicBool>,
    hung_reported: AtomicBool,
    /// Set while the task holds one of its executor's queue slots.
    in_queue: AtomicBool,
}

impl TaskRecord {
    pub(crate) fn new(id: TaskId) -> Self {
        Self::submitted_at(id, Instant::now())
    }

    pub(crate) fn submitted_at(id: TaskId, submitted_at: Instant) -> Self {
        Self {
            id,
            submitted_at,
            state: Mutex::new(TaskState::Submitted),
            worker: Mutex::new(None),
            interrupt: Arc::default(),
            hung_reported: AtomicBool::new(false),
            in_queue: AtomicBool::new(false),
        }
    }

    pub(crate) fn id(&self) -> TaskId {
        self.id
    }

    pub(crate) fn state(&self) -> TaskState {
        *self.state.lock()
    }

    pub(crate) fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.submitted_at)
    }

    pub(crate) fn worker(&self) -> Option<String> {
        self.worker.lock().clone()
    }

    pub(crate) fn interrupt_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupt)
    }

    pub(crate) fn interrupt(&self) {
        self.interrupt.store(true, Ordering::Release);
    }

    pub(crate) fn mark_capturing(&self) {
        let mut state = self.state.lock();
        if *state == TaskState::Submitted {
            *state = TaskState::Capturing;
        }
    }

    pub(crate) fn mark_queued(&self) {
        let mut state = self.state.lock();
        if matches!(*state, TaskState::Submitted | TaskState::Capturing) {
            *state = TaskState::Queued;
        }
    }

    pub(crate) fn hold_slot(&self) {
        self.in_queue.store(true, Ordering::Release);
    }

    /// Give the queue slot back. True only for the first caller.
    pub(crate) fn release_slot(&self) -> bool {
        self.in_queue.swap(false, Ordering::AcqRel)
    }

    /// Claim the task for `worker`. False when it was cancelled first.
    pub(crate) fn begin(&self, worker: &str) -> bool {
        let mut state = self.state.lock();
        if *state == TaskState::Cancelled {
            return false;
        }
        *state = TaskState::Running;
        *self.worker.lock() = Some(worker.to_string());
        true
    }

    /// Record the terminal state unless a cancellation got there first.
    pub(crate) fn finish(&self, succeeded: bool) -> TaskState {
        let mut state = self.state.lock();
        if *state != TaskState::Cancelled {
            *state = if succeeded {
                TaskState::Completed
            } else {
                TaskState::Failed
            };
        }
        *state
    }

    pub(crate) fn cancel(&self, may_interrupt: bool) -> bool {
        let mut state = self.state.lock();
        match *state {
            TaskState::Submitted | TaskState::Capturing | TaskState::Queued => {
                *state = TaskState::Cancelled;
                true
            }
            TaskState::Running | TaskState::Hung if may_interrupt => {
                *state = TaskState::Cancelled;
                self.interrupt();
                true
            }
            _ => false,
        }
    }

    /// Flag a running task as hung.
    ///
    /// Returns `None` when the task is not running, otherwise whether this
    /// is the first time it was flagged.
    pub(crate) fn mark_hung(&self) -> Option<bool> {
        let mut state = self.state.lock();
        if !state.is_running() {
            return None;
        }
        *state = TaskState::Hung;
        Some(!self.hung_reported.swap(true, Ordering::AcqRel))
    }
}

/// Where a task waits before a worker takes it.
pub(crate) trait TaskQueue: Send + Sync {
    /// Cancel `record`, giving back its queue slot if it still holds one.
    fn cancel(&self, record: &TaskRecord, may_interrupt: bool) -> bool;
}

/// Caller's side of a submitted task.
///
/// The result arrives exactly once: the value, the task's failure, or
/// [`TaskError::Cancelled`].
#[derive(Debug)]
pub struct TaskHandle<T> {
    record: Arc<TaskRecord>,
    receiver: oneshot::Receiver<Result<T, TaskError>>,
    queue: Option<Weak<dyn TaskQueue>>,
}

impl<T> TaskHandle<T> {
    pub(crate) fn new(
        record: Arc<TaskRecord>,
        receiver: oneshot::Receiver<Result<T, TaskError>>,
    ) -> Self {
        Self {
            record,
            receiver,
            queue: None,
        }
    }

    pub(crate) fn queued_on(mut self, queue: Weak<dyn TaskQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn id(&self) -> TaskId {
        self.record.id()
    }

    pub fn state(&self) -> TaskState {
        self.record.state()
    }

    pub fn is_done(&self) -> bool {
        self.state().is_terminal()
    }

    /// Cancel the task.
    ///
    /// A queued task never runs and its queue slot is freed at once. A
    /// running task is only affected when `may_interrupt` is set, and then
    /// only through [`Flow::is_interrupted`](crate::context::Flow::is_interrupted).
    pub fn cancel(&self, may_interrupt: bool) -> bool {
        match self.queue.as_ref().and_then(Weak::upgrade) {
            Some(queue) => queue.cancel(&self.record, may_interrupt),
            None => self.record.cancel(may_interrupt),
        }
    }

    /// Block the calling thread until the result is available. Returns
    /// [`TaskError::Cancelled`] right away for a cancelled task.
    ///
    /// Must not be called from inside an async runtime; use
    /// [`TaskHandle::wait`] there.
    pub fn join(self) -> Result<T, TaskError> {
        let record = self.record;
        if record.state() == TaskState::Cancelled {
            return Err(TaskError::Cancelled);
        }
        match self.receiver.blocking_recv() {
            Ok(result) => result,
            Err(_) => Err(closed(&record)),
        }
    }

    pub async fn wait(self) -> Result<T, TaskError> {
        let record = self.record;
        if record.state() == TaskState::Cancelled {
            return Err(TaskError::Cancelled);
        }
        match self.receiver.await {
            Ok(result) => result,
            Err(_) => Err(closed(&record)),
        }
    }
}

fn closed(record: &TaskRecord) -> TaskError {
    if record.state() == TaskState::Cancelled {
        TaskError::Cancelled
    } else {
        TaskError::Abandoned
    }
}
