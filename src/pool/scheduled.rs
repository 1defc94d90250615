//! Scheduled executor
//!
//! A managed executor fronted by one timer thread. Delayed and periodic
//! tasks wait in a deadline-ordered queue and are handed to the pool when
//! they come due, running under the context captured when they were
//! scheduled. The pool never grows past its core size and its queue never
//! fills, so a due task is only refused once the executor shuts down.

use crate::context::{ContextMap, Flow};
use crate::error::{RejectionError, TaskError};
use crate::pool::executor::{ExecutorConfig, ExecutorStats, ManagedExecutor};
use crate::pool::task::{TaskHandle, TaskState};
use crate::setup::{panic_message, SharedSetup};
use crate::telemetry::EventBus;
use crate::types::TaskId;
use crossbeam_channel::{after, never, select, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

type TimerKey = (Instant, TaskId);

/// An entry waiting in the timer queue.
trait Timer: Send + Sync {
    /// Runs on the timer thread once `due` has passed.
    fn fire(self: Arc<Self>, due: Instant);

    /// The queue closed with this entry still waiting. True if it was.
    fn abandon(&self) -> bool;
}

#[derive(Default)]
struct TimerState {
    due: BTreeMap<TimerKey, Arc<dyn Timer>>,
    closed: bool,
}

struct TimerQueue {
    name: String,
    state: Mutex<TimerState>,
    wake: Sender<()>,
}

impl TimerQueue {
    /// False once the queue has closed.
    fn insert(&self, key: TimerKey, timer: Arc<dyn Timer>) -> bool {
        let earliest = {
            let mut state = self.state.lock();
            if state.closed {
                return false;
            }
            let earliest = state.due.keys().next().map_or(true, |first| key < *first);
            state.due.insert(key, timer);
            earliest
        };
        if earliest {
            let _ = self.wake.try_send(());
        }
        true
    }

    fn remove(&self, key: &TimerKey) -> bool {
        self.state.lock().due.remove(key).is_some()
    }

    fn take_due(&self, now: Instant) -> Vec<(Instant, Arc<dyn Timer>)> {
        let mut state = self.state.lock();
        let mut fired = Vec::new();
        while let Some(entry) = state.due.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let ((due, _), timer) = entry.remove_entry();
            fired.push((due, timer));
        }
        fired
    }

    fn next_due(&self) -> Option<Instant> {
        self.state.lock().due.keys().next().map(|(due, _)| *due)
    }

    fn len(&self) -> usize {
        self.state.lock().due.len()
    }

    fn close(&self) -> Vec<(TimerKey, Arc<dyn Timer>)> {
        let mut state = self.state.lock();
        state.closed = true;
        std::mem::take(&mut state.due).into_iter().collect()
    }
}

struct TimerThread {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl TimerThread {
    fn start(queue: Arc<TimerQueue>, woken: Receiver<()>) -> io::Result<Self> {
        let (stop, stopped) = crossbeam_channel::bounded(1);
        let handle = thread::Builder::new()
            .name(format!("{}-scheduler", queue.name))
            .spawn(move || run_timers(queue, woken, stopped))?;
        Ok(Self {
            stop: Some(stop),
            handle: Some(handle),
        })
    }

    fn stop(&mut self) {
        self.stop.take();
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

fn run_timers(queue: Arc<TimerQueue>, woken: Receiver<()>, stopped: Receiver<()>) {
    debug!(executor = %queue.name, "Scheduler thread started");
    loop {
        for (due, timer) in queue.take_due(Instant::now()) {
            timer.fire(due);
        }
        let deadline = match queue.next_due() {
            Some(due) => after(due.saturating_duration_since(Instant::now())),
            None => never(),
        };
        select! {
            recv(stopped) -> _ => break,
            recv(woken) -> _ => {}
            recv(deadline) -> _ => {}
        }
    }
    debug!(executor = %queue.name, "Scheduler thread stopped");
}

fn flow_for(context: Option<&ContextMap>) -> Flow {
    context.map_or_else(Flow::new, |map| Flow::with_map(map.snapshot()))
}

enum Phase<T> {
    Waiting {
        task: Box<dyn FnOnce(&mut Flow) -> T + Send>,
        flow: Flow,
    },
    Submitted(TaskHandle<T>),
    Rejected(String),
    Cancelled,
    Joined,
}

struct OneShot<T> {
    id: TaskId,
    due: Instant,
    executor: Weak<ManagedExecutor>,
    phase: Mutex<Phase<T>>,
    fired: Condvar,
}

impl<T: Send + 'static> Timer for OneShot<T> {
    fn fire(self: Arc<Self>, _due: Instant) {
        let mut phase = self.phase.lock();
        let (task, flow) = match std::mem::replace(&mut *phase, Phase::Joined) {
            Phase::Waiting { task, flow } => (task, flow),
            other => {
                *phase = other;
                return;
            }
        };
        *phase = match self.executor.upgrade() {
            Some(executor) => match executor.submit(&flow, task) {
                Ok(handle) => Phase::Submitted(handle),
                Err(rejection) => {
                    warn!(task_id = %self.id, reason = %rejection, "Scheduled task rejected");
                    Phase::Rejected(rejection.to_string())
                }
            },
            None => Phase::Rejected("executor is gone".to_string()),
        };
        drop(phase);
        self.fired.notify_all();
    }

    fn abandon(&self) -> bool {
        let mut phase = self.phase.lock();
        if !matches!(*phase, Phase::Waiting { .. }) {
            return false;
        }
        *phase = Phase::Cancelled;
        drop(phase);
        self.fired.notify_all();
        true
    }
}

/// Caller's side of a delayed task.
pub struct ScheduledHandle<T> {
    shared: Arc<OneShot<T>>,
    queue: Weak<TimerQueue>,
}

impl<T: Send + 'static> ScheduledHandle<T> {
    pub fn id(&self) -> TaskId {
        self.shared.id
    }

    /// Time left until the task comes due. Zero once it has.
    pub fn delay(&self) -> Duration {
        self.shared.due.saturating_duration_since(Instant::now())
    }

    pub fn is_cancelled(&self) -> bool {
        match &*self.shared.phase.lock() {
            Phase::Cancelled => true,
            Phase::Submitted(handle) => handle.state() == TaskState::Cancelled,
            _ => false,
        }
    }

    pub fn is_done(&self) -> bool {
        match &*self.shared.phase.lock() {
            Phase::Waiting { .. } => false,
            Phase::Submitted(handle) => handle.is_done(),
            Phase::Rejected(_) | Phase::Cancelled | Phase::Joined => true,
        }
    }

    /// Cancel the task. Before it is due it simply never runs; after that
    /// this behaves like [`TaskHandle::cancel`].
    pub fn cancel(&self, may_interrupt: bool) -> bool {
        let mut phase = self.shared.phase.lock();
        match &*phase {
            Phase::Waiting { .. } => {
                *phase = Phase::Cancelled;
                drop(phase);
                if let Some(queue) = self.queue.upgrade() {
                    queue.remove(&(self.shared.due, self.shared.id));
                }
                self.shared.fired.notify_all();
                true
            }
            Phase::Submitted(handle) => handle.cancel(may_interrupt),
            _ => false,
        }
    }

    /// Block until the task has come due and finished.
    pub fn join(self) -> Result<T, TaskError> {
        let mut phase = self.shared.phase.lock();
        while matches!(*phase, Phase::Waiting { .. }) {
            self.shared.fired.wait(&mut phase);
        }
        let outcome = std::mem::replace(&mut *phase, Phase::Joined);
        drop(phase);
        match outcome {
            Phase::Submitted(handle) => handle.join(),
            Phase::Rejected(reason) => Err(TaskError::Rejected(reason)),
            _ => Err(TaskError::Cancelled),
        }
    }
}

impl<T> fmt::Debug for ScheduledHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledHandle")
            .field("id", &self.shared.id)
            .field("due", &self.shared.due)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cadence {
    /// Runs start `period` apart, measured from the first due time.
    FixedRate(Duration),
    /// Each run starts `delay` after the previous one finished.
    FixedDelay(Duration),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Status {
    Waiting,
    Running,
    Cancelled,
    Failed(TaskError),
}

struct Periodic {
    id: TaskId,
    cadence: Cadence,
    context: Option<ContextMap>,
    task: Mutex<Box<dyn FnMut(&mut Flow) + Send>>,
    executor: Weak<ManagedExecutor>,
    queue: Weak<TimerQueue>,
    due: Mutex<Instant>,
    status: Mutex<Status>,
    runs: AtomicU64,
}

impl Periodic {
    fn run_once(self: &Arc<Self>, flow: &mut Flow, due: Instant) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let mut task = self.task.lock();
            (*task)(flow)
        }));
        self.runs.fetch_add(1, Ordering::Relaxed);
        match outcome {
            Ok(()) => self.rearm(due),
            Err(payload) => {
                let message = panic_message(&*payload);
                warn!(
                    task_id = %self.id,
                    error = %message,
                    "Periodic task failed and will not run again"
                );
                self.stop_with(Status::Failed(TaskError::Panicked(message)));
                panic::resume_unwind(payload);
            }
        }
    }

    fn rearm(self: &Arc<Self>, previous: Instant) {
        let next = match self.cadence {
            Cadence::FixedRate(period) => previous + period,
            Cadence::FixedDelay(delay) => Instant::now() + delay,
        };
        {
            let mut status = self.status.lock();
            if *status != Status::Running {
                return;
            }
            *status = Status::Waiting;
            *self.due.lock() = next;
        }
        let timer: Arc<dyn Timer> = Arc::clone(self) as Arc<dyn Timer>;
        let queued = self
            .queue
            .upgrade()
            .map_or(false, |queue| queue.insert((next, self.id), timer));
        if !queued {
            self.stop_with(Status::Cancelled);
        }
    }

    fn stop_with(&self, outcome: Status) {
        let mut status = self.status.lock();
        if matches!(*status, Status::Waiting | Status::Running) {
            *status = outcome;
        }
    }
}

impl Timer for Periodic {
    fn fire(self: Arc<Self>, due: Instant) {
        {
            let mut status = self.status.lock();
            if *status != Status::Waiting {
                return;
            }
            *status = Status::Running;
        }
        let Some(executor) = self.executor.upgrade() else {
            self.stop_with(Status::Failed(TaskError::Rejected("executor is gone".into())));
            return;
        };
        let flow = flow_for(self.context.as_ref());
        let this = Arc::clone(&self);
        if let Err(rejection) = executor.submit(&flow, move |flow| this.run_once(flow, due)) {
            warn!(task_id = %self.id, reason = %rejection, "Periodic task rejected");
            self.stop_with(Status::Failed(TaskError::Rejected(rejection.to_string())));
        }
    }

    fn abandon(&self) -> bool {
        let mut status = self.status.lock();
        if *status != Status::Waiting {
            return false;
        }
        *status = Status::Cancelled;
        true
    }
}

/// Caller's side of a repeating task.
pub struct PeriodicHandle {
    shared: Arc<Periodic>,
}

impl PeriodicHandle {
    pub fn id(&self) -> TaskId {
        self.shared.id
    }

    /// Completed runs so far, including a failed last one.
    pub fn runs(&self) -> u64 {
        self.shared.runs.load(Ordering::Relaxed)
    }

    /// Time until the next run, or `None` while a run is in progress or
    /// the task has stopped.
    pub fn delay(&self) -> Option<Duration> {
        let status = self.shared.status.lock();
        (*status == Status::Waiting)
            .then(|| self.shared.due.lock().saturating_duration_since(Instant::now()))
    }

    pub fn is_cancelled(&self) -> bool {
        *self.shared.status.lock() == Status::Cancelled
    }

    /// Stopped for good: cancelled, failed, or refused by its executor.
    pub fn is_done(&self) -> bool {
        matches!(
            *self.shared.status.lock(),
            Status::Cancelled | Status::Failed(_)
        )
    }

    /// Why the task stopped running on its own.
    pub fn failure(&self) -> Option<TaskError> {
        match &*self.shared.status.lock() {
            Status::Failed(error) => Some(error.clone()),
            _ => None,
        }
    }

    /// Stop further runs. A run already in progress finishes.
    pub fn cancel(&self) -> bool {
        let mut status = self.shared.status.lock();
        match *status {
            Status::Waiting => {
                *status = Status::Cancelled;
                let key = (*self.shared.due.lock(), self.shared.id);
                drop(status);
                if let Some(queue) = self.shared.queue.upgrade() {
                    queue.remove(&key);
                }
                true
            }
            Status::Running => {
                *status = Status::Cancelled;
                true
            }
            _ => false,
        }
    }
}

impl fmt::Debug for PeriodicHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeriodicHandle")
            .field("id", &self.shared.id)
            .field("cadence", &self.shared.cadence)
            .field("runs", &self.runs())
            .finish()
    }
}

/// Managed executor that runs tasks after a delay or on a fixed cadence.
/// Dropping it shuts it down; tasks not yet due never run.
pub struct ManagedScheduledExecutor {
    executor: Arc<ManagedExecutor>,
    queue: Arc<TimerQueue>,
    timer: Mutex<Option<TimerThread>>,
}

impl ManagedScheduledExecutor {
    pub fn new(config: ExecutorConfig, setup: SharedSetup) -> Self {
        Self::with_events(config, setup, None)
    }

    pub fn with_events(
        mut config: ExecutorConfig,
        setup: SharedSetup,
        events: Option<EventBus>,
    ) -> Self {
        config.maximum_pool_size = config.core_pool_size.max(1);
        config.queue_capacity = i32::MAX as usize;
        let name = config.name.clone();
        let executor = Arc::new(ManagedExecutor::with_events(config, setup, events));

        let (wake, woken) = crossbeam_channel::bounded(1);
        let queue = Arc::new(TimerQueue {
            name: name.clone(),
            state: Mutex::new(TimerState::default()),
            wake,
        });
        let timer = TimerThread::start(Arc::clone(&queue), woken)
            .map_err(|e| {
                error!(executor = %name, error = %e, "Could not start scheduler thread");
            })
            .ok();
        info!(executor = %name, "Managed scheduled executor created");

        Self {
            executor,
            queue,
            timer: Mutex::new(timer),
        }
    }

    pub fn name(&self) -> &str {
        self.executor.name()
    }

    pub fn config(&self) -> &ExecutorConfig {
        self.executor.config()
    }

    pub fn setup(&self) -> &SharedSetup {
        self.executor.setup()
    }

    /// Run now, like [`ManagedExecutor::submit`].
    pub fn submit<T, F>(&self, flow: &Flow, task: F) -> Result<TaskHandle<T>, RejectionError>
    where
        F: FnOnce(&mut Flow) -> T + Send + 'static,
        T: Send + 'static,
    {
        self.executor.submit(flow, task)
    }

    /// Run `task` once `delay` has passed, with the context `flow` holds now.
    pub fn schedule<T, F>(
        &self,
        flow: &Flow,
        delay: Duration,
        task: F,
    ) -> Result<ScheduledHandle<T>, RejectionError>
    where
        F: FnOnce(&mut Flow) -> T + Send + 'static,
        T: Send + 'static,
    {
        self.ensure_running()?;
        let shared = Arc::new(OneShot {
            id: TaskId::next(),
            due: Instant::now() + delay,
            executor: Arc::downgrade(&self.executor),
            phase: Mutex::new(Phase::Waiting {
                task: Box::new(task),
                flow: flow_for(flow.peek()),
            }),
            fired: Condvar::new(),
        });
        let timer: Arc<dyn Timer> = Arc::clone(&shared) as Arc<dyn Timer>;
        if !self.queue.insert((shared.due, shared.id), timer) {
            return Err(RejectionError::ShuttingDown(self.name().to_string()));
        }
        debug!(
            executor = %self.name(),
            task_id = %shared.id,
            delay_ms = delay.as_millis() as u64,
            "Task scheduled"
        );
        Ok(ScheduledHandle {
            shared,
            queue: Arc::downgrade(&self.queue),
        })
    }

    /// Run `task` every `period`, first after `initial_delay`. A late run
    /// is followed by the next one straight away; runs never overlap.
    pub fn schedule_at_fixed_rate<F>(
        &self,
        flow: &Flow,
        initial_delay: Duration,
        period: Duration,
        task: F,
    ) -> Result<PeriodicHandle, RejectionError>
    where
        F: FnMut(&mut Flow) + Send + 'static,
    {
        self.schedule_periodic(flow, initial_delay, Cadence::FixedRate(period), Box::new(task))
    }

    /// Run `task` first after `initial_delay`, then `delay` after each run
    /// finishes.
    pub fn schedule_with_fixed_delay<F>(
        &self,
        flow: &Flow,
        initial_delay: Duration,
        delay: Duration,
        task: F,
    ) -> Result<PeriodicHandle, RejectionError>
    where
        F: FnMut(&mut Flow) + Send + 'static,
    {
        self.schedule_periodic(flow, initial_delay, Cadence::FixedDelay(delay), Box::new(task))
    }

    fn schedule_periodic(
        &self,
        flow: &Flow,
        initial_delay: Duration,
        cadence: Cadence,
        task: Box<dyn FnMut(&mut Flow) + Send>,
    ) -> Result<PeriodicHandle, RejectionError> {
        let (Cadence::FixedRate(period) | Cadence::FixedDelay(period)) = cadence;
        if period.is_zero() {
            return Err(RejectionError::InvalidSchedule {
                executor: self.name().to_string(),
                reason: "period must be greater than zero".to_string(),
            });
        }
        self.ensure_running()?;

        let due = Instant::now() + initial_delay;
        let shared = Arc::new(Periodic {
            id: TaskId::next(),
            cadence,
            context: flow.peek().map(ContextMap::snapshot),
            task: Mutex::new(task),
            executor: Arc::downgrade(&self.executor),
            queue: Arc::downgrade(&self.queue),
            due: Mutex::new(due),
            status: Mutex::new(Status::Waiting),
            runs: AtomicU64::new(0),
        });
        let timer: Arc<dyn Timer> = Arc::clone(&shared) as Arc<dyn Timer>;
        if !self.queue.insert((due, shared.id), timer) {
            return Err(RejectionError::ShuttingDown(self.name().to_string()));
        }
        debug!(
            executor = %self.name(),
            task_id = %shared.id,
            cadence = ?cadence,
            "Periodic task scheduled"
        );
        Ok(PeriodicHandle { shared })
    }

    fn ensure_running(&self) -> Result<(), RejectionError> {
        if self.executor.is_shutdown() {
            return Err(RejectionError::ShuttingDown(self.name().to_string()));
        }
        if self.timer.lock().is_none() {
            return Err(RejectionError::WorkerStart {
                executor: self.name().to_string(),
                reason: "scheduler thread is not running".to_string(),
            });
        }
        Ok(())
    }

    /// Tasks waiting for their due time.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Stop accepting tasks and drop every one not yet due. Tasks already
    /// handed to the pool still complete.
    pub fn shutdown(&self) {
        self.close_timers();
        self.executor.shutdown();
    }

    /// Like [`shutdown`](Self::shutdown), and also cancel the pool's queue
    /// and interrupt its running tasks. Returns the cancelled task ids.
    pub fn shutdown_now(&self) -> Vec<TaskId> {
        let mut cancelled = self.close_timers();
        cancelled.extend(self.executor.shutdown_now());
        cancelled
    }

    fn close_timers(&self) -> Vec<TaskId> {
        let abandoned: Vec<TaskId> = self
            .queue
            .close()
            .into_iter()
            .filter(|(_, timer)| timer.abandon())
            .map(|((_, id), _)| id)
            .collect();
        let timer = self.timer.lock().take();
        if let Some(mut timer) = timer {
            timer.stop();
            info!(
                executor = %self.name(),
                abandoned = abandoned.len(),
                "Scheduler stopped"
            );
        }
        abandoned
    }

    pub fn is_shutdown(&self) -> bool {
        self.executor.is_shutdown()
    }

    pub fn is_terminated(&self) -> bool {
        self.executor.is_terminated()
    }

    pub fn await_termination(&self, timeout: Duration) -> bool {
        self.executor.await_termination(timeout)
    }

    pub fn stats(&self) -> ExecutorStats {
        self.executor.stats()
    }
}

impl Drop for ManagedScheduledExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for ManagedScheduledExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedScheduledExecutor")
            .field("name", &self.name())
            .field("pending", &self.pending())
            .field("stats", &self.stats())
            .finish()
    }
}
