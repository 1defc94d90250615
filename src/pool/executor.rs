//! Managed executor
//!
//! A bounded worker pool with Java-style admission: up to the core size every
//! submission gets a new worker, then tasks queue up to the queue capacity,
//! then the pool grows to its maximum size, and beyond that submissions are
//! rejected. Each task runs with the submitter's captured context installed
//! and the worker's own context restored afterwards.

use crate::context::{Flow, WorkerContext};
use crate::error::{RejectionError, RestoreFailure, TaskError};
use crate::pool::factory::ManagedThreadFactory;
use crate::pool::task::{TaskHandle, TaskQueue, TaskRecord, TaskState};
use crate::pool::watchdog::{self, HungReport, TaskRecords, Watchdog};
use crate::setup::SharedSetup;
use crate::telemetry::events::{
    RejectionEventData, WorkerEventData, RESTORE_FAILED, TASK_REJECTED, WORKER_RETIRED,
};
use crate::telemetry::EventBus;
use crate::types::TaskId;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

const DEFAULT_HUNG_CHECK: Duration = Duration::from_secs(60);

/// When and how running tasks are reported as hung.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HungTaskPolicy {
    pub threshold: Duration,
    pub initial_delay: Duration,
    pub interval: Duration,
    pub print_once: bool,
    pub interrupt: bool,
}

impl HungTaskPolicy {
    pub fn after(threshold: Duration) -> Self {
        Self {
            threshold,
            initial_delay: DEFAULT_HUNG_CHECK,
            interval: DEFAULT_HUNG_CHECK,
            print_once: true,
            interrupt: false,
        }
    }
}

/// Validated executor settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    pub name: String,
    pub thread_priority: u8,
    pub core_pool_size: usize,
    pub maximum_pool_size: usize,
    pub keep_alive: Duration,
    pub queue_capacity: usize,
    pub thread_lifetime: Option<Duration>,
    pub hung: Option<HungTaskPolicy>,
    pub forced_interruption: bool,
    pub virtual_threads: bool,
}

impl ExecutorConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            thread_priority: 5,
            core_pool_size: 1,
            maximum_pool_size: 16,
            keep_alive: Duration::from_secs(60),
            queue_capacity: i32::MAX as usize,
            thread_lifetime: None,
            hung: None,
            forced_interruption: false,
            virtual_threads: false,
        }
    }

    pub fn thread_priority(mut self, priority: u8) -> Self {
        self.thread_priority = priority;
        self
    }

    pub fn core_pool_size(mut self, size: usize) -> Self {
        self.core_pool_size = size;
        self
    }

    pub fn maximum_pool_size(mut self, size: usize) -> Self {
        self.maximum_pool_size = size;
        self
    }

    pub fn keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Zero means direct handoff: a task only waits if a worker is idle.
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Retire each worker after it has been alive this long.
    pub fn thread_lifetime(mut self, lifetime: Duration) -> Self {
        self.thread_lifetime = Some(lifetime);
        self
    }

    pub fn forced_interruption(mut self, enabled: bool) -> Self {
        self.forced_interruption = enabled;
        if let Some(policy) = self.hung.as_mut() {
            policy.interrupt = enabled;
        }
        self
    }

    pub fn hung_after(mut self, threshold: Duration) -> Self {
        let mut policy = HungTaskPolicy::after(threshold);
        policy.interrupt = self.forced_interruption;
        self.hung = Some(policy);
        self
    }

    /// Watchdog timing. Has no effect unless a hung threshold is set.
    pub fn hung_check(mut self, initial_delay: Duration, interval: Duration) -> Self {
        if let Some(policy) = self.hung.as_mut() {
            policy.initial_delay = initial_delay;
            policy.interval = interval;
        }
        self
    }

    /// Short-lived workers: nothing is kept warm between bursts.
    pub fn virtual_threads(mut self) -> Self {
        self.virtual_threads = true;
        self.core_pool_size = 0;
        self.keep_alive = Duration::ZERO;
        self
    }
}

/// Point-in-time counters for one executor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutorStats {
    pub workers: usize,
    pub idle: usize,
    pub queued: usize,
    pub in_flight: usize,
    pub completed: u64,
    pub failed: u64,
    pub rejected: u64,
}

type JobBody = Box<dyn FnOnce(&mut WorkerContext) -> (TaskState, Result<(), RestoreFailure>) + Send>;

struct Job {
    record: Arc<TaskRecord>,
    run: JobBody,
}

enum Route {
    NewWorker,
    Queue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Retirement {
    IdleTimeout,
    Lifetime,
    RestoreFailed,
    Shutdown,
}

impl Retirement {
    fn as_str(self) -> &'static str {
        match self {
            Retirement::IdleTimeout => "idle_timeout",
            Retirement::Lifetime => "thread_lifetime",
            Retirement::RestoreFailed => "restore_failed",
            Retirement::Shutdown => "shutdown",
        }
    }
}

struct PoolState {
    workers: usize,
    idle: usize,
    queued: usize,
    shutdown: bool,
    sender: Option<Sender<Job>>,
}

impl PoolState {
    fn is_terminated(&self) -> bool {
        self.shutdown && self.workers == 0
    }
}

struct Inner {
    config: ExecutorConfig,
    factory: ManagedThreadFactory,
    state: Mutex<PoolState>,
    terminated: Condvar,
    receiver: Receiver<Job>,
    records: Arc<TaskRecords>,
    completed: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
    events: Option<EventBus>,
    watchdog: Mutex<Option<Watchdog>>,
}

/// Pool of managed workers. Dropping it shuts it down; queued tasks still run.
pub struct ManagedExecutor {
    inner: Arc<Inner>,
}

impl ManagedExecutor {
    pub fn new(config: ExecutorConfig, setup: SharedSetup) -> Self {
        Self::with_events(config, setup, None)
    }

    pub fn with_events(config: ExecutorConfig, setup: SharedSetup, events: Option<EventBus>) -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let factory = ManagedThreadFactory::for_executor(&config.name, config.thread_priority, setup);
        let records = Arc::new(TaskRecords::new());

        let watchdog = config.hung.clone().and_then(|policy| {
            Watchdog::start(
                config.name.clone(),
                Arc::downgrade(&records),
                policy,
                events.clone(),
            )
            .map_err(|e| {
                error!(executor = %config.name, error = %e, "Could not start hung-task watchdog");
            })
            .ok()
        });

        info!(
            executor = %config.name,
            core = config.core_pool_size,
            max = config.maximum_pool_size,
            queue_capacity = config.queue_capacity,
            hung_detection = config.hung.is_some(),
            "Managed executor created"
        );

        Self {
            inner: Arc::new(Inner {
                factory,
                state: Mutex::new(PoolState {
                    workers: 0,
                    idle: 0,
                    queued: 0,
                    shutdown: false,
                    sender: Some(sender),
                }),
                terminated: Condvar::new(),
                receiver,
                records,
                completed: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                rejected: AtomicU64::new(0),
                events,
                watchdog: Mutex::new(watchdog),
                config,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.inner.config
    }

    pub fn setup(&self) -> &SharedSetup {
        self.inner.factory.setup()
    }

    /// Submit `task`. The configured context is captured from `flow` once
    /// the task is admitted; a rejected task captures nothing.
    pub fn submit<T, F>(&self, flow: &Flow, task: F) -> Result<TaskHandle<T>, RejectionError>
    where
        F: FnOnce(&mut Flow) -> T + Send + 'static,
        T: Send + 'static,
    {
        let record = Arc::new(TaskRecord::new(TaskId::next()));
        let (sender, receiver) = oneshot::channel();
        let prepare = || {
            record.mark_capturing();
            let setup = self.setup().current();
            let snapshot = setup.capture_for(flow);

            let job_record = Arc::clone(&record);
            let records = Arc::clone(&self.inner.records);
            let run: JobBody = Box::new(move |worker: &mut WorkerContext| {
                worker.flow_mut().attach_interrupt(job_record.interrupt_flag());
                let outcome = setup.install_and_run(worker, &snapshot, task);
                worker.flow_mut().detach_interrupt();

                let state = job_record.finish(outcome.result.is_ok());
                records.remove(&job_record.id());
                let result = match state {
                    TaskState::Cancelled => Err(TaskError::Cancelled),
                    _ => outcome.result,
                };
                let _ = sender.send(result);
                (state, outcome.restore)
            });
            Job {
                record: Arc::clone(&record),
                run,
            }
        };

        self.inner.records.insert(record.id(), Arc::clone(&record));
        match self.inner.admit(prepare) {
            Ok(()) => {
                let queue: Weak<dyn TaskQueue> = Arc::<Inner>::downgrade(&self.inner);
                Ok(TaskHandle::new(record, receiver).queued_on(queue))
            }
            Err(rejection) => {
                self.inner.records.remove(&record.id());
                self.inner.rejected(&rejection);
                Err(rejection)
            }
        }
    }

    /// Submit without keeping a handle.
    pub fn execute<F>(&self, flow: &Flow, task: F) -> Result<TaskId, RejectionError>
    where
        F: FnOnce(&mut Flow) + Send + 'static,
    {
        self.submit(flow, task).map(|handle| handle.id())
    }

    /// Stop accepting tasks. Queued and running tasks still complete.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    /// Stop accepting tasks, cancel everything still queued, and interrupt
    /// the running ones. Returns the cancelled task ids.
    pub fn shutdown_now(&self) -> Vec<TaskId> {
        self.inner.shutdown();
        let drained: Vec<Job> = {
            let mut state = self.inner.state.lock();
            let jobs: Vec<Job> = self.inner.receiver.try_iter().collect();
            for job in &jobs {
                if job.record.release_slot() {
                    state.queued = state.queued.saturating_sub(1);
                }
            }
            jobs
        };

        // Jobs cancelled earlier are still in the channel; only report new ones.
        let mut cancelled = Vec::with_capacity(drained.len());
        for job in drained {
            if job.record.cancel(false) {
                cancelled.push(job.record.id());
            }
            self.inner.records.remove(&job.record.id());
        }
        for item in self.inner.records.iter() {
            if item.value().state().is_running() {
                item.value().interrupt();
            }
        }
        info!(
            executor = %self.name(),
            cancelled = cancelled.len(),
            "Executor shut down immediately"
        );
        cancelled
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.state.lock().shutdown
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.state.lock().is_terminated()
    }

    /// Block until every worker has exited after shutdown, or `timeout`.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        while !state.is_terminated() {
            if self
                .inner
                .terminated
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return state.is_terminated();
            }
        }
        true
    }

    pub fn stats(&self) -> ExecutorStats {
        let state = self.inner.state.lock();
        ExecutorStats {
            workers: state.workers,
            idle: state.idle,
            queued: state.queued,
            in_flight: self.inner.records.len(),
            completed: self.inner.completed.load(Ordering::Relaxed),
            failed: self.inner.failed.load(Ordering::Relaxed),
            rejected: self.inner.rejected.load(Ordering::Relaxed),
        }
    }

    /// Ids and states of tasks submitted and not yet finished.
    pub fn in_flight(&self) -> Vec<(TaskId, TaskState)> {
        let mut tasks: Vec<_> = self
            .inner
            .records
            .iter()
            .map(|item| (*item.key(), item.value().state()))
            .collect();
        tasks.sort_by_key(|(id, _)| *id);
        tasks
    }

    /// Tasks the watchdog has flagged and that are still running.
    pub fn hung_tasks(&self) -> Vec<TaskId> {
        let mut hung: Vec<TaskId> = self
            .inner
            .records
            .iter()
            .filter(|item| item.value().state() == TaskState::Hung)
            .map(|item| *item.key())
            .collect();
        hung.sort();
        hung
    }

    /// Run one hung-task scan now, independent of the watchdog schedule.
    pub fn check_hung(&self) -> Vec<HungReport> {
        let Some(policy) = &self.inner.config.hung else {
            return Vec::new();
        };
        let reports = watchdog::scan(
            &self.inner.records,
            &self.inner.config.name,
            policy,
            Instant::now(),
        );
        for report in &reports {
            watchdog::report(report, self.inner.events.as_ref());
        }
        reports
    }
}

impl Drop for ManagedExecutor {
    fn drop(&mut self) {
        self.inner.shutdown();
    }
}

impl std::fmt::Debug for ManagedExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedExecutor")
            .field("name", &self.inner.config.name)
            .field("stats", &self.stats())
            .finish()
    }
}

impl Inner {
    fn admit(self: &Arc<Self>, prepare: impl FnOnce() -> Job) -> Result<(), RejectionError> {
        let mut state = self.state.lock();
        let sender = match (&state.sender, state.shutdown) {
            (Some(sender), false) => sender.clone(),
            _ => return Err(RejectionError::ShuttingDown(self.config.name.clone())),
        };

        let route = if state.workers < self.config.core_pool_size {
            Route::NewWorker
        } else if state.queued < state.idle.saturating_add(self.config.queue_capacity) {
            Route::Queue
        } else if state.workers < self.config.maximum_pool_size {
            Route::NewWorker
        } else {
            return Err(RejectionError::QueueFull {
                executor: self.config.name.clone(),
                capacity: self.config.queue_capacity,
            });
        };

        let job = prepare();
        match route {
            Route::NewWorker => {
                state.workers += 1;
                drop(state);
                self.start_worker(Some(job))
            }
            Route::Queue => {
                job.record.mark_queued();
                job.record.hold_slot();
                if let Err(returned) = sender.send(job) {
                    returned.0.record.release_slot();
                    return Err(RejectionError::ShuttingDown(self.config.name.clone()));
                }
                state.queued += 1;
                if state.workers == 0 {
                    state.workers += 1;
                    drop(state);
                    if let Err(e) = self.start_worker(None) {
                        error!(executor = %self.config.name, error = %e, "Queued task has no worker");
                    }
                }
                Ok(())
            }
        }
    }

    fn start_worker(self: &Arc<Self>, first: Option<Job>) -> Result<(), RejectionError> {
        let inner = Arc::clone(self);
        match self
            .factory
            .spawn_worker(move |worker| inner.run_worker(worker, first))
        {
            Ok((name, _detached)) => {
                debug!(executor = %self.config.name, worker = %name, "Worker started");
                Ok(())
            }
            Err(e) => {
                let terminated = {
                    let mut state = self.state.lock();
                    state.workers -= 1;
                    state.is_terminated()
                };
                if terminated {
                    self.terminated.notify_all();
                }
                Err(RejectionError::WorkerStart {
                    executor: self.config.name.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }

    fn run_worker(self: Arc<Self>, mut worker: WorkerContext, first: Option<Job>) {
        let started = Instant::now();
        let retire_at = self.config.thread_lifetime.map(|lifetime| started + lifetime);
        let mut next = first;
        let mut error = None;

        let retirement = loop {
            let job = match next.take() {
                Some(job) => job,
                None => match self.next_job(retire_at) {
                    Ok(job) => job,
                    Err(retirement) => break retirement,
                },
            };

            if !job.record.begin(worker.thread_name()) {
                self.records.remove(&job.record.id());
                debug!(
                    executor = %self.config.name,
                    task_id = %job.record.id(),
                    "Skipping cancelled task"
                );
                continue;
            }

            let (state, restore) = (job.run)(&mut worker);
            match state {
                TaskState::Completed => self.completed.fetch_add(1, Ordering::Relaxed),
                _ => self.failed.fetch_add(1, Ordering::Relaxed),
            };

            if let Err(failure) = restore {
                self.restore_failed(&worker, &failure);
                error = Some(failure.to_string());
                self.state.lock().workers -= 1;
                break Retirement::RestoreFailed;
            }
            if let Some(lifetime) = self.config.thread_lifetime {
                if started.elapsed() >= lifetime {
                    self.state.lock().workers -= 1;
                    break Retirement::Lifetime;
                }
            }
        };

        self.worker_exited(&worker, retirement, error);
    }

    /// Wait for the next queued job. An idle worker still retires at
    /// `retire_at`. On retirement the worker count has already been
    /// decremented.
    fn next_job(&self, retire_at: Option<Instant>) -> Result<Job, Retirement> {
        let expired = |now: Instant| retire_at.is_some_and(|at| now >= at);
        loop {
            let wait = {
                let mut state = self.state.lock();
                let now = Instant::now();
                if expired(now) {
                    state.workers -= 1;
                    return Err(Retirement::Lifetime);
                }
                state.idle += 1;
                let keep_alive = (state.workers > self.config.core_pool_size)
                    .then_some(self.config.keep_alive);
                let remaining = retire_at.map(|at| at.saturating_duration_since(now));
                match (keep_alive, remaining) {
                    (Some(keep_alive), Some(remaining)) => Some(keep_alive.min(remaining)),
                    (keep_alive, remaining) => keep_alive.or(remaining),
                }
            };
            let received = match wait {
                Some(timeout) => self
                    .receiver
                    .recv_timeout(timeout)
                    .map_err(|e| e.is_timeout()),
                None => self.receiver.recv().map_err(|_| false),
            };

            let mut state = self.state.lock();
            state.idle -= 1;
            match received {
                Ok(job) => {
                    if job.record.release_slot() {
                        state.queued = state.queued.saturating_sub(1);
                    }
                    return Ok(job);
                }
                Err(true) if expired(Instant::now()) => {
                    state.workers -= 1;
                    return Err(Retirement::Lifetime);
                }
                Err(true) if state.queued > 0 || state.workers <= self.config.core_pool_size => {
                    continue
                }
                Err(true) => {
                    state.workers -= 1;
                    return Err(Retirement::IdleTimeout);
                }
                Err(false) => {
                    state.workers -= 1;
                    return Err(Retirement::Shutdown);
                }
            }
        }
    }

    fn worker_exited(
        self: &Arc<Self>,
        worker: &WorkerContext,
        retirement: Retirement,
        error: Option<String>,
    ) {
        debug!(
            executor = %self.config.name,
            worker = worker.thread_name(),
            reason = retirement.as_str(),
            "Worker retired"
        );
        if let Some(bus) = &self.events {
            bus.emit_best_effort(
                &self.config.name,
                WORKER_RETIRED,
                &WorkerEventData {
                    executor: self.config.name.clone(),
                    worker: worker.thread_name().to_string(),
                    reason: retirement.as_str().to_string(),
                    error,
                },
            );
        }

        let (terminated, replace) = {
            let mut state = self.state.lock();
            let replace = matches!(retirement, Retirement::Lifetime | Retirement::RestoreFailed)
                && !state.shutdown
                && (state.workers < self.config.core_pool_size || state.queued > 0);
            if replace {
                state.workers += 1;
            }
            (state.is_terminated(), replace)
        };
        if replace {
            if let Err(e) = self.start_worker(None) {
                error!(executor = %self.config.name, error = %e, "Could not replace retired worker");
            }
        }
        if terminated {
            info!(executor = %self.config.name, "Executor terminated");
            self.stop_watchdog();
            self.terminated.notify_all();
        }
    }

    fn stop_watchdog(&self) {
        let watchdog = self.watchdog.lock().take();
        if let Some(mut watchdog) = watchdog {
            watchdog.stop();
        }
    }

    fn restore_failed(&self, worker: &WorkerContext, failure: &RestoreFailure) {
        error!(
            executor = %self.config.name,
            worker = worker.thread_name(),
            context_type = %failure.context_type,
            reason = %failure.reason,
            "Worker could not restore its context and will be replaced"
        );
        if let Some(bus) = &self.events {
            bus.emit_best_effort(
                &self.config.name,
                RESTORE_FAILED,
                &WorkerEventData {
                    executor: self.config.name.clone(),
                    worker: worker.thread_name().to_string(),
                    reason: Retirement::RestoreFailed.as_str().to_string(),
                    error: Some(failure.to_string()),
                },
            );
        }
    }

    fn rejected(&self, rejection: &RejectionError) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        warn!(executor = %self.config.name, reason = %rejection, "Task rejected");
        if let Some(bus) = &self.events {
            bus.emit_best_effort(
                &self.config.name,
                TASK_REJECTED,
                &RejectionEventData {
                    executor: self.config.name.clone(),
                    reason: rejection.to_string(),
                },
            );
        }
    }

    fn shutdown(&self) {
        let terminated = {
            let mut state = self.state.lock();
            if state.shutdown {
                return;
            }
            state.shutdown = true;
            state.sender = None;
            state.is_terminated()
        };
        self.factory.shutdown();
        info!(executor = %self.config.name, "Executor shutting down");
        if terminated {
            self.stop_watchdog();
            self.terminated.notify_all();
        }
    }
}

impl TaskQueue for Inner {
    fn cancel(&self, record: &TaskRecord, may_interrupt: bool) -> bool {
        let mut state = self.state.lock();
        if !record.cancel(may_interrupt) {
            return false;
        }
        if record.release_slot() {
            state.queued = state.queued.saturating_sub(1);
            drop(state);
            self.records.remove(&record.id());
            debug!(
                executor = %self.config.name,
                task_id = %record.id(),
                "Queued task cancelled"
            );
        }
        true
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.stop_watchdog();
    }
}
