//! Managed thread factory
//!
//! Creates named threads that start from an empty ambient baseline. Threads
//! spawned for a caller get the caller's captured context installed for the
//! duration of their body.

use crate::context::{Flow, WorkerContext};
use crate::error::{RejectionError, TaskError};
use crate::setup::{panic_message, SharedSetup};
use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error};

#[derive(Debug)]
struct FactoryInner {
    name: String,
    thread_prefix: String,
    priority: u8,
    setup: SharedSetup,
    counter: AtomicUsize,
    shutdown: AtomicBool,
    live: Mutex<Vec<String>>,
}

/// Thread factory bound to a context setup.
#[derive(Debug, Clone)]
pub struct ManagedThreadFactory {
    inner: Arc<FactoryInner>,
}

impl ManagedThreadFactory {
    pub fn new(name: impl Into<String>, priority: u8, setup: SharedSetup) -> Self {
        let name = name.into();
        Self::build(name.clone(), name, priority, setup)
    }

    /// Factory for an executor's workers, named `{executor}-worker-{n}`.
    pub(crate) fn for_executor(executor: &str, priority: u8, setup: SharedSetup) -> Self {
        Self::build(
            executor.to_string(),
            format!("{}-worker", executor),
            priority,
            setup,
        )
    }

    fn build(name: String, thread_prefix: String, priority: u8, setup: SharedSetup) -> Self {
        Self {
            inner: Arc::new(FactoryInner {
                name,
                thread_prefix,
                priority,
                setup,
                counter: AtomicUsize::new(0),
                shutdown: AtomicBool::new(false),
                live: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Advisory; recorded on each worker but not applied to the OS thread.
    pub fn priority(&self) -> u8 {
        self.inner.priority
    }

    pub fn setup(&self) -> &SharedSetup {
        &self.inner.setup
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    /// Names of threads started by this factory that have not exited.
    pub fn live_threads(&self) -> Vec<String> {
        self.inner.live.lock().clone()
    }

    pub fn shutdown(&self) {
        if !self.inner.shutdown.swap(true, Ordering::AcqRel) {
            debug!(factory = %self.inner.name, "Thread factory shut down");
        }
    }

    fn next_thread_name(&self) -> String {
        let n = self.inner.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}-{}", self.inner.thread_prefix, n)
    }

    /// Start a thread with a fresh baseline worker context.
    pub(crate) fn spawn_worker<R, F>(&self, body: F) -> io::Result<(String, JoinHandle<R>)>
    where
        F: FnOnce(WorkerContext) -> R + Send + 'static,
        R: Send + 'static,
    {
        let name = self.next_thread_name();
        let priority = self.inner.priority;
        let inner = Arc::clone(&self.inner);
        let thread_name = name.clone();
        inner.live.lock().push(name.clone());
        let spawned = thread::Builder::new().name(name.clone()).spawn(move || {
            let result = body(WorkerContext::baseline(thread_name.clone(), priority));
            inner.live.lock().retain(|n| *n != thread_name);
            result
        });
        match spawned {
            Ok(handle) => Ok((name, handle)),
            Err(e) => {
                self.inner.live.lock().retain(|n| *n != name);
                Err(e)
            }
        }
    }

    /// Run `task` on a new thread with the caller's context installed.
    pub fn spawn<T, F>(&self, flow: &Flow, task: F) -> Result<ManagedThread<T>, RejectionError>
    where
        F: FnOnce(&mut Flow) -> T + Send + 'static,
        T: Send + 'static,
    {
        if self.is_shutdown() {
            return Err(RejectionError::ShuttingDown(self.inner.name.clone()));
        }
        let setup = self.inner.setup.current();
        let snapshot = setup.capture_for(flow);
        let factory = self.inner.name.clone();

        let (name, handle) = self
            .spawn_worker(move |mut worker| {
                let outcome = setup.install_and_run(&mut worker, &snapshot, task);
                if let Err(failure) = &outcome.restore {
                    error!(
                        factory = %factory,
                        worker = worker.thread_name(),
                        context_type = %failure.context_type,
                        reason = %failure.reason,
                        "Managed thread could not restore its context"
                    );
                }
                outcome.result
            })
            .map_err(|e| RejectionError::WorkerStart {
                executor: self.inner.name.clone(),
                reason: e.to_string(),
            })?;

        Ok(ManagedThread { name, handle })
    }
}

/// A thread started by [`ManagedThreadFactory::spawn`].
#[derive(Debug)]
pub struct ManagedThread<T> {
    name: String,
    handle: JoinHandle<Result<T, TaskError>>,
}

impl<T> ManagedThread<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn join(self) -> Result<T, TaskError> {
        self.handle
            .join()
            .unwrap_or_else(|payload| Err(TaskError::Panicked(panic_message(&*payload))))
    }
}
