//! Hung-task watchdog
//!
//! A background thread that periodically scans an executor's in-flight
//! tasks and reports those running longer than the hung threshold. Age is
//! measured from submission.

use crate::pool::executor::HungTaskPolicy;
use crate::pool::task::TaskRecord;
use crate::telemetry::events::{HungTaskEventData, TASK_HUNG};
use crate::telemetry::EventBus;
use crate::types::TaskId;
use crossbeam_channel::{after, select, tick, Receiver, Sender};
use dashmap::DashMap;
use std::io;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub(crate) type TaskRecords = DashMap<TaskId, Arc<TaskRecord>>;

/// One task found over the hung threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HungReport {
    pub task_id: TaskId,
    pub executor: String,
    pub worker: Option<String>,
    pub age: Duration,
    pub threshold: Duration,
    pub interrupted: bool,
}

/// Mark and collect the hung tasks among `records`.
///
/// With `print_once` a task is reported on the first scan that finds it
/// hung and never again.
pub(crate) fn scan(
    records: &TaskRecords,
    executor: &str,
    policy: &HungTaskPolicy,
    now: Instant,
) -> Vec<HungReport> {
    let mut reports = Vec::new();
    for item in records.iter() {
        let record = item.value();
        let age = record.age(now);
        if age < policy.threshold {
            continue;
        }
        let first = match record.mark_hung() {
            Some(first) => first,
            None => continue,
        };
        if !first && policy.print_once {
            continue;
        }
        if policy.interrupt {
            record.interrupt();
        }
        reports.push(HungReport {
            task_id: record.id(),
            executor: executor.to_string(),
            worker: record.worker(),
            age,
            threshold: policy.threshold,
            interrupted: policy.interrupt,
        });
    }
    reports.sort_by_key(|report| report.task_id);
    reports
}

pub(crate) fn report(report: &HungReport, events: Option<&EventBus>) {
    warn!(
        task_id = %report.task_id,
        executor = %report.executor,
        worker = report.worker.as_deref().unwrap_or("-"),
        age_ms = report.age.as_millis() as u64,
        threshold_ms = report.threshold.as_millis() as u64,
        interrupted = report.interrupted,
        "Task appears to be hung"
    );
    if let Some(bus) = events {
        bus.emit_best_effort(
            &report.executor,
            TASK_HUNG,
            &HungTaskEventData {
                task_id: report.task_id.as_u64(),
                executor: report.executor.clone(),
                age_ms: report.age.as_millis(),
                threshold_ms: report.threshold.as_millis(),
                worker: report.worker.clone(),
                interrupted: report.interrupted,
            },
        );
    }
}

/// Running watchdog thread. Stops when dropped or when the executor's
/// records are gone.
#[derive(Debug)]
pub(crate) struct Watchdog {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Watchdog {
    pub(crate) fn start(
        executor: String,
        records: Weak<TaskRecords>,
        policy: HungTaskPolicy,
        events: Option<EventBus>,
    ) -> io::Result<Self> {
        let (stop, stopped) = crossbeam_channel::bounded(1);
        let handle = thread::Builder::new()
            .name(format!("{}-hung-watchdog", executor))
            .spawn(move || watch(executor, records, policy, events, stopped))?;
        Ok(Self {
            stop: Some(stop),
            handle: Some(handle),
        })
    }

    pub(crate) fn stop(&mut self) {
        // Dropping the sender disconnects the channel and wakes the select.
        self.stop.take();
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.stop();
    }
}

fn watch(
    executor: String,
    records: Weak<TaskRecords>,
    policy: HungTaskPolicy,
    events: Option<EventBus>,
    stopped: Receiver<()>,
) {
    debug!(executor = %executor, threshold_ms = policy.threshold.as_millis() as u64, "Hung-task watchdog started");
    select! {
        recv(stopped) -> _ => return,
        recv(after(policy.initial_delay)) -> _ => {}
    }

    let ticker = tick(policy.interval);
    loop {
        let Some(records) = records.upgrade() else {
            break;
        };
        for found in scan(&records, &executor, &policy, Instant::now()) {
            report(&found, events.as_ref());
        }
        drop(records);

        select! {
            recv(stopped) -> _ => break,
            recv(ticker) -> _ => {}
        }
    }
    debug!(executor = %executor, "Hung-task watchdog stopped");
}
