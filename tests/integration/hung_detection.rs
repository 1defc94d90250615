//! Hung-task detection against a real clock.

use ambit::context::Flow;
use ambit::pool::{ExecutorConfig, ManagedExecutor, TaskState};
use ambit::telemetry::events::TASK_HUNG;
use ambit::telemetry::{EventBus, EventEnvelope};
use std::collections::HashSet;
use std::sync::mpsc::Receiver;
use std::time::Duration;

use crate::integration::test_utils::{propagating, wait_until};

fn watched(name: &str, interrupt: bool) -> (ManagedExecutor, Receiver<EventEnvelope>) {
    let (bus, events) = EventBus::new_pair();
    let executor = ManagedExecutor::with_events(
        ExecutorConfig::new(name)
            .core_pool_size(2)
            .maximum_pool_size(2)
            .forced_interruption(interrupt)
            .hung_after(Duration::from_secs(2))
            .hung_check(Duration::ZERO, Duration::from_millis(200)),
        propagating("Security"),
        Some(bus),
    );
    (executor, events)
}

#[test]
fn test_only_task_past_threshold_is_hung() {
    let (executor, events) = watched("hung", false);

    let slow = executor
        .submit(&Flow::new(), |_| std::thread::sleep(Duration::from_secs(3)))
        .unwrap();
    let quick = executor
        .submit(&Flow::new(), |_| std::thread::sleep(Duration::from_secs(1)))
        .unwrap();
    let slow_id = slow.id();
    let quick_id = quick.id();

    assert!(wait_until(Duration::from_secs(3), || slow.state() == TaskState::Hung));
    assert_eq!(executor.hung_tasks(), vec![slow_id]);

    quick.join().unwrap();
    slow.join().unwrap();

    let mut hung = HashSet::new();
    while let Ok(event) = events.recv_timeout(Duration::from_millis(500)) {
        if event.event_type == TASK_HUNG {
            hung.insert(event.data["task_id"].as_u64().unwrap());
        }
    }
    assert!(hung.contains(&slow_id.as_u64()));
    assert!(!hung.contains(&quick_id.as_u64()));
    assert!(executor.hung_tasks().is_empty());
}

#[test]
fn test_hung_task_is_reported_once() {
    let (executor, events) = watched("once", false);
    let slow = executor
        .submit(&Flow::new(), |_| std::thread::sleep(Duration::from_millis(2800)))
        .unwrap();
    slow.join().unwrap();

    let reports = std::iter::from_fn(|| events.recv_timeout(Duration::from_millis(300)).ok())
        .filter(|event| event.event_type == TASK_HUNG)
        .count();
    assert_eq!(reports, 1);
}

#[test]
fn test_forced_interruption_reaches_task() {
    let (executor, _events) = watched("interrupt", true);
    let cooperative = executor
        .submit(&Flow::new(), |flow| {
            let started = std::time::Instant::now();
            while !flow.is_interrupted() {
                if started.elapsed() > Duration::from_secs(10) {
                    return false;
                }
                std::thread::sleep(Duration::from_millis(20));
            }
            true
        })
        .unwrap();
    assert_eq!(cooperative.join(), Ok(true));
}
