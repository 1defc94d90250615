//! Worker context is restored on every exit path of a task.

use ambit::config::ContextServiceDescriptor;
use ambit::context::{ContextInstance, Entry, Flow, ContextMap};
use ambit::error::{ContextTypeError, TaskError};
use ambit::pool::{ExecutorConfig, ManagedExecutor};
use ambit::registry::{ContextType, Registry};
use ambit::setup::ContextSetup;
use ambit::telemetry::events::{RESTORE_FAILED, WORKER_RETIRED};
use ambit::telemetry::EventBus;
use ambit::types::{ModeSet, PropagationMode};
use std::sync::Arc;
use std::time::Duration;

use crate::integration::test_utils::{flow_as, principal_of, propagating, single_worker, wait_until};

#[test]
fn test_panicking_task_leaves_worker_clean() {
    let executor = single_worker("panicky", propagating("Security, WorkArea"));

    let failed = executor
        .submit(&flow_as("eve"), |flow| {
            flow.context().put("scratch", "k", 1i64, ModeSet::all());
            panic!("task exploded");
        })
        .unwrap()
        .join();
    assert_eq!(failed, Err(TaskError::Panicked("task exploded".into())));

    let after = executor
        .submit(&Flow::new(), |flow| {
            (
                principal_of(flow),
                flow.peek().and_then(|m| m.get("scratch", "k")).cloned(),
            )
        })
        .unwrap()
        .join()
        .unwrap();
    assert_eq!(after, (None, None));

    assert!(wait_until(Duration::from_secs(2), || {
        let stats = executor.stats();
        stats.failed == 1 && stats.completed == 1
    }));
    // A panic is the task's failure, not the worker's.
    assert_eq!(executor.stats().workers, 1);
}

#[test]
fn test_panic_payload_of_any_type_is_reported() {
    let executor = single_worker("payload", propagating("Security"));
    let failed = executor
        .submit(&Flow::new(), |_| std::panic::panic_any(42u32))
        .unwrap()
        .join();
    assert!(matches!(failed, Err(TaskError::Panicked(_))));
}

/// Installs normally but cannot put the worker back.
#[derive(Debug)]
struct StickyType;

#[derive(Debug)]
struct Sticky;

impl ContextType for StickyType {
    fn name(&self) -> &str {
        "sticky"
    }

    fn supported_modes(&self) -> ModeSet {
        PropagationMode::Thread.into()
    }

    fn serialize(&self, _instance: &dyn ContextInstance) -> Result<Vec<u8>, ContextTypeError> {
        Ok(Vec::new())
    }

    fn deserialize(
        &self,
        _version: u32,
        _payload: &[u8],
    ) -> Result<Arc<dyn ContextInstance>, ContextTypeError> {
        Ok(Arc::new(Sticky))
    }

    fn restore_ambient(
        &self,
        _slot: &str,
        _ambient: &mut ContextMap,
        _previous: Option<Entry>,
    ) -> Result<(), ContextTypeError> {
        Err(ContextTypeError::Install {
            context_type: "sticky".into(),
            reason: "handle already released".into(),
        })
    }
}

#[test]
fn test_restore_failure_replaces_worker() {
    let registry = Registry::with_standard_types();
    registry
        .register("sticky", Arc::new(StickyType), PropagationMode::Thread.into())
        .unwrap();
    let setup = ContextSetup::new(
        &ContextServiceDescriptor::new("sticky-service").with_context_info("Security, Sticky"),
        &registry,
    )
    .shared();
    let (bus, events) = EventBus::new_pair();
    let executor = ManagedExecutor::with_events(
        ExecutorConfig::new("sticky").core_pool_size(1).maximum_pool_size(1),
        setup,
        Some(bus),
    );

    let first = executor
        .submit(&flow_as("frank"), |flow| {
            flow.context().put_instance("sticky", Sticky, ModeSet::all());
            principal_of(flow)
        })
        .unwrap();
    // The task itself succeeded; only the worker is suspect.
    assert_eq!(first.join().unwrap().as_deref(), Some("frank"));

    let mut seen = Vec::new();
    while let Ok(event) = events.recv_timeout(Duration::from_secs(2)) {
        seen.push(event.event_type.clone());
        if event.event_type == WORKER_RETIRED {
            assert_eq!(event.data["reason"], "restore_failed");
            break;
        }
    }
    assert_eq!(seen, vec![RESTORE_FAILED.to_string(), WORKER_RETIRED.to_string()]);

    // The replacement worker starts from an empty baseline.
    let second = executor
        .submit(&Flow::new(), |flow| principal_of(flow))
        .unwrap()
        .join()
        .unwrap();
    assert_eq!(second, None);
}
