//! Context captured at submission reaches the task, and nothing a task does
//! survives on the worker afterwards.

use ambit::config::ContextServiceDescriptor;
use ambit::context::{Flow, ViewValue};
use ambit::pool::{ExecutorConfig, ManagedExecutor};
use ambit::standard::{NamingScope, SecurityIdentity, NAMING_CONTEXT, SECURITY_CONTEXT};
use ambit::types::ModeSet;
use std::sync::{Arc, Barrier};
use std::time::Duration;

use crate::integration::test_utils::{
    flow_as, is_anonymous, principal_of, propagating, setup_with, single_worker,
};

#[test]
fn test_each_task_sees_its_submitter() {
    let executor = ManagedExecutor::new(
        ExecutorConfig::new("isolation").core_pool_size(4).maximum_pool_size(4),
        propagating("Security"),
    );

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let flow = flow_as(&format!("user-{}", i));
            executor.submit(&flow, |flow| principal_of(flow)).unwrap()
        })
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.join().unwrap(), Some(format!("user-{}", i)));
    }
    executor.shutdown();
    assert!(executor.await_termination(Duration::from_secs(5)));
}

#[test]
fn test_submitter_changes_after_submit_are_invisible() {
    let executor = single_worker("snapshot", propagating("Security, WorkArea"));
    let gate = Arc::new(Barrier::new(2));

    // Occupy the only worker so the next task waits in the queue.
    let blocker = {
        let gate = Arc::clone(&gate);
        executor
            .submit(&Flow::new(), move |_| {
                gate.wait();
            })
            .unwrap()
    };

    let mut flow = flow_as("alice");
    flow.context().put("order", "id", 1i64, ModeSet::all());
    let queued = executor
        .submit(&flow, |flow| {
            (
                principal_of(flow),
                flow.peek().and_then(|m| m.get("order", "id")).cloned(),
            )
        })
        .unwrap();

    flow.context()
        .put_instance(SECURITY_CONTEXT, SecurityIdentity::new("mallory"), ModeSet::all());
    flow.context().put("order", "id", 2i64, ModeSet::all());
    gate.wait();

    blocker.join().unwrap();
    let (principal, order) = queued.join().unwrap();
    assert_eq!(principal.as_deref(), Some("alice"));
    assert_eq!(order, Some(ViewValue::Long(1)));
}

#[test]
fn test_task_writes_do_not_leak_to_next_task() {
    let mut descriptor = ContextServiceDescriptor::new("leak").with_context_info("Security");
    descriptor.unchanged = Some("Naming".into());
    let executor = single_worker("leak", setup_with(descriptor));

    executor
        .submit(&flow_as("first"), |flow| {
            flow.context().put_instance(
                NAMING_CONTEXT,
                NamingScope::new("first-app", "web", "servlet"),
                ModeSet::all(),
            );
            flow.context().put("scratch", "k", "v", ModeSet::all());
        })
        .unwrap()
        .join()
        .unwrap();

    let seen = executor
        .submit(&Flow::new(), |flow| {
            let map = flow.peek();
            (
                map.is_some_and(|m| m.contains(NAMING_CONTEXT)),
                map.and_then(|m| m.get("scratch", "k")).cloned(),
                principal_of(flow),
            )
        })
        .unwrap()
        .join()
        .unwrap();
    assert_eq!(seen, (false, None, None));
}

#[test]
fn test_cleared_identity_is_anonymous() {
    let mut descriptor = ContextServiceDescriptor::new("cleared").with_context_info("Naming");
    descriptor.cleared = Some("Security".into());
    let executor = single_worker("cleared", setup_with(descriptor));

    let anonymous = executor
        .submit(&flow_as("bob"), |flow| {
            flow.peek()
                .and_then(|m| m.instance::<SecurityIdentity>(SECURITY_CONTEXT))
                .map(SecurityIdentity::is_anonymous)
        })
        .unwrap()
        .join()
        .unwrap();
    assert_eq!(anonymous, Some(true));
}

#[test]
fn test_disabled_context_info_propagates_nothing() {
    let mut descriptor = ContextServiceDescriptor::new("off");
    descriptor.context_info_enabled = false;
    let executor = single_worker("off", setup_with(descriptor));

    let seen = executor
        .submit(&flow_as("carol"), |flow| is_anonymous(flow))
        .unwrap()
        .join();
    assert_eq!(seen, Ok(true));
}
