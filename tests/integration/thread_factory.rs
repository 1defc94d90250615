//! Standalone managed threads and registry reloads through the runtime.

use ambit::config::{ContextServiceDescriptor, ThreadFactoryDescriptor};
use ambit::context::Flow;
use ambit::registry::{Registry, StaticFactories};
use ambit::runtime::ConcurrentRuntime;
use ambit::standard::NamingType;
use std::sync::Arc;

use crate::integration::test_utils::{flow_as, principal_of};

fn runtime() -> ConcurrentRuntime {
    ConcurrentRuntime::new(Registry::with_standard_types(), None)
}

#[test]
fn test_factory_threads_carry_context() {
    let runtime = runtime();
    let factory = runtime
        .thread_factory(&ThreadFactoryDescriptor {
            context_info: Some("Security".into()),
            ..ThreadFactoryDescriptor::new("jobs")
        })
        .unwrap();

    let threads: Vec<_> = ["olga", "pete", "quinn"]
        .iter()
        .map(|name| factory.spawn(&flow_as(name), |flow| principal_of(flow)).unwrap())
        .collect();
    let names: Vec<String> = threads.iter().map(|t| t.name().to_string()).collect();
    assert_eq!(names, vec!["jobs-1", "jobs-2", "jobs-3"]);

    let seen: Vec<_> = threads.into_iter().map(|t| t.join().unwrap()).collect();
    assert_eq!(
        seen,
        vec![Some("olga".into()), Some("pete".into()), Some("quinn".into())]
    );
}

#[test]
fn test_same_name_returns_same_factory() {
    let runtime = runtime();
    let descriptor = ThreadFactoryDescriptor::new("shared");
    let first = runtime.thread_factory(&descriptor).unwrap();
    let second = runtime.thread_factory(&descriptor).unwrap();
    first.spawn(&Flow::new(), |_| ()).unwrap().join().unwrap();
    // Both handles draw from one name sequence.
    assert_eq!(second.spawn(&Flow::new(), |_| ()).unwrap().name(), "shared-2");
}

#[test]
fn test_shut_down_factory_rejects_threads() {
    let runtime = runtime();
    let factory = runtime
        .thread_factory(&ThreadFactoryDescriptor::new("closing"))
        .unwrap();
    assert!(runtime.shutdown_thread_factory("closing"));
    assert!(factory.spawn(&Flow::new(), |_| ()).is_err());
    assert!(runtime.find_thread_factory("closing").is_none());
}

#[test]
fn test_registry_reload_reaches_existing_setups() {
    let runtime = runtime();
    let setup = runtime.context_setup(
        &ContextServiceDescriptor::new("svc").with_context_info("Security, Naming"),
    );
    let factory = runtime
        .thread_factory(&ThreadFactoryDescriptor {
            context_info: Some("Security".into()),
            ..ThreadFactoryDescriptor::new("reloading")
        })
        .unwrap();

    runtime.reload_registry(&StaticFactories::new("naming-only").with(Arc::new(NamingType)));

    assert!(!setup.current().is_propagated("security"));
    assert!(setup.current().is_propagated("naming"));
    let seen = factory
        .spawn(&flow_as("rita"), |flow| principal_of(flow))
        .unwrap()
        .join()
        .unwrap();
    assert_eq!(seen, None);
}

#[test]
fn test_panicking_thread_reports_through_join() {
    let runtime = runtime();
    let factory = runtime
        .thread_factory(&ThreadFactoryDescriptor::new("fragile"))
        .unwrap();
    let thread = factory
        .spawn(&Flow::new(), |_| -> u32 { panic!("worker blew up") })
        .unwrap();
    let err = thread.join().unwrap_err();
    assert!(err.to_string().contains("worker blew up"));
    assert!(factory.live_threads().is_empty());
}
