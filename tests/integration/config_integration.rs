//! Configuration files through to running resources.

use ambit::config::{ConfigLoader, ExecutorDescriptor};
use ambit::error::ConfigurationError;
use ambit::registry::Registry;
use ambit::runtime::ConcurrentRuntime;
use ambit::setup::ContextPolicy;
use std::time::Duration;
use tempfile::TempDir;

use crate::integration::test_utils::{flow_as, is_anonymous, principal_of};

const CONFIG: &str = r#"
[logging]
level = "warn"

[executors.orders]
core_pool_size = 2
maximum_pool_size = 4
task_queue_capacity = 8
context_info = "Security, JNDI"
hung_after_seconds = 30

[thread_factories.reports]
thread_priority = 3
context_info = "Classloader"

[context_services.audit]
context_info = "Security"
cleared = "Naming"
unchanged = "Remaining"
"#;

fn load(raw: &str) -> ambit::config::AmbitConfig {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("ambit.toml");
    std::fs::write(&path, raw).unwrap();
    ConfigLoader::load_from_file(&path).unwrap()
}

#[test]
fn test_file_builds_a_working_runtime() {
    let config = load(CONFIG);
    assert_eq!(config.logging.level, "warn");
    let orders = config.executor("orders").unwrap().validate().unwrap();
    assert_eq!(orders.queue_capacity, 8);
    assert_eq!(orders.hung.as_ref().unwrap().threshold, Duration::from_secs(30));

    let runtime =
        ConcurrentRuntime::from_config(&config, Registry::with_standard_types(), None).unwrap();
    let executor = runtime.find_executor("orders").unwrap();
    let seen = executor
        .submit(&flow_as("mia"), |flow| principal_of(flow))
        .unwrap()
        .join()
        .unwrap();
    assert_eq!(seen.as_deref(), Some("mia"));

    let reports = runtime.find_thread_factory("reports").unwrap();
    assert_eq!(reports.priority(), 3);
    let thread = reports.spawn(&flow_as("nia"), |flow| is_anonymous(flow)).unwrap();
    assert_eq!(thread.name(), "reports-1");
    // Only the classloader crosses; the unlisted identity is cleared.
    assert_eq!(thread.join(), Ok(true));

    assert!(runtime.shutdown(Duration::from_secs(5)));
}

#[test]
fn test_context_service_policies_from_file() {
    let config = load(CONFIG);
    let runtime = ConcurrentRuntime::new(Registry::with_standard_types(), None);
    let audit = runtime
        .context_setup(config.context_service("audit").unwrap())
        .current();

    assert_eq!(audit.policy_for("SECURITY"), ContextPolicy::Propagate);
    assert_eq!(audit.policy_for("jndi"), ContextPolicy::Clear);
    assert_eq!(audit.policy_for("workarea"), ContextPolicy::Unchanged);
}

#[test]
fn test_invalid_file_is_rejected_before_start() {
    let config = load("[executors.bad]\ncore_pool_size = 8\nmaximum_pool_size = 2\n");
    let err = ConcurrentRuntime::from_config(&config, Registry::with_standard_types(), None)
        .unwrap_err();
    assert!(matches!(err, ConfigurationError::InvalidValue { .. }));
}

#[test]
fn test_long_running_tasks_disable_hung_detection() {
    let descriptor = ExecutorDescriptor {
        hung_after_seconds: Some(5),
        long_running_tasks: true,
        ..ExecutorDescriptor::new("batch")
    };
    assert!(descriptor.validate().unwrap().hung.is_none());
}

#[test]
fn test_virtual_threads_keep_nothing_warm() {
    let descriptor = ExecutorDescriptor {
        use_virtual_threads: true,
        ..ExecutorDescriptor::new("burst")
    };
    let config = descriptor.validate().unwrap();
    assert!(config.virtual_threads);
    assert_eq!(config.core_pool_size, 0);
    assert_eq!(config.keep_alive, Duration::ZERO);
}
