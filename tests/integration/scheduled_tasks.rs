//! Scheduled executors configured through the runtime.

use ambit::config::ConfigLoader;
use ambit::context::Flow;
use ambit::registry::Registry;
use ambit::runtime::ConcurrentRuntime;
use std::sync::mpsc;
use std::time::Duration;

use crate::integration::test_utils::{flow_as, principal_of, wait_until};

fn runtime() -> ConcurrentRuntime {
    let config = ConfigLoader::from_toml_str(
        r#"
        [scheduled_executors.reports]
        core_pool_size = 1
        context_info = "Security"
        "#,
    )
    .unwrap();
    ConcurrentRuntime::from_config(&config, Registry::with_standard_types(), None).unwrap()
}

#[test]
fn test_periodic_runs_keep_scheduling_context() {
    let runtime = runtime();
    let reports = runtime.find_scheduled_executor("reports").unwrap();
    let (tick, ticks) = mpsc::channel();

    let periodic = reports
        .schedule_with_fixed_delay(
            &flow_as("rita"),
            Duration::ZERO,
            Duration::from_millis(10),
            move |flow| {
                let _ = tick.send(principal_of(flow));
            },
        )
        .unwrap();
    for _ in 0..3 {
        let seen = ticks.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(seen.as_deref(), Some("rita"));
    }

    // The single worker is restored between runs.
    let plain = reports
        .submit(&Flow::new(), |flow| principal_of(flow))
        .unwrap();
    assert_eq!(plain.join().unwrap(), None);

    assert!(periodic.cancel());
}

#[test]
fn test_runtime_shutdown_stops_schedules() {
    let runtime = runtime();
    let reports = runtime.find_scheduled_executor("reports").unwrap();
    let periodic = reports
        .schedule_at_fixed_rate(
            &Flow::new(),
            Duration::ZERO,
            Duration::from_millis(10),
            |_| {},
        )
        .unwrap();
    let delayed = reports
        .schedule(&Flow::new(), Duration::from_secs(60), |_| "late")
        .unwrap();
    assert!(wait_until(Duration::from_secs(5), || periodic.runs() >= 2));

    assert!(runtime.shutdown(Duration::from_secs(5)));
    assert!(periodic.is_done());
    assert!(delayed.join().is_err());
    assert!(runtime.find_scheduled_executor("reports").is_none());
    assert_eq!(reports.pending(), 0);
}
