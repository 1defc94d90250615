//! Managed concurrency: executors, scheduled executors, thread factories,
//! and hung-task detection.

pub mod executor;
pub mod factory;
pub mod scheduled;
pub mod task;
pub mod watchdog;

pub use executor::{ExecutorConfig, ExecutorStats, HungTaskPolicy, ManagedExecutor};
pub use factory::{ManagedThread, ManagedThreadFactory};
pub use scheduled::{ManagedScheduledExecutor, PeriodicHandle, ScheduledHandle};
pub use task::{TaskHandle, TaskState};
pub use watchdog::HungReport;
