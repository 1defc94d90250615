//! Ambit: Managed Concurrency with Ambient Context Propagation
//!
//! Managed thread pools and thread factories that capture the submitting
//! flow's ambient context, install it around each task on a worker, and
//! restore the worker afterwards. The same context can be written to and
//! read from a byte stream for cross-process calls.

pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod pool;
pub mod registry;
pub mod runtime;
pub mod setup;
pub mod standard;
pub mod telemetry;
pub mod types;
pub mod wire;

pub use context::{ContextMap, Flow, Location, View, ViewValue, WorkerContext};
pub use error::{
    AmbitError, ConfigurationError, RejectionError, RestoreFailure, TaskError, WireError,
};
pub use pool::{ExecutorConfig, ManagedExecutor, ManagedThreadFactory, TaskHandle, TaskState};
pub use registry::{ContextType, Registry};
pub use runtime::ConcurrentRuntime;
pub use setup::{ContextPolicy, ContextSetup, SharedSetup};
pub use types::{ModeSet, PropagationMode, TaskId};
pub use wire::WirePropagator;
