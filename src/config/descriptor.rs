//! Resource descriptors as they arrive from configuration.
//!
//! Numeric fields are signed so out-of-range input can be reported instead
//! of failing deserialization. `validate` turns a descriptor into the typed
//! form the pool runs on, or fails fast with a [`ConfigurationError`].

use crate::error::ConfigurationError;
use crate::pool::{ExecutorConfig, HungTaskPolicy};
use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_true() -> bool {
    true
}

fn default_thread_priority() -> i64 {
    5
}

fn default_core_pool_size() -> i64 {
    1
}

fn default_maximum_pool_size() -> i64 {
    16
}

fn default_keep_alive_seconds() -> i64 {
    60
}

fn default_task_queue_capacity() -> i64 {
    i32::MAX as i64
}

fn default_hung_logger_seconds() -> i64 {
    60
}

/// Managed executor settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorDescriptor {
    /// Taken from the table key when loaded from a file.
    #[serde(default)]
    pub name: String,

    #[serde(default = "default_true")]
    pub context_info_enabled: bool,

    /// Comma-separated context type names, case-insensitive.
    /// Absent means every standard type, empty means none.
    #[serde(default)]
    pub context_info: Option<String>,

    /// Advisory, 1 (lowest) to 10 (highest).
    #[serde(default = "default_thread_priority")]
    pub thread_priority: i64,

    #[serde(default = "default_core_pool_size")]
    pub core_pool_size: i64,

    #[serde(default = "default_maximum_pool_size")]
    pub maximum_pool_size: i64,

    #[serde(default = "default_keep_alive_seconds")]
    pub keep_alive_seconds: i64,

    /// Zero hands tasks straight to a worker with no queueing.
    #[serde(default = "default_task_queue_capacity")]
    pub task_queue_capacity: i64,

    /// Absent disables hung-task detection.
    #[serde(default)]
    pub hung_after_seconds: Option<i64>,

    /// Zero lets workers live indefinitely.
    #[serde(default)]
    pub thread_lifetime_seconds: i64,

    #[serde(default)]
    pub use_virtual_threads: bool,

    /// Tasks are expected to run long, so hung detection is off.
    #[serde(default)]
    pub long_running_tasks: bool,

    #[serde(default = "default_true")]
    pub hung_logger_print_once: bool,

    #[serde(default = "default_hung_logger_seconds")]
    pub hung_logger_initial_delay_seconds: i64,

    #[serde(default = "default_hung_logger_seconds")]
    pub hung_logger_interval_seconds: i64,

    /// Allow cancellation and hung detection to interrupt running tasks.
    #[serde(default)]
    pub forced_interruption: bool,
}

impl Default for ExecutorDescriptor {
    fn default() -> Self {
        Self {
            name: String::new(),
            context_info_enabled: true,
            context_info: None,
            thread_priority: default_thread_priority(),
            core_pool_size: default_core_pool_size(),
            maximum_pool_size: default_maximum_pool_size(),
            keep_alive_seconds: default_keep_alive_seconds(),
            task_queue_capacity: default_task_queue_capacity(),
            hung_after_seconds: None,
            thread_lifetime_seconds: 0,
            use_virtual_threads: false,
            long_running_tasks: false,
            hung_logger_print_once: true,
            hung_logger_initial_delay_seconds: default_hung_logger_seconds(),
            hung_logger_interval_seconds: default_hung_logger_seconds(),
            forced_interruption: false,
        }
    }
}

impl ExecutorDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn context_service_name(&self) -> String {
        format!("{}-ContextService", self.name)
    }

    pub fn thread_factory_name(&self) -> String {
        format!("{}-ManagedThreadFactory", self.name)
    }

    /// Context service derived from this executor's context settings.
    pub fn context_service(&self) -> ContextServiceDescriptor {
        ContextServiceDescriptor {
            name: self.context_service_name(),
            context_info_enabled: self.context_info_enabled,
            context_info: self.context_info.clone(),
            cleared: None,
            unchanged: None,
        }
    }

    pub fn thread_factory(&self) -> ThreadFactoryDescriptor {
        ThreadFactoryDescriptor {
            name: self.thread_factory_name(),
            context_info_enabled: self.context_info_enabled,
            context_info: self.context_info.clone(),
            thread_priority: self.thread_priority,
        }
    }

    pub fn validate(&self) -> Result<ExecutorConfig, ConfigurationError> {
        let invalid = |field: &'static str, reason: String| ConfigurationError::InvalidValue {
            resource: self.name.clone(),
            field,
            reason,
        };

        let priority = validate_priority(&self.name, self.thread_priority)?;
        let core = non_negative(&self.name, "core_pool_size", self.core_pool_size)?;
        let maximum = non_negative(&self.name, "maximum_pool_size", self.maximum_pool_size)?;
        if maximum == 0 {
            return Err(invalid("maximum_pool_size", "must be at least 1".into()));
        }
        if maximum < core {
            return Err(invalid(
                "maximum_pool_size",
                format!("{} is below core_pool_size {}", maximum, core),
            ));
        }
        let keep_alive = non_negative(&self.name, "keep_alive_seconds", self.keep_alive_seconds)?;
        let capacity = non_negative(&self.name, "task_queue_capacity", self.task_queue_capacity)?;
        let lifetime = non_negative(
            &self.name,
            "thread_lifetime_seconds",
            self.thread_lifetime_seconds,
        )?;

        let hung = match (self.long_running_tasks, self.hung_after_seconds) {
            (true, _) | (false, None) => None,
            (false, Some(seconds)) if seconds <= 0 => {
                return Err(invalid(
                    "hung_after_seconds",
                    format!("{} must be positive while hung detection is enabled", seconds),
                ));
            }
            (false, Some(seconds)) => {
                let interval = self.hung_logger_interval_seconds;
                if interval <= 0 {
                    return Err(invalid(
                        "hung_logger_interval_seconds",
                        format!("{} must be positive", interval),
                    ));
                }
                let delay = non_negative(
                    &self.name,
                    "hung_logger_initial_delay_seconds",
                    self.hung_logger_initial_delay_seconds,
                )?;
                Some(HungTaskPolicy {
                    threshold: Duration::from_secs(seconds as u64),
                    initial_delay: Duration::from_secs(delay as u64),
                    interval: Duration::from_secs(interval as u64),
                    print_once: self.hung_logger_print_once,
                    interrupt: self.forced_interruption,
                })
            }
        };

        let mut config = ExecutorConfig::new(self.name.clone())
            .thread_priority(priority)
            .core_pool_size(core as usize)
            .maximum_pool_size(maximum as usize)
            .keep_alive(Duration::from_secs(keep_alive as u64))
            .queue_capacity(capacity as usize)
            .forced_interruption(self.forced_interruption);
        if lifetime > 0 {
            config = config.thread_lifetime(Duration::from_secs(lifetime as u64));
        }
        config.hung = hung;
        if self.use_virtual_threads {
            config = config.virtual_threads();
        }
        Ok(config)
    }

    /// Validate for a scheduled executor, which runs a fixed pool of
    /// `core_pool_size` workers over an unbounded queue.
    pub fn validate_scheduled(&self) -> Result<ExecutorConfig, ConfigurationError> {
        let core = non_negative(&self.name, "core_pool_size", self.core_pool_size)?;
        let fixed = ExecutorDescriptor {
            maximum_pool_size: core.max(1) as i64,
            task_queue_capacity: default_task_queue_capacity(),
            ..self.clone()
        };
        fixed.validate()
    }
}

/// Standalone managed thread factory settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadFactoryDescriptor {
    #[serde(default)]
    pub name: String,

    #[serde(default = "default_true")]
    pub context_info_enabled: bool,

    #[serde(default)]
    pub context_info: Option<String>,

    #[serde(default = "default_thread_priority")]
    pub thread_priority: i64,
}

impl ThreadFactoryDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            context_info_enabled: true,
            context_info: None,
            thread_priority: default_thread_priority(),
        }
    }

    pub fn context_service(&self) -> ContextServiceDescriptor {
        ContextServiceDescriptor {
            name: format!("{}-ContextService", self.name),
            context_info_enabled: self.context_info_enabled,
            context_info: self.context_info.clone(),
            cleared: None,
            unchanged: None,
        }
    }

    pub fn validate(&self) -> Result<u8, ConfigurationError> {
        validate_priority(&self.name, self.thread_priority)
    }
}

/// Which context types a resource propagates, clears, or leaves unchanged.
///
/// Each list is comma-separated and case-insensitive. `Remaining` in a list
/// applies that policy to every registered type not named elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextServiceDescriptor {
    #[serde(default)]
    pub name: String,

    #[serde(default = "default_true")]
    pub context_info_enabled: bool,

    /// Types to propagate. Absent means every standard type.
    #[serde(default)]
    pub context_info: Option<String>,

    #[serde(default)]
    pub cleared: Option<String>,

    #[serde(default)]
    pub unchanged: Option<String>,
}

impl ContextServiceDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            context_info_enabled: true,
            context_info: None,
            cleared: None,
            unchanged: None,
        }
    }

    pub fn with_context_info(mut self, context_info: impl Into<String>) -> Self {
        self.context_info = Some(context_info.into());
        self
    }
}

fn validate_priority(resource: &str, priority: i64) -> Result<u8, ConfigurationError> {
    if !(1..=10).contains(&priority) {
        return Err(ConfigurationError::InvalidValue {
            resource: resource.to_string(),
            field: "thread_priority",
            reason: format!("{} is outside 1..=10", priority),
        });
    }
    Ok(priority as u8)
}

fn non_negative(resource: &str, field: &'static str, value: i64) -> Result<u64, ConfigurationError> {
    u64::try_from(value).map_err(|_| ConfigurationError::InvalidValue {
        resource: resource.to_string(),
        field,
        reason: format!("{} must not be negative", value),
    })
}
