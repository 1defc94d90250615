//! Configuration
//!
//! Named managed resources (executors, scheduled executors, thread
//! factories, context services) and logging, loaded from layered sources: built-in defaults, the global
//! config file, workspace files, then `AMBIT__` environment variables.

use crate::error::ConfigurationError;
use crate::logging::LoggingConfig;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

mod descriptor;
mod facade;

mod merge {
    pub mod merge_policy;
}

mod sources {
    pub mod global_file;
    pub mod workspace_file;
}

pub use descriptor::{ContextServiceDescriptor, ExecutorDescriptor, ThreadFactoryDescriptor};
pub use facade::ConfigLoader;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmbitConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub executors: BTreeMap<String, ExecutorDescriptor>,

    /// Same settings as `executors`; `maximum_pool_size` and
    /// `task_queue_capacity` are ignored.
    #[serde(default)]
    pub scheduled_executors: BTreeMap<String, ExecutorDescriptor>,

    #[serde(default)]
    pub thread_factories: BTreeMap<String, ThreadFactoryDescriptor>,

    #[serde(default)]
    pub context_services: BTreeMap<String, ContextServiceDescriptor>,
}

impl AmbitConfig {
    /// Give every descriptor with an empty name its table key.
    pub fn fill_names(&mut self) {
        for (key, executor) in self
            .executors
            .iter_mut()
            .chain(self.scheduled_executors.iter_mut())
        {
            if executor.name.is_empty() {
                executor.name = key.clone();
            }
        }
        for (key, factory) in &mut self.thread_factories {
            if factory.name.is_empty() {
                factory.name = key.clone();
            }
        }
        for (key, service) in &mut self.context_services {
            if service.name.is_empty() {
                service.name = key.clone();
            }
        }
    }

    /// Validate every descriptor, collecting all failures.
    pub fn validate(&self) -> Result<(), Vec<ConfigurationError>> {
        let mut errors = Vec::new();

        for executor in self.executors.values() {
            if let Err(e) = executor.validate() {
                errors.push(e);
            }
        }
        for executor in self.scheduled_executors.values() {
            if let Err(e) = executor.validate_scheduled() {
                errors.push(e);
            }
        }
        for factory in self.thread_factories.values() {
            if let Err(e) = factory.validate() {
                errors.push(e);
            }
        }
        for (key, service) in &self.context_services {
            if service.name.trim().is_empty() {
                errors.push(ConfigurationError::InvalidValue {
                    resource: key.clone(),
                    field: "name",
                    reason: "must not be empty".to_string(),
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn executor(&self, name: &str) -> Result<&ExecutorDescriptor, ConfigurationError> {
        self.executors
            .get(name)
            .ok_or_else(|| ConfigurationError::UnknownResource(name.to_string()))
    }

    pub fn scheduled_executor(&self, name: &str) -> Result<&ExecutorDescriptor, ConfigurationError> {
        self.scheduled_executors
            .get(name)
            .ok_or_else(|| ConfigurationError::UnknownResource(name.to_string()))
    }

    pub fn thread_factory(&self, name: &str) -> Result<&ThreadFactoryDescriptor, ConfigurationError> {
        self.thread_factories
            .get(name)
            .ok_or_else(|| ConfigurationError::UnknownResource(name.to_string()))
    }

    pub fn context_service(&self, name: &str) -> Result<&ContextServiceDescriptor, ConfigurationError> {
        self.context_services
            .get(name)
            .ok_or_else(|| ConfigurationError::UnknownResource(name.to_string()))
    }
}

/// Live configuration with validated reloads.
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: Arc<RwLock<AmbitConfig>>,
}

impl ConfigManager {
    pub fn new(config: AmbitConfig) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
        }
    }

    /// Reload from the workspace. The current configuration is kept when
    /// loading or validation fails.
    pub fn reload(&self, workspace_root: &Path) -> Result<(), ConfigurationError> {
        let new_config = ConfigLoader::load(workspace_root)?;
        new_config.validate().map_err(|errors| {
            let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            ConfigurationError::Load(format!(
                "Configuration validation failed:\n{}",
                messages.join("\n")
            ))
        })?;
        *self.config.write() = new_config;
        Ok(())
    }

    pub fn get(&self) -> AmbitConfig {
        self.config.read().clone()
    }
}
