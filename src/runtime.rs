//! Concurrent runtime
//!
//! Owns the named managed resources of one process: context setups,
//! thread factories, executors and scheduled executors, all resolved against a single context
//! type registry. Resources are created on first request and reused by name
//! afterwards.

use crate::config::{
    AmbitConfig, ContextServiceDescriptor, ExecutorDescriptor, ThreadFactoryDescriptor,
};
use crate::error::{ConfigurationError, RegistryError};
use crate::pool::{ManagedExecutor, ManagedScheduledExecutor, ManagedThreadFactory};
use crate::registry::{ContextType, FactorySource, Registry, ReloadSummary};
use crate::setup::{ContextSetup, SharedSetup};
use crate::telemetry::EventBus;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug)]
pub struct ConcurrentRuntime {
    registry: Registry,
    events: Option<EventBus>,
    setups: Mutex<HashMap<String, SharedSetup>>,
    factories: Mutex<HashMap<String, ManagedThreadFactory>>,
    executors: Mutex<HashMap<String, Arc<ManagedExecutor>>>,
    scheduled: Mutex<HashMap<String, Arc<ManagedScheduledExecutor>>>,
}

impl ConcurrentRuntime {
    pub fn new(registry: Registry, events: Option<EventBus>) -> Self {
        Self {
            registry,
            events,
            setups: Mutex::new(HashMap::new()),
            factories: Mutex::new(HashMap::new()),
            executors: Mutex::new(HashMap::new()),
            scheduled: Mutex::new(HashMap::new()),
        }
    }

    /// Create every resource `config` names. Fails on the first invalid
    /// descriptor, before anything is started.
    pub fn from_config(
        config: &AmbitConfig,
        registry: Registry,
        events: Option<EventBus>,
    ) -> Result<Self, ConfigurationError> {
        if let Err(mut errors) = config.validate() {
            return Err(errors.remove(0));
        }
        let runtime = Self::new(registry, events);
        for service in config.context_services.values() {
            runtime.context_setup(service);
        }
        for factory in config.thread_factories.values() {
            runtime.thread_factory(factory)?;
        }
        for executor in config.executors.values() {
            runtime.managed_executor(executor)?;
        }
        for executor in config.scheduled_executors.values() {
            runtime.managed_scheduled_executor(executor)?;
        }
        info!(
            executors = config.executors.len(),
            scheduled_executors = config.scheduled_executors.len(),
            thread_factories = config.thread_factories.len(),
            context_services = config.context_services.len(),
            "Runtime started from configuration"
        );
        Ok(runtime)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Setup registered under the descriptor's name, created if absent.
    pub fn context_setup(&self, descriptor: &ContextServiceDescriptor) -> SharedSetup {
        self.setups
            .lock()
            .entry(descriptor.name.clone())
            .or_insert_with(|| {
                debug!(resource = %descriptor.name, "Context setup created");
                ContextSetup::new(descriptor, &self.registry).shared()
            })
            .clone()
    }

    pub fn find_context_setup(&self, name: &str) -> Option<SharedSetup> {
        self.setups.lock().get(name).cloned()
    }

    pub fn remove_context_setup(&self, name: &str) -> bool {
        self.setups.lock().remove(name).is_some()
    }

    /// Factory registered under the descriptor's name, created if absent.
    /// Its setup is registered as `{name}-ContextService`.
    pub fn thread_factory(
        &self,
        descriptor: &ThreadFactoryDescriptor,
    ) -> Result<ManagedThreadFactory, ConfigurationError> {
        if let Some(existing) = self.factories.lock().get(&descriptor.name) {
            return Ok(existing.clone());
        }
        let priority = descriptor.validate()?;
        let setup = self.context_setup(&descriptor.context_service());
        let factory = ManagedThreadFactory::new(descriptor.name.clone(), priority, setup);
        Ok(self
            .factories
            .lock()
            .entry(descriptor.name.clone())
            .or_insert(factory)
            .clone())
    }

    pub fn find_thread_factory(&self, name: &str) -> Option<ManagedThreadFactory> {
        self.factories.lock().get(name).cloned()
    }

    pub fn shutdown_thread_factory(&self, name: &str) -> bool {
        match self.factories.lock().remove(name) {
            Some(factory) => {
                factory.shutdown();
                true
            }
            None => false,
        }
    }

    /// Executor registered under the descriptor's name, created if absent.
    ///
    /// The executor's setup is registered as `{name}-ContextService` and a
    /// thread factory record as `{name}-ManagedThreadFactory`.
    pub fn managed_executor(
        &self,
        descriptor: &ExecutorDescriptor,
    ) -> Result<Arc<ManagedExecutor>, ConfigurationError> {
        if let Some(existing) = self.executors.lock().get(&descriptor.name) {
            return Ok(Arc::clone(existing));
        }
        let config = descriptor.validate()?;
        let setup = self.context_setup(&descriptor.context_service());
        self.factories
            .lock()
            .entry(descriptor.thread_factory_name())
            .or_insert_with(|| {
                ManagedThreadFactory::new(
                    descriptor.thread_factory_name(),
                    config.thread_priority,
                    setup.clone(),
                )
            });

        let mut executors = self.executors.lock();
        let executor = executors
            .entry(descriptor.name.clone())
            .or_insert_with(|| {
                Arc::new(ManagedExecutor::with_events(
                    config,
                    setup,
                    self.events.clone(),
                ))
            });
        Ok(Arc::clone(executor))
    }

    pub fn find_executor(&self, name: &str) -> Option<Arc<ManagedExecutor>> {
        self.executors.lock().get(name).cloned()
    }

    pub fn executor_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.executors.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Shut an executor down and forget it. Its queued tasks still run.
    pub fn shutdown_executor(&self, name: &str) -> bool {
        let removed = self.executors.lock().remove(name);
        match removed {
            Some(executor) => {
                executor.shutdown();
                if let Some(factory) = self
                    .factories
                    .lock()
                    .remove(&format!("{}-ManagedThreadFactory", name))
                {
                    factory.shutdown();
                }
                true
            }
            None => false,
        }
    }

    /// Scheduled executor registered under the descriptor's name, created if
    /// absent. Its setup and thread factory record are named the same way
    /// as a plain executor's.
    pub fn managed_scheduled_executor(
        &self,
        descriptor: &ExecutorDescriptor,
    ) -> Result<Arc<ManagedScheduledExecutor>, ConfigurationError> {
        if let Some(existing) = self.scheduled.lock().get(&descriptor.name) {
            return Ok(Arc::clone(existing));
        }
        let config = descriptor.validate_scheduled()?;
        let setup = self.context_setup(&descriptor.context_service());
        self.factories
            .lock()
            .entry(descriptor.thread_factory_name())
            .or_insert_with(|| {
                ManagedThreadFactory::new(
                    descriptor.thread_factory_name(),
                    config.thread_priority,
                    setup.clone(),
                )
            });

        let mut scheduled = self.scheduled.lock();
        let executor = scheduled.entry(descriptor.name.clone()).or_insert_with(|| {
            Arc::new(ManagedScheduledExecutor::with_events(
                config,
                setup,
                self.events.clone(),
            ))
        });
        Ok(Arc::clone(executor))
    }

    pub fn find_scheduled_executor(&self, name: &str) -> Option<Arc<ManagedScheduledExecutor>> {
        self.scheduled.lock().get(name).cloned()
    }

    pub fn scheduled_executor_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.scheduled.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Shut a scheduled executor down and forget it. Tasks not yet due are
    /// dropped.
    pub fn shutdown_scheduled_executor(&self, name: &str) -> bool {
        let removed = self.scheduled.lock().remove(name);
        match removed {
            Some(executor) => {
                executor.shutdown();
                if let Some(factory) = self
                    .factories
                    .lock()
                    .remove(&format!("{}-ManagedThreadFactory", name))
                {
                    factory.shutdown();
                }
                true
            }
            None => false,
        }
    }

    /// Register a context type after startup and re-resolve every setup.
    pub fn register_type(
        &self,
        factory: Arc<dyn ContextType>,
    ) -> Result<(), RegistryError> {
        self.registry.register_type(factory)?;
        self.reload_providers();
        Ok(())
    }

    /// Reload the registry from `source`, then re-resolve every setup.
    pub fn reload_registry(&self, source: &dyn FactorySource) -> ReloadSummary {
        let summary = self.registry.reload(source);
        self.reload_providers();
        summary
    }

    /// Re-resolve every setup against the registry. Tasks already captured
    /// keep the resolution they were captured with.
    pub fn reload_providers(&self) {
        let setups: Vec<(String, SharedSetup)> = self
            .setups
            .lock()
            .iter()
            .map(|(name, setup)| (name.clone(), setup.clone()))
            .collect();
        for (name, setup) in setups {
            let dropped = setup.reload_providers(&self.registry);
            debug!(resource = %name, dropped = dropped.len(), "Context providers reloaded");
        }
    }

    /// Shut down every executor and factory, waiting up to `timeout` for
    /// each executor to drain. Returns false if any did not terminate.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        let executors: Vec<Arc<ManagedExecutor>> =
            self.executors.lock().drain().map(|(_, e)| e).collect();
        let scheduled: Vec<Arc<ManagedScheduledExecutor>> =
            self.scheduled.lock().drain().map(|(_, e)| e).collect();
        for factory in self.factories.lock().drain().map(|(_, f)| f) {
            factory.shutdown();
        }
        for executor in &executors {
            executor.shutdown();
        }
        for executor in &scheduled {
            executor.shutdown();
        }
        let mut terminated = true;
        for executor in &executors {
            terminated &= executor.await_termination(timeout);
        }
        for executor in &scheduled {
            terminated &= executor.await_termination(timeout);
        }
        info!(terminated, "Runtime shut down");
        terminated
    }
}
