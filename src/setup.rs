//! Context setup
//!
//! Per-resource configuration of which context types are captured on the
//! submitting flow and how each one is installed on the worker, plus the
//! install, run, restore sequence that every managed task goes through.
//!
//! The restore half of that sequence runs on every path. A worker that kept
//! another flow's identity or naming scope into its next task would leak it,
//! so restore runs after success, failure, panic, and failed installation
//! alike, and the worker map is then reset to the exact copy taken before
//! installation.

use crate::config::ContextServiceDescriptor;
use crate::context::{ContextMap, Entry, Flow, WorkerContext};
use crate::error::{ContextTypeError, RestoreFailure, TaskError};
use crate::registry::{ContextType, Registry};
use crate::standard::{canonical_name, STANDARD_SETUP_TYPES};
use parking_lot::RwLock;
use serde::Serialize;
use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, warn};

const REMAINING: &str = "remaining";

/// What happens to one context type when a task runs on a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextPolicy {
    /// Install the submitter's captured instance.
    Propagate,
    /// Install the type's cleared value.
    Clear,
    /// Leave whatever the worker holds.
    Unchanged,
}

impl fmt::Display for ContextPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextPolicy::Propagate => f.write_str("propagate"),
            ContextPolicy::Clear => f.write_str("clear"),
            ContextPolicy::Unchanged => f.write_str("unchanged"),
        }
    }
}

#[derive(Debug, Clone)]
struct Resolved {
    name: String,
    policy: ContextPolicy,
    factory: Arc<dyn ContextType>,
}

/// Context captured at submission. Immutable once taken.
#[derive(Debug, Clone, Default)]
pub struct ContextSnapshot {
    map: ContextMap,
}

impl ContextSnapshot {
    pub fn map(&self) -> &ContextMap {
        &self.map
    }

    pub fn get(&self, name: &str) -> Option<&Entry> {
        self.map.get_entry(name)
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn into_map(self) -> ContextMap {
        self.map
    }
}

/// Result of one install, run, restore cycle.
///
/// `result` belongs to the task's caller. `restore` concerns the worker: an
/// error there means its baseline can no longer be trusted.
#[derive(Debug)]
pub struct RunOutcome<T> {
    pub result: Result<T, TaskError>,
    pub restore: Result<(), RestoreFailure>,
}

/// A setup that can be re-resolved while tasks are in flight.
///
/// Readers take an `Arc` of the current resolution, so a task is captured
/// and installed against the same setup even if a reload lands in between.
#[derive(Debug, Clone)]
pub struct SharedSetup {
    current: Arc<RwLock<Arc<ContextSetup>>>,
}

impl SharedSetup {
    pub fn new(setup: ContextSetup) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(setup))),
        }
    }

    pub fn current(&self) -> Arc<ContextSetup> {
        self.current.read().clone()
    }

    pub fn reload_providers(&self, registry: &Registry) -> Vec<String> {
        let mut guard = self.current.write();
        let mut next = ContextSetup::clone(&guard);
        let dropped = next.reload_providers(registry);
        *guard = Arc::new(next);
        dropped
    }

    pub fn replace(&self, setup: ContextSetup) {
        *self.current.write() = Arc::new(setup);
    }
}

/// Context configuration of one managed resource.
#[derive(Debug, Clone)]
pub struct ContextSetup {
    name: String,
    configured: Vec<(String, ContextPolicy)>,
    remaining: Option<ContextPolicy>,
    resolved: Vec<Resolved>,
    generation: Option<u64>,
}

impl ContextSetup {
    /// Parse a descriptor without resolving factories.
    pub fn from_descriptor(descriptor: &ContextServiceDescriptor) -> Self {
        let mut setup = Self {
            name: descriptor.name.clone(),
            configured: Vec::new(),
            remaining: None,
            resolved: Vec::new(),
            generation: None,
        };
        if !descriptor.context_info_enabled {
            return setup;
        }

        let propagated = match &descriptor.context_info {
            Some(list) => parse_list(list),
            None => STANDARD_SETUP_TYPES.iter().map(|s| s.to_string()).collect(),
        };
        setup.add_names(propagated, ContextPolicy::Propagate);
        if let Some(list) = &descriptor.cleared {
            setup.add_names(parse_list(list), ContextPolicy::Clear);
        }
        if let Some(list) = &descriptor.unchanged {
            setup.add_names(parse_list(list), ContextPolicy::Unchanged);
        }
        setup
    }

    /// Parse and resolve against `registry`.
    pub fn new(descriptor: &ContextServiceDescriptor, registry: &Registry) -> Self {
        let mut setup = Self::from_descriptor(descriptor);
        setup.reload_providers(registry);
        setup
    }

    pub fn shared(self) -> SharedSetup {
        SharedSetup::new(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn add_names(&mut self, names: Vec<String>, policy: ContextPolicy) {
        for name in names {
            if name == REMAINING {
                match self.remaining {
                    None => self.remaining = Some(policy),
                    Some(existing) => warn!(
                        resource = %self.name,
                        kept = %existing,
                        ignored = %policy,
                        "Remaining listed under more than one policy"
                    ),
                }
                continue;
            }
            if let Some((_, existing)) = self.configured.iter().find(|(n, _)| *n == name) {
                warn!(
                    resource = %self.name,
                    context_type = %name,
                    kept = %existing,
                    ignored = %policy,
                    "Context type listed under more than one policy"
                );
                continue;
            }
            self.configured.push((name, policy));
        }
    }

    /// Re-resolve every configured name against `registry`.
    ///
    /// Names with no registered factory are logged and dropped from the
    /// configuration. Types the configuration never names get the
    /// `Remaining` policy, or are cleared when there is none. Calling this
    /// again with the same registry yields the same resolution.
    pub fn reload_providers(&mut self, registry: &Registry) -> Vec<String> {
        let mut dropped = Vec::new();
        let mut resolved = Vec::new();

        self.configured.retain(|(name, policy)| match registry.lookup(name) {
            Ok(factory) => {
                resolved.push(Resolved {
                    name: name.clone(),
                    policy: *policy,
                    factory,
                });
                true
            }
            Err(_) => {
                warn!(
                    resource = %self.name,
                    context_type = %name,
                    "Ignoring unknown context type in configuration"
                );
                dropped.push(name.clone());
                false
            }
        });

        let named: HashSet<&str> = self.configured.iter().map(|(n, _)| n.as_str()).collect();
        let remaining = self.remaining.unwrap_or(ContextPolicy::Clear);
        for name in registry.names() {
            if named.contains(name.as_str()) {
                continue;
            }
            if let Ok(factory) = registry.lookup(&name) {
                resolved.push(Resolved {
                    name,
                    policy: remaining,
                    factory,
                });
            }
        }

        self.resolved = resolved;
        self.generation = Some(registry.generation());
        debug!(
            resource = %self.name,
            types = self.resolved.len(),
            dropped = dropped.len(),
            "Context providers resolved"
        );
        dropped
    }

    /// True when the registry changed since the last reload.
    pub fn is_stale(&self, registry: &Registry) -> bool {
        self.generation != Some(registry.generation())
    }

    /// Policy for a type name, aliases and case ignored.
    pub fn policy_for(&self, context_type: &str) -> ContextPolicy {
        let name = canonical_name(context_type);
        self.configured
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, policy)| *policy)
            .or(self.remaining)
            .unwrap_or(ContextPolicy::Clear)
    }

    pub fn is_propagated(&self, context_type: &str) -> bool {
        self.policy_for(context_type) == ContextPolicy::Propagate
    }

    /// Configured names in installation order.
    pub fn configured(&self) -> impl Iterator<Item = (&str, ContextPolicy)> {
        self.configured.iter().map(|(n, p)| (n.as_str(), *p))
    }

    /// Resolved types in installation order, including `Remaining` ones.
    pub fn resolved(&self) -> Vec<(String, ContextPolicy)> {
        self.resolved
            .iter()
            .map(|r| (r.name.clone(), r.policy))
            .collect()
    }

    /// Copy the propagated part of the flow's context.
    pub fn capture_for(&self, flow: &Flow) -> ContextSnapshot {
        let mut map = ContextMap::new();
        if let Some(ambient) = flow.peek() {
            for resolved in self
                .resolved
                .iter()
                .filter(|r| r.policy == ContextPolicy::Propagate)
            {
                if let Some(entry) = resolved.factory.capture_ambient(&resolved.name, ambient) {
                    map.insert(&resolved.name, entry);
                }
            }
        }
        ContextSnapshot { map }
    }

    /// Install `snapshot` on the worker, run `task`, then restore.
    pub fn install_and_run<T>(
        &self,
        worker: &mut WorkerContext,
        snapshot: &ContextSnapshot,
        task: impl FnOnce(&mut Flow) -> T,
    ) -> RunOutcome<T> {
        let saved = worker.ambient().snapshot();
        let mut installed: Vec<&Resolved> = Vec::new();
        let mut setup_failure = None;

        for resolved in &self.resolved {
            let entry = match resolved.policy {
                ContextPolicy::Unchanged => continue,
                ContextPolicy::Propagate => snapshot.get(&resolved.name).cloned(),
                ContextPolicy::Clear => resolved.factory.cleared(),
            };
            let ambient = worker.ambient_mut();
            match guarded(|| resolved.factory.install_ambient(&resolved.name, ambient, entry)) {
                Ok(()) => installed.push(resolved),
                Err(reason) => {
                    warn!(
                        resource = %self.name,
                        context_type = %resolved.name,
                        %reason,
                        "Context installation failed, task will not run"
                    );
                    setup_failure = Some(format!("{}: {}", resolved.name, reason));
                    // A half-applied install still needs its restore.
                    installed.push(resolved);
                    break;
                }
            }
        }

        let result = match setup_failure {
            Some(reason) => Err(TaskError::SetupFailed(reason)),
            None => panic::catch_unwind(AssertUnwindSafe(|| task(worker.flow_mut())))
                .map_err(|payload| TaskError::Panicked(panic_message(&*payload))),
        };

        let mut restore = Ok(());
        for resolved in installed.iter().rev() {
            let previous = saved.get_entry(&resolved.name).cloned();
            let ambient = worker.ambient_mut();
            if let Err(reason) =
                guarded(|| resolved.factory.restore_ambient(&resolved.name, ambient, previous))
            {
                error!(
                    resource = %self.name,
                    worker = worker.thread_name(),
                    context_type = %resolved.name,
                    %reason,
                    "Context restore failed"
                );
                if restore.is_ok() {
                    restore = Err(RestoreFailure {
                        context_type: resolved.name.clone(),
                        reason,
                    });
                }
            }
        }
        worker.reset_ambient(saved);

        RunOutcome { result, restore }
    }
}

fn parse_list(list: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    list.split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(canonical_name)
        .filter(|name| seen.insert(name.clone()))
        .collect()
}

fn guarded(hook: impl FnOnce() -> Result<(), ContextTypeError>) -> Result<(), String> {
    match panic::catch_unwind(AssertUnwindSafe(hook)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(payload) => Err(format!("panicked: {}", panic_message(&*payload))),
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
