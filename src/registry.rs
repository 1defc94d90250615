//! Context type registry
//!
//! Maps a context type name to its plugin and the propagation modes it is
//! registered for. Lookups are concurrent; registration and reload take the
//! write lock and are expected to run behind a caller-provided barrier.

use crate::context::{ContextInstance, ContextMap, Entry};
use crate::error::{ContextTypeError, RegistryError};
use crate::standard;
use crate::types::{ModeSet, PropagationMode};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Plugin interface for one kind of ambient state.
///
/// Hooks receive the registration name as `slot`, which is the key the
/// instance lives under in a [`ContextMap`]. The default hooks simply copy
/// entries in and out of that slot.
pub trait ContextType: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Payload version written to the wire.
    fn version(&self) -> u32 {
        1
    }

    fn supported_modes(&self) -> ModeSet;

    fn serialize(&self, instance: &dyn ContextInstance) -> Result<Vec<u8>, ContextTypeError>;

    fn deserialize(
        &self,
        version: u32,
        payload: &[u8],
    ) -> Result<Arc<dyn ContextInstance>, ContextTypeError>;

    fn capture_ambient(&self, slot: &str, ambient: &ContextMap) -> Option<Entry> {
        ambient.get_entry(slot).cloned()
    }

    fn install_ambient(
        &self,
        slot: &str,
        ambient: &mut ContextMap,
        entry: Option<Entry>,
    ) -> Result<(), ContextTypeError> {
        replace_slot(slot, ambient, entry);
        Ok(())
    }

    fn restore_ambient(
        &self,
        slot: &str,
        ambient: &mut ContextMap,
        previous: Option<Entry>,
    ) -> Result<(), ContextTypeError> {
        replace_slot(slot, ambient, previous);
        Ok(())
    }

    /// What a worker sees when this type is configured to be cleared.
    fn cleared(&self) -> Option<Entry> {
        None
    }

    /// Instance to put on the wire for `mode`, or `None` to send nothing.
    fn context_to_propagate(
        &self,
        entry: &Entry,
        _mode: PropagationMode,
    ) -> Option<Arc<dyn ContextInstance>> {
        Some(entry.instance().clone())
    }

    /// Called once on an instance received with a new inbound request.
    fn context_added(
        &self,
        instance: Arc<dyn ContextInstance>,
    ) -> Result<Arc<dyn ContextInstance>, ContextTypeError> {
        Ok(instance)
    }
}

fn replace_slot(slot: &str, ambient: &mut ContextMap, entry: Option<Entry>) {
    match entry {
        Some(entry) => {
            ambient.insert(slot, entry);
        }
        None => {
            ambient.remove(slot);
        }
    }
}

/// One registered context type.
#[derive(Clone, Debug)]
pub struct Registration {
    pub name: String,
    pub factory: Arc<dyn ContextType>,
    pub modes: ModeSet,
}

/// Same allocation, or two stateless factories of the same type.
fn same_factory(a: &Arc<dyn ContextType>, b: &Arc<dyn ContextType>) -> bool {
    if std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ()) {
        return true;
    }
    let stateless = |factory: &Arc<dyn ContextType>| std::mem::size_of_val(&**factory) == 0;
    stateless(a) && stateless(b) && format!("{a:?}") == format!("{b:?}")
}

/// Set of factories visible from one loading scope.
pub trait FactorySource: Send + Sync {
    fn scope_name(&self) -> &str;

    fn factories(&self) -> Vec<Registration>;
}

/// The built-in context types.
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardFactories;

impl FactorySource for StandardFactories {
    fn scope_name(&self) -> &str {
        "standard"
    }

    fn factories(&self) -> Vec<Registration> {
        standard::factories()
            .into_iter()
            .map(|factory| Registration {
                name: factory.name().to_string(),
                modes: factory.supported_modes(),
                factory,
            })
            .collect()
    }
}

/// A fixed list of factories, optionally on top of the built-in ones.
#[derive(Debug, Clone)]
pub struct StaticFactories {
    scope: String,
    registrations: Vec<Registration>,
}

impl StaticFactories {
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            registrations: Vec::new(),
        }
    }

    pub fn with_standard(mut self) -> Self {
        self.registrations.extend(StandardFactories.factories());
        self
    }

    pub fn with(mut self, factory: Arc<dyn ContextType>) -> Self {
        self.registrations.push(Registration {
            name: factory.name().to_string(),
            modes: factory.supported_modes(),
            factory,
        });
        self
    }

    pub fn with_modes(
        mut self,
        name: impl Into<String>,
        factory: Arc<dyn ContextType>,
        modes: ModeSet,
    ) -> Self {
        self.registrations.push(Registration {
            name: name.into(),
            factory,
            modes,
        });
        self
    }
}

impl FactorySource for StaticFactories {
    fn scope_name(&self) -> &str {
        &self.scope
    }

    fn factories(&self) -> Vec<Registration> {
        self.registrations.clone()
    }
}

/// Differences applied by a reload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReloadSummary {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub retained: Vec<String>,
}

/// Name to factory table. Not synchronized; see [`Registry`].
#[derive(Debug, Default)]
pub struct ContextTypeRegistry {
    registrations: BTreeMap<String, Registration>,
}

impl ContextTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` under `name`.
    ///
    /// Registering the same factory again is a no-op. "Same" means the same
    /// `Arc`, or a fresh instance of a zero-sized factory type already
    /// registered under `name` (such as `Arc::new(SecurityType)`). A factory
    /// that carries state is only the same as its own `Arc`; any other
    /// factory under a taken name is rejected.
    pub fn register(
        &mut self,
        name: &str,
        factory: Arc<dyn ContextType>,
        modes: ModeSet,
    ) -> Result<(), RegistryError> {
        if let Some(existing) = self.registrations.get(name) {
            if same_factory(&existing.factory, &factory) {
                debug!(context_type = name, "Context type already registered");
                return Ok(());
            }
            return Err(RegistryError::DuplicateRegistration(name.to_string()));
        }
        self.registrations.insert(
            name.to_string(),
            Registration {
                name: name.to_string(),
                factory,
                modes,
            },
        );
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<dyn ContextType>, RegistryError> {
        self.registrations
            .get(name)
            .map(|registration| registration.factory.clone())
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    pub fn registration(&self, name: &str) -> Option<&Registration> {
        self.registrations.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.registrations.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Replace the table with what `source` exposes.
    ///
    /// The first factory a source offers for a name wins; later ones are
    /// logged and skipped.
    pub fn reload(&mut self, source: &dyn FactorySource) -> ReloadSummary {
        let mut next: BTreeMap<String, Registration> = BTreeMap::new();
        for registration in source.factories() {
            if let Some(first) = next.get(&registration.name) {
                if !same_factory(&first.factory, &registration.factory) {
                    warn!(
                        scope = source.scope_name(),
                        context_type = %registration.name,
                        "Scope offers more than one factory for context type, keeping the first"
                    );
                }
                continue;
            }
            next.insert(registration.name.clone(), registration);
        }

        let mut summary = ReloadSummary::default();
        for name in next.keys() {
            if self.registrations.contains_key(name) {
                summary.retained.push(name.clone());
            } else {
                summary.added.push(name.clone());
            }
        }
        summary.removed = self
            .registrations
            .keys()
            .filter(|name| !next.contains_key(*name))
            .cloned()
            .collect();

        self.registrations = next;
        summary
    }
}

/// Process-wide registry handle.
///
/// Created explicitly at startup and shared by cloning.
#[derive(Clone, Debug, Default)]
pub struct Registry {
    inner: Arc<RwLock<ContextTypeRegistry>>,
    generation: Arc<AtomicU64>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_standard_types() -> Self {
        let registry = Self::new();
        registry.reload(&StandardFactories);
        registry
    }

    pub fn register(
        &self,
        name: &str,
        factory: Arc<dyn ContextType>,
        modes: ModeSet,
    ) -> Result<(), RegistryError> {
        self.inner.write().register(name, factory, modes)?;
        self.generation.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Register under the factory's own name and modes.
    pub fn register_type(&self, factory: Arc<dyn ContextType>) -> Result<(), RegistryError> {
        let name = factory.name().to_string();
        let modes = factory.supported_modes();
        self.register(&name, factory, modes)
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<dyn ContextType>, RegistryError> {
        self.inner.read().lookup(name)
    }

    pub fn registration(&self, name: &str) -> Option<Registration> {
        self.inner.read().registration(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.inner.read().names()
    }

    pub fn reload(&self, source: &dyn FactorySource) -> ReloadSummary {
        let summary = self.inner.write().reload(source);
        self.generation.fetch_add(1, Ordering::AcqRel);
        info!(
            scope = source.scope_name(),
            added = summary.added.len(),
            removed = summary.removed.len(),
            retained = summary.retained.len(),
            "Context type registry reloaded"
        );
        summary
    }

    /// Bumped on every change to the table.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}
