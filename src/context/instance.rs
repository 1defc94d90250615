//! Type-erased context instances and the entries that hold them.

use crate::types::ModeSet;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Value held by a context map under a context type name.
///
/// Implemented for every `Any + Send + Sync + Debug` type. Instances are never
/// mutated once stored; a change produces a new instance.
pub trait ContextInstance: Any + Send + Sync + fmt::Debug {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any + Send + Sync + fmt::Debug> ContextInstance for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl dyn ContextInstance {
    pub fn downcast_ref<T: ContextInstance>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    pub fn is<T: ContextInstance>(&self) -> bool {
        self.as_any().is::<T>()
    }
}

/// A stored instance together with the modes it may travel under.
#[derive(Clone, Debug)]
pub struct Entry {
    instance: Arc<dyn ContextInstance>,
    modes: ModeSet,
}

impl Entry {
    pub fn new<T: ContextInstance>(instance: T, modes: ModeSet) -> Self {
        Self {
            instance: Arc::new(instance),
            modes,
        }
    }

    pub fn from_arc(instance: Arc<dyn ContextInstance>, modes: ModeSet) -> Self {
        Self { instance, modes }
    }

    pub fn instance(&self) -> &Arc<dyn ContextInstance> {
        &self.instance
    }

    pub fn modes(&self) -> ModeSet {
        self.modes
    }

    pub fn with_modes(self, modes: ModeSet) -> Self {
        Self { modes, ..self }
    }

    pub fn downcast<T: ContextInstance>(&self) -> Option<&T> {
        // Deref first so the lookup lands on the stored value, not the Arc.
        (*self.instance).downcast_ref::<T>()
    }

    /// Same shared instance and same modes.
    pub fn same_as(&self, other: &Entry) -> bool {
        self.modes == other.modes
            && std::ptr::eq(
                Arc::as_ptr(&self.instance) as *const (),
                Arc::as_ptr(&other.instance) as *const (),
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PropagationMode;

    #[derive(Debug, PartialEq)]
    struct Tenant(String);

    #[test]
    fn test_downcast_to_stored_type() {
        let entry = Entry::new(Tenant("acme".into()), PropagationMode::Thread.into());
        assert_eq!(entry.downcast::<Tenant>(), Some(&Tenant("acme".into())));
        assert!(entry.downcast::<String>().is_none());
    }

    #[test]
    fn test_same_as_tracks_identity() {
        let entry = Entry::new(Tenant("acme".into()), ModeSet::all());
        let clone = entry.clone();
        assert!(entry.same_as(&clone));

        let lookalike = Entry::new(Tenant("acme".into()), ModeSet::all());
        assert!(!entry.same_as(&lookalike));
        assert!(!entry.same_as(&clone.with_modes(ModeSet::EMPTY)));
    }
}
