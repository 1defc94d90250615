//! Context map, the flow that owns it, and the per-worker slot.

use crate::context::instance::{ContextInstance, Entry};
use crate::context::location::{Location, LOCATION_CONTEXT};
use crate::context::view::{View, ViewEntry, ViewValue, WorkArea, WORKAREA_CONTEXT};
use crate::types::{ModeSet, PropagationMode};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Context type instances of one flow, at most one per type name.
///
/// Iteration is ordered by name, which gives the wire encoder a stable
/// record order. Cloning is a snapshot: instances are immutable and shared,
/// and every write replaces the stored instance, so neither copy ever sees
/// the other's later changes.
#[derive(Clone, Debug, Default)]
pub struct ContextMap {
    entries: BTreeMap<String, Entry>,
}

impl ContextMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn get_entry(&self, name: &str) -> Option<&Entry> {
        self.entries.get(name)
    }

    pub fn instance<T: ContextInstance>(&self, name: &str) -> Option<&T> {
        self.entries.get(name).and_then(Entry::downcast::<T>)
    }

    pub fn insert(&mut self, name: &str, entry: Entry) -> Option<Entry> {
        self.entries.insert(name.to_string(), entry)
    }

    pub fn put_instance<T: ContextInstance>(
        &mut self,
        name: &str,
        instance: T,
        modes: ModeSet,
    ) -> Option<Entry> {
        self.insert(name, Entry::new(instance, modes))
    }

    pub fn get_or_insert_with(&mut self, name: &str, create: impl FnOnce() -> Entry) -> &Entry {
        self.entries.entry(name.to_string()).or_insert_with(create)
    }

    pub fn remove(&mut self, name: &str) -> Option<Entry> {
        self.entries.remove(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Entry)> {
        self.entries.iter().map(|(name, entry)| (name.as_str(), entry))
    }

    pub fn entries_for(&self, mode: PropagationMode) -> impl Iterator<Item = (&str, &Entry)> {
        self.iter().filter(move |(_, entry)| entry.modes().contains(mode))
    }

    pub fn retain_names(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.entries.retain(|name, _| keep(name));
    }

    /// Independent copy for handing across a thread or wire boundary.
    pub fn snapshot(&self) -> ContextMap {
        self.clone()
    }

    /// Same names holding the same shared instances under the same modes.
    pub fn same_as(&self, other: &ContextMap) -> bool {
        self.entries.len() == other.entries.len()
            && self.entries.iter().all(|(name, entry)| {
                other
                    .entries
                    .get(name)
                    .is_some_and(|theirs| entry.same_as(theirs))
            })
    }

    /// Fold a peer's entries for `mode` into this map.
    ///
    /// The incoming set is authoritative for `mode`: local entries tagged for
    /// `mode` are dropped, then the incoming entries tagged for `mode` are
    /// added. `None` clears every local entry for `mode`. The work area is
    /// merged per view entry with the same rule. The location belongs to the
    /// flow and is never merged.
    pub fn merge(&mut self, incoming: Option<&ContextMap>, mode: PropagationMode) {
        let incoming_area = incoming.and_then(ContextMap::work_area);
        if self.contains(WORKAREA_CONTEXT) || incoming_area.is_some() {
            let mut area = self.work_area().cloned().unwrap_or_default();
            area.merge_mode(incoming_area, mode);
            self.store_work_area(area);
        }

        self.entries.retain(|name, entry| {
            name == WORKAREA_CONTEXT || name == LOCATION_CONTEXT || !entry.modes().contains(mode)
        });

        if let Some(incoming) = incoming {
            for (name, entry) in incoming.entries_for(mode) {
                if name == WORKAREA_CONTEXT || name == LOCATION_CONTEXT {
                    continue;
                }
                self.entries.insert(name.to_string(), entry.clone());
            }
        }
    }

    pub fn location(&self) -> Option<&Location> {
        self.instance::<Location>(LOCATION_CONTEXT)
    }

    pub fn work_area(&self) -> Option<&WorkArea> {
        self.instance::<WorkArea>(WORKAREA_CONTEXT)
    }

    /// Returns the view for `prefix`, creating it if needed.
    pub fn create_view(&mut self, prefix: &str) -> View<'_> {
        let exists = self.work_area().is_some_and(|area| area.has_view(prefix));
        if !exists {
            self.update_work_area(|area| area.create_view(prefix));
        }
        View::new(self, prefix)
    }

    pub fn has_view(&self, prefix: &str) -> bool {
        self.work_area().is_some_and(|area| area.has_view(prefix))
    }

    pub fn get(&self, prefix: &str, key: &str) -> Option<&ViewValue> {
        self.get_view_entry(prefix, key).map(|entry| &entry.value)
    }

    pub fn get_view_entry(&self, prefix: &str, key: &str) -> Option<&ViewEntry> {
        self.work_area().and_then(|area| area.get(prefix, key))
    }

    /// Store `value` under `prefix`/`key`. Last write wins.
    pub fn put(&mut self, prefix: &str, key: &str, value: impl Into<ViewValue>, modes: ModeSet) {
        let value = value.into();
        self.update_work_area(|area| {
            area.put(prefix, key, value, modes);
        });
    }

    pub fn remove_view_key(&mut self, prefix: &str, key: &str) -> Option<ViewValue> {
        self.get_view_entry(prefix, key)?;
        let mut removed = None;
        self.update_work_area(|area| removed = area.remove(prefix, key).map(|entry| entry.value));
        removed
    }

    fn update_work_area(&mut self, change: impl FnOnce(&mut WorkArea)) {
        let mut area = self.work_area().cloned().unwrap_or_default();
        change(&mut area);
        self.store_work_area(area);
    }

    fn store_work_area(&mut self, area: WorkArea) {
        self.entries.insert(
            WORKAREA_CONTEXT.to_string(),
            Entry::new(area, ModeSet::all()),
        );
    }
}

/// Explicit carrier of one logical flow's ambient context.
///
/// The map is created on first access. A flow started with [`Flow::origin`]
/// also carries an origin [`Location`].
#[derive(Debug, Default)]
pub struct Flow {
    map: Option<ContextMap>,
    interrupted: Arc<AtomicBool>,
}

impl Flow {
    pub fn new() -> Self {
        Self::default()
    }

    /// A flow observed for the first time with no incoming location.
    pub fn origin() -> Self {
        let mut map = ContextMap::new();
        map.put_instance(LOCATION_CONTEXT, Location::new_origin(), Location::modes());
        Self::with_map(map)
    }

    pub fn with_map(map: ContextMap) -> Self {
        Self {
            map: Some(map),
            interrupted: Arc::default(),
        }
    }

    pub fn context(&mut self) -> &mut ContextMap {
        self.map.get_or_insert_with(ContextMap::new)
    }

    pub fn peek(&self) -> Option<&ContextMap> {
        self.map.as_ref()
    }

    pub fn replace(&mut self, map: ContextMap) -> Option<ContextMap> {
        self.map.replace(map)
    }

    pub fn take(&mut self) -> Option<ContextMap> {
        self.map.take()
    }

    pub fn location(&self) -> Option<&Location> {
        self.map.as_ref().and_then(ContextMap::location)
    }

    /// Set when the pool asks the running task to stop.
    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Acquire)
    }

    pub(crate) fn attach_interrupt(&mut self, flag: Arc<AtomicBool>) {
        self.interrupted = flag;
    }

    pub(crate) fn detach_interrupt(&mut self) {
        self.interrupted = Arc::default();
    }
}

/// Ambient slot owned by one worker thread.
///
/// Starts empty, which is the baseline every restore falls back to.
#[derive(Debug)]
pub struct WorkerContext {
    thread_name: String,
    priority: u8,
    flow: Flow,
}

impl WorkerContext {
    pub fn baseline(thread_name: impl Into<String>, priority: u8) -> Self {
        Self {
            thread_name: thread_name.into(),
            priority,
            flow: Flow::with_map(ContextMap::new()),
        }
    }

    pub fn thread_name(&self) -> &str {
        &self.thread_name
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn ambient(&self) -> &ContextMap {
        static EMPTY: std::sync::OnceLock<ContextMap> = std::sync::OnceLock::new();
        self.flow
            .peek()
            .unwrap_or_else(|| EMPTY.get_or_init(ContextMap::new))
    }

    pub fn ambient_mut(&mut self) -> &mut ContextMap {
        self.flow.context()
    }

    pub(crate) fn flow_mut(&mut self) -> &mut Flow {
        &mut self.flow
    }

    pub(crate) fn reset_ambient(&mut self, map: ContextMap) {
        self.flow.replace(map);
    }
}
