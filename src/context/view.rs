//! Work area: prefix-partitioned key/value views carried as one context type.

use crate::context::map::ContextMap;
use crate::types::{ModeSet, PropagationMode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Context type name the work area is stored under.
pub const WORKAREA_CONTEXT: &str = "workarea";

/// Value stored in a view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViewValue {
    Long(i64),
    Text(String),
    Bool(bool),
    Bytes(Vec<u8>),
}

impl From<i64> for ViewValue {
    fn from(value: i64) -> Self {
        ViewValue::Long(value)
    }
}

impl From<&str> for ViewValue {
    fn from(value: &str) -> Self {
        ViewValue::Text(value.to_string())
    }
}

impl From<String> for ViewValue {
    fn from(value: String) -> Self {
        ViewValue::Text(value)
    }
}

impl From<bool> for ViewValue {
    fn from(value: bool) -> Self {
        ViewValue::Bool(value)
    }
}

impl From<Vec<u8>> for ViewValue {
    fn from(value: Vec<u8>) -> Self {
        ViewValue::Bytes(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewEntry {
    pub value: ViewValue,
    pub modes: ModeSet,
}

/// All views of one flow, keyed by prefix then key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkArea {
    views: BTreeMap<String, BTreeMap<String, ViewEntry>>,
}

impl WorkArea {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_view(&self, prefix: &str) -> bool {
        self.views.contains_key(prefix)
    }

    pub fn create_view(&mut self, prefix: &str) {
        self.views.entry(prefix.to_string()).or_default();
    }

    pub fn get(&self, prefix: &str, key: &str) -> Option<&ViewEntry> {
        self.views.get(prefix).and_then(|view| view.get(key))
    }

    pub fn put(
        &mut self,
        prefix: &str,
        key: &str,
        value: ViewValue,
        modes: ModeSet,
    ) -> Option<ViewEntry> {
        self.views
            .entry(prefix.to_string())
            .or_default()
            .insert(key.to_string(), ViewEntry { value, modes })
    }

    pub fn remove(&mut self, prefix: &str, key: &str) -> Option<ViewEntry> {
        self.views.get_mut(prefix).and_then(|view| view.remove(key))
    }

    pub fn keys(&self, prefix: &str) -> Vec<String> {
        self.views
            .get(prefix)
            .map(|view| view.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn prefixes(&self) -> impl Iterator<Item = &str> {
        self.views.keys().map(String::as_str)
    }

    pub fn entry_count(&self) -> usize {
        self.views.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entry_count() == 0
    }

    /// Entries allowed to travel under `mode`. Views left empty are dropped.
    pub fn filtered(&self, mode: PropagationMode) -> WorkArea {
        let views = self
            .views
            .iter()
            .filter_map(|(prefix, view)| {
                let kept: BTreeMap<String, ViewEntry> = view
                    .iter()
                    .filter(|(_, entry)| entry.modes.contains(mode))
                    .map(|(key, entry)| (key.clone(), entry.clone()))
                    .collect();
                (!kept.is_empty()).then(|| (prefix.clone(), kept))
            })
            .collect();
        WorkArea { views }
    }

    /// Make `incoming` authoritative for `mode`.
    ///
    /// Local entries tagged for `mode` are dropped and replaced by the
    /// incoming entries tagged for `mode`. Entries not tagged for `mode` are
    /// left alone.
    pub fn merge_mode(&mut self, incoming: Option<&WorkArea>, mode: PropagationMode) {
        for view in self.views.values_mut() {
            view.retain(|_, entry| !entry.modes.contains(mode));
        }
        let Some(incoming) = incoming else {
            return;
        };
        for (prefix, view) in &incoming.views {
            for (key, entry) in view.iter().filter(|(_, e)| e.modes.contains(mode)) {
                self.views
                    .entry(prefix.clone())
                    .or_default()
                    .insert(key.clone(), entry.clone());
            }
        }
    }
}

/// Handle on one prefix of a context map's work area.
///
/// Borrows the map, so it can never outlive it.
pub struct View<'a> {
    map: &'a mut ContextMap,
    prefix: String,
}

impl<'a> View<'a> {
    pub(crate) fn new(map: &'a mut ContextMap, prefix: &str) -> Self {
        Self {
            map,
            prefix: prefix.to_string(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn get(&self, key: &str) -> Option<&ViewValue> {
        self.map.get(&self.prefix, key)
    }

    pub fn modes(&self, key: &str) -> Option<ModeSet> {
        self.map.get_view_entry(&self.prefix, key).map(|entry| entry.modes)
    }

    /// Last write wins.
    pub fn put(&mut self, key: &str, value: impl Into<ViewValue>, modes: ModeSet) {
        self.map.put(&self.prefix, key, value, modes);
    }

    pub fn remove(&mut self, key: &str) -> Option<ViewValue> {
        self.map.remove_view_key(&self.prefix, key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.map
            .work_area()
            .map(|area| area.keys(&self.prefix))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> WorkArea {
        let mut area = WorkArea::new();
        area.put("orders", "id", ViewValue::Long(42), PropagationMode::Rmi.into());
        area.put(
            "orders",
            "trace",
            "abc".into(),
            PropagationMode::Rmi | PropagationMode::Thread,
        );
        area.put("audit", "user", "ann".into(), PropagationMode::Thread.into());
        area
    }

    #[test]
    fn test_filtered_keeps_only_mode() {
        let rmi = sample().filtered(PropagationMode::Rmi);
        assert_eq!(rmi.entry_count(), 2);
        assert!(!rmi.has_view("audit"));

        let soap = sample().filtered(PropagationMode::Soap);
        assert!(soap.is_empty());
    }

    #[test]
    fn test_merge_mode_replaces_tagged_entries() {
        let mut local = sample();
        let mut incoming = WorkArea::new();
        incoming.put("orders", "id", ViewValue::Long(7), PropagationMode::Rmi.into());

        local.merge_mode(Some(&incoming), PropagationMode::Rmi);

        assert_eq!(local.get("orders", "id").unwrap().value, ViewValue::Long(7));
        // tagged for rmi locally but absent from the incoming set
        assert!(local.get("orders", "trace").is_none());
        assert!(local.get("audit", "user").is_some());
    }

    #[test]
    fn test_merge_mode_without_incoming_clears_mode() {
        let mut local = sample();
        local.merge_mode(None, PropagationMode::Thread);
        assert!(local.get("orders", "trace").is_none());
        assert!(local.get("audit", "user").is_none());
        assert!(local.get("orders", "id").is_some());
    }
}
