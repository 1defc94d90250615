//! Property-based tests for view entries crossing the wire

use ambit::context::{ContextMap, Flow, ViewValue};
use ambit::registry::Registry;
use ambit::types::{ModeSet, PropagationMode};
use ambit::wire::WirePropagator;
use proptest::prelude::*;
use std::collections::BTreeMap;

fn view_value() -> impl Strategy<Value = ViewValue> {
    prop_oneof![
        any::<i64>().prop_map(ViewValue::Long),
        "[a-zA-Z0-9 ]{0,24}".prop_map(ViewValue::Text),
        any::<bool>().prop_map(ViewValue::Bool),
        prop::collection::vec(any::<u8>(), 0..32).prop_map(ViewValue::Bytes),
    ]
}

fn entries() -> impl Strategy<Value = BTreeMap<String, ViewValue>> {
    prop::collection::btree_map("[a-z][a-z0-9_]{0,11}", view_value(), 0..16)
}

/// Every entry tagged for the mode arrives with its value intact
#[test]
fn test_view_entries_survive_propagation_property() {
    let mut runner = proptest::test_runner::TestRunner::default();
    let propagator = WirePropagator::new(Registry::with_standard_types());

    runner
        .run(&entries(), |entries| {
            let mut sender = Flow::origin();
            for (key, value) in &entries {
                sender.context().put("orders", key, value.clone(), ModeSet::all());
            }

            let mut bytes = Vec::new();
            propagator
                .send_request(&sender, &mut bytes, PropagationMode::Rmi)
                .unwrap();
            let mut receiver = Flow::new();
            let report = propagator
                .receive_request(&mut receiver, &mut bytes.as_slice())
                .unwrap();
            prop_assert!(report.is_clean());

            let map = receiver.peek().unwrap();
            for (key, value) in &entries {
                prop_assert_eq!(map.get("orders", key), Some(value));
            }
            Ok(())
        })
        .unwrap();
}

/// Entries not tagged for the mode never leave the process
#[test]
fn test_untagged_entries_stay_local_property() {
    let mut runner = proptest::test_runner::TestRunner::default();
    let propagator = WirePropagator::new(Registry::with_standard_types());

    runner
        .run(&(entries(), entries()), |(remote, local)| {
            let mut sender = Flow::origin();
            for (key, value) in &remote {
                sender.context().put("remote", key, value.clone(), ModeSet::all());
            }
            for (key, value) in &local {
                sender.context().put(
                    "local",
                    key,
                    value.clone(),
                    PropagationMode::Local.into(),
                );
            }

            let mut bytes = Vec::new();
            propagator
                .send_request(&sender, &mut bytes, PropagationMode::Rmi)
                .unwrap();
            let mut receiver = Flow::new();
            propagator
                .receive_request(&mut receiver, &mut bytes.as_slice())
                .unwrap();

            let map = receiver.peek().unwrap();
            for key in local.keys() {
                prop_assert!(map.get("local", key).is_none());
            }
            prop_assert_eq!(
                map.work_area().map_or(0, |area| area.entry_count()),
                remote.len()
            );
            Ok(())
        })
        .unwrap();
}

/// Writes to a snapshot never show through the map it was taken from
#[test]
fn test_snapshot_isolation_property() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(&(entries(), entries()), |(before, after)| {
            let mut original = ContextMap::new();
            for (key, value) in &before {
                original.put("app", key, value.clone(), ModeSet::all());
            }

            let mut copy = original.snapshot();
            for (key, value) in &after {
                copy.put("app", key, value.clone(), ModeSet::all());
            }
            copy.put("other", "marker", true, ModeSet::all());

            for (key, value) in &before {
                prop_assert_eq!(original.get("app", key), Some(value));
            }
            for key in after.keys().filter(|k| !before.contains_key(*k)) {
                prop_assert!(original.get("app", key).is_none());
            }
            prop_assert!(!original.has_view("other"));
            Ok(())
        })
        .unwrap();
}
