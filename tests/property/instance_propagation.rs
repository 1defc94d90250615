//! Property-based tests for standard context instances crossing the wire

use ambit::context::{ContextInstance, Flow, LOCATION_CONTEXT};
use ambit::registry::Registry;
use ambit::standard::{
    ClassloaderScope, NamingScope, SecurityIdentity, CLASSLOADER_CONTEXT, NAMING_CONTEXT,
    SECURITY_CONTEXT,
};
use ambit::types::{ModeSet, PropagationMode};
use ambit::wire::WirePropagator;
use proptest::prelude::*;
use std::collections::BTreeSet;

fn identity() -> impl Strategy<Value = SecurityIdentity> {
    (
        "[a-z][a-z0-9._-]{0,15}",
        prop::collection::vec("[a-z]{1,8}", 0..4),
    )
        .prop_map(|(principal, groups)| {
            groups
                .into_iter()
                .fold(SecurityIdentity::new(principal), |identity, group| {
                    identity.with_group(group)
                })
        })
}

fn naming() -> impl Strategy<Value = NamingScope> {
    ("[a-z]{1,10}", "[a-z]{0,10}", "[a-zA-Z]{0,10}")
        .prop_map(|(app, module, component)| NamingScope::new(app, module, component))
}

fn classloader() -> impl Strategy<Value = ClassloaderScope> {
    ("[a-z]{1,10}", prop::option::of("[a-z]{1,10}")).prop_map(|(app, module)| {
        let scope = ClassloaderScope::new(app);
        match module {
            Some(module) => scope.with_module(module),
            None => scope,
        }
    })
}

fn mode() -> impl Strategy<Value = PropagationMode> {
    prop::sample::select(PropagationMode::ALL.to_vec())
}

/// Each standard instance crosses the wire for exactly the modes its type
/// supports, and arrives byte-identical when it does.
#[test]
fn test_instances_cross_for_supported_modes_property() {
    let mut runner = proptest::test_runner::TestRunner::default();
    let registry = Registry::with_standard_types();
    let propagator = WirePropagator::new(registry.clone());

    runner
        .run(
            &(identity(), naming(), classloader(), mode()),
            |(identity, naming, classloader, mode)| {
                // No origin: a location entry would muddy the comparison.
                let mut sender = Flow::new();
                let map = sender.context();
                map.put_instance(SECURITY_CONTEXT, identity, ModeSet::all());
                map.put_instance(NAMING_CONTEXT, naming, ModeSet::all());
                map.put_instance(CLASSLOADER_CONTEXT, classloader, ModeSet::all());

                let mut bytes = Vec::new();
                let records = propagator.send_request(&sender, &mut bytes, mode).unwrap();

                let candidates = [SECURITY_CONTEXT, NAMING_CONTEXT, CLASSLOADER_CONTEXT];
                let expected: BTreeSet<&str> = candidates
                    .into_iter()
                    .filter(|name| {
                        registry
                            .lookup(name)
                            .map(|factory| factory.supported_modes().contains(mode))
                            .unwrap_or(false)
                    })
                    .collect();
                prop_assert_eq!(records, expected.len());

                let mut receiver = Flow::new();
                let report = propagator
                    .receive_request(&mut receiver, &mut bytes.as_slice())
                    .unwrap();
                prop_assert!(report.is_clean());

                let sent = sender.peek().unwrap();
                let received = receiver.peek().unwrap();
                let arrived: BTreeSet<&str> =
                    received.names().filter(|name| *name != LOCATION_CONTEXT).collect();
                prop_assert_eq!(&arrived, &expected);

                for name in &expected {
                    let factory = registry.lookup(name).unwrap();
                    let before: &dyn ContextInstance = &**sent.get_entry(name).unwrap().instance();
                    let after: &dyn ContextInstance =
                        &**received.get_entry(name).unwrap().instance();
                    prop_assert_eq!(
                        factory.serialize(before).unwrap(),
                        factory.serialize(after).unwrap()
                    );
                }
                Ok(())
            },
        )
        .unwrap();
}

/// A type that does not support the mode writes nothing at all.
#[test]
fn test_local_only_instance_never_written_property() {
    let mut runner = proptest::test_runner::TestRunner::default();
    let propagator = WirePropagator::new(Registry::with_standard_types());

    runner
        .run(&(classloader(), mode()), |(classloader, mode)| {
            let mut sender = Flow::new();
            sender
                .context()
                .put_instance(CLASSLOADER_CONTEXT, classloader, ModeSet::all());

            let mut bytes = Vec::new();
            let records = propagator.send_request(&sender, &mut bytes, mode).unwrap();
            if matches!(mode, PropagationMode::Local | PropagationMode::Thread) {
                prop_assert_eq!(records, 1);
            } else {
                prop_assert_eq!(records, 0);
                prop_assert!(bytes.is_empty());
            }
            Ok(())
        })
        .unwrap();
}
