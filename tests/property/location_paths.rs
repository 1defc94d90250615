//! Property-based tests for Location paths across hop chains

use ambit::context::Flow;
use ambit::registry::Registry;
use ambit::types::PropagationMode;
use ambit::wire::WirePropagator;
use proptest::prelude::*;

/// After n hops the path is exactly [0, 1, ..., n] and the origin never changes
#[test]
fn test_location_path_grows_one_per_hop_property() {
    let mut runner = proptest::test_runner::TestRunner::default();
    let propagator = WirePropagator::new(Registry::with_standard_types());

    runner
        .run(&(1usize..12), |hops| {
            let mut flow = Flow::origin();
            let origin = flow.location().unwrap().origin().clone();

            for hop in 1..=hops {
                let mut bytes = Vec::new();
                propagator
                    .send_request(&flow, &mut bytes, PropagationMode::Rmi)
                    .unwrap();
                let before = flow.location().unwrap().location_id().to_vec();

                let mut next = Flow::new();
                propagator
                    .receive_request(&mut next, &mut bytes.as_slice())
                    .unwrap();

                // Sending never touches the sender's own path.
                prop_assert_eq!(flow.location().unwrap().location_id(), &before[..]);
                let location = next.location().unwrap();
                prop_assert_eq!(location.origin(), &origin);
                prop_assert_eq!(location.hops(), hop);
                prop_assert!(!location.has_pending_hop());
                flow = next;
            }

            let expected: Vec<u32> = (0..=hops as u32).collect();
            prop_assert_eq!(flow.location().unwrap().location_id(), &expected[..]);
            Ok(())
        })
        .unwrap();
}

/// A response never moves the caller's location
#[test]
fn test_response_keeps_caller_location_property() {
    let mut runner = proptest::test_runner::TestRunner::default();
    let propagator = WirePropagator::new(Registry::with_standard_types());

    runner
        .run(&(0usize..6), |server_hops| {
            let mut client = Flow::origin();
            let client_location = client.location().unwrap().clone();

            let mut server = Flow::origin();
            for _ in 0..server_hops {
                let mut bytes = Vec::new();
                propagator
                    .send_request(&server, &mut bytes, PropagationMode::Rmi)
                    .unwrap();
                let mut next = Flow::new();
                propagator
                    .receive_request(&mut next, &mut bytes.as_slice())
                    .unwrap();
                server = next;
            }

            let mut response = Vec::new();
            propagator
                .send_response(&server, &mut response, PropagationMode::Rmi)
                .unwrap();
            propagator
                .receive_response(&mut client, Some(&mut response.as_slice()), PropagationMode::Rmi)
                .unwrap();

            prop_assert_eq!(client.location(), Some(&client_location));
            Ok(())
        })
        .unwrap();
}
