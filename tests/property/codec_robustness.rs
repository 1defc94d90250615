//! Property-based tests for decoding untrusted bytes

use ambit::context::Flow;
use ambit::registry::Registry;
use ambit::wire::{inspect_capture, RecordWriter, WirePropagator};
use proptest::prelude::*;

/// Arbitrary input never panics, and a failed receive leaves the flow alone
#[test]
fn test_receive_arbitrary_bytes_property() {
    let mut runner = proptest::test_runner::TestRunner::default();
    let propagator = WirePropagator::new(Registry::with_standard_types());

    runner
        .run(&prop::collection::vec(any::<u8>(), 0..512), |bytes| {
            let mut flow = Flow::origin();
            let location = flow.location().unwrap().clone();

            if propagator
                .receive_request(&mut flow, &mut bytes.as_slice())
                .is_err()
            {
                prop_assert_eq!(flow.location(), Some(&location));
            }
            Ok(())
        })
        .unwrap();
}

/// Inspection reads exactly the valid prefix of a stream with trailing garbage
#[test]
fn test_inspect_stops_at_framing_error_property() {
    let mut runner = proptest::test_runner::TestRunner::default();
    let registry = Registry::with_standard_types();

    runner
        .run(
            &(
                prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 0..8),
                prop::collection::vec(any::<u8>(), 1..3),
            ),
            |(payloads, tail)| {
                let mut writer = RecordWriter::new(Vec::new());
                for (i, payload) in payloads.iter().enumerate() {
                    writer.write_record(&format!("blob{}", i), 1, payload).unwrap();
                }
                let mut bytes = writer.into_inner();
                let valid = bytes.len() as u64;
                // One or two bytes can never hold a full record header.
                bytes.extend_from_slice(&tail);

                let report = inspect_capture(bytes.as_slice(), &registry, 8).unwrap();
                prop_assert_eq!(report.records.len(), payloads.len());
                prop_assert!(report.framing_error.is_some());
                prop_assert!(report.bytes_read > valid);
                Ok(())
            },
        )
        .unwrap();
}
