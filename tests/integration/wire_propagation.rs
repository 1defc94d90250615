//! Request and response propagation between two simulated processes.

use ambit::context::{Flow, ViewValue};
use ambit::error::WireError;
use ambit::registry::Registry;
use ambit::standard::{SecurityIdentity, SECURITY_CONTEXT};
use ambit::types::{ModeSet, PropagationMode};
use ambit::wire::{DecodeWarningKind, RecordWriter, WirePropagator};
use std::io::Cursor;

use crate::integration::test_utils::{flow_as, principal_of};

fn propagator() -> WirePropagator {
    WirePropagator::new(Registry::with_standard_types())
}

fn send(flow: &Flow, mode: PropagationMode) -> Vec<u8> {
    let mut out = Vec::new();
    propagator().send_request(flow, &mut out, mode).unwrap();
    out
}

#[test]
fn test_request_carries_identity_views_and_location() {
    let mut client = flow_as("grace");
    client
        .context()
        .put("orders", "id", 42i64, PropagationMode::Rmi.into());
    client
        .context()
        .put("orders", "draft", true, PropagationMode::Local.into());
    let bytes = send(&client, PropagationMode::Rmi);

    let mut server = Flow::new();
    let report = propagator()
        .receive_request(&mut server, &mut Cursor::new(bytes))
        .unwrap();
    assert!(report.is_clean());

    assert_eq!(principal_of(&server).as_deref(), Some("grace"));
    let map = server.peek().unwrap();
    assert_eq!(map.get("orders", "id"), Some(&ViewValue::Long(42)));
    assert!(map.get("orders", "draft").is_none());

    let sent = client.location().unwrap();
    let received = server.location().unwrap();
    assert_eq!(received.origin(), sent.origin());
    assert_eq!(received.location_id(), &[0, 1]);
    // Sending never touches the sender's own location.
    assert_eq!(sent.location_id(), &[0]);
}

#[test]
fn test_each_hop_extends_the_path() {
    let mut flow = Flow::origin();
    for hop in 1..=4u32 {
        let bytes = send(&flow, PropagationMode::Rmi);
        let mut next = Flow::new();
        propagator()
            .receive_request(&mut next, &mut Cursor::new(bytes))
            .unwrap();
        let expected: Vec<u32> = (0..=hop).collect();
        assert_eq!(next.location().unwrap().location_id(), expected.as_slice());
        flow = next;
    }
}

#[test]
fn test_inbound_request_replaces_stale_worker_state() {
    let mut server = flow_as("previous-caller");
    server.context().put("stale", "k", 1i64, ModeSet::all());

    let bytes = send(&Flow::origin(), PropagationMode::Rmi);
    propagator()
        .receive_request(&mut server, &mut Cursor::new(bytes))
        .unwrap();

    assert_eq!(principal_of(&server), None);
    assert!(server.peek().unwrap().get("stale", "k").is_none());
}

#[test]
fn test_unsupported_mode_is_not_sent() {
    // Security does not travel on message queues.
    let client = flow_as("heidi");
    let bytes = send(&client, PropagationMode::JmsQueue);
    let mut server = Flow::new();
    propagator()
        .receive_request(&mut server, &mut Cursor::new(bytes))
        .unwrap();
    assert_eq!(principal_of(&server), None);
}

#[test]
fn test_absent_response_clears_entries_for_mode() {
    let mut client = flow_as("ivan");
    client
        .context()
        .put("cart", "rmi", 1i64, PropagationMode::Rmi.into());
    client
        .context()
        .put("cart", "local", 2i64, PropagationMode::Local.into());

    propagator()
        .receive_response(&mut client, None::<&mut Cursor<Vec<u8>>>, PropagationMode::Rmi)
        .unwrap();

    let map = client.peek().unwrap();
    assert!(map.get("cart", "rmi").is_none());
    assert_eq!(map.get("cart", "local"), Some(&ViewValue::Long(2)));
    // Identity was allowed on RMI, so the empty response removed it too.
    assert_eq!(principal_of(&client), None);
    assert_eq!(client.location().unwrap().location_id(), &[0]);
}

#[test]
fn test_response_replaces_mode_entries() {
    let mut client = flow_as("judy");
    client
        .context()
        .put("cart", "total", 10i64, PropagationMode::Rmi.into());
    let client_origin = client.location().unwrap().origin().clone();

    let mut server = Flow::origin();
    server
        .context()
        .put("cart", "total", 15i64, PropagationMode::Rmi.into());
    server.context().put_instance(
        SECURITY_CONTEXT,
        SecurityIdentity::new("judy").with_group("buyers"),
        ModeSet::all(),
    );
    let mut response = Vec::new();
    propagator()
        .send_response(&server, &mut response, PropagationMode::Rmi)
        .unwrap();

    let report = propagator()
        .receive_response(&mut client, Some(&mut Cursor::new(response)), PropagationMode::Rmi)
        .unwrap();
    assert!(report.is_clean());

    let map = client.peek().unwrap();
    assert_eq!(map.get("cart", "total"), Some(&ViewValue::Long(15)));
    let identity = map
        .instance::<SecurityIdentity>(SECURITY_CONTEXT)
        .unwrap();
    assert_eq!(identity.groups, vec!["buyers".to_string()]);
    assert_eq!(client.location().unwrap().origin(), &client_origin);
}

#[test]
fn test_unknown_records_are_skipped_with_warning() {
    let mut bytes = {
        let mut writer = RecordWriter::new(Vec::new());
        writer.write_record("tracing-baggage", 1, b"abc").unwrap();
        writer.into_inner()
    };
    bytes.extend(send(&flow_as("ken"), PropagationMode::Rmi));

    let mut server = Flow::new();
    let report = propagator()
        .receive_request(&mut server, &mut Cursor::new(bytes))
        .unwrap();
    assert_eq!(report.warnings.len(), 1);
    assert_eq!(report.warnings[0].kind, DecodeWarningKind::UnknownType);
    assert_eq!(report.warnings[0].offset, 0);
    assert_eq!(principal_of(&server).as_deref(), Some("ken"));
}

#[test]
fn test_corrupt_stream_leaves_flow_untouched() {
    let mut bytes = send(&flow_as("leo"), PropagationMode::Rmi);
    bytes.truncate(bytes.len() - 1);

    let mut server = flow_as("unchanged");
    let err = propagator()
        .receive_request(&mut server, &mut Cursor::new(bytes))
        .unwrap_err();
    assert!(matches!(err, WireError::Decode(_)));
    assert_eq!(principal_of(&server).as_deref(), Some("unchanged"));
}
