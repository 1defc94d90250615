//! Wire propagator
//!
//! Moves the propagatable part of a flow's context map onto a byte stream and
//! back. Each call direction is independent:
//!
//! - `send_request` / `send_response` write records for one mode and never
//!   touch the flow.
//! - `receive_request` replaces the flow's map wholesale. A new inbound call
//!   is a new flow and must not inherit whatever the worker last held.
//! - `receive_response` merges by mode into the caller's existing map, and
//!   an absent response stream clears the caller's entries for that mode.

use crate::context::{ContextMap, Entry, Flow, Location, LOCATION_CONTEXT};
use crate::error::WireError;
use crate::registry::Registry;
use crate::telemetry::events::{DecodeWarningEventData, DECODE_WARNING};
use crate::telemetry::EventBus;
use crate::types::PropagationMode;
use crate::wire::codec::{
    DecodeWarning, DecodeWarningKind, ReadOutcome, RecordReader, RecordWriter,
};
use std::collections::btree_map;
use std::collections::BTreeMap;
use std::io::{Read, Write};
use tracing::{debug, warn};

/// What a receive loaded and what it skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiveReport {
    pub loaded: Vec<String>,
    pub warnings: Vec<DecodeWarning>,
    pub bytes_read: u64,
}

impl ReceiveReport {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Request,
    Response,
}

#[derive(Clone, Debug)]
pub struct WirePropagator {
    registry: Registry,
    events: Option<EventBus>,
}

impl WirePropagator {
    pub fn new(registry: Registry) -> Self {
        Self {
            registry,
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Write the flow's entries for `mode`. Returns the number of records.
    pub fn send_request<W: Write>(
        &self,
        flow: &Flow,
        out: &mut W,
        mode: PropagationMode,
    ) -> Result<usize, WireError> {
        self.send(flow, out, mode)
    }

    pub fn send_response<W: Write>(
        &self,
        flow: &Flow,
        out: &mut W,
        mode: PropagationMode,
    ) -> Result<usize, WireError> {
        self.send(flow, out, mode)
    }

    /// Start the flow over from the records in `input`.
    ///
    /// A received location records its hop; with none on the wire the flow
    /// gets a fresh origin. On a framing error the flow is left untouched.
    pub fn receive_request<R: Read>(
        &self,
        flow: &mut Flow,
        input: &mut R,
    ) -> Result<ReceiveReport, WireError> {
        let (mut map, report) = self.decode(input, Direction::Request)?;
        if map.location().is_none() {
            map.put_instance(LOCATION_CONTEXT, Location::new_origin(), Location::modes());
        }
        flow.replace(map);
        debug!(
            loaded = report.loaded.len(),
            warnings = report.warnings.len(),
            "Inbound request context installed"
        );
        Ok(report)
    }

    /// Merge a response's entries for `mode`. `None` means the peer sent
    /// nothing for the mode, which clears the local entries for it.
    pub fn receive_response<R: Read>(
        &self,
        flow: &mut Flow,
        input: Option<&mut R>,
        mode: PropagationMode,
    ) -> Result<ReceiveReport, WireError> {
        let Some(input) = input else {
            flow.context().merge(None, mode);
            return Ok(ReceiveReport::default());
        };
        let (incoming, report) = self.decode(input, Direction::Response)?;
        flow.context().merge(Some(&incoming), mode);
        Ok(report)
    }

    fn send<W: Write>(
        &self,
        flow: &Flow,
        out: &mut W,
        mode: PropagationMode,
    ) -> Result<usize, WireError> {
        let Some(map) = flow.peek() else {
            return Ok(0);
        };

        // Encode into a buffer first so a failing serializer never leaves
        // half a record set on the transport.
        let mut writer = RecordWriter::new(Vec::new());
        let mut records = 0;
        for (name, entry) in map.iter() {
            if !entry.modes().contains(mode) {
                continue;
            }
            let Some(registration) = self.registry.registration(name) else {
                debug!(context_type = name, "Skipping unregistered context type");
                continue;
            };
            if !registration.modes.contains(mode) {
                continue;
            }
            let factory = registration.factory;
            let Some(instance) = factory.context_to_propagate(entry, mode) else {
                continue;
            };
            let payload = factory
                .serialize(&*instance)
                .map_err(|e| WireError::Encode {
                    context_type: name.to_string(),
                    reason: e.to_string(),
                })?;
            writer.write_record(name, factory.version(), &payload)?;
            records += 1;
        }
        out.write_all(&writer.into_inner())?;
        Ok(records)
    }

    fn decode<R: Read>(
        &self,
        input: &mut R,
        direction: Direction,
    ) -> Result<(ContextMap, ReceiveReport), WireError> {
        let mut reader = RecordReader::new(input);
        let mut loaded: BTreeMap<String, Entry> = BTreeMap::new();
        let mut report = ReceiveReport::default();

        while let Some(outcome) = reader.next_record()? {
            let (offset, record) = match outcome {
                ReadOutcome::Record { offset, record } => (offset, record),
                ReadOutcome::Skipped(warning) => {
                    self.report_warning(&mut report, warning);
                    continue;
                }
            };
            let name = record.type_name;

            // The caller's own location stays authoritative for its flow.
            if direction == Direction::Response && name == LOCATION_CONTEXT {
                continue;
            }

            let Some(registration) = self.registry.registration(&name) else {
                self.report_warning(
                    &mut report,
                    warning(offset, DecodeWarningKind::UnknownType, &name, "no factory registered"),
                );
                continue;
            };
            let factory = registration.factory;

            let instance = match factory.deserialize(record.version, &record.payload) {
                Ok(instance) => instance,
                Err(e) => {
                    self.report_warning(
                        &mut report,
                        warning(offset, DecodeWarningKind::BadPayload, &name, e),
                    );
                    continue;
                }
            };
            let instance = if direction == Direction::Request {
                match factory.context_added(instance) {
                    Ok(instance) => instance,
                    Err(e) => {
                        self.report_warning(
                            &mut report,
                            warning(offset, DecodeWarningKind::Rejected, &name, e),
                        );
                        continue;
                    }
                }
            } else {
                instance
            };

            let entry = Entry::from_arc(instance, registration.modes);
            match loaded.entry(name) {
                btree_map::Entry::Occupied(mut slot) => {
                    let name = slot.key().clone();
                    slot.insert(entry);
                    self.report_warning(
                        &mut report,
                        warning(
                            offset,
                            DecodeWarningKind::Duplicate,
                            &name,
                            "later record replaces earlier one",
                        ),
                    );
                }
                btree_map::Entry::Vacant(slot) => {
                    slot.insert(entry);
                }
            }
        }

        report.bytes_read = reader.offset();
        let mut map = ContextMap::new();
        for (name, entry) in loaded {
            report.loaded.push(name.clone());
            map.insert(&name, entry);
        }
        Ok((map, report))
    }

    fn report_warning(&self, report: &mut ReceiveReport, warning: DecodeWarning) {
        warn!(
            offset = warning.offset,
            kind = warning.kind.as_str(),
            context_type = warning.context_type.as_deref().unwrap_or("<unreadable>"),
            detail = %warning.detail,
            "Skipping propagated context record"
        );
        if let Some(events) = &self.events {
            events.emit_best_effort(
                "wire",
                DECODE_WARNING,
                &DecodeWarningEventData {
                    offset: warning.offset,
                    kind: warning.kind.as_str().to_string(),
                    context_type: warning.context_type.clone(),
                    detail: warning.detail.clone(),
                },
            );
        }
        report.warnings.push(warning);
    }
}

fn warning(
    offset: u64,
    kind: DecodeWarningKind,
    name: &str,
    detail: impl ToString,
) -> DecodeWarning {
    DecodeWarning {
        offset,
        kind,
        context_type: Some(name.to_string()),
        detail: detail.to_string(),
    }
}
