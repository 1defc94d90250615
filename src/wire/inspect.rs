//! Offline decoding of captured context streams.
//!
//! Reads a stream the way a receiving propagator would, but installs nothing:
//! every record is listed with what the registry makes of it.

use crate::error::WireError;
use crate::registry::Registry;
use crate::wire::codec::{DecodeWarning, DecodeWarningKind, ReadOutcome, RecordReader};
use serde::Serialize;
use std::collections::HashSet;
use std::io::Read;

const DESCRIPTION_LIMIT: usize = 96;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapturedRecord {
    pub offset: u64,
    pub type_name: String,
    pub version: u32,
    pub payload_len: usize,
    /// Hex of the first payload bytes.
    pub preview: String,
    pub known: bool,
    /// Debug rendering of the decoded instance, when it decoded.
    pub decoded: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CaptureReport {
    pub records: Vec<CapturedRecord>,
    pub warnings: Vec<DecodeWarning>,
    pub bytes_read: u64,
    /// Set when framing broke; `records` holds what came before it.
    pub framing_error: Option<String>,
}

impl CaptureReport {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty() && self.framing_error.is_none()
    }
}

/// Decode every record in `input` against `registry`.
///
/// Only I/O failures are returned as errors. A framing error ends the scan
/// and is recorded in the report.
pub fn inspect_capture<R: Read>(
    input: R,
    registry: &Registry,
    preview_bytes: usize,
) -> Result<CaptureReport, WireError> {
    let mut reader = RecordReader::new(input);
    let mut report = CaptureReport::default();
    let mut seen = HashSet::new();

    loop {
        let outcome = match reader.next_record() {
            Ok(Some(outcome)) => outcome,
            Ok(None) => break,
            Err(WireError::Decode(e)) => {
                report.framing_error = Some(e.to_string());
                break;
            }
            Err(e) => return Err(e),
        };
        let (offset, record) = match outcome {
            ReadOutcome::Record { offset, record } => (offset, record),
            ReadOutcome::Skipped(warning) => {
                report.warnings.push(warning);
                continue;
            }
        };

        if !seen.insert(record.type_name.clone()) {
            report.warnings.push(DecodeWarning {
                offset,
                kind: DecodeWarningKind::Duplicate,
                context_type: Some(record.type_name.clone()),
                detail: "later record replaces earlier one".to_string(),
            });
        }

        let factory = registry.lookup(&record.type_name).ok();
        let decoded = match &factory {
            None => {
                report.warnings.push(DecodeWarning {
                    offset,
                    kind: DecodeWarningKind::UnknownType,
                    context_type: Some(record.type_name.clone()),
                    detail: "no factory registered".to_string(),
                });
                None
            }
            Some(factory) => match factory.deserialize(record.version, &record.payload) {
                Ok(instance) => Some(describe(&format!("{:?}", instance))),
                Err(e) => {
                    report.warnings.push(DecodeWarning {
                        offset,
                        kind: DecodeWarningKind::BadPayload,
                        context_type: Some(record.type_name.clone()),
                        detail: e.to_string(),
                    });
                    None
                }
            },
        };

        let shown = record.payload.len().min(preview_bytes);
        report.records.push(CapturedRecord {
            offset,
            preview: hex::encode(&record.payload[..shown]),
            payload_len: record.payload.len(),
            known: factory.is_some(),
            decoded,
            type_name: record.type_name,
            version: record.version,
        });
    }

    report.bytes_read = reader.offset();
    Ok(report)
}

fn describe(debug: &str) -> String {
    if debug.chars().count() <= DESCRIPTION_LIMIT {
        return debug.to_string();
    }
    let mut short: String = debug.chars().take(DESCRIPTION_LIMIT).collect();
    short.push_str("...");
    short
}
