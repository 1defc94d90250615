//! Record framing for propagated context.
//!
//! A stream is a sequence of records, each laid out as
//!
//! ```text
//! u16 name length | name (UTF-8) | u32 version | u32 payload length | payload
//! ```
//!
//! with big-endian integers. There is no envelope or terminator: the stream
//! ends at end-of-input on a record boundary, and the transport decides where
//! that is.

use crate::error::{WireDecodeError, WireError};
use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use serde::Serialize;
use std::fmt;
use std::io::{ErrorKind, Read, Write};

/// Largest payload a reader accepts. Anything above is treated as a framing
/// error, since the length field can no longer be trusted.
pub const MAX_PAYLOAD_LEN: u32 = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireRecord {
    pub type_name: String,
    pub version: u32,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeWarningKind {
    /// Framing intact but the name is not UTF-8.
    InvalidName,
    UnknownType,
    /// The context type could not rebuild an instance from the payload.
    BadPayload,
    /// A later record for the same type replaced an earlier one.
    Duplicate,
    /// The instance refused to join the new flow.
    Rejected,
}

impl DecodeWarningKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DecodeWarningKind::InvalidName => "invalid_name",
            DecodeWarningKind::UnknownType => "unknown_type",
            DecodeWarningKind::BadPayload => "bad_payload",
            DecodeWarningKind::Duplicate => "duplicate",
            DecodeWarningKind::Rejected => "rejected",
        }
    }
}

/// A record that was skipped without losing the stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecodeWarning {
    /// Offset of the record's first byte.
    pub offset: u64,
    pub kind: DecodeWarningKind,
    pub context_type: Option<String>,
    pub detail: String,
}

impl fmt::Display for DecodeWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at byte {}", self.kind.as_str(), self.offset)?;
        if let Some(name) = &self.context_type {
            write!(f, " ({})", name)?;
        }
        write!(f, ": {}", self.detail)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    Record { offset: u64, record: WireRecord },
    Skipped(DecodeWarning),
}

pub struct RecordWriter<W> {
    out: W,
    written: u64,
}

impl<W: Write> RecordWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out, written: 0 }
    }

    pub fn write_record(
        &mut self,
        type_name: &str,
        version: u32,
        payload: &[u8],
    ) -> Result<(), WireError> {
        let name = type_name.as_bytes();
        let name_len = u16::try_from(name.len()).map_err(|_| WireError::Encode {
            context_type: type_name.to_string(),
            reason: format!("type name is {} bytes, limit is {}", name.len(), u16::MAX),
        })?;
        let payload_len = u32::try_from(payload.len())
            .ok()
            .filter(|len| *len <= MAX_PAYLOAD_LEN)
            .ok_or_else(|| WireError::Encode {
                context_type: type_name.to_string(),
                reason: format!(
                    "payload is {} bytes, limit is {}",
                    payload.len(),
                    MAX_PAYLOAD_LEN
                ),
            })?;

        self.out.write_u16::<BigEndian>(name_len)?;
        self.out.write_all(name)?;
        self.out.write_u32::<BigEndian>(version)?;
        self.out.write_u32::<BigEndian>(payload_len)?;
        self.out.write_all(payload)?;
        self.written += 2 + name.len() as u64 + 8 + payload.len() as u64;
        Ok(())
    }

    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

pub struct RecordReader<R> {
    input: R,
    offset: u64,
}

impl<R: Read> RecordReader<R> {
    pub fn new(input: R) -> Self {
        Self { input, offset: 0 }
    }

    /// Bytes consumed so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Next record, `None` at a clean end of stream.
    ///
    /// A framing error leaves the input positioned just past the bytes that
    /// were consumed while reading the broken record.
    pub fn next_record(&mut self) -> Result<Option<ReadOutcome>, WireError> {
        let start = self.offset;

        let mut len_buf = [0u8; 2];
        match self.fill(&mut len_buf)? {
            0 => return Ok(None),
            2 => {}
            _ => return Err(self.truncated("type name length").into()),
        }
        let name_len = BigEndian::read_u16(&len_buf) as usize;

        let mut name = vec![0u8; name_len];
        self.read_field(&mut name, "type name")?;

        let mut header = [0u8; 8];
        self.read_field(&mut header, "version and payload length")?;
        let version = BigEndian::read_u32(&header[..4]);
        let payload_len = BigEndian::read_u32(&header[4..]);
        if payload_len > MAX_PAYLOAD_LEN {
            return Err(WireDecodeError {
                offset: self.offset,
                reason: format!(
                    "declared payload length {} exceeds limit {}",
                    payload_len, MAX_PAYLOAD_LEN
                ),
            }
            .into());
        }

        let mut payload = vec![0u8; payload_len as usize];
        self.read_field(&mut payload, "payload")?;

        match String::from_utf8(name) {
            Ok(type_name) => Ok(Some(ReadOutcome::Record {
                offset: start,
                record: WireRecord {
                    type_name,
                    version,
                    payload,
                },
            })),
            Err(e) => Ok(Some(ReadOutcome::Skipped(DecodeWarning {
                offset: start,
                kind: DecodeWarningKind::InvalidName,
                context_type: Some(String::from_utf8_lossy(e.as_bytes()).into_owned()),
                detail: e.utf8_error().to_string(),
            }))),
        }
    }

    fn read_field(&mut self, buf: &mut [u8], field: &str) -> Result<(), WireError> {
        if self.fill(buf)? < buf.len() {
            return Err(self.truncated(field).into());
        }
        Ok(())
    }

    /// Read until `buf` is full or the input ends. Returns bytes read.
    fn fill(&mut self, buf: &mut [u8]) -> Result<usize, WireError> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.input.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => {
                    filled += n;
                    self.offset += n as u64;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(filled)
    }

    fn truncated(&self, field: &str) -> WireDecodeError {
        WireDecodeError {
            offset: self.offset,
            reason: format!("stream ended inside {}", field),
        }
    }
}

impl<R: Read> Iterator for RecordReader<R> {
    type Item = Result<ReadOutcome, WireError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}
