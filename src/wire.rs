//! Wire propagation of ambient context across process boundaries.

pub mod codec;
pub mod inspect;
pub mod propagator;

pub use codec::{
    DecodeWarning, DecodeWarningKind, ReadOutcome, RecordReader, RecordWriter, WireRecord,
    MAX_PAYLOAD_LEN,
};
pub use inspect::{inspect_capture, CaptureReport, CapturedRecord};
pub use propagator::{ReceiveReport, WirePropagator};
