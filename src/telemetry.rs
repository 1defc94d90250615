//! Telemetry: structured events for hung tasks, worker faults, rejections and
//! decode warnings, routed over an in-process bus.

pub mod bus;
pub mod events;

pub use bus::EventBus;
pub use events::{
    DecodeWarningEventData, EventEnvelope, HungTaskEventData, RejectionEventData,
    WorkerEventData,
};
