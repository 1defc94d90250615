//! In-process event bus for telemetry events.

use std::sync::mpsc::{channel, Receiver, SendError, Sender};

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::telemetry::events::EventEnvelope;

#[derive(Clone, Debug)]
pub struct EventBus {
    sender: Sender<EventEnvelope>,
}

impl EventBus {
    pub fn new_pair() -> (Self, Receiver<EventEnvelope>) {
        let (sender, receiver) = channel();
        (Self { sender }, receiver)
    }

    pub fn emit(
        &self,
        source: impl Into<String>,
        event_type: impl Into<String>,
        data: Value,
    ) -> Result<(), SendError<EventEnvelope>> {
        let envelope = EventEnvelope::with_now(source, event_type, data);
        self.sender.send(envelope)
    }

    /// Emit without failing the caller when nobody is listening.
    pub fn emit_best_effort<T: Serialize>(&self, source: &str, event_type: &str, data: &T) {
        let value = match serde_json::to_value(data) {
            Ok(value) => value,
            Err(e) => {
                debug!(event_type, error = %e, "Telemetry payload not serializable");
                return;
            }
        };
        if self.emit(source, event_type, value).is_err() {
            debug!(event_type, "Telemetry receiver disconnected");
        }
    }
}
