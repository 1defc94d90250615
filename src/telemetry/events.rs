//! Event schema for telemetry.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const TASK_HUNG: &str = "task_hung";
pub const TASK_REJECTED: &str = "task_rejected";
pub const WORKER_RETIRED: &str = "worker_retired";
pub const RESTORE_FAILED: &str = "restore_failed";
pub const DECODE_WARNING: &str = "decode_warning";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub ts: String,
    pub source: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: Value,
}

impl EventEnvelope {
    pub fn with_now(source: impl Into<String>, event_type: impl Into<String>, data: Value) -> Self {
        Self {
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            source: source.into(),
            event_type: event_type.into(),
            data,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HungTaskEventData {
    pub task_id: u64,
    pub executor: String,
    pub age_ms: u128,
    pub threshold_ms: u128,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker: Option<String>,
    pub interrupted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerEventData {
    pub executor: String,
    pub worker: String,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectionEventData {
    pub executor: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecodeWarningEventData {
    pub offset: u64,
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_type: Option<String>,
    pub detail: String,
}
