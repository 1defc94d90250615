//! Error types for the context propagation core.

use thiserror::Error;

/// Registry misuse, fatal at setup time.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Context type already registered with a different factory: {0}")]
    DuplicateRegistration(String),

    #[error("Context type not found: {0}")]
    NotFound(String),
}

/// Bad resource descriptor.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("Invalid value for {field} in {resource}: {reason}")]
    InvalidValue {
        resource: String,
        field: &'static str,
        reason: String,
    },

    #[error("Unknown managed resource: {0}")]
    UnknownResource(String),

    #[error("Failed to load configuration: {0}")]
    Load(String),
}

impl From<config::ConfigError> for ConfigurationError {
    fn from(err: config::ConfigError) -> Self {
        ConfigurationError::Load(err.to_string())
    }
}

/// The reader can no longer find record boundaries.
///
/// `offset` is the stream position just past the malformed region.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Wire framing corrupted at byte {offset}: {reason}")]
pub struct WireDecodeError {
    pub offset: u64,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum WireError {
    #[error(transparent)]
    Decode(#[from] WireDecodeError),

    #[error("Context type {context_type} could not be encoded: {reason}")]
    Encode {
        context_type: String,
        reason: String,
    },

    #[error("Wire I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A pool cannot accept a submission. No context was captured.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RejectionError {
    #[error("Executor {executor} rejected task: queue full ({capacity} pending)")]
    QueueFull { executor: String, capacity: usize },

    #[error("Executor {0} is shutting down")]
    ShuttingDown(String),

    #[error("Executor {executor} could not start a worker: {reason}")]
    WorkerStart { executor: String, reason: String },

    #[error("Executor {executor} cannot schedule task: {reason}")]
    InvalidSchedule { executor: String, reason: String },
}

/// A context type's restore hook failed, leaving the worker baseline suspect.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Context type {context_type} failed to restore worker context: {reason}")]
pub struct RestoreFailure {
    pub context_type: String,
    pub reason: String,
}

/// Failures reported by context type plugins.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ContextTypeError {
    #[error("Payload for {context_type} could not be encoded: {reason}")]
    Serialize {
        context_type: String,
        reason: String,
    },

    #[error("Payload for {context_type} v{version} could not be decoded: {reason}")]
    Deserialize {
        context_type: String,
        version: u32,
        reason: String,
    },

    #[error("Instance handed to {0} has the wrong concrete type")]
    WrongInstance(String),

    #[error("Context type {context_type} could not be installed: {reason}")]
    Install {
        context_type: String,
        reason: String,
    },

    #[error(transparent)]
    Location(#[from] LocationError),
}

impl ContextTypeError {
    pub fn serialize(context_type: &str, reason: impl ToString) -> Self {
        ContextTypeError::Serialize {
            context_type: context_type.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn deserialize(context_type: &str, version: u32, reason: impl ToString) -> Self {
        ContextTypeError::Deserialize {
            context_type: context_type.to_string(),
            version,
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LocationError {
    #[error("Location {origin} has no pending hop to record")]
    NoPendingHop { origin: String },
}

/// Outcome of a task that did not produce a value. Delivered through its handle.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskError {
    #[error("Task panicked: {0}")]
    Panicked(String),

    #[error("Task was cancelled")]
    Cancelled,

    #[error("Context setup failed: {0}")]
    SetupFailed(String),

    #[error("Task was dropped before producing a result")]
    Abandoned,

    /// A scheduled task came due and its executor refused it.
    #[error("Task was rejected when it came due: {0}")]
    Rejected(String),
}

/// Umbrella error for callers that want a single type.
#[derive(Debug, Error)]
pub enum AmbitError {
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Wire error: {0}")]
    Wire(#[from] WireError),

    #[error("Rejected: {0}")]
    Rejected(#[from] RejectionError),

    #[error("Restore failure: {0}")]
    Restore(#[from] RestoreFailure),

    #[error("Context type error: {0}")]
    ContextType(#[from] ContextTypeError),

    #[error("Location error: {0}")]
    Location(#[from] LocationError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<config::ConfigError> for AmbitError {
    fn from(err: config::ConfigError) -> Self {
        AmbitError::Configuration(err.into())
    }
}

impl From<WireDecodeError> for AmbitError {
    fn from(err: WireDecodeError) -> Self {
        AmbitError::Wire(err.into())
    }
}
