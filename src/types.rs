//! Core identifiers and the propagation-mode bit set.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::BitOr;

/// Pathway a context entry may travel over.
///
/// The declaration order is the ordinal used for the bit encoding of a
/// [`ModeSet`], and that encoding is stored inside work-area payloads, so new
/// modes may only be appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PropagationMode {
    /// Same thread, no handoff.
    Local,
    /// In-process handoff to a worker thread.
    Thread,
    /// Remote procedure call.
    Rmi,
    Transaction,
    JmsQueue,
    JmsTopic,
    Soap,
    /// Carried in a protocol header (for example HTTP).
    MimeHeader,
    /// Fire-and-forget calls that never produce a response.
    OneWay,
}

impl PropagationMode {
    pub const ALL: [PropagationMode; 9] = [
        PropagationMode::Local,
        PropagationMode::Thread,
        PropagationMode::Rmi,
        PropagationMode::Transaction,
        PropagationMode::JmsQueue,
        PropagationMode::JmsTopic,
        PropagationMode::Soap,
        PropagationMode::MimeHeader,
        PropagationMode::OneWay,
    ];

    pub fn ordinal(self) -> u32 {
        self as u32
    }

    pub fn bit(self) -> u32 {
        1 << self.ordinal()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PropagationMode::Local => "local",
            PropagationMode::Thread => "thread",
            PropagationMode::Rmi => "rmi",
            PropagationMode::Transaction => "transaction",
            PropagationMode::JmsQueue => "jms_queue",
            PropagationMode::JmsTopic => "jms_topic",
            PropagationMode::Soap => "soap",
            PropagationMode::MimeHeader => "mime_header",
            PropagationMode::OneWay => "one_way",
        }
    }

    /// Case-insensitive parse. `-` and `_` are ignored, so `JMS-QUEUE`,
    /// `jms_queue` and `JmsQueue` all name the same mode. `work` is accepted as
    /// an alias for `thread`.
    pub fn parse(name: &str) -> Option<Self> {
        let normalized: String = name
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .flat_map(char::to_lowercase)
            .collect();
        match normalized.as_str() {
            "local" => Some(PropagationMode::Local),
            "thread" | "work" => Some(PropagationMode::Thread),
            "rmi" => Some(PropagationMode::Rmi),
            "transaction" => Some(PropagationMode::Transaction),
            "jmsqueue" => Some(PropagationMode::JmsQueue),
            "jmstopic" => Some(PropagationMode::JmsTopic),
            "soap" => Some(PropagationMode::Soap),
            "mimeheader" => Some(PropagationMode::MimeHeader),
            "oneway" => Some(PropagationMode::OneWay),
            _ => None,
        }
    }
}

impl fmt::Display for PropagationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of propagation modes, encoded as `1 << ordinal` per member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModeSet(u32);

impl ModeSet {
    pub const EMPTY: ModeSet = ModeSet(0);

    pub fn all() -> Self {
        PropagationMode::ALL.iter().copied().collect()
    }

    /// Modes applied to work-area entries written without an explicit set.
    pub fn default_set() -> Self {
        ModeSet::of(&[
            PropagationMode::Local,
            PropagationMode::Thread,
            PropagationMode::Rmi,
            PropagationMode::JmsQueue,
            PropagationMode::Soap,
            PropagationMode::MimeHeader,
        ])
    }

    pub fn of(modes: &[PropagationMode]) -> Self {
        modes.iter().copied().collect()
    }

    /// Unknown bits are dropped.
    pub fn from_bits(bits: u32) -> Self {
        ModeSet(bits & ModeSet::all().0)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, mode: PropagationMode) -> bool {
        self.0 & mode.bit() != 0
    }

    pub fn with(self, mode: PropagationMode) -> Self {
        ModeSet(self.0 | mode.bit())
    }

    pub fn without(self, mode: PropagationMode) -> Self {
        ModeSet(self.0 & !mode.bit())
    }

    pub fn union(self, other: ModeSet) -> Self {
        ModeSet(self.0 | other.0)
    }

    pub fn intersection(self, other: ModeSet) -> Self {
        ModeSet(self.0 & other.0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = PropagationMode> {
        PropagationMode::ALL
            .into_iter()
            .filter(move |mode| self.contains(*mode))
    }

    /// Parse a `|` or `,` separated list of mode names.
    pub fn parse(list: &str) -> Option<Self> {
        let mut set = ModeSet::EMPTY;
        for token in list.split(['|', ',']) {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            set = set.with(PropagationMode::parse(token)?);
        }
        Some(set)
    }
}

impl FromIterator<PropagationMode> for ModeSet {
    fn from_iter<I: IntoIterator<Item = PropagationMode>>(iter: I) -> Self {
        iter.into_iter().fold(ModeSet::EMPTY, ModeSet::with)
    }
}

impl From<PropagationMode> for ModeSet {
    fn from(mode: PropagationMode) -> Self {
        ModeSet(mode.bit())
    }
}

impl BitOr for ModeSet {
    type Output = ModeSet;

    fn bitor(self, rhs: ModeSet) -> ModeSet {
        self.union(rhs)
    }
}

impl BitOr<PropagationMode> for ModeSet {
    type Output = ModeSet;

    fn bitor(self, rhs: PropagationMode) -> ModeSet {
        self.with(rhs)
    }
}

impl BitOr for PropagationMode {
    type Output = ModeSet;

    fn bitor(self, rhs: PropagationMode) -> ModeSet {
        ModeSet::from(self).with(rhs)
    }
}

impl fmt::Display for ModeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        let names: Vec<&str> = self.iter().map(PropagationMode::as_str).collect();
        f.write_str(&names.join("|"))
    }
}

/// Identifier of one submitted task, unique within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(u64);

impl TaskId {
    pub fn next() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        TaskId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Opaque origin token of a distributed flow.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OriginId(String);

impl OriginId {
    pub fn generate() -> Self {
        OriginId(uuid::Uuid::new_v4().to_string())
    }

    pub fn from_raw(raw: impl Into<String>) -> Self {
        OriginId(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OriginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
