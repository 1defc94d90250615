//! Causal hop path of a distributed flow.

use crate::error::LocationError;
use crate::types::{ModeSet, OriginId, PropagationMode};

/// Context type name the location is stored under.
pub const LOCATION_CONTEXT: &str = "location";

/// Where a flow started and how many wire hops it has taken since.
///
/// The path is `[0]` at the origin and gains one element per received
/// propagation. A location decoded off the wire carries a pending hop until
/// [`Location::context_added`] records it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    origin: OriginId,
    path: Vec<u32>,
    pending_hop: bool,
}

impl Location {
    /// Modes a location travels under. It never needs to cross a same-thread boundary.
    pub fn modes() -> ModeSet {
        ModeSet::all().without(PropagationMode::Local)
    }

    /// A fresh origin with a random identifier.
    pub fn new_origin() -> Self {
        Self::with_origin(OriginId::generate())
    }

    pub fn with_origin(origin: OriginId) -> Self {
        Self {
            origin,
            path: vec![0],
            pending_hop: false,
        }
    }

    /// Location as read off the wire, waiting for its hop to be recorded.
    pub fn received(origin: OriginId, path: Vec<u32>) -> Self {
        let path = if path.is_empty() { vec![0] } else { path };
        Self {
            origin,
            path,
            pending_hop: true,
        }
    }

    pub fn origin(&self) -> &OriginId {
        &self.origin
    }

    pub fn location_id(&self) -> &[u32] {
        &self.path
    }

    /// Number of propagations recorded so far.
    pub fn hops(&self) -> usize {
        self.path.len() - 1
    }

    pub fn has_pending_hop(&self) -> bool {
        self.pending_hop
    }

    /// Record the hop that brought this location into a new flow.
    ///
    /// Appends the current path length. Errors on an origin that never
    /// travelled and on a second call for the same hop.
    pub fn context_added(&mut self) -> Result<(), LocationError> {
        if !self.pending_hop {
            return Err(LocationError::NoPendingHop {
                origin: self.origin.to_string(),
            });
        }
        let next = self.path.len() as u32;
        self.path.push(next);
        self.pending_hop = false;
        Ok(())
    }
}
