//! Ambient context: per-flow maps of context type instances, prefixed views
//! into the work area, and the location hop path.

mod instance;
mod location;
mod map;
mod view;

pub use instance::{ContextInstance, Entry};
pub use location::{Location, LOCATION_CONTEXT};
pub use map::{ContextMap, Flow, WorkerContext};
pub use view::{View, ViewEntry, ViewValue, WorkArea, WORKAREA_CONTEXT};
