//! Collaborator traits
//!
//! Boundaries to the external bus and cache, implemented in `pulse-cache`.

mod bus;
mod cache;

pub use bus::{BusError, BusMessage, BusResult, EventBus, RequestEnvelope};
pub use cache::{CacheError, CacheResult, EntityCache};
