//! Bus event types and channel names

use crate::Snowflake;
use serde::{Deserialize, Serialize};

/// Channel carrying dispatch events from the gateway to consumers
pub const GATEWAY_DOWNSTREAM: &str = "gateway_downstream";

/// Channel carrying consumer requests (trap registration) to the gateway
pub const GATEWAY_UPSTREAM: &str = "gateway_upstream";

/// Channel carrying the per-session guild hydration event
pub const GUILDS_CHANNEL: &str = "guilds";

/// Channel name for a trap's correlated messages
#[must_use]
pub fn trap_channel(key: &str) -> String {
    format!("trap:{key}")
}

/// One gateway dispatch republished to the bus, unchanged
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchEvent {
    /// Event name (e.g. "MESSAGE_CREATE")
    pub event: String,
    /// Event payload
    pub data: serde_json::Value,
}

impl DispatchEvent {
    /// Create a new dispatch event
    #[must_use]
    pub fn new(event: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}

/// Aggregate event published once per session when all expected guilds
/// have been received
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuildsHydrated {
    /// Ids of the guilds hydrated for this session
    pub guild_ids: Vec<Snowflake>,
}
