//! Gateway payload structures
//!
//! Typed payloads carried in the `d` field of gateway messages.

use pulse_core::{Intents, Snowflake};
use serde::{Deserialize, Serialize};

/// Hello payload (op 10)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloPayload {
    /// Interval between heartbeats in milliseconds
    pub heartbeat_interval: u64,
}

/// Client properties sent with Identify
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionProperties {
    #[serde(rename = "$os")]
    pub os: String,
    #[serde(rename = "$browser")]
    pub browser: String,
    #[serde(rename = "$device")]
    pub device: String,
}

impl Default for ConnectionProperties {
    fn default() -> Self {
        let library = concat!("pulse v", env!("CARGO_PKG_VERSION")).to_string();
        Self {
            os: std::env::consts::OS.to_string(),
            browser: library.clone(),
            device: library,
        }
    }
}

/// Identify payload (op 2)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifyPayload {
    /// Authentication token
    pub token: String,
    /// Client properties
    pub properties: ConnectionProperties,
    /// Whether payload-level compression is requested (transport-level
    /// zlib-stream is negotiated separately via query parameters)
    pub compress: bool,
    /// Member count threshold for offline member lists
    pub large_threshold: u32,
    /// Shard pair `[shard_id, shard_count]`
    pub shard: [u16; 2],
    /// Intents bitmask
    pub intents: Intents,
}

impl IdentifyPayload {
    /// Build an Identify payload for one shard
    #[must_use]
    pub fn new(token: impl Into<String>, shard_id: u16, shard_count: u16, intents: Intents) -> Self {
        Self {
            token: token.into(),
            properties: ConnectionProperties::default(),
            compress: false,
            large_threshold: 500,
            shard: [shard_id, shard_count],
            intents,
        }
    }
}

/// Resume payload (op 6)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumePayload {
    /// Authentication token
    pub token: String,
    /// Session to continue
    pub session_id: String,
    /// Last sequence number seen before the disconnect
    pub seq: Option<u64>,
    /// Intents bitmask
    pub intents: Intents,
}

/// Minimal guild reference carried in READY
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuildStub {
    pub id: Snowflake,
}

/// READY dispatch payload
#[derive(Debug, Clone, Deserialize)]
pub struct ReadyPayload {
    /// Gateway protocol version
    pub v: u8,
    /// Session id for later Resume
    pub session_id: String,
    /// Guilds this shard will receive, initially unavailable
    #[serde(default)]
    pub guilds: Vec<GuildStub>,
    /// Shard pair echoed back by the server
    #[serde(default)]
    pub shard: Option<[u16; 2]>,
    /// The authenticated user
    #[serde(default)]
    pub user: Option<serde_json::Value>,
}
