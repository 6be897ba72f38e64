//! Gateway bootstrap query types
//!
//! `GET /gateway/bot` returns the connection URL, the platform-recommended
//! shard count, and the identify budget.

use serde::Deserialize;

/// Identify budget communicated by the platform
#[derive(Debug, Clone, Deserialize)]
pub struct SessionStartLimit {
    /// Total identifies allowed in the window
    pub total: u32,
    /// Identifies remaining
    pub remaining: u32,
    /// Milliseconds until the window resets
    pub reset_after: u64,
}

/// Result of the gateway bootstrap query
#[derive(Debug, Clone, Deserialize)]
pub struct BootstrapInfo {
    /// Gateway URL to connect to
    pub url: String,
    /// Recommended shard count
    #[serde(default)]
    pub shards: Option<u16>,
    /// Identify budget
    #[serde(default)]
    pub session_start_limit: Option<SessionStartLimit>,
}
