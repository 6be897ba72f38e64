//! Message bus boundary
//!
//! The bus carries gateway events between the shard process and its
//! consumers. It is treated as an opaque publish/subscribe/request-reply
//! channel; the Redis-backed implementation lives in `pulse-cache`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Error type for bus operations
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Bus connection error: {0}")]
    Connection(String),

    #[error("Bus request timed out")]
    Timeout,

    #[error("Bus channel closed")]
    Closed,

    #[error("Failed to encode bus payload: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for bus operations
pub type BusResult<T> = Result<T, BusError>;

/// One message received from a subscribed channel
#[derive(Debug, Clone)]
pub struct BusMessage {
    /// Channel the message arrived on
    pub channel: String,
    /// Raw payload
    pub payload: String,
}

/// Request envelope used by the request-reply pattern
///
/// The requester subscribes to a unique `reply_to` channel before
/// publishing; the server publishes its reply there.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Reply channel name, unique per request
    pub reply_to: String,
    /// Request body
    pub body: serde_json::Value,
}

/// Publish/subscribe/request-reply message bus
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish a payload to a channel
    async fn publish(&self, channel: &str, payload: &str) -> BusResult<()>;

    /// Subscribe to a channel, receiving its messages on the returned receiver
    async fn subscribe(&self, channel: &str) -> BusResult<mpsc::Receiver<BusMessage>>;

    /// Stop receiving messages for a channel
    async fn unsubscribe(&self, channel: &str) -> BusResult<()>;

    /// Publish a request and await the first reply, with a transport-defined timeout
    async fn request(&self, channel: &str, body: serde_json::Value) -> BusResult<String>;
}
