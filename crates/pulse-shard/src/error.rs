//! Sharding error types

use pulse_rest::RestError;

/// Error type for supervisor and unit operations
#[derive(Debug, thiserror::Error)]
pub enum ShardError {
    #[error("failed to spawn shard unit: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("shard unit is not running")]
    NotRunning,

    #[error("failed to write to shard unit: {0}")]
    Write(#[source] std::io::Error),

    #[error("failed to encode unit message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Rest(#[from] RestError),

    #[error("bootstrap response did not include a shard count")]
    MissingShardCount,
}

/// Result type for supervisor and unit operations
pub type ShardResult<T> = Result<T, ShardError>;
