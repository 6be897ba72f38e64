//! Entity cache boundary
//!
//! A key-value cache used opportunistically to persist hydrated entities.
//! No durability is guaranteed beyond handing the data over.

use async_trait::async_trait;

/// Error type for cache operations
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache backend error: {0}")]
    Backend(String),

    #[error("Cache connection unavailable")]
    Unavailable,
}

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

/// Opportunistic key-value entity cache
#[async_trait]
pub trait EntityCache: Send + Sync {
    /// Store a value under a key
    async fn set(&self, key: &str, value: &str) -> CacheResult<()>;

    /// Fetch a value by key
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// Delete a key, returning whether it existed
    async fn delete(&self, key: &str) -> CacheResult<bool>;
}
