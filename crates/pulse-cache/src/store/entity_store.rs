//! Redis-backed entity cache.
//!
//! Persists hydrated entities (guild payloads) opportunistically; losing a
//! key only costs a re-fetch.

use crate::pool::RedisPool;
use async_trait::async_trait;
use pulse_core::{CacheError, CacheResult, EntityCache};

/// `EntityCache` implementation over the shared Redis pool
#[derive(Debug, Clone)]
pub struct RedisEntityCache {
    pool: RedisPool,
}

impl RedisEntityCache {
    /// Create a new entity cache over an existing pool
    #[must_use]
    pub fn new(pool: RedisPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EntityCache for RedisEntityCache {
    async fn set(&self, key: &str, value: &str) -> CacheResult<()> {
        self.pool
            .set(key, value)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))
    }

    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        self.pool
            .get_value(key)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let removed = self
            .pool
            .delete(key)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        Ok(removed > 0)
    }
}
