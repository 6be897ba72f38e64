//! # pulse-cache
//!
//! Redis layer backing the two external collaborators of the gateway:
//!
//! - **Entity cache**: opportunistic key-value persistence of hydrated
//!   entities (`EntityCache` impl)
//! - **Message bus**: pub/sub plus request-reply between shard processes and
//!   consumers (`EventBus` impl)

pub mod bus;
pub mod pool;
pub mod store;

// Re-export pool types
pub use pool::{RedisPool, RedisPoolConfig, RedisPoolError, RedisResult};

// Re-export bus and store types
pub use bus::{RedisBus, RedisBusConfig};
pub use store::RedisEntityCache;
