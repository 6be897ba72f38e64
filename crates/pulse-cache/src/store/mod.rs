//! Entity cache backed by Redis

mod entity_store;

pub use entity_store::RedisEntityCache;
