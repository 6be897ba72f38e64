//! Redis pub/sub message bus

mod redis_bus;

pub use redis_bus::{RedisBus, RedisBusConfig};
