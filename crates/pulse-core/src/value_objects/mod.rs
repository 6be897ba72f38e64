//! Value objects - identifiers and bitmasks

mod intents;
mod snowflake;

pub use intents::Intents;
pub use snowflake::{Snowflake, SnowflakeParseError};
