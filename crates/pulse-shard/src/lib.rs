//! # pulse-shard
//!
//! Sharding process supervisor: spawns one isolated OS process per shard,
//! staggers starts for identify-rate compliance, relays unit lifecycle
//! events, and respawns crashed units.

pub mod error;
pub mod messages;
pub mod runner;
pub mod supervisor;
pub mod unit;

pub use error::{ShardError, ShardResult};
pub use messages::UnitMessage;
pub use supervisor::{
    ShardSupervisor, ShardSupervisorConfig, SupervisorEvent, SupervisorEventKind,
};
pub use unit::{ShardUnit, UnitEvent, UnitLaunch};
