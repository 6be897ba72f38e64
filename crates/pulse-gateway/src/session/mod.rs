//! Gateway session
//!
//! Session state machine and the engine driving it.

mod engine;
mod state;

pub use engine::{SessionEngine, SessionEngineConfig, SessionEvent};
pub use state::{
    AuthAction, ConnectionState, GuildCreateOutcome, HeartbeatOutcome, ShardSession,
};
