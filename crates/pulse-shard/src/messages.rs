//! Unit lifecycle messages
//!
//! Shard units report lifecycle transitions to the supervisor as
//! newline-delimited JSON on stdout.

use pulse_gateway::SessionEvent;
use serde::{Deserialize, Serialize};

/// One lifecycle message from a shard unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnitMessage {
    /// The session is ready (or resumed)
    Ready {
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    /// The gateway socket dropped
    Disconnected,
    /// The unit is about to reconnect
    Reconnecting,
}

impl UnitMessage {
    /// Map an engine lifecycle event to a supervisor-visible message
    ///
    /// Events the supervisor does not track return `None`.
    #[must_use]
    pub fn from_session_event(event: &SessionEvent) -> Option<Self> {
        match event {
            SessionEvent::Ready { session_id } => Some(Self::Ready {
                session_id: Some(session_id.clone()),
            }),
            SessionEvent::Resumed => Some(Self::Ready { session_id: None }),
            SessionEvent::Disconnected { .. } => Some(Self::Disconnected),
            SessionEvent::Reconnecting => Some(Self::Reconnecting),
            SessionEvent::Connected | SessionEvent::HydrationComplete { .. } => None,
        }
    }

    /// Encode as one stdout line
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse one stdout line
    pub fn from_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}
