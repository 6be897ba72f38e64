//! Gateway close codes
//!
//! Close codes observed on and produced for the gateway connection.

use serde::{Deserialize, Serialize};

/// Gateway close codes
///
/// Sent when closing the connection to indicate the reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum CloseCode {
    /// Normal closure
    NormalClosure = 1000,
    /// Endpoint going away
    GoingAway = 1001,
    /// Unknown error occurred
    UnknownError = 4000,
    /// Invalid opcode sent
    UnknownOpcode = 4001,
    /// Invalid payload encoding
    DecodeError = 4002,
    /// Sent payload before Identify
    NotAuthenticated = 4003,
    /// Invalid token provided
    AuthenticationFailed = 4004,
    /// Sent Identify twice
    AlreadyAuthenticated = 4005,
    /// Invalid sequence number for Resume
    InvalidSequence = 4007,
    /// Too many payloads sent (rate limited)
    RateLimited = 4008,
    /// Session timed out
    SessionTimeout = 4009,
    /// Invalid shard configuration
    InvalidShard = 4010,
    /// Sharding is required
    ShardingRequired = 4011,
    /// Invalid/outdated API version
    InvalidApiVersion = 4012,
    /// Invalid intents bitmask
    InvalidIntents = 4013,
    /// Privileged intents not enabled
    DisallowedIntents = 4014,
}

impl CloseCode {
    /// Create a `CloseCode` from a raw u16 value
    #[must_use]
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1000 => Some(Self::NormalClosure),
            1001 => Some(Self::GoingAway),
            4000 => Some(Self::UnknownError),
            4001 => Some(Self::UnknownOpcode),
            4002 => Some(Self::DecodeError),
            4003 => Some(Self::NotAuthenticated),
            4004 => Some(Self::AuthenticationFailed),
            4005 => Some(Self::AlreadyAuthenticated),
            4007 => Some(Self::InvalidSequence),
            4008 => Some(Self::RateLimited),
            4009 => Some(Self::SessionTimeout),
            4010 => Some(Self::InvalidShard),
            4011 => Some(Self::ShardingRequired),
            4012 => Some(Self::InvalidApiVersion),
            4013 => Some(Self::InvalidIntents),
            4014 => Some(Self::DisallowedIntents),
            _ => None,
        }
    }

    /// Get the raw u16 value
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Check if the client should reconnect after closing with this code
    ///
    /// Configuration-level failures (bad token, bad shard setup, bad
    /// intents) are fatal; everything else is worth another attempt.
    #[must_use]
    pub const fn should_reconnect(self) -> bool {
        !matches!(
            self,
            Self::AuthenticationFailed
                | Self::InvalidShard
                | Self::ShardingRequired
                | Self::InvalidApiVersion
                | Self::InvalidIntents
                | Self::DisallowedIntents
        )
    }

    /// Get the description for this close code
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::NormalClosure => "Normal closure",
            Self::GoingAway => "Going away",
            Self::UnknownError => "Unknown error occurred",
            Self::UnknownOpcode => "Invalid opcode sent",
            Self::DecodeError => "Invalid payload encoding",
            Self::NotAuthenticated => "Not authenticated",
            Self::AuthenticationFailed => "Authentication failed",
            Self::AlreadyAuthenticated => "Already authenticated",
            Self::InvalidSequence => "Invalid sequence number",
            Self::RateLimited => "Rate limited",
            Self::SessionTimeout => "Session timeout",
            Self::InvalidShard => "Invalid shard configuration",
            Self::ShardingRequired => "Sharding required",
            Self::InvalidApiVersion => "Invalid API version",
            Self::InvalidIntents => "Invalid intents",
            Self::DisallowedIntents => "Disallowed intents",
        }
    }

    /// Get the name of this close code
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::NormalClosure => "NormalClosure",
            Self::GoingAway => "GoingAway",
            Self::UnknownError => "UnknownError",
            Self::UnknownOpcode => "UnknownOpcode",
            Self::DecodeError => "DecodeError",
            Self::NotAuthenticated => "NotAuthenticated",
            Self::AuthenticationFailed => "AuthenticationFailed",
            Self::AlreadyAuthenticated => "AlreadyAuthenticated",
            Self::InvalidSequence => "InvalidSequence",
            Self::RateLimited => "RateLimited",
            Self::SessionTimeout => "SessionTimeout",
            Self::InvalidShard => "InvalidShard",
            Self::ShardingRequired => "ShardingRequired",
            Self::InvalidApiVersion => "InvalidApiVersion",
            Self::InvalidIntents => "InvalidIntents",
            Self::DisallowedIntents => "DisallowedIntents",
        }
    }
}

impl std::fmt::Display for CloseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.name(), self.as_u16(), self.description())
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        code.as_u16()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_code_from_u16() {
        assert_eq!(CloseCode::from_u16(1000), Some(CloseCode::NormalClosure));
        assert_eq!(CloseCode::from_u16(4004), Some(CloseCode::AuthenticationFailed));
        assert_eq!(CloseCode::from_u16(4009), Some(CloseCode::SessionTimeout));
        assert_eq!(CloseCode::from_u16(4014), Some(CloseCode::DisallowedIntents));
        assert_eq!(CloseCode::from_u16(4006), None); // 4006 is not defined
        assert_eq!(CloseCode::from_u16(1006), None);
    }

    #[test]
    fn test_close_code_as_u16() {
        assert_eq!(CloseCode::NormalClosure.as_u16(), 1000);
        assert_eq!(CloseCode::UnknownError.as_u16(), 4000);
        assert_eq!(CloseCode::SessionTimeout.as_u16(), 4009);
    }

    #[test]
    fn test_should_reconnect() {
        // Should reconnect
        assert!(CloseCode::NormalClosure.should_reconnect());
        assert!(CloseCode::GoingAway.should_reconnect());
        assert!(CloseCode::UnknownError.should_reconnect());
        assert!(CloseCode::InvalidSequence.should_reconnect());
        assert!(CloseCode::RateLimited.should_reconnect());
        assert!(CloseCode::SessionTimeout.should_reconnect());

        // Fatal configuration failures
        assert!(!CloseCode::AuthenticationFailed.should_reconnect());
        assert!(!CloseCode::InvalidShard.should_reconnect());
        assert!(!CloseCode::ShardingRequired.should_reconnect());
        assert!(!CloseCode::InvalidApiVersion.should_reconnect());
        assert!(!CloseCode::InvalidIntents.should_reconnect());
        assert!(!CloseCode::DisallowedIntents.should_reconnect());
    }

    #[test]
    fn test_close_code_display() {
        let display = format!("{}", CloseCode::SessionTimeout);
        assert!(display.contains("4009"));
        assert!(display.contains("Session timeout"));
    }
}
