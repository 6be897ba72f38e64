//! Gateway error types

use crate::transport::TransportError;
use pulse_core::BusError;

/// Error type for gateway session operations
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error("gateway closed with fatal code {code}")]
    FatalClose { code: u16 },

    #[error("malformed bus reply: {0}")]
    InvalidReply(String),
}

/// Result type for gateway session operations
pub type GatewayResult<T> = Result<T, GatewayError>;
