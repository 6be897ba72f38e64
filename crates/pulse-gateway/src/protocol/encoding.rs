//! Payload encoding negotiation
//!
//! The gateway negotiates the payload encoding via connection query
//! parameters: structured text (JSON) or a compact binary map format
//! (MessagePack).

use super::GatewayMessage;

/// Negotiated payload encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    /// Structured text
    #[default]
    Json,
    /// Compact binary map format
    MessagePack,
}

/// Error decoding an inbound payload
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid MessagePack payload: {0}")]
    MessagePack(#[from] rmp_serde::decode::Error),

    #[error("payload is not valid UTF-8")]
    Utf8(#[from] std::str::Utf8Error),
}

/// Error encoding an outbound payload
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("failed to encode JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to encode MessagePack payload: {0}")]
    MessagePack(#[from] rmp_serde::encode::Error),
}

/// One encoded outbound frame
#[derive(Debug, Clone)]
pub enum EncodedFrame {
    Text(String),
    Binary(Vec<u8>),
}

impl Encoding {
    /// Parse an encoding name as used in the connection query string
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "json" => Some(Self::Json),
            "msgpack" => Some(Self::MessagePack),
            _ => None,
        }
    }

    /// The value used for the `encoding` query parameter
    #[must_use]
    pub const fn query_value(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::MessagePack => "msgpack",
        }
    }

    /// Encode a message into one outbound frame
    pub fn encode(self, message: &GatewayMessage) -> Result<EncodedFrame, EncodeError> {
        match self {
            Self::Json => Ok(EncodedFrame::Text(message.to_json()?)),
            Self::MessagePack => Ok(EncodedFrame::Binary(rmp_serde::to_vec_named(message)?)),
        }
    }

    /// Decode one inbound payload
    pub fn decode(self, bytes: &[u8]) -> Result<GatewayMessage, DecodeError> {
        match self {
            Self::Json => Ok(GatewayMessage::from_json(std::str::from_utf8(bytes)?)?),
            Self::MessagePack => Ok(rmp_serde::from_slice(bytes)?),
        }
    }
}

impl std::fmt::Display for Encoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.query_value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_name() {
        assert_eq!(Encoding::from_name("json"), Some(Encoding::Json));
        assert_eq!(Encoding::from_name("msgpack"), Some(Encoding::MessagePack));
        assert_eq!(Encoding::from_name("etf"), None);
    }

    #[test]
    fn test_json_roundtrip() {
        let msg = GatewayMessage::heartbeat(Some(12));
        let frame = Encoding::Json.encode(&msg).unwrap();

        let EncodedFrame::Text(text) = frame else {
            panic!("json must encode to a text frame");
        };
        let decoded = Encoding::Json.decode(text.as_bytes()).unwrap();
        assert_eq!(decoded.op, msg.op);
        assert_eq!(decoded.d, msg.d);
    }

    #[test]
    fn test_msgpack_roundtrip() {
        let msg = GatewayMessage::from_json(r#"{"op":0,"t":"READY","s":1,"d":{"v":8}}"#).unwrap();
        let frame = Encoding::MessagePack.encode(&msg).unwrap();

        let EncodedFrame::Binary(bytes) = frame else {
            panic!("msgpack must encode to a binary frame");
        };
        let decoded = Encoding::MessagePack.decode(&bytes).unwrap();
        assert_eq!(decoded.op, msg.op);
        assert_eq!(decoded.t.as_deref(), Some("READY"));
        assert_eq!(decoded.s, Some(1));
    }

    #[test]
    fn test_decode_garbage() {
        assert!(Encoding::Json.decode(b"not json").is_err());
        assert!(Encoding::MessagePack.decode(&[0xc1]).is_err());
    }
}
