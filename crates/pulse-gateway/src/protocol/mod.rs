//! Gateway wire protocol
//!
//! Op codes, close codes, the message envelope, typed payloads, and the
//! negotiated payload encoding.

mod close_codes;
mod encoding;
mod messages;
mod opcodes;
mod payloads;

pub use close_codes::CloseCode;
pub use encoding::{DecodeError, EncodeError, EncodedFrame, Encoding};
pub use messages::GatewayMessage;
pub use opcodes::OpCode;
pub use payloads::{
    ConnectionProperties, GuildStub, HelloPayload, IdentifyPayload, ReadyPayload, ResumePayload,
};
