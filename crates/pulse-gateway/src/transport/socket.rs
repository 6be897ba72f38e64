//! Gateway socket wrapper
//!
//! Owns one WebSocket connection and converts between raw frames and
//! decoded gateway messages, including the zlib-stream transport.

use super::ZlibInflater;
use crate::protocol::{CloseCode, EncodeError, EncodedFrame, Encoding, GatewayMessage};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::tungstenite::protocol::frame::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// Consecutive stream errors tolerated before treating the socket as dead
const MAX_CONSECUTIVE_ERRORS: u32 = 3;

/// Error type for transport operations
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("socket is not open")]
    NotReady,

    #[error("failed to open gateway socket: {0}")]
    Connect(#[source] tungstenite::Error),

    #[error("failed to write to gateway socket: {0}")]
    Socket(#[source] tungstenite::Error),

    #[error(transparent)]
    Encode(#[from] EncodeError),
}

/// One lifecycle notification from the transport
#[derive(Debug)]
pub enum TransportEvent {
    /// A decoded gateway message
    Message(GatewayMessage),
    /// The socket closed; `code` is absent when the peer vanished without
    /// a close frame
    Closed { code: Option<u16>, reason: String },
}

/// Wrapper owning one gateway WebSocket connection
pub struct Transport {
    stream: Option<WebSocketStream<MaybeTlsStream<TcpStream>>>,
    encoding: Encoding,
    inflater: Option<ZlibInflater>,
}

impl Transport {
    /// Open a gateway connection, negotiating encoding and compression via
    /// query parameters
    pub async fn connect(
        base_url: &str,
        version: u8,
        encoding: Encoding,
        compress: bool,
    ) -> Result<Self, TransportError> {
        let url = Self::build_url(base_url, version, encoding, compress);
        let (stream, _response) = connect_async(&url).await.map_err(TransportError::Connect)?;

        tracing::debug!(url = %url, encoding = %encoding, compress, "Gateway socket opened");

        Ok(Self {
            stream: Some(stream),
            encoding,
            inflater: compress.then(ZlibInflater::new),
        })
    }

    /// Build the connection URL with negotiation query parameters
    fn build_url(base_url: &str, version: u8, encoding: Encoding, compress: bool) -> String {
        let base = base_url.trim_end_matches('/');
        let mut url = format!("{base}/?v={version}&encoding={}", encoding.query_value());
        if compress {
            url.push_str("&compress=zlib-stream");
        }
        url
    }

    /// Whether the socket is currently open
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Wait for the next transport event
    ///
    /// Malformed payloads and transient socket errors are logged and
    /// skipped; only an actual close terminates the stream of messages.
    pub async fn next_event(&mut self) -> TransportEvent {
        let mut consecutive_errors = 0u32;

        loop {
            let Some(stream) = self.stream.as_mut() else {
                return TransportEvent::Closed {
                    code: None,
                    reason: "socket not open".to_string(),
                };
            };

            let next = stream.next().await;
            match next {
                Some(Ok(WsMessage::Binary(bytes))) => {
                    consecutive_errors = 0;
                    let decoded = if let Some(inflater) = self.inflater.as_mut() {
                        match inflater.push(&bytes) {
                            Ok(Some(flushed)) => self.encoding.decode(&flushed),
                            // Partial chunk, nothing to emit yet
                            Ok(None) => continue,
                            Err(e) => {
                                tracing::warn!(error = %e, "Dropping undecompressable gateway frame");
                                continue;
                            }
                        }
                    } else {
                        self.encoding.decode(&bytes)
                    };

                    match decoded {
                        Ok(message) => return TransportEvent::Message(message),
                        Err(e) => {
                            tracing::warn!(error = %e, "Dropping malformed gateway payload");
                        }
                    }
                }
                Some(Ok(WsMessage::Text(text))) => {
                    consecutive_errors = 0;
                    match self.encoding.decode(text.as_bytes()) {
                        Ok(message) => return TransportEvent::Message(message),
                        Err(e) => {
                            tracing::warn!(error = %e, "Dropping malformed gateway payload");
                        }
                    }
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    self.stream = None;
                    let (code, reason) = frame.map_or((None, String::new()), |f| {
                        (Some(u16::from(f.code)), f.reason.to_string())
                    });
                    return TransportEvent::Closed { code, reason };
                }
                // Ping/pong are answered by the protocol layer
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    consecutive_errors += 1;
                    tracing::warn!(error = %e, "Gateway socket error");
                    if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                        self.stream = None;
                        return TransportEvent::Closed {
                            code: None,
                            reason: e.to_string(),
                        };
                    }
                }
                None => {
                    self.stream = None;
                    return TransportEvent::Closed {
                        code: None,
                        reason: "stream ended".to_string(),
                    };
                }
            }
        }
    }

    /// Serialize and send one message
    pub async fn send(&mut self, message: &GatewayMessage) -> Result<(), TransportError> {
        let frame = self.encoding.encode(message)?;
        let stream = self.stream.as_mut().ok_or(TransportError::NotReady)?;

        let ws_message = match frame {
            EncodedFrame::Text(text) => WsMessage::Text(text),
            EncodedFrame::Binary(bytes) => WsMessage::Binary(bytes),
        };

        stream.send(ws_message).await.map_err(TransportError::Socket)
    }

    /// Close the connection with a specific protocol close code
    ///
    /// Subsequent sends fail with `NotReady`.
    pub async fn close(&mut self, code: CloseCode) -> Result<(), TransportError> {
        if let Some(mut stream) = self.stream.take() {
            let frame = CloseFrame {
                code: WsCloseCode::from(code.as_u16()),
                reason: code.description().into(),
            };
            stream
                .send(WsMessage::Close(Some(frame)))
                .await
                .map_err(TransportError::Socket)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("open", &self.is_open())
            .field("encoding", &self.encoding)
            .field("compress", &self.inflater.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_url() {
        let url = Transport::build_url("wss://gateway.example", 8, Encoding::Json, true);
        assert_eq!(
            url,
            "wss://gateway.example/?v=8&encoding=json&compress=zlib-stream"
        );

        let plain = Transport::build_url("wss://gateway.example/", 8, Encoding::MessagePack, false);
        assert_eq!(plain, "wss://gateway.example/?v=8&encoding=msgpack");
    }
}
