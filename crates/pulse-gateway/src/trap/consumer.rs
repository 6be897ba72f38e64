//! Consumer-side trap handle
//!
//! Registers a trap with the gateway over the bus and yields its
//! correlated messages until the end sentinel arrives.

use super::registry::{TrapConditions, TRAP_END};
use crate::error::GatewayError;
use pulse_core::{trap_channel, EventBus, GATEWAY_UPSTREAM};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;

/// One message delivered to a trap consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrapMessage {
    /// A dispatch payload matching the trap's conditions
    Data(String),
    /// The trap ended (expiry or explicit stop)
    End,
}

/// Reply to a trap registration request
#[derive(Debug, Deserialize)]
struct TrapReply {
    key: String,
}

/// Live handle to a registered trap
#[derive(Debug)]
pub struct TrapHandle {
    key: String,
    rx: mpsc::Receiver<TrapMessage>,
}

impl TrapHandle {
    /// The server-issued correlation key
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Wait for the next trap message
    ///
    /// Returns `None` once the trap has ended and the channel drained.
    pub async fn next(&mut self) -> Option<TrapMessage> {
        self.rx.recv().await
    }
}

/// Registers traps with the gateway-side registry over the bus
#[derive(Clone)]
pub struct TrapClient {
    bus: Arc<dyn EventBus>,
}

impl TrapClient {
    /// Create a client over the shared bus
    #[must_use]
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self { bus }
    }

    /// Register a trap and subscribe to its correlated messages
    pub async fn create_trap(
        &self,
        conditions: TrapConditions,
        duration_ms: u64,
    ) -> Result<TrapHandle, GatewayError> {
        let body = serde_json::json!({
            "type": "dispatch",
            "trap": { "conditions": conditions, "duration": duration_ms },
            "data": {},
        });

        let reply = self.bus.request(GATEWAY_UPSTREAM, body).await?;
        let TrapReply { key } = serde_json::from_str(&reply)
            .map_err(|_| GatewayError::InvalidReply(reply.clone()))?;

        let channel = trap_channel(&key);
        let mut subscription = self.bus.subscribe(&channel).await?;

        let (tx, rx) = mpsc::channel(64);
        let bus = Arc::clone(&self.bus);
        let forward_key = key.clone();
        tokio::spawn(async move {
            while let Some(message) = subscription.recv().await {
                if message.payload == TRAP_END {
                    let _ = tx.send(TrapMessage::End).await;
                    break;
                }
                if tx.send(TrapMessage::Data(message.payload)).await.is_err() {
                    // Consumer dropped the handle
                    break;
                }
            }
            let _ = bus.unsubscribe(&trap_channel(&forward_key)).await;
            tracing::debug!(key = %forward_key, "Trap consumer finished");
        });

        Ok(TrapHandle { key, rx })
    }
}

impl std::fmt::Debug for TrapClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrapClient").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pulse_core::{BusMessage, BusResult, RequestEnvelope};
    use serde_json::Value;
    use tokio::sync::Mutex;

    /// Bus stub that answers trap registrations with a fixed key and lets
    /// the test inject trap messages
    struct ScriptedBus {
        key: String,
        trap_tx: Mutex<Option<mpsc::Sender<BusMessage>>>,
        injected: Mutex<Option<mpsc::Receiver<BusMessage>>>,
        requests: Mutex<Vec<Value>>,
    }

    impl ScriptedBus {
        fn new(key: &str) -> (Arc<Self>, mpsc::Sender<BusMessage>) {
            let (tx, rx) = mpsc::channel(16);
            let bus = Arc::new(Self {
                key: key.to_string(),
                trap_tx: Mutex::new(None),
                injected: Mutex::new(Some(rx)),
                requests: Mutex::new(Vec::new()),
            });
            (bus, tx)
        }
    }

    #[async_trait]
    impl EventBus for ScriptedBus {
        async fn publish(&self, _channel: &str, _payload: &str) -> BusResult<()> {
            Ok(())
        }

        async fn subscribe(&self, _channel: &str) -> BusResult<mpsc::Receiver<BusMessage>> {
            Ok(self
                .injected
                .lock()
                .await
                .take()
                .expect("single subscription expected"))
        }

        async fn unsubscribe(&self, _channel: &str) -> BusResult<()> {
            Ok(())
        }

        async fn request(&self, _channel: &str, body: Value) -> BusResult<String> {
            self.requests.lock().await.push(body);
            Ok(format!(r#"{{"key":"{}"}}"#, self.key))
        }
    }

    #[tokio::test]
    async fn test_create_trap_yields_data_then_end() {
        let (bus, inject) = ScriptedBus::new("trapkey");
        let client = TrapClient::new(bus.clone());

        let conditions = TrapConditions::new("MESSAGE_CREATE", std::collections::HashMap::new());
        let mut handle = client.create_trap(conditions, 5_000).await.unwrap();
        assert_eq!(handle.key(), "trapkey");

        // The registration request carried the trap body
        {
            let requests = bus.requests.lock().await;
            assert_eq!(requests.len(), 1);
            assert_eq!(requests[0]["type"], "dispatch");
            assert_eq!(requests[0]["trap"]["duration"], 5_000);
        }

        let channel = trap_channel("trapkey");
        inject
            .send(BusMessage {
                channel: channel.clone(),
                payload: r#"{"content":"hit"}"#.to_string(),
            })
            .await
            .unwrap();
        inject
            .send(BusMessage {
                channel,
                payload: TRAP_END.to_string(),
            })
            .await
            .unwrap();

        assert_eq!(
            handle.next().await,
            Some(TrapMessage::Data(r#"{"content":"hit"}"#.to_string()))
        );
        assert_eq!(handle.next().await, Some(TrapMessage::End));
        assert_eq!(handle.next().await, None);
    }

    #[tokio::test]
    async fn test_malformed_reply_is_an_error() {
        struct BadBus;

        #[async_trait]
        impl EventBus for BadBus {
            async fn publish(&self, _channel: &str, _payload: &str) -> BusResult<()> {
                Ok(())
            }
            async fn subscribe(&self, _channel: &str) -> BusResult<mpsc::Receiver<BusMessage>> {
                let (_tx, rx) = mpsc::channel(1);
                Ok(rx)
            }
            async fn unsubscribe(&self, _channel: &str) -> BusResult<()> {
                Ok(())
            }
            async fn request(&self, _channel: &str, _body: Value) -> BusResult<String> {
                Ok("not json".to_string())
            }
        }

        let client = TrapClient::new(Arc::new(BadBus));
        let conditions = TrapConditions::new("X", std::collections::HashMap::new());
        let result = client.create_trap(conditions, 1_000).await;
        assert!(matches!(result, Err(GatewayError::InvalidReply(_))));
    }
}
