//! Gateway-side trap registry
//!
//! Traps are short-lived filtered subscriptions. Consumers register them
//! over the bus and receive matching dispatch payloads on a per-trap
//! channel until expiry or an explicit end, both signalled by the `"END"`
//! sentinel.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use dashmap::DashMap;
use pulse_core::{trap_channel, EventBus};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Sentinel payload marking the end of a trap's lifetime
pub const TRAP_END: &str = "END";

/// Trap match conditions: an event name plus field equality matchers,
/// carried on the wire as `[event, {field: value, ...}]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrapConditions(pub String, pub HashMap<String, Value>);

impl TrapConditions {
    /// Build conditions for an event with field matchers
    #[must_use]
    pub fn new(event: impl Into<String>, fields: HashMap<String, Value>) -> Self {
        Self(event.into(), fields)
    }

    /// The event name this trap listens for
    #[must_use]
    pub fn event(&self) -> &str {
        &self.0
    }

    /// Check whether a dispatch matches: the event name must equal and
    /// every matcher field must equal the corresponding payload field
    #[must_use]
    pub fn matches(&self, event: &str, data: &Value) -> bool {
        if self.0 != event {
            return false;
        }
        self.1
            .iter()
            .all(|(key, expected)| data.get(key) == Some(expected))
    }
}

/// Trap registration request carried in upstream bus messages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrapRequest {
    pub conditions: TrapConditions,
    pub duration: u64,
}

struct RegisteredTrap {
    conditions: TrapConditions,
    expiry: Option<tokio::task::JoinHandle<()>>,
}

/// Registry of active traps on the gateway side
pub struct TrapRegistry {
    bus: Arc<dyn EventBus>,
    traps: Arc<DashMap<String, RegisteredTrap>>,
}

impl TrapRegistry {
    /// Create an empty registry publishing through the given bus
    #[must_use]
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self {
            bus,
            traps: Arc::new(DashMap::new()),
        }
    }

    /// Generate a url-safe correlation key
    #[must_use]
    pub fn generate_key() -> String {
        let mut bytes = [0u8; 24];
        rand::thread_rng().fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }

    /// Register a trap, returning its correlation key
    ///
    /// The trap expires after `duration_ms`, publishing the end sentinel.
    pub fn register(&self, conditions: TrapConditions, duration_ms: u64) -> String {
        let key = Self::generate_key();

        self.traps.insert(
            key.clone(),
            RegisteredTrap {
                conditions,
                expiry: None,
            },
        );

        let traps = Arc::clone(&self.traps);
        let bus = Arc::clone(&self.bus);
        let expiry_key = key.clone();
        let expiry = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(duration_ms)).await;
            if traps.remove(&expiry_key).is_some() {
                tracing::debug!(key = %expiry_key, "Trap expired");
                let _ = bus.publish(&trap_channel(&expiry_key), TRAP_END).await;
            }
        });

        if let Some(mut entry) = self.traps.get_mut(&key) {
            entry.expiry = Some(expiry);
        }

        tracing::info!(key = %key, "Issued new event trap");
        key
    }

    /// End a trap early, cancelling its expiry timer
    ///
    /// Returns false when the key is unknown (already expired).
    pub async fn stop(&self, key: &str) -> bool {
        let Some((_, trap)) = self.traps.remove(key) else {
            return false;
        };

        if let Some(expiry) = trap.expiry {
            expiry.abort();
        }
        let _ = self.bus.publish(&trap_channel(key), TRAP_END).await;
        tracing::debug!(key = %key, "Trap stopped");
        true
    }

    /// Run all traps against a dispatch, publishing the payload to every
    /// matching trap's channel
    pub async fn dispatch(&self, event: &str, data: &Value) {
        let matched: Vec<String> = self
            .traps
            .iter()
            .filter(|entry| entry.conditions.matches(event, data))
            .map(|entry| entry.key().clone())
            .collect();

        for key in matched {
            tracing::trace!(key = %key, event = %event, "Trap matched dispatch");
            let _ = self.bus.publish(&trap_channel(&key), &data.to_string()).await;
        }
    }

    /// Number of active traps
    #[must_use]
    pub fn len(&self) -> usize {
        self.traps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.traps.is_empty()
    }
}

impl std::fmt::Debug for TrapRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrapRegistry")
            .field("active", &self.traps.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pulse_core::{BusMessage, BusResult};
    use tokio::sync::mpsc;
    use tokio::sync::Mutex;

    /// Bus stub recording published messages
    #[derive(Default)]
    struct RecordingBus {
        published: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl EventBus for RecordingBus {
        async fn publish(&self, channel: &str, payload: &str) -> BusResult<()> {
            self.published
                .lock()
                .await
                .push((channel.to_string(), payload.to_string()));
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
            unimplemented!("not used by the registry")
        }
    }

    fn conditions(event: &str, field: &str, value: &str) -> TrapConditions {
        let mut fields = HashMap::new();
        fields.insert(field.to_string(), Value::String(value.to_string()));
        TrapConditions::new(event, fields)
    }

    #[test]
    fn test_conditions_matching() {
        let c = conditions("MESSAGE_CREATE", "channel_id", "42");

        assert!(c.matches(
            "MESSAGE_CREATE",
            &serde_json::json!({"channel_id": "42", "content": "hi"})
        ));
        assert!(!c.matches("MESSAGE_CREATE", &serde_json::json!({"channel_id": "7"})));
        assert!(!c.matches("MESSAGE_DELETE", &serde_json::json!({"channel_id": "42"})));
        assert!(!c.matches("MESSAGE_CREATE", &serde_json::json!({})));
    }

    #[test]
    fn test_conditions_wire_shape() {
        let c = conditions("MESSAGE_CREATE", "author_id", "1");
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json[0], "MESSAGE_CREATE");
        assert_eq!(json[1]["author_id"], "1");

        let back: TrapConditions =
            serde_json::from_str(r#"["MESSAGE_CREATE",{"author_id":"1"}]"#).unwrap();
        assert_eq!(back.event(), "MESSAGE_CREATE");
    }

    #[test]
    fn test_generated_keys_unique() {
        let a = TrapRegistry::generate_key();
        let b = TrapRegistry::generate_key();
        assert_ne!(a, b);
        assert!(!a.contains('/'));
        assert!(!a.contains('+'));
    }

    #[tokio::test]
    async fn test_matching_dispatch_publishes_to_trap_channel() {
        let bus = Arc::new(RecordingBus::default());
        let registry = TrapRegistry::new(bus.clone());

        let key = registry.register(conditions("MESSAGE_CREATE", "channel_id", "42"), 60_000);
        assert_eq!(registry.len(), 1);

        registry
            .dispatch(
                "MESSAGE_CREATE",
                &serde_json::json!({"channel_id": "42", "content": "hi"}),
            )
            .await;
        registry
            .dispatch("MESSAGE_CREATE", &serde_json::json!({"channel_id": "7"}))
            .await;

        let published = bus.published.lock().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, trap_channel(&key));
        assert!(published[0].1.contains("\"content\""));
    }

    #[tokio::test]
    async fn test_stop_publishes_end_sentinel() {
        let bus = Arc::new(RecordingBus::default());
        let registry = TrapRegistry::new(bus.clone());

        let key = registry.register(conditions("MESSAGE_CREATE", "id", "1"), 60_000);
        assert!(registry.stop(&key).await);
        assert!(registry.is_empty());
        assert!(!registry.stop(&key).await);

        let published = bus.published.lock().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0], (trap_channel(&key), TRAP_END.to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_publishes_end_and_removes() {
        let bus = Arc::new(RecordingBus::default());
        let registry = TrapRegistry::new(bus.clone());

        let key = registry.register(conditions("MESSAGE_CREATE", "id", "1"), 1_000);
        assert_eq!(registry.len(), 1);

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        // Let the expiry task run
        tokio::task::yield_now().await;

        assert!(registry.is_empty());
        let published = bus.published.lock().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0], (trap_channel(&key), TRAP_END.to_string()));
    }
}
