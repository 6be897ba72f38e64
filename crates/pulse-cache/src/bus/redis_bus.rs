//! Redis-backed message bus.
//!
//! Implements the `EventBus` boundary over Redis pub/sub. A background
//! listener owns the pub/sub connection and fans messages out to
//! per-channel mpsc receivers; request-reply is layered on top with a
//! unique reply channel per request.

use crate::pool::RedisPool;
use async_trait::async_trait;
use futures_util::StreamExt;
use pulse_core::{BusError, BusMessage, BusResult, EventBus, RequestEnvelope};
use rand::distributions::Alphanumeric;
use rand::Rng;
use redis::Client;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};

/// Bus configuration
#[derive(Debug, Clone)]
pub struct RedisBusConfig {
    /// Buffer size for per-channel receivers
    pub channel_buffer: usize,
    /// Reconnection delay after a listener error, in milliseconds
    pub reconnect_delay_ms: u64,
    /// How long a request waits for its reply, in milliseconds
    pub request_timeout_ms: u64,
}

impl Default for RedisBusConfig {
    fn default() -> Self {
        Self {
            channel_buffer: 128,
            reconnect_delay_ms: 1_000,
            request_timeout_ms: 5_000,
        }
    }
}

/// Commands for subscription management
#[derive(Debug)]
enum BusCommand {
    Subscribe(String),
    Unsubscribe(String),
}

type SenderMap = Arc<RwLock<HashMap<String, Vec<mpsc::Sender<BusMessage>>>>>;

/// Redis pub/sub implementation of the `EventBus` boundary
pub struct RedisBus {
    config: RedisBusConfig,
    pool: RedisPool,
    senders: SenderMap,
    control_tx: mpsc::Sender<BusCommand>,
}

impl std::fmt::Debug for RedisBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBus").finish()
    }
}

impl RedisBus {
    /// Create a new bus and start the background listener
    #[must_use]
    pub fn new(pool: RedisPool, config: RedisBusConfig) -> Self {
        let (control_tx, control_rx) = mpsc::channel(32);
        let senders: SenderMap = Arc::new(RwLock::new(HashMap::new()));

        tokio::spawn(Self::listener_loop(
            pool.url().to_string(),
            config.clone(),
            senders.clone(),
            control_rx,
        ));

        Self {
            config,
            pool,
            senders,
            control_tx,
        }
    }

    /// Background listener loop, reconnecting on failure
    async fn listener_loop(
        url: String,
        config: RedisBusConfig,
        senders: SenderMap,
        mut control_rx: mpsc::Receiver<BusCommand>,
    ) {
        loop {
            match Self::run_listener(&url, &senders, &mut control_rx).await {
                Ok(()) => {
                    tracing::info!("Bus listener shutting down");
                    break;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Bus listener error, reconnecting...");
                    tokio::time::sleep(Duration::from_millis(config.reconnect_delay_ms)).await;
                }
            }
        }
    }

    /// Run the listener until error or shutdown
    async fn run_listener(
        url: &str,
        senders: &SenderMap,
        control_rx: &mut mpsc::Receiver<BusCommand>,
    ) -> Result<(), redis::RedisError> {
        let client = Client::open(url)?;
        let mut pubsub = client.get_async_pubsub().await?;

        // Re-subscribe to channels registered before (re)connecting
        {
            let map = senders.read().await;
            for channel in map.keys() {
                pubsub.subscribe(channel).await?;
            }
        }

        tracing::info!("Bus listener connected to Redis");

        let mut stream = pubsub.on_message();

        loop {
            tokio::select! {
                msg = stream.next() => {
                    match msg {
                        Some(msg) => {
                            let channel = msg.get_channel_name().to_string();
                            let payload: String = msg.get_payload().unwrap_or_default();
                            Self::fan_out(senders, &channel, payload).await;
                        }
                        None => {
                            tracing::warn!("Bus pub/sub stream ended");
                            return Err(redis::RedisError::from((
                                redis::ErrorKind::IoError,
                                "pub/sub stream ended",
                            )));
                        }
                    }
                }

                cmd = control_rx.recv() => {
                    match cmd {
                        Some(BusCommand::Subscribe(channel)) => {
                            // Need to drop the stream to access the pubsub handle
                            drop(stream);
                            if let Err(e) = pubsub.subscribe(&channel).await {
                                tracing::error!(channel = %channel, error = %e, "Failed to subscribe");
                            } else {
                                tracing::debug!(channel = %channel, "Subscribed to channel");
                            }
                            stream = pubsub.on_message();
                        }
                        Some(BusCommand::Unsubscribe(channel)) => {
                            drop(stream);
                            if let Err(e) = pubsub.unsubscribe(&channel).await {
                                tracing::error!(channel = %channel, error = %e, "Failed to unsubscribe");
                            }
                            stream = pubsub.on_message();
                        }
                        None => return Ok(()),
                    }
                }
            }
        }
    }

    /// Deliver one message to every receiver registered for its channel
    async fn fan_out(senders: &SenderMap, channel: &str, payload: String) {
        let mut dead = false;
        {
            let map = senders.read().await;
            if let Some(list) = map.get(channel) {
                for tx in list {
                    let message = BusMessage {
                        channel: channel.to_string(),
                        payload: payload.clone(),
                    };
                    match tx.try_send(message) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            tracing::warn!(channel = %channel, "Bus receiver full, dropping message");
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => dead = true,
                    }
                }
            }
        }

        if dead {
            let mut map = senders.write().await;
            if let Some(list) = map.get_mut(channel) {
                list.retain(|tx| !tx.is_closed());
                if list.is_empty() {
                    map.remove(channel);
                }
            }
        }
    }

    fn random_reply_channel() -> String {
        let id: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(16)
            .map(char::from)
            .collect();
        format!("reply:{id}")
    }
}

#[async_trait]
impl EventBus for RedisBus {
    async fn publish(&self, channel: &str, payload: &str) -> BusResult<()> {
        self.pool
            .publish(channel, payload)
            .await
            .map_err(|e| BusError::Connection(e.to_string()))
    }

    async fn subscribe(&self, channel: &str) -> BusResult<mpsc::Receiver<BusMessage>> {
        let (tx, rx) = mpsc::channel(self.config.channel_buffer);

        {
            let mut map = self.senders.write().await;
            map.entry(channel.to_string()).or_default().push(tx);
        }

        self.control_tx
            .send(BusCommand::Subscribe(channel.to_string()))
            .await
            .map_err(|_| BusError::Closed)?;

        Ok(rx)
    }

    async fn unsubscribe(&self, channel: &str) -> BusResult<()> {
        {
            let mut map = self.senders.write().await;
            map.remove(channel);
        }

        self.control_tx
            .send(BusCommand::Unsubscribe(channel.to_string()))
            .await
            .map_err(|_| BusError::Closed)
    }

    async fn request(&self, channel: &str, body: serde_json::Value) -> BusResult<String> {
        let reply_to = Self::random_reply_channel();
        let mut rx = self.subscribe(&reply_to).await?;

        let envelope = RequestEnvelope {
            reply_to: reply_to.clone(),
            body,
        };
        self.publish(channel, &serde_json::to_string(&envelope)?)
            .await?;

        let reply = tokio::time::timeout(
            Duration::from_millis(self.config.request_timeout_ms),
            rx.recv(),
        )
        .await;

        // Best effort; the reply channel is unique and short-lived
        let _ = self.unsubscribe(&reply_to).await;

        match reply {
            Ok(Some(message)) => Ok(message.payload),
            Ok(None) => Err(BusError::Closed),
            Err(_) => Err(BusError::Timeout),
        }
    }
}
