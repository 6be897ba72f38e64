//! Gateway session engine
//!
//! Drives one shard's connection: connect, authenticate, heartbeat, and
//! republish dispatches onto the bus. Reconnects after any socket close
//! unless the close code marks a fatal configuration problem.

use super::{AuthAction, ConnectionState, GuildCreateOutcome, HeartbeatOutcome, ShardSession};
use crate::error::GatewayError;
use crate::protocol::{
    CloseCode, Encoding, GatewayMessage, IdentifyPayload, OpCode, ReadyPayload, ResumePayload,
};
use crate::transport::{Transport, TransportEvent};
use crate::trap::{TrapRegistry, TrapRequest};
use pulse_core::{
    DispatchEvent, EntityCache, EventBus, GuildsHydrated, Intents, RequestEnvelope, Snowflake,
    GATEWAY_DOWNSTREAM, GATEWAY_UPSTREAM, GUILDS_CHANNEL,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Interval, MissedTickBehavior};

/// Lifecycle notifications emitted by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Socket opened, awaiting Hello
    Connected,
    /// READY received
    Ready { session_id: String },
    /// A prior session was resumed
    Resumed,
    /// All expected guilds arrived
    HydrationComplete { guild_ids: Vec<Snowflake> },
    /// Socket closed
    Disconnected { code: Option<u16> },
    /// About to reconnect after the configured delay
    Reconnecting,
}

/// Engine configuration for one shard
#[derive(Debug, Clone)]
pub struct SessionEngineConfig {
    pub token: String,
    pub intents: Intents,
    pub shard_id: u16,
    pub shard_count: u16,
    pub gateway_url: String,
    pub version: u8,
    pub encoding: Encoding,
    pub compress: bool,
    pub reconnect_delay: Duration,
}

impl SessionEngineConfig {
    /// Build an engine configuration from the loaded application config
    #[must_use]
    pub fn from_app(
        config: &pulse_common::AppConfig,
        shard_id: u16,
        shard_count: u16,
        gateway_url: String,
    ) -> Self {
        Self {
            token: config.gateway.token.clone(),
            intents: config.gateway.intents,
            shard_id,
            shard_count,
            gateway_url,
            version: config.rest.version,
            encoding: Encoding::from_name(&config.gateway.encoding).unwrap_or_default(),
            compress: config.gateway.compress,
            reconnect_delay: Duration::from_millis(config.gateway.reconnect_delay_ms),
        }
    }
}

/// One shard's gateway session engine
pub struct SessionEngine {
    config: SessionEngineConfig,
    session: ShardSession,
    bus: Arc<dyn EventBus>,
    cache: Arc<dyn EntityCache>,
    traps: TrapRegistry,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionEngine {
    /// Create an engine and the receiver for its lifecycle events
    #[must_use]
    pub fn new(
        config: SessionEngineConfig,
        bus: Arc<dyn EventBus>,
        cache: Arc<dyn EntityCache>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let session = ShardSession::new(config.shard_id, config.shard_count);
        let traps = TrapRegistry::new(Arc::clone(&bus));

        (
            Self {
                config,
                session,
                bus,
                cache,
                traps,
                events,
            },
            events_rx,
        )
    }

    /// Current session state
    #[must_use]
    pub fn session(&self) -> &ShardSession {
        &self.session
    }

    /// Run the engine until a fatal close
    ///
    /// Every non-fatal disconnect reconnects after the configured delay;
    /// a fatal close code surfaces as an error so the process can exit
    /// nonzero.
    pub async fn run(mut self) -> Result<(), GatewayError> {
        let mut upstream = self.bus.subscribe(GATEWAY_UPSTREAM).await?;
        let mut upstream_open = true;

        loop {
            match self.run_connection(&mut upstream, &mut upstream_open).await {
                Ok(()) => {}
                Err(GatewayError::FatalClose { code }) => {
                    tracing::error!(
                        shard = self.config.shard_id,
                        code,
                        "Gateway closed with a fatal code, shutting down"
                    );
                    return Err(GatewayError::FatalClose { code });
                }
                Err(e) => {
                    tracing::error!(shard = self.config.shard_id, error = %e, "Gateway connection error");
                }
            }

            let _ = self.events.send(SessionEvent::Reconnecting);
            tracing::info!(
                shard = self.config.shard_id,
                delay_ms = self.config.reconnect_delay.as_millis() as u64,
                "Reconnecting to gateway"
            );
            tokio::time::sleep(self.config.reconnect_delay).await;
        }
    }

    /// Run one connection until it closes
    async fn run_connection(
        &mut self,
        upstream: &mut mpsc::Receiver<pulse_core::BusMessage>,
        upstream_open: &mut bool,
    ) -> Result<(), GatewayError> {
        self.session.set_state(ConnectionState::Connecting);
        let mut transport = Transport::connect(
            &self.config.gateway_url,
            self.config.version,
            self.config.encoding,
            self.config.compress,
        )
        .await?;

        self.session.set_state(ConnectionState::AwaitingHello);
        let _ = self.events.send(SessionEvent::Connected);

        // Started once Hello arrives
        let mut heartbeat: Option<Interval> = None;

        loop {
            tokio::select! {
                event = transport.next_event() => match event {
                    TransportEvent::Message(message) => {
                        let teardown = self
                            .handle_message(&mut transport, &mut heartbeat, message)
                            .await;
                        if teardown {
                            return Ok(());
                        }
                    }
                    TransportEvent::Closed { code, reason } => {
                        tracing::warn!(
                            shard = self.config.shard_id,
                            code = ?code,
                            reason = %reason,
                            "Gateway socket closed"
                        );
                        self.session.begin_disconnect();
                        let _ = self.events.send(SessionEvent::Disconnected { code });

                        if let Some(close) = code.and_then(CloseCode::from_u16) {
                            if !close.should_reconnect() {
                                return Err(GatewayError::FatalClose { code: close.as_u16() });
                            }
                        }
                        return Ok(());
                    }
                },

                _ = Self::heartbeat_tick(heartbeat.as_mut()) => {
                    match self.session.heartbeat_due(false) {
                        HeartbeatOutcome::Send(seq) => {
                            tracing::trace!(shard = self.config.shard_id, seq = ?seq, "Sending heartbeat");
                            if let Err(e) = transport.send(&GatewayMessage::heartbeat(seq)).await {
                                tracing::warn!(error = %e, "Failed to send heartbeat");
                            }
                        }
                        HeartbeatOutcome::ForceReconnect => {
                            tracing::warn!(
                                shard = self.config.shard_id,
                                "Heartbeat never acknowledged, reconnecting to resume"
                            );
                            let _ = transport.close(CloseCode::SessionTimeout).await;
                            self.session.begin_disconnect();
                            let _ = self.events.send(SessionEvent::Disconnected {
                                code: Some(CloseCode::SessionTimeout.as_u16()),
                            });
                            return Ok(());
                        }
                    }
                },

                request = upstream.recv(), if *upstream_open => {
                    match request {
                        Some(message) => self.handle_upstream(&message).await,
                        None => {
                            tracing::warn!("Upstream bus channel closed");
                            *upstream_open = false;
                        }
                    }
                }
            }
        }
    }

    /// Tick the heartbeat interval, or wait forever before Hello
    async fn heartbeat_tick(interval: Option<&mut Interval>) {
        match interval {
            Some(interval) => {
                interval.tick().await;
            }
            None => std::future::pending().await,
        }
    }

    /// Handle one inbound gateway message
    ///
    /// Returns true when the connection was deliberately torn down and the
    /// caller should fall into the reconnect path.
    async fn handle_message(
        &mut self,
        transport: &mut Transport,
        heartbeat: &mut Option<Interval>,
        message: GatewayMessage,
    ) -> bool {
        self.session.observe_seq(message.s);

        match message.op {
            OpCode::Dispatch => {
                self.handle_dispatch(&message).await;
                false
            }
            OpCode::Heartbeat => {
                // The server requested an immediate beat
                if let HeartbeatOutcome::Send(seq) = self.session.heartbeat_due(true) {
                    if let Err(e) = transport.send(&GatewayMessage::heartbeat(seq)).await {
                        tracing::warn!(error = %e, "Failed to answer heartbeat request");
                    }
                }
                false
            }
            OpCode::Reconnect => {
                tracing::info!(shard = self.config.shard_id, "Gateway requested reconnect");
                self.session.mark_resume_eligible();
                let _ = transport.close(CloseCode::NormalClosure).await;
                self.session.begin_disconnect();
                let _ = self.events.send(SessionEvent::Disconnected {
                    code: Some(CloseCode::NormalClosure.as_u16()),
                });
                true
            }
            OpCode::InvalidSession => {
                let resumable = message.invalid_session_resumable();
                tracing::warn!(
                    shard = self.config.shard_id,
                    resumable,
                    "Gateway invalidated session"
                );
                self.session.on_invalid_session(resumable);
                // Re-authenticate on the same connection, no new socket
                self.authenticate(transport).await;
                false
            }
            OpCode::Hello => {
                let Some(hello) = message.as_hello() else {
                    tracing::warn!("Dropping Hello without a heartbeat interval");
                    return false;
                };

                tracing::debug!(
                    shard = self.config.shard_id,
                    interval_ms = hello.heartbeat_interval,
                    "Received Hello"
                );

                let period = Duration::from_millis(hello.heartbeat_interval);
                let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                *heartbeat = Some(interval);

                self.authenticate(transport).await;
                false
            }
            OpCode::HeartbeatAck => {
                self.session.ack_heartbeat();
                false
            }
            OpCode::Identify | OpCode::Resume => {
                tracing::warn!(op = %message.op, "Dropping send-only op code from server");
                false
            }
        }
    }

    /// Send Resume or Identify depending on session state
    async fn authenticate(&mut self, transport: &mut Transport) {
        let message = match self.session.auth_action() {
            AuthAction::Resume { session_id, seq } => {
                tracing::info!(
                    shard = self.config.shard_id,
                    session_id = %session_id,
                    seq = ?seq,
                    "Resuming session"
                );
                GatewayMessage::resume(&ResumePayload {
                    token: self.config.token.clone(),
                    session_id,
                    seq,
                    intents: self.config.intents,
                })
            }
            AuthAction::Identify => {
                tracing::info!(
                    shard = self.config.shard_id,
                    intents = self.config.intents.bits(),
                    "Identifying new session"
                );
                GatewayMessage::identify(&IdentifyPayload::new(
                    &self.config.token,
                    self.config.shard_id,
                    self.config.shard_count,
                    self.config.intents,
                ))
            }
        };

        if let Err(e) = transport.send(&message).await {
            tracing::warn!(error = %e, "Failed to send authentication");
        }
    }

    /// Handle one dispatch event
    async fn handle_dispatch(&mut self, message: &GatewayMessage) {
        let Some(event) = message.event_name().map(str::to_owned) else {
            tracing::warn!("Dropping dispatch without an event name");
            return;
        };
        let data = message.d.clone().unwrap_or(Value::Null);

        match event.as_str() {
            "READY" => {
                let ready: ReadyPayload = match serde_json::from_value(data) {
                    Ok(ready) => ready,
                    Err(e) => {
                        tracing::warn!(error = %e, "Dropping malformed READY payload");
                        return;
                    }
                };

                let shard_matches = ready.shard
                    == Some([self.config.shard_id, self.config.shard_count]);
                tracing::info!(
                    shard = self.config.shard_id,
                    version = ready.v,
                    session_id = %ready.session_id,
                    guilds = ready.guilds.len(),
                    shard_matches,
                    "Session ready"
                );

                let session_id = ready.session_id.clone();
                self.session
                    .on_ready(ready.session_id, ready.guilds.iter().map(|g| g.id));
                let _ = self.events.send(SessionEvent::Ready { session_id });
                return;
            }
            "RESUMED" => {
                tracing::info!(shard = self.config.shard_id, "Session resumed");
                self.session.on_resumed();
                let _ = self.events.send(SessionEvent::Resumed);
            }
            "GUILD_CREATE" => {
                if let Some(guild_id) = data.get("id").and_then(Self::parse_id) {
                    match self.session.on_guild_create(guild_id) {
                        GuildCreateOutcome::Tracked => {
                            self.persist_guild(guild_id, &data).await;
                            // Suppressed until the expected set drains
                            return;
                        }
                        GuildCreateOutcome::HydrationComplete(guild_ids) => {
                            self.persist_guild(guild_id, &data).await;
                            self.publish_hydrated(guild_ids).await;
                            return;
                        }
                        GuildCreateOutcome::Passthrough => {}
                    }
                }
            }
            _ => {}
        }

        self.traps.dispatch(&event, &data).await;
        self.republish(&event, data).await;
    }

    fn parse_id(value: &Value) -> Option<Snowflake> {
        serde_json::from_value(value.clone()).ok()
    }

    /// Hand a hydrated guild to the external cache; losing it only costs a
    /// re-fetch, so failures are logged and ignored
    async fn persist_guild(&self, guild_id: Snowflake, data: &Value) {
        let key = format!("guild:{guild_id}");
        if let Err(e) = self.cache.set(&key, &data.to_string()).await {
            tracing::warn!(guild_id = %guild_id, error = %e, "Failed to persist guild");
        }
    }

    /// Publish the once-per-session hydration event
    async fn publish_hydrated(&mut self, guild_ids: Vec<Snowflake>) {
        tracing::info!(
            shard = self.config.shard_id,
            guilds = guild_ids.len(),
            "All expected guilds hydrated"
        );

        let payload = GuildsHydrated {
            guild_ids: guild_ids.clone(),
        };
        match serde_json::to_string(&payload) {
            Ok(json) => {
                if let Err(e) = self.bus.publish(GUILDS_CHANNEL, &json).await {
                    tracing::error!(error = %e, "Failed to publish hydration event");
                }
            }
            Err(e) => tracing::error!(error = %e, "Failed to encode hydration event"),
        }

        let _ = self.events.send(SessionEvent::HydrationComplete { guild_ids });
    }

    /// Republish a dispatch, unchanged, onto the downstream channel
    async fn republish(&self, event: &str, data: Value) {
        let dispatch = DispatchEvent::new(event, data);
        match serde_json::to_string(&dispatch) {
            Ok(json) => {
                if let Err(e) = self.bus.publish(GATEWAY_DOWNSTREAM, &json).await {
                    tracing::error!(event = %event, error = %e, "Failed to republish dispatch");
                }
            }
            Err(e) => tracing::error!(event = %event, error = %e, "Failed to encode dispatch"),
        }
    }

    /// Serve one upstream request (trap registration)
    async fn handle_upstream(&mut self, message: &pulse_core::BusMessage) {
        let envelope: RequestEnvelope = match serde_json::from_str(&message.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed upstream request");
                return;
            }
        };

        let kind = envelope.body.get("type").and_then(Value::as_str);
        if kind != Some("dispatch") {
            tracing::debug!(kind = ?kind, "Ignoring unknown upstream request");
            return;
        }

        let Some(trap_value) = envelope.body.get("trap") else {
            return;
        };
        let request: TrapRequest = match serde_json::from_value(trap_value.clone()) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed trap registration");
                return;
            }
        };

        let key = self.traps.register(request.conditions, request.duration);
        let reply = serde_json::json!({ "key": key }).to_string();
        if let Err(e) = self.bus.publish(&envelope.reply_to, &reply).await {
            tracing::warn!(error = %e, "Failed to reply to trap registration");
        }
    }
}

impl std::fmt::Debug for SessionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionEngine")
            .field("shard", &self.config.shard_id)
            .field("state", &self.session.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pulse_core::{BusMessage, BusResult, CacheResult};
    use std::collections::HashMap;
    use tokio::sync::Mutex;

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
            unimplemented!("engine never issues requests")
        }
    }

    #[derive(Default)]
    struct RecordingCache {
        entries: Mutex<HashMap<String, String>>,
    }

    #[async_trait]
    impl EntityCache for RecordingCache {
        async fn set(&self, key: &str, value: &str) -> CacheResult<()> {
            self.entries
                .lock()
                .await
                .insert(key.to_string(), value.to_string());
            Ok(())
        }

        async fn get(&self, key: &str) -> CacheResult<Option<String>> {
            Ok(self.entries.lock().await.get(key).cloned())
        }

        async fn delete(&self, key: &str) -> CacheResult<bool> {
            Ok(self.entries.lock().await.remove(key).is_some())
        }
    }

    fn engine() -> (
        SessionEngine,
        mpsc::UnboundedReceiver<SessionEvent>,
        Arc<RecordingBus>,
        Arc<RecordingCache>,
    ) {
        let bus = Arc::new(RecordingBus::default());
        let cache = Arc::new(RecordingCache::default());
        let config = SessionEngineConfig {
            token: "token".to_string(),
            intents: Intents::GUILDS,
            shard_id: 0,
            shard_count: 1,
            gateway_url: "wss://gateway.invalid".to_string(),
            version: 8,
            encoding: Encoding::Json,
            compress: false,
            reconnect_delay: Duration::from_millis(10),
        };
        let (engine, events) = SessionEngine::new(config, bus.clone(), cache.clone());
        (engine, events, bus, cache)
    }

    fn dispatch(event: &str, seq: u64, data: Value) -> GatewayMessage {
        GatewayMessage {
            op: OpCode::Dispatch,
            t: Some(event.to_string()),
            s: Some(seq),
            d: Some(data),
        }
    }

    #[tokio::test]
    async fn test_ready_stores_session_and_expected_guilds() {
        let (mut engine, mut events, _bus, _cache) = engine();

        engine
            .handle_dispatch(&dispatch(
                "READY",
                1,
                serde_json::json!({
                    "v": 8,
                    "session_id": "sess-1",
                    "guilds": [{"id": "1"}, {"id": "2"}],
                    "shard": [0, 1],
                }),
            ))
            .await;

        assert_eq!(engine.session().session_id(), Some("sess-1"));
        assert_eq!(engine.session().expected_guilds().len(), 2);
        assert_eq!(
            events.try_recv().unwrap(),
            SessionEvent::Ready {
                session_id: "sess-1".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_hydration_suppresses_then_fires_once() {
        let (mut engine, mut events, bus, cache) = engine();

        engine
            .handle_dispatch(&dispatch(
                "READY",
                1,
                serde_json::json!({
                    "v": 8,
                    "session_id": "sess-1",
                    "guilds": [{"id": "1"}, {"id": "2"}],
                }),
            ))
            .await;
        let _ = events.try_recv();

        engine
            .handle_dispatch(&dispatch(
                "GUILD_CREATE",
                2,
                serde_json::json!({"id": "1", "name": "first"}),
            ))
            .await;

        // Suppressed: nothing republished yet, but the guild is persisted
        assert!(bus.published.lock().await.is_empty());
        assert!(cache.entries.lock().await.contains_key("guild:1"));
        assert!(events.try_recv().is_err());

        engine
            .handle_dispatch(&dispatch(
                "GUILD_CREATE",
                3,
                serde_json::json!({"id": "2", "name": "second"}),
            ))
            .await;

        // Completion: one hydration event on the guilds channel
        let published = bus.published.lock().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, GUILDS_CHANNEL);
        assert!(published[0].1.contains("\"1\""));
        assert!(published[0].1.contains("\"2\""));
        drop(published);

        assert!(matches!(
            events.try_recv().unwrap(),
            SessionEvent::HydrationComplete { guild_ids } if guild_ids.len() == 2
        ));
    }

    #[tokio::test]
    async fn test_unexpected_guild_create_republishes() {
        let (mut engine, _events, bus, cache) = engine();

        engine
            .handle_dispatch(&dispatch(
                "GUILD_CREATE",
                5,
                serde_json::json!({"id": "99", "name": "stray"}),
            ))
            .await;

        let published = bus.published.lock().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, GATEWAY_DOWNSTREAM);
        let event: DispatchEvent = serde_json::from_str(&published[0].1).unwrap();
        assert_eq!(event.event, "GUILD_CREATE");
        // Not part of hydration: nothing persisted
        assert!(cache.entries.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_ordinary_dispatch_republished_unchanged() {
        let (mut engine, _events, bus, _cache) = engine();

        engine
            .handle_dispatch(&dispatch(
                "MESSAGE_CREATE",
                7,
                serde_json::json!({"id": "10", "content": "hello"}),
            ))
            .await;

        let published = bus.published.lock().await;
        assert_eq!(published.len(), 1);
        let event: DispatchEvent = serde_json::from_str(&published[0].1).unwrap();
        assert_eq!(event.event, "MESSAGE_CREATE");
        assert_eq!(event.data["content"], "hello");
    }

    #[tokio::test]
    async fn test_upstream_trap_registration_replies_with_key() {
        let (mut engine, _events, bus, _cache) = engine();

        let envelope = RequestEnvelope {
            reply_to: "reply:test".to_string(),
            body: serde_json::json!({
                "type": "dispatch",
                "trap": {
                    "conditions": ["MESSAGE_CREATE", {"channel_id": "42"}],
                    "duration": 30_000,
                },
            }),
        };
        let message = BusMessage {
            channel: GATEWAY_UPSTREAM.to_string(),
            payload: serde_json::to_string(&envelope).unwrap(),
        };

        engine.handle_upstream(&message).await;

        let published = bus.published.lock().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "reply:test");
        let reply: Value = serde_json::from_str(&published[0].1).unwrap();
        assert!(reply["key"].is_string());
        assert_eq!(engine.traps.len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_upstream_request_is_dropped() {
        let (mut engine, _events, bus, _cache) = engine();

        let message = BusMessage {
            channel: GATEWAY_UPSTREAM.to_string(),
            payload: "not json".to_string(),
        };
        engine.handle_upstream(&message).await;

        assert!(bus.published.lock().await.is_empty());
        assert!(engine.traps.is_empty());
    }
}
