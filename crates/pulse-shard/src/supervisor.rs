//! Sharding process supervisor
//!
//! Owns the shard fleet: resolves the shard count, starts one isolated
//! unit per shard id staggered to satisfy platform identify limits, and
//! respawns units that die unexpectedly.

use crate::error::{ShardError, ShardResult};
use crate::unit::{ShardUnit, UnitEvent, UnitLaunch};
use pulse_common::ShardCount;
use pulse_rest::RestClient;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Lifecycle transition of one shard unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEventKind {
    Spawned,
    Ready,
    Disconnected,
    Reconnecting,
    Died { code: Option<i32> },
}

/// One supervisor notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorEvent {
    pub shard_id: u16,
    pub kind: SupervisorEventKind,
}

/// Supervisor configuration
#[derive(Debug, Clone)]
pub struct ShardSupervisorConfig {
    /// Executable spawned in child mode for each unit
    pub program: PathBuf,
    /// Explicit shard count, or auto via the bootstrap query
    pub shards: ShardCount,
    /// Authentication token passed to units
    pub token: String,
    /// Gateway URL override; resolved via the bootstrap query when unset
    pub gateway_url: Option<String>,
    /// Restart units that die unexpectedly
    pub respawn: bool,
    /// Delay before restarting a dead unit
    pub respawn_delay: Duration,
    /// Delay between consecutive unit starts
    pub stagger_delay: Duration,
}

impl ShardSupervisorConfig {
    /// Build from the loaded application config, spawning the current
    /// executable for each unit
    pub fn from_app(config: &pulse_common::AppConfig) -> std::io::Result<Self> {
        Ok(Self {
            program: std::env::current_exe()?,
            shards: config.gateway.shards,
            token: config.gateway.token.clone(),
            gateway_url: config.gateway.url.clone(),
            respawn: config.supervisor.respawn,
            respawn_delay: Duration::from_millis(config.supervisor.respawn_delay_ms),
            stagger_delay: Duration::from_millis(config.supervisor.stagger_delay_ms),
        })
    }
}

/// Supervisor owning the full shard fleet
pub struct ShardSupervisor {
    config: ShardSupervisorConfig,
    rest: Arc<RestClient>,
    units: HashMap<u16, ShardUnit>,
    unit_tx: mpsc::UnboundedSender<(u16, UnitEvent)>,
    unit_rx: mpsc::UnboundedReceiver<(u16, UnitEvent)>,
    events: mpsc::UnboundedSender<SupervisorEvent>,
    gateway_url: Option<String>,
    shard_count: Option<u16>,
}

impl ShardSupervisor {
    /// Create a supervisor and the receiver for its notifications
    #[must_use]
    pub fn new(
        config: ShardSupervisorConfig,
        rest: Arc<RestClient>,
    ) -> (Self, mpsc::UnboundedReceiver<SupervisorEvent>) {
        let (unit_tx, unit_rx) = mpsc::unbounded_channel();
        let (events, events_rx) = mpsc::unbounded_channel();

        (
            Self {
                config,
                rest,
                units: HashMap::new(),
                unit_tx,
                unit_rx,
                events,
                gateway_url: None,
                shard_count: None,
            },
            events_rx,
        )
    }

    /// Resolve the shard count and gateway URL
    async fn resolve(&mut self) -> ShardResult<(u16, String)> {
        match (self.config.shards, self.config.gateway_url.clone()) {
            (ShardCount::Fixed(count), Some(url)) => Ok((count, url)),
            (ShardCount::Fixed(count), None) => {
                let info = self.rest.fetch_gateway().await?;
                Ok((count, info.url))
            }
            (ShardCount::Auto, url_override) => {
                let info = self.rest.fetch_gateway().await?;
                let count = info.shards.ok_or(ShardError::MissingShardCount)?;
                if let Some(limit) = &info.session_start_limit {
                    tracing::info!(
                        remaining = limit.remaining,
                        total = limit.total,
                        "Identify budget"
                    );
                }
                Ok((count, url_override.unwrap_or(info.url)))
            }
        }
    }

    /// Resolve, then start every unit with the configured stagger delay
    pub async fn spawn(&mut self) -> ShardResult<u16> {
        let (count, url) = self.resolve().await?;
        self.gateway_url = Some(url);
        self.shard_count = Some(count);

        tracing::info!(shards = count, "Spawning shard fleet");

        for shard_id in 0..count {
            self.spawn_unit(shard_id)?;
            if shard_id + 1 < count {
                tokio::time::sleep(self.config.stagger_delay).await;
            }
        }

        Ok(count)
    }

    /// Launch parameters for one shard id
    fn launch_for(&self, shard_id: u16) -> UnitLaunch {
        UnitLaunch {
            program: self.config.program.clone(),
            shard_id,
            shard_count: self.shard_count.unwrap_or(1),
            gateway_url: self.gateway_url.clone().unwrap_or_default(),
            token: self.config.token.clone(),
        }
    }

    /// Start one unit and track it
    fn spawn_unit(&mut self, shard_id: u16) -> ShardResult<()> {
        let launch = self.launch_for(shard_id);
        let unit = ShardUnit::spawn(&launch, self.unit_tx.clone())?;
        self.units.insert(shard_id, unit);
        self.emit(shard_id, SupervisorEventKind::Spawned);
        Ok(())
    }

    /// Deliberately terminate one unit; it will not be respawned
    pub fn kill(&mut self, shard_id: u16) {
        if let Some(unit) = self.units.get_mut(&shard_id) {
            unit.kill();
        }
    }

    fn emit(&self, shard_id: u16, kind: SupervisorEventKind) {
        let _ = self.events.send(SupervisorEvent { shard_id, kind });
    }

    /// Spawn the fleet, then supervise it
    ///
    /// Runs until the process is terminated, restarting dead units when
    /// respawn is configured and the death was not a deliberate kill.
    pub async fn run(mut self) -> ShardResult<()> {
        self.spawn().await?;

        while let Some((shard_id, event)) = self.unit_rx.recv().await {
            match event {
                UnitEvent::Ready { session_id } => {
                    tracing::info!(shard = shard_id, session_id = ?session_id, "Shard ready");
                    self.emit(shard_id, SupervisorEventKind::Ready);
                }
                UnitEvent::Disconnected => {
                    tracing::warn!(shard = shard_id, "Shard disconnected");
                    self.emit(shard_id, SupervisorEventKind::Disconnected);
                }
                UnitEvent::Reconnecting => {
                    tracing::info!(shard = shard_id, "Shard reconnecting");
                    self.emit(shard_id, SupervisorEventKind::Reconnecting);
                }
                UnitEvent::Died { code } => {
                    self.emit(shard_id, SupervisorEventKind::Died { code });

                    let armed = self
                        .units
                        .remove(&shard_id)
                        .is_some_and(|unit| unit.respawn_armed());

                    if armed && self.config.respawn {
                        tracing::warn!(shard = shard_id, code = ?code, "Shard unit died, respawning");
                        tokio::time::sleep(self.config.respawn_delay).await;
                        if let Err(e) = self.spawn_unit(shard_id) {
                            tracing::error!(shard = shard_id, error = %e, "Failed to respawn unit");
                        }
                    } else {
                        tracing::info!(shard = shard_id, code = ?code, "Shard unit exited, not respawning");
                    }
                }
            }
        }

        Ok(())
    }
}

impl std::fmt::Debug for ShardSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardSupervisor")
            .field("units", &self.units.len())
            .field("shard_count", &self.shard_count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pulse_rest::{
        ApiRequest, HttpResponse, HttpTransport, RestClientConfig, TransportFailure,
    };
    use std::collections::HashMap as StdHashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    struct BootstrapTransport {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl HttpTransport for BootstrapTransport {
        async fn perform(&self, _request: &ApiRequest) -> Result<HttpResponse, TransportFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut headers = StdHashMap::new();
            headers.insert("content-type".to_string(), "application/json".to_string());
            Ok(HttpResponse {
                status: 200,
                headers,
                body: br#"{"url": "wss://resolved.example", "shards": 3,
                           "session_start_limit": {"total": 1000, "remaining": 999, "reset_after": 0}}"#
                    .to_vec(),
            })
        }
    }

    fn rest(transport: Arc<BootstrapTransport>) -> Arc<RestClient> {
        let config = RestClientConfig::new("https://api.example", "token");
        Arc::new(RestClient::with_transport(&config, transport))
    }

    fn config(shards: ShardCount, program: &str) -> ShardSupervisorConfig {
        ShardSupervisorConfig {
            program: PathBuf::from(program),
            shards,
            token: "token".to_string(),
            gateway_url: None,
            respawn: false,
            respawn_delay: Duration::from_millis(500),
            stagger_delay: Duration::from_millis(5_000),
        }
    }

    #[tokio::test]
    async fn test_resolve_fixed_with_override_skips_bootstrap() {
        let transport = Arc::new(BootstrapTransport {
            calls: AtomicUsize::new(0),
        });
        let mut cfg = config(ShardCount::Fixed(2), "/bin/true");
        cfg.gateway_url = Some("wss://override.example".to_string());
        let (mut supervisor, _events) = ShardSupervisor::new(cfg, rest(transport.clone()));

        let (count, url) = supervisor.resolve().await.unwrap();
        assert_eq!(count, 2);
        assert_eq!(url, "wss://override.example");
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_resolve_auto_uses_bootstrap() {
        let transport = Arc::new(BootstrapTransport {
            calls: AtomicUsize::new(0),
        });
        let (mut supervisor, _events) =
            ShardSupervisor::new(config(ShardCount::Auto, "/bin/true"), rest(transport.clone()));

        let (count, url) = supervisor.resolve().await.unwrap();
        assert_eq!(count, 3);
        assert_eq!(url, "wss://resolved.example");
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_launch_carries_shard_pair() {
        let transport = Arc::new(BootstrapTransport {
            calls: AtomicUsize::new(0),
        });
        let (mut supervisor, _events) =
            ShardSupervisor::new(config(ShardCount::Fixed(3), "/bin/true"), rest(transport));
        supervisor.shard_count = Some(3);
        supervisor.gateway_url = Some("wss://resolved.example".to_string());

        for shard_id in 0..3 {
            let launch = supervisor.launch_for(shard_id);
            assert_eq!(launch.shard_id, shard_id);
            assert_eq!(launch.shard_count, 3);
            assert_eq!(launch.gateway_url, "wss://resolved.example");
        }
    }

    #[cfg(unix)]
    #[tokio::test(start_paused = true)]
    async fn test_spawn_staggers_unit_starts() {
        let transport = Arc::new(BootstrapTransport {
            calls: AtomicUsize::new(0),
        });
        let mut cfg = config(ShardCount::Fixed(3), "/bin/cat");
        cfg.gateway_url = Some("wss://gw.example".to_string());
        let (mut supervisor, mut events) = ShardSupervisor::new(cfg, rest(transport));

        let start = Instant::now();
        let count = supervisor.spawn().await.unwrap();
        assert_eq!(count, 3);
        // Two stagger delays between three spawns
        assert!(start.elapsed() >= Duration::from_millis(10_000));

        for expected in 0..3 {
            let event = events.recv().await.unwrap();
            assert_eq!(event.shard_id, expected);
            assert_eq!(event.kind, SupervisorEventKind::Spawned);
        }

        for shard_id in 0..3 {
            supervisor.kill(shard_id);
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_dead_unit_respawns_after_delay() {
        let transport = Arc::new(BootstrapTransport {
            calls: AtomicUsize::new(0),
        });
        // /bin/true exits immediately, driving the respawn path
        let mut cfg = config(ShardCount::Fixed(1), "/bin/true");
        cfg.gateway_url = Some("wss://gw.example".to_string());
        cfg.respawn = true;
        cfg.respawn_delay = Duration::from_millis(50);
        let (supervisor, mut events) = ShardSupervisor::new(cfg, rest(transport));

        let handle = tokio::spawn(supervisor.run());

        let mut kinds = Vec::new();
        for _ in 0..3 {
            let event = tokio::time::timeout(Duration::from_secs(10), events.recv())
                .await
                .expect("event expected")
                .unwrap();
            kinds.push(event.kind);
        }

        assert_eq!(kinds[0], SupervisorEventKind::Spawned);
        assert!(matches!(kinds[1], SupervisorEventKind::Died { .. }));
        assert_eq!(kinds[2], SupervisorEventKind::Spawned);

        handle.abort();
    }
}
