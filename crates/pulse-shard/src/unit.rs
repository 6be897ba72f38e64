//! Isolated shard units
//!
//! One OS process per shard: the respawn-on-crash policy assumes
//! independent failure domains. The unit reports lifecycle transitions as
//! JSON lines on stdout; the supervisor can write to its stdin.

use crate::error::{ShardError, ShardResult};
use crate::messages::UnitMessage;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};
use tokio::sync::{mpsc, oneshot};

/// Environment variable carrying the unit's shard id
pub const ENV_SHARD_ID: &str = "PULSE_SHARD_ID";
/// Environment variable carrying the total shard count
pub const ENV_SHARD_COUNT: &str = "PULSE_SHARD_COUNT";
/// Environment variable carrying the resolved gateway URL
pub const ENV_GATEWAY_URL: &str = "PULSE_GATEWAY_URL";
/// Environment variable carrying the authentication token
pub const ENV_TOKEN: &str = "PULSE_TOKEN";

/// Everything needed to start one unit
#[derive(Debug, Clone)]
pub struct UnitLaunch {
    /// Executable run in child mode (usually the current binary)
    pub program: PathBuf,
    pub shard_id: u16,
    pub shard_count: u16,
    pub gateway_url: String,
    pub token: String,
}

impl UnitLaunch {
    /// Environment pairs passed to the child, alongside the inherited env
    #[must_use]
    pub fn env(&self) -> Vec<(&'static str, String)> {
        vec![
            (ENV_SHARD_ID, self.shard_id.to_string()),
            (ENV_SHARD_COUNT, self.shard_count.to_string()),
            (ENV_GATEWAY_URL, self.gateway_url.clone()),
            (ENV_TOKEN, self.token.clone()),
        ]
    }
}

/// Lifecycle notification from one unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitEvent {
    Ready { session_id: Option<String> },
    Disconnected,
    Reconnecting,
    Died { code: Option<i32> },
}

/// Handle to one running shard process
pub struct ShardUnit {
    id: u16,
    stdin: Option<ChildStdin>,
    kill_tx: Option<oneshot::Sender<()>>,
    respawn_armed: bool,
}

impl ShardUnit {
    /// Spawn the unit process and start watching it
    ///
    /// Lifecycle messages read from the child's stdout, and its eventual
    /// death, arrive as `(shard_id, UnitEvent)` on `events`.
    pub fn spawn(
        launch: &UnitLaunch,
        events: mpsc::UnboundedSender<(u16, UnitEvent)>,
    ) -> ShardResult<Self> {
        let mut command = Command::new(&launch.program);
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        for (key, value) in launch.env() {
            command.env(key, value);
        }

        let mut child = command.spawn().map_err(ShardError::Spawn)?;
        let shard_id = launch.shard_id;

        tracing::info!(
            shard = shard_id,
            program = %launch.program.display(),
            "Shard unit spawned"
        );

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();

        // Forward stdout lifecycle lines
        if let Some(stdout) = stdout {
            let events = events.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    match UnitMessage::from_line(&line) {
                        Ok(message) => {
                            let event = match message {
                                UnitMessage::Ready { session_id } => {
                                    UnitEvent::Ready { session_id }
                                }
                                UnitMessage::Disconnected => UnitEvent::Disconnected,
                                UnitMessage::Reconnecting => UnitEvent::Reconnecting,
                            };
                            if events.send((shard_id, event)).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::debug!(shard = shard_id, error = %e, "Ignoring unit stdout line");
                        }
                    }
                }
            });
        }

        // Watch for exit or a kill signal
        let (kill_tx, mut kill_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let code = tokio::select! {
                status = child.wait() => status.ok().and_then(|s| s.code()),
                _ = &mut kill_rx => {
                    let _ = child.kill().await;
                    child.wait().await.ok().and_then(|s| s.code())
                }
            };
            let _ = events.send((shard_id, UnitEvent::Died { code }));
        });

        Ok(Self {
            id: shard_id,
            stdin,
            kill_tx: Some(kill_tx),
            respawn_armed: true,
        })
    }

    /// The shard id this unit serves
    #[must_use]
    pub fn id(&self) -> u16 {
        self.id
    }

    /// Whether exit-triggered respawn is still armed
    #[must_use]
    pub fn respawn_armed(&self) -> bool {
        self.respawn_armed
    }

    /// Write one JSON line to the unit's stdin
    pub async fn send(&mut self, message: &serde_json::Value) -> ShardResult<()> {
        let stdin = self.stdin.as_mut().ok_or(ShardError::NotRunning)?;
        let mut line = serde_json::to_string(message)?;
        line.push('\n');
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(ShardError::Write)
    }

    /// Terminate the unit
    ///
    /// Disarms the exit-triggered respawn first, so a deliberate kill never
    /// respawns.
    pub fn kill(&mut self) {
        self.respawn_armed = false;
        self.stdin = None;
        if let Some(kill_tx) = self.kill_tx.take() {
            let _ = kill_tx.send(());
        }
        tracing::info!(shard = self.id, "Shard unit killed");
    }
}

impl std::fmt::Debug for ShardUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardUnit")
            .field("id", &self.id)
            .field("respawn_armed", &self.respawn_armed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launch_env_pairs() {
        let launch = UnitLaunch {
            program: PathBuf::from("/bin/true"),
            shard_id: 2,
            shard_count: 4,
            gateway_url: "wss://gateway.example".to_string(),
            token: "secret".to_string(),
        };

        let env = launch.env();
        assert!(env.contains(&(ENV_SHARD_ID, "2".to_string())));
        assert!(env.contains(&(ENV_SHARD_COUNT, "4".to_string())));
        assert!(env.contains(&(ENV_GATEWAY_URL, "wss://gateway.example".to_string())));
        assert!(env.contains(&(ENV_TOKEN, "secret".to_string())));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_reports_death() {
        let launch = UnitLaunch {
            program: PathBuf::from("/bin/true"),
            shard_id: 0,
            shard_count: 1,
            gateway_url: String::new(),
            token: String::new(),
        };
        let (tx, mut rx) = mpsc::unbounded_channel();

        let _unit = ShardUnit::spawn(&launch, tx).unwrap();
        let (shard_id, event) = rx.recv().await.unwrap();
        assert_eq!(shard_id, 0);
        assert_eq!(event, UnitEvent::Died { code: Some(0) });
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_kill_disarms_respawn_and_terminates() {
        let launch = UnitLaunch {
            program: PathBuf::from("/bin/cat"),
            shard_id: 1,
            shard_count: 1,
            gateway_url: String::new(),
            token: String::new(),
        };
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut unit = ShardUnit::spawn(&launch, tx).unwrap();
        assert!(unit.respawn_armed());

        unit.kill();
        assert!(!unit.respawn_armed());

        let (_, event) = rx.recv().await.unwrap();
        assert!(matches!(event, UnitEvent::Died { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_send_writes_json_line() {
        let launch = UnitLaunch {
            program: PathBuf::from("/bin/cat"),
            shard_id: 1,
            shard_count: 1,
            gateway_url: String::new(),
            token: String::new(),
        };
        let (tx, _rx) = mpsc::unbounded_channel();

        let mut unit = ShardUnit::spawn(&launch, tx).unwrap();
        unit.send(&serde_json::json!({"op": "status"})).await.unwrap();

        unit.kill();
        assert!(unit.send(&serde_json::json!({})).await.is_err());
    }
}
