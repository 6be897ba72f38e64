//! Shard session state
//!
//! One `ShardSession` per shard, owned exclusively by its engine task.
//! All transitions are synchronous; the engine performs I/O around them.

use pulse_core::Snowflake;
use std::collections::HashSet;

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket
    Disconnected,
    /// Socket opening
    Connecting,
    /// Socket open, waiting for Hello
    AwaitingHello,
    /// Identify sent, waiting for READY
    Identifying,
    /// Resume sent, waiting for replay
    Resuming,
    /// Authenticated and receiving dispatches
    Connected,
}

/// What to do when the heartbeat timer fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// Send a heartbeat carrying this sequence number
    Send(Option<u64>),
    /// The previous heartbeat was never acknowledged; the connection is a
    /// zombie and must be torn down with the session marked resumable
    ForceReconnect,
}

/// How to authenticate on the current connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthAction {
    /// Start a fresh session
    Identify,
    /// Continue a prior session
    Resume {
        session_id: String,
        seq: Option<u64>,
    },
}

/// Result of observing a GUILD_CREATE during hydration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuildCreateOutcome {
    /// The guild was expected; keep waiting for the rest
    Tracked,
    /// The guild was expected and completed the set; ids are drained in
    /// arrival order
    HydrationComplete(Vec<Snowflake>),
    /// Not part of hydration; falls through to normal dispatch
    Passthrough,
}

/// Per-shard protocol session state
#[derive(Debug)]
pub struct ShardSession {
    shard_id: u16,
    shard_count: u16,
    session_id: Option<String>,
    last_seq: Option<u64>,
    close_seq: Option<u64>,
    resume_eligible: bool,
    heartbeat_acked: bool,
    expected_guilds: HashSet<Snowflake>,
    pending_guilds: Vec<Snowflake>,
    state: ConnectionState,
}

impl ShardSession {
    /// Create a fresh session for one shard
    #[must_use]
    pub fn new(shard_id: u16, shard_count: u16) -> Self {
        Self {
            shard_id,
            shard_count,
            session_id: None,
            last_seq: None,
            close_seq: None,
            resume_eligible: false,
            heartbeat_acked: true,
            expected_guilds: HashSet::new(),
            pending_guilds: Vec::new(),
            state: ConnectionState::Disconnected,
        }
    }

    pub fn shard_id(&self) -> u16 {
        self.shard_id
    }

    pub fn shard_count(&self) -> u16 {
        self.shard_count
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn last_seq(&self) -> Option<u64> {
        self.last_seq
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
    }

    /// Record an observed sequence number; never decreases
    pub fn observe_seq(&mut self, seq: Option<u64>) {
        if let Some(seq) = seq {
            if seq > self.last_seq.unwrap_or(0) {
                self.last_seq = Some(seq);
            }
        }
    }

    /// Decide what the heartbeat timer should do
    ///
    /// `forced` heartbeats (server-requested via op 1) are always sent.
    pub fn heartbeat_due(&mut self, forced: bool) -> HeartbeatOutcome {
        if !self.heartbeat_acked && !forced {
            self.resume_eligible = true;
            return HeartbeatOutcome::ForceReconnect;
        }

        self.heartbeat_acked = false;
        HeartbeatOutcome::Send(self.last_seq)
    }

    /// Record a heartbeat acknowledgement
    pub fn ack_heartbeat(&mut self) {
        self.heartbeat_acked = true;
    }

    pub fn is_heartbeat_acked(&self) -> bool {
        self.heartbeat_acked
    }

    /// Mark the session as resumable ahead of a deliberate reconnect
    pub fn mark_resume_eligible(&mut self) {
        self.resume_eligible = true;
    }

    /// Decide how to authenticate on the current connection
    ///
    /// Resume is used at most once per eligibility grant; both paths clear
    /// the flag.
    pub fn auth_action(&mut self) -> AuthAction {
        if self.resume_eligible {
            if let Some(session_id) = self.session_id.clone() {
                self.resume_eligible = false;
                self.state = ConnectionState::Resuming;
                return AuthAction::Resume {
                    session_id,
                    seq: self.close_seq.or(self.last_seq),
                };
            }
        }

        self.resume_eligible = false;
        self.state = ConnectionState::Identifying;
        AuthAction::Identify
    }

    /// Snapshot sequence state at disconnect so a later Resume can replay
    /// from the right position
    pub fn begin_disconnect(&mut self) {
        self.close_seq = self.last_seq;
        self.last_seq = None;
        self.heartbeat_acked = true;
        self.state = ConnectionState::Disconnected;
    }

    /// Apply an Invalid Session notification
    pub fn on_invalid_session(&mut self, resumable: bool) {
        if !resumable {
            self.session_id = None;
            self.last_seq = None;
        }
        self.resume_eligible = resumable;
    }

    /// Apply a READY dispatch
    pub fn on_ready(&mut self, session_id: String, guild_ids: impl IntoIterator<Item = Snowflake>) {
        self.session_id = Some(session_id);
        self.expected_guilds = guild_ids.into_iter().collect();
        self.pending_guilds.clear();
        self.state = ConnectionState::Connected;
    }

    /// Apply a successful Resume
    pub fn on_resumed(&mut self) {
        self.state = ConnectionState::Connected;
    }

    /// Ids still awaited before hydration completes
    pub fn expected_guilds(&self) -> &HashSet<Snowflake> {
        &self.expected_guilds
    }

    /// Observe a GUILD_CREATE for hydration tracking
    ///
    /// The completion outcome fires at most once per session: once the
    /// expected set drains, later GUILD_CREATEs pass through.
    pub fn on_guild_create(&mut self, guild_id: Snowflake) -> GuildCreateOutcome {
        if !self.expected_guilds.remove(&guild_id) {
            return GuildCreateOutcome::Passthrough;
        }

        self.pending_guilds.push(guild_id);
        if self.expected_guilds.is_empty() {
            GuildCreateOutcome::HydrationComplete(std::mem::take(&mut self.pending_guilds))
        } else {
            GuildCreateOutcome::Tracked
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> ShardSession {
        ShardSession::new(0, 1)
    }

    #[test]
    fn test_observe_seq_never_decreases() {
        let mut s = session();
        assert_eq!(s.last_seq(), None);

        s.observe_seq(Some(5));
        assert_eq!(s.last_seq(), Some(5));

        s.observe_seq(Some(3));
        assert_eq!(s.last_seq(), Some(5));

        s.observe_seq(None);
        assert_eq!(s.last_seq(), Some(5));

        s.observe_seq(Some(6));
        assert_eq!(s.last_seq(), Some(6));
    }

    #[test]
    fn test_heartbeat_send_clears_ack() {
        let mut s = session();
        s.observe_seq(Some(10));

        assert_eq!(s.heartbeat_due(false), HeartbeatOutcome::Send(Some(10)));
        assert!(!s.is_heartbeat_acked());

        s.ack_heartbeat();
        assert_eq!(s.heartbeat_due(false), HeartbeatOutcome::Send(Some(10)));
    }

    #[test]
    fn test_missed_ack_forces_resumable_reconnect() {
        let mut s = session();
        s.on_ready("sess".to_string(), []);

        // First beat goes out, never acked
        assert!(matches!(s.heartbeat_due(false), HeartbeatOutcome::Send(_)));

        // Second beat: zombie connection
        assert_eq!(s.heartbeat_due(false), HeartbeatOutcome::ForceReconnect);

        // The session is now marked resumable
        s.begin_disconnect();
        assert!(matches!(s.auth_action(), AuthAction::Resume { .. }));
    }

    #[test]
    fn test_forced_heartbeat_always_sends() {
        let mut s = session();
        assert!(matches!(s.heartbeat_due(false), HeartbeatOutcome::Send(_)));
        // Unacked, but the server asked for a beat
        assert!(matches!(s.heartbeat_due(true), HeartbeatOutcome::Send(_)));
    }

    #[test]
    fn test_auth_identify_without_session() {
        let mut s = session();
        assert_eq!(s.auth_action(), AuthAction::Identify);
        assert_eq!(s.state(), ConnectionState::Identifying);
    }

    #[test]
    fn test_auth_resume_uses_close_seq() {
        let mut s = session();
        s.on_ready("sess".to_string(), []);
        s.observe_seq(Some(42));

        s.mark_resume_eligible();
        s.begin_disconnect();

        match s.auth_action() {
            AuthAction::Resume { session_id, seq } => {
                assert_eq!(session_id, "sess");
                assert_eq!(seq, Some(42));
            }
            AuthAction::Identify => panic!("expected resume"),
        }
        assert_eq!(s.state(), ConnectionState::Resuming);

        // Eligibility was consumed
        assert_eq!(s.auth_action(), AuthAction::Identify);
    }

    #[test]
    fn test_resume_eligible_without_session_identifies() {
        let mut s = session();
        s.mark_resume_eligible();
        assert_eq!(s.auth_action(), AuthAction::Identify);
    }

    #[test]
    fn test_invalid_session_not_resumable_clears_state() {
        let mut s = session();
        s.on_ready("sess".to_string(), []);
        s.observe_seq(Some(9));

        s.on_invalid_session(false);
        assert_eq!(s.session_id(), None);
        assert_eq!(s.last_seq(), None);
        assert_eq!(s.auth_action(), AuthAction::Identify);
    }

    #[test]
    fn test_invalid_session_resumable_keeps_state() {
        let mut s = session();
        s.on_ready("sess".to_string(), []);
        s.observe_seq(Some(9));

        s.on_invalid_session(true);
        assert_eq!(s.session_id(), Some("sess"));
        match s.auth_action() {
            AuthAction::Resume { seq, .. } => assert_eq!(seq, Some(9)),
            AuthAction::Identify => panic!("expected resume"),
        }
    }

    #[test]
    fn test_hydration_fires_once_in_arrival_order() {
        let mut s = session();
        let (a, b, c) = (Snowflake::new(1), Snowflake::new(2), Snowflake::new(3));
        s.on_ready("sess".to_string(), [a, b, c]);

        assert_eq!(s.on_guild_create(b), GuildCreateOutcome::Tracked);
        assert_eq!(s.on_guild_create(a), GuildCreateOutcome::Tracked);
        assert_eq!(
            s.on_guild_create(c),
            GuildCreateOutcome::HydrationComplete(vec![b, a, c])
        );
        assert!(s.expected_guilds().is_empty());

        // Everything after completion passes through
        assert_eq!(s.on_guild_create(a), GuildCreateOutcome::Passthrough);
    }

    #[test]
    fn test_unexpected_guild_passes_through_during_hydration() {
        let mut s = session();
        let expected = Snowflake::new(1);
        s.on_ready("sess".to_string(), [expected]);

        assert_eq!(
            s.on_guild_create(Snowflake::new(99)),
            GuildCreateOutcome::Passthrough
        );
        // Hydration set untouched
        assert_eq!(s.expected_guilds().len(), 1);
    }

    #[test]
    fn test_begin_disconnect_snapshots_seq() {
        let mut s = session();
        s.observe_seq(Some(17));
        s.begin_disconnect();

        assert_eq!(s.last_seq(), None);
        assert_eq!(s.state(), ConnectionState::Disconnected);
        assert!(s.is_heartbeat_acked());
    }
}
