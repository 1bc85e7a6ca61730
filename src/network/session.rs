//! Session Registry
//!
//! Owns every live session and every participant record. All reads and
//! writes go through [`SessionRegistry`], which serializes access behind
//! async read/write locks; no caller ever sees the raw maps.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, RwLock};
use tracing::debug;

use crate::core::ids::{IdGenerator, RandomIds, ID_MAX, ID_MIN};
use crate::game::state::{Participant, ParticipantId, SessionCode};
use crate::network::protocol::ServerFrame;

/// Outbound delivery endpoint of one open stream.
pub type FrameSink = mpsc::Sender<ServerFrame>;

/// Non-owning handle to a [`FrameSink`], used to recognize a stream without
/// keeping it open.
pub type WeakFrameSink = mpsc::WeakSender<ServerFrame>;

/// A player stream subscribed to a session.
#[derive(Debug, Clone)]
pub struct PlayerSubscriber {
    /// Participant owning the stream.
    pub participant_id: ParticipantId,
    /// Channel feeding the stream.
    pub sink: FrameSink,
}

/// One live game session.
#[derive(Debug)]
pub struct Session {
    /// Session code.
    pub code: SessionCode,
    /// Player streams in join order.
    players: Vec<PlayerSubscriber>,
    /// Host stream, absent until the host connects.
    host: Option<FrameSink>,
    /// When the session was created.
    created_at: Instant,
}

impl Session {
    /// Create an empty session.
    pub fn new(code: SessionCode) -> Self {
        Self {
            code,
            players: Vec::new(),
            host: None,
            created_at: Instant::now(),
        }
    }

    /// Append a player stream. No de-duplication.
    pub fn add_player(&mut self, participant_id: ParticipantId, sink: FrameSink) {
        self.players.push(PlayerSubscriber { participant_id, sink });
    }

    /// Drop every stream owned by `participant_id`.
    /// Returns true if anything was removed.
    pub fn remove_player(&mut self, participant_id: &ParticipantId) -> bool {
        let before = self.players.len();
        self.players.retain(|p| p.participant_id != *participant_id);
        self.players.len() != before
    }

    /// Install or replace the host stream.
    /// Returns true if a previous host was replaced.
    pub fn set_host(&mut self, sink: FrameSink) -> bool {
        self.host.replace(sink).is_some()
    }

    /// Detach the host stream if it is the channel behind `sink`.
    pub fn release_host(&mut self, sink: &FrameSink) -> bool {
        match &self.host {
            Some(host) if host.same_channel(sink) => {
                self.host = None;
                true
            }
            _ => false,
        }
    }

    /// Player streams in join order.
    pub fn players(&self) -> &[PlayerSubscriber] {
        &self.players
    }

    /// Host stream, if connected.
    pub fn host(&self) -> Option<&FrameSink> {
        self.host.as_ref()
    }

    /// Get player stream count.
    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Time since creation.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

/// Session errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// Malformed request, e.g. a session code that is not a number.
    #[error("{0}")]
    BadRequest(String),

    /// Session code is well-formed but no session is live.
    #[error("session [{0}] not found")]
    NotFound(SessionCode),

    /// Participant is unknown or belongs to another session.
    #[error("player [{0}] not found")]
    ParticipantNotFound(ParticipantId),

    /// Generator produced an identifier that is already taken.
    #[error("random {0} collision")]
    Collision(&'static str),

    /// Router unavailable or another server-side failure.
    #[error("internal error: {0}")]
    Internal(String),
}

// =============================================================================
// SESSION REGISTRY
// =============================================================================

/// Manages all live sessions and known participants.
pub struct SessionRegistry {
    /// Live sessions.
    sessions: RwLock<BTreeMap<SessionCode, Session>>,
    /// Every participant ever registered.
    participants: RwLock<BTreeMap<ParticipantId, Participant>>,
    /// Identifier source for codes and participant ids.
    ids: Box<dyn IdGenerator>,
}

impl SessionRegistry {
    /// Create a registry drawing identifiers from the thread RNG.
    pub fn new() -> Self {
        Self::with_id_generator(RandomIds)
    }

    /// Create a registry with a specific identifier source.
    pub fn with_id_generator(ids: impl IdGenerator + 'static) -> Self {
        Self {
            sessions: RwLock::new(BTreeMap::new()),
            participants: RwLock::new(BTreeMap::new()),
            ids: Box::new(ids),
        }
    }

    /// Create a new session. Fails instead of retrying on collision.
    pub async fn create_session(&self) -> Result<SessionCode, SessionError> {
        let code = SessionCode(u64::from(self.ids.generate(ID_MIN, ID_MAX)));

        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&code) {
            return Err(SessionError::Collision("session code"));
        }
        sessions.insert(code, Session::new(code));

        Ok(code)
    }

    /// Check if a session is live.
    pub async fn exists(&self, code: SessionCode) -> bool {
        self.sessions.read().await.contains_key(&code)
    }

    /// Parse a raw path parameter and check the session is live.
    pub async fn resolve(&self, raw: &str) -> Result<SessionCode, SessionError> {
        let code: SessionCode = raw
            .parse()
            .map_err(|_| {
                SessionError::BadRequest(format!("session code [{raw}] is not a number"))
            })?;

        if self.exists(code).await {
            Ok(code)
        } else {
            Err(SessionError::NotFound(code))
        }
    }

    /// Append a player stream to a session.
    pub async fn add_player_subscriber(
        &self,
        code: SessionCode,
        participant_id: ParticipantId,
        sink: FrameSink,
    ) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(&code).ok_or(SessionError::NotFound(code))?;
        session.add_player(participant_id, sink);
        Ok(())
    }

    /// Remove a player's stream from a session.
    pub async fn remove_player_subscriber(
        &self,
        code: SessionCode,
        participant_id: &ParticipantId,
    ) -> bool {
        let mut sessions = self.sessions.write().await;
        sessions
            .get_mut(&code)
            .map(|s| s.remove_player(participant_id))
            .unwrap_or(false)
    }

    /// Install or replace the host stream of a session.
    pub async fn set_host_subscriber(
        &self,
        code: SessionCode,
        sink: FrameSink,
    ) -> Result<bool, SessionError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(&code).ok_or(SessionError::NotFound(code))?;
        Ok(session.set_host(sink))
    }

    /// Detach the host stream if `sink` still points at the installed host.
    ///
    /// False when the host was replaced since, or the session is gone.
    pub async fn release_host(&self, code: SessionCode, sink: &WeakFrameSink) -> bool {
        let Some(sink) = sink.upgrade() else {
            return false;
        };
        let mut sessions = self.sessions.write().await;
        sessions
            .get_mut(&code)
            .map(|s| s.release_host(&sink))
            .unwrap_or(false)
    }

    /// Remove a session with all its streams. Idempotent.
    pub async fn remove_session(&self, code: SessionCode) -> bool {
        match self.sessions.write().await.remove(&code) {
            Some(session) => {
                debug!(
                    session = %code,
                    players = session.player_count(),
                    age_secs = session.age().as_secs(),
                    "session removed"
                );
                true
            }
            None => false,
        }
    }

    /// Remove every session, closing all streams. Returns how many were live.
    pub async fn clear(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let count = sessions.len();
        sessions.clear();
        count
    }

    /// Snapshot of a session's player streams, in join order.
    pub async fn player_subscribers(&self, code: SessionCode) -> Option<Vec<PlayerSubscriber>> {
        let sessions = self.sessions.read().await;
        sessions.get(&code).map(|s| s.players().to_vec())
    }

    /// The session's host stream, if one is connected.
    pub async fn host_subscriber(&self, code: SessionCode) -> Option<FrameSink> {
        let sessions = self.sessions.read().await;
        sessions.get(&code).and_then(|s| s.host().cloned())
    }

    /// Drop player streams whose receiving end has gone away.
    pub async fn prune_closed_players(&self, code: SessionCode) -> usize {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(&code) {
            Some(session) => {
                let before = session.players.len();
                session.players.retain(|p| !p.sink.is_closed());
                before - session.players.len()
            }
            None => 0,
        }
    }

    /// Record a participant under a caller-chosen id.
    pub async fn register_participant(
        &self,
        id: ParticipantId,
        code: SessionCode,
        name: impl Into<String>,
    ) -> Result<(), SessionError> {
        self.insert_participant(Participant::new(id, code, name))
            .await
            .map(|_| ())
    }

    /// Generate an id and record a new participant.
    pub async fn new_participant(
        &self,
        code: SessionCode,
        name: impl Into<String>,
    ) -> Result<Participant, SessionError> {
        let id = ParticipantId(self.ids.generate(ID_MIN, ID_MAX));
        self.insert_participant(Participant::new(id, code, name)).await
    }

    /// Insert a participant unless its id is already taken.
    async fn insert_participant(
        &self,
        participant: Participant,
    ) -> Result<Participant, SessionError> {
        let mut participants = self.participants.write().await;
        if participants.contains_key(&participant.id) {
            return Err(SessionError::Collision("player id"));
        }
        participants.insert(participant.id, participant.clone());
        Ok(participant)
    }

    /// Look up a participant by id.
    pub async fn lookup_participant(&self, id: ParticipantId) -> Option<Participant> {
        self.participants.read().await.get(&id).cloned()
    }

    /// Get live session count.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Get player stream count of a session.
    pub async fn player_count(&self, code: SessionCode) -> Option<usize> {
        self.sessions.read().await.get(&code).map(Session::player_count)
    }

    /// Get known participant count.
    pub async fn participant_count(&self) -> usize {
        self.participants.read().await.len()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
