//! Connection Lifecycle
//!
//! Binds one streaming connection to a subscription slot in the registry
//! and turns it into a stream of outbound frames. The transport only has to
//! serialize and flush whatever the stream yields, and drop the stream when
//! the client goes away.
//!
//! Every open stream owns a [`DisconnectGuard`]. Dropping the stream drops
//! the guard, which wakes a companion watcher task that submits a synthetic
//! `disconnect` event through the router, so cleanup follows the same path as
//! ordinary traffic.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, Stream, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::game::events::{Action, Event};
use crate::game::state::{Participant, ParticipantId, SessionCode};
use crate::network::protocol::{timestamp, Heartbeat, JoinAck, ServerFrame};
use crate::network::router::EventRouter;
use crate::network::session::{FrameSink, SessionError, SessionRegistry, WeakFrameSink};

/// Default per-stream buffer, in frames.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 32;

/// Default host heartbeat period.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// Per-connection settings.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Frames buffered per stream before new frames are dropped.
    pub subscriber_buffer: usize,
    /// Host heartbeat period. `None` disables heartbeats.
    pub heartbeat_interval: Option<Duration>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: DEFAULT_SUBSCRIBER_BUFFER,
            heartbeat_interval: Some(DEFAULT_HEARTBEAT_INTERVAL),
        }
    }
}

// =============================================================================
// DISCONNECT GUARD
// =============================================================================

/// Submits a disconnect event when dropped, unless disarmed first.
#[derive(Debug)]
pub struct DisconnectGuard {
    disarm_tx: oneshot::Sender<()>,
}

impl DisconnectGuard {
    /// Spawn the watcher task for `event`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn watch(router: EventRouter, event: Event) -> Self {
        Self::spawn(router, event, None)
    }

    /// Spawn the watcher for a host stream fed by `sink`.
    ///
    /// The session only ends if that stream is still the installed host when
    /// the guard drops; a replaced host leaves quietly.
    pub fn watch_host(
        router: EventRouter,
        registry: Arc<SessionRegistry>,
        code: SessionCode,
        sink: &FrameSink,
    ) -> Self {
        Self::spawn(
            router,
            Event::session_wide(code, Action::Disconnect),
            Some((registry, sink.downgrade())),
        )
    }

    fn spawn(
        router: EventRouter,
        event: Event,
        host: Option<(Arc<SessionRegistry>, WeakFrameSink)>,
    ) -> Self {
        let (disarm_tx, disarm_rx) = oneshot::channel();

        tokio::spawn(async move {
            // Ok: disarmed. Err: guard dropped with the stream.
            if disarm_rx.await.is_ok() {
                return;
            }

            if let Some((registry, sink)) = host {
                if !registry.release_host(event.session_code, &sink).await {
                    debug!(session = %event.session_code, "superseded host stream closed");
                    return;
                }
            }

            debug!(
                session = %event.session_code,
                player = ?event.participant_id,
                "stream closed, submitting disconnect"
            );
            if let Err(e) = router.submit(event).await {
                warn!("Failed to submit disconnect: {}", e);
            }
        });

        Self { disarm_tx }
    }

    /// Stream ended from the registry side; nothing to announce.
    pub fn disarm(self) {
        let _ = self.disarm_tx.send(());
    }
}

// =============================================================================
// CONNECTIONS
// =============================================================================

/// An open player stream.
#[derive(Debug)]
pub struct PlayerConnection {
    /// The joined participant.
    pub participant: Participant,
    frames: mpsc::Receiver<ServerFrame>,
    guard: DisconnectGuard,
}

impl PlayerConnection {
    /// Session this stream belongs to.
    pub fn session_code(&self) -> SessionCode {
        self.participant.session_code
    }

    /// Participant id assigned on join.
    pub fn participant_id(&self) -> ParticipantId {
        self.participant.id
    }

    /// Acknowledgment frame sent first on the stream.
    pub fn ack(&self) -> JoinAck {
        JoinAck {
            time: timestamp(),
            session_code: self.participant.session_code,
            player_id: self.participant.id,
            player_name: self.participant.name.clone(),
        }
    }

    /// Acknowledgment followed by every frame routed to this player.
    ///
    /// Ends when the registry drops the player's sink. Dropping the stream
    /// before that announces a disconnect.
    pub fn into_stream(self) -> impl Stream<Item = ServerFrame> + Send + 'static {
        let ack = ServerFrame::Ack(self.ack());
        let Self { frames, guard, .. } = self;

        let updates = stream::unfold((frames, guard), |(mut frames, guard)| async move {
            match frames.recv().await {
                Some(frame) => Some((frame, (frames, guard))),
                None => {
                    guard.disarm();
                    None
                }
            }
        });

        stream::once(async move { ack }).chain(updates)
    }
}

/// An open host stream.
#[derive(Debug)]
pub struct HostConnection {
    /// Session being hosted.
    pub session_code: SessionCode,
    frames: mpsc::Receiver<ServerFrame>,
    heartbeat_interval: Option<Duration>,
    guard: DisconnectGuard,
}

impl HostConnection {
    /// Frames routed to the host, interleaved with heartbeats.
    ///
    /// Ends when the registry drops the host sink (session removed or host
    /// replaced). Dropping the stream before that ends the session.
    pub fn into_stream(self) -> impl Stream<Item = ServerFrame> + Send + 'static {
        let Self {
            session_code,
            frames,
            heartbeat_interval,
            guard,
        } = self;

        let ticker = heartbeat_interval.filter(|p| !p.is_zero()).map(|period| {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        stream::unfold(
            (frames, ticker, guard),
            move |(mut frames, mut ticker, guard)| async move {
                tokio::select! {
                    frame = frames.recv() => match frame {
                        Some(frame) => Some((frame, (frames, ticker, guard))),
                        None => {
                            guard.disarm();
                            None
                        }
                    },
                    _ = next_tick(ticker.as_mut()) => {
                        let beat = ServerFrame::Heartbeat(Heartbeat {
                            session_code,
                            time: timestamp(),
                        });
                        Some((beat, (frames, ticker, guard)))
                    }
                }
            },
        )
    }
}

/// Wait for the next heartbeat, or forever when heartbeats are off.
async fn next_tick(ticker: Option<&mut Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

// =============================================================================
// CONNECTION MANAGER
// =============================================================================

/// Entry point for the transport: session creation, stream subscription and
/// one-shot action submission.
#[derive(Clone)]
pub struct ConnectionManager {
    registry: Arc<SessionRegistry>,
    router: EventRouter,
    config: ConnectionConfig,
}

impl ConnectionManager {
    /// Create a manager over a registry and its router.
    pub fn new(
        registry: Arc<SessionRegistry>,
        router: EventRouter,
        config: ConnectionConfig,
    ) -> Self {
        Self {
            registry,
            router,
            config,
        }
    }

    /// The shared registry.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// The router handle.
    pub fn router(&self) -> &EventRouter {
        &self.router
    }

    /// Create a new session.
    pub async fn create_session(&self) -> Result<SessionCode, SessionError> {
        let code = self.registry.create_session().await?;
        info!(session = %code, "creating game");
        Ok(code)
    }

    /// Subscribe a player to a session.
    pub async fn open_player(
        &self,
        raw_code: &str,
        name: impl Into<String>,
    ) -> Result<PlayerConnection, SessionError> {
        let code = self.registry.resolve(raw_code).await?;
        let participant = self.registry.new_participant(code, name).await?;

        let (sink, frames) = mpsc::channel(self.config.subscriber_buffer.max(1));
        self.registry
            .add_player_subscriber(code, participant.id, sink)
            .await?;

        let guard = DisconnectGuard::watch(
            self.router.clone(),
            Event::from_participant(code, participant.id, Action::Disconnect),
        );

        info!(session = %code, player = %participant.id, name = %participant.name, "player joined");

        self.router
            .submit(Event::from_participant(code, participant.id, Action::Joined))
            .await?;

        Ok(PlayerConnection {
            participant,
            frames,
            guard,
        })
    }

    /// Subscribe the host of a session, replacing any previous host.
    pub async fn open_host(&self, raw_code: &str) -> Result<HostConnection, SessionError> {
        let code = self.registry.resolve(raw_code).await?;

        let (sink, frames) = mpsc::channel(self.config.subscriber_buffer.max(1));
        let guard =
            DisconnectGuard::watch_host(self.router.clone(), self.registry.clone(), code, &sink);

        if self.registry.set_host_subscriber(code, sink).await? {
            info!(session = %code, "host replaced");
        } else {
            info!(session = %code, "host listening");
        }

        Ok(HostConnection {
            session_code: code,
            frames,
            heartbeat_interval: self.config.heartbeat_interval,
            guard,
        })
    }

    /// Submit a buzz from a participant of the session.
    pub async fn buzz(&self, raw_code: &str, player_id: ParticipantId) -> Result<(), SessionError> {
        let code = self.registry.resolve(raw_code).await?;

        match self.registry.lookup_participant(player_id).await {
            Some(p) if p.session_code == code => {}
            _ => return Err(SessionError::ParticipantNotFound(player_id)),
        }

        debug!(session = %code, player = %player_id, "buzz detected");
        self.router
            .submit(Event::from_participant(code, player_id, Action::Buzz))
            .await
    }

    /// Submit a host control action (`lock` or `reset`) to every player.
    pub async fn host_action(&self, raw_code: &str, action: Action) -> Result<(), SessionError> {
        if !action.is_host_control() {
            return Err(SessionError::BadRequest(format!(
                "action [{action}] cannot be issued by the host"
            )));
        }

        let code = self.registry.resolve(raw_code).await?;
        debug!(session = %code, action = %action, "host action");
        self.router.submit(Event::session_wide(code, action)).await
    }
}
