//! Event Router
//!
//! Two independent dispatch loops, each the single consumer of one bounded
//! inbound queue:
//!
//! - the player-fanout loop delivers to every player stream of a session,
//!   in join order, and tears the session down on a session-level disconnect;
//! - the host-delivery loop delivers to the session's host stream, if any.
//!
//! Delivery never blocks a loop. Each stream has its own bounded buffer; a
//! frame that does not fit is dropped for that stream only, and streams whose
//! receiver has gone away are pruned from the session.

use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::game::events::{Action, Event};
use crate::network::protocol::{timestamp, ActionUpdate, ServerFrame};
use crate::network::session::{FrameSink, SessionError, SessionRegistry};

/// Default inbound queue capacity per dispatch loop.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Outcome of a single non-blocking delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Frame queued on the stream.
    Delivered,
    /// Stream buffer full, frame discarded.
    Dropped,
    /// Stream receiver gone.
    Closed,
}

/// Push a frame without waiting for buffer space.
pub fn deliver(sink: &FrameSink, frame: ServerFrame) -> Delivery {
    match sink.try_send(frame) {
        Ok(()) => Delivery::Delivered,
        Err(TrySendError::Full(_)) => Delivery::Dropped,
        Err(TrySendError::Closed(_)) => Delivery::Closed,
    }
}

/// Submission handle for both dispatch queues. Cheap to clone.
#[derive(Clone, Debug)]
pub struct EventRouter {
    players_tx: mpsc::Sender<Event>,
    host_tx: mpsc::Sender<Event>,
}

/// Receiving ends of the dispatch queues, not yet running.
pub struct DispatchQueues {
    registry: Arc<SessionRegistry>,
    players_rx: mpsc::Receiver<Event>,
    host_rx: mpsc::Receiver<Event>,
}

/// Handles of the running dispatch loops.
pub struct RouterTasks {
    players: JoinHandle<()>,
    host: JoinHandle<()>,
}

impl RouterTasks {
    /// Stop both loops.
    pub fn abort(&self) {
        self.players.abort();
        self.host.abort();
    }

    /// Have both loops exited.
    pub fn is_finished(&self) -> bool {
        self.players.is_finished() && self.host.is_finished()
    }
}

impl EventRouter {
    /// Create the queues without starting the loops.
    pub fn new(registry: Arc<SessionRegistry>, capacity: usize) -> (Self, DispatchQueues) {
        let capacity = capacity.max(1);
        let (players_tx, players_rx) = mpsc::channel(capacity);
        let (host_tx, host_rx) = mpsc::channel(capacity);

        (
            Self { players_tx, host_tx },
            DispatchQueues {
                registry,
                players_rx,
                host_rx,
            },
        )
    }

    /// Create the queues and start both loops.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(registry: Arc<SessionRegistry>, capacity: usize) -> (Self, RouterTasks) {
        let (router, queues) = Self::new(registry, capacity);
        (router, queues.spawn())
    }

    /// Submit an event through every queue its route names.
    ///
    /// The player queue is fed first so a session-level disconnect cannot
    /// overtake events already submitted for the same session.
    pub async fn submit(&self, event: Event) -> Result<(), SessionError> {
        let route = event.route();
        match (route.players, route.host) {
            (true, true) => {
                self.submit_to_players(event.clone()).await?;
                self.submit_to_host(event).await
            }
            (true, false) => self.submit_to_players(event).await,
            (false, true) => self.submit_to_host(event).await,
            (false, false) => Ok(()),
        }
    }

    /// Queue an event for the player-fanout loop.
    pub async fn submit_to_players(&self, event: Event) -> Result<(), SessionError> {
        self.players_tx
            .send(event)
            .await
            .map_err(|_| SessionError::Internal("player dispatch loop stopped".to_string()))
    }

    /// Queue an event for the host-delivery loop.
    pub async fn submit_to_host(&self, event: Event) -> Result<(), SessionError> {
        self.host_tx
            .send(event)
            .await
            .map_err(|_| SessionError::Internal("host dispatch loop stopped".to_string()))
    }
}

impl DispatchQueues {
    /// Start both dispatch loops.
    pub fn spawn(self) -> RouterTasks {
        let players = tokio::spawn(run_player_fanout(self.players_rx, self.registry.clone()));
        let host = tokio::spawn(run_host_delivery(self.host_rx, self.registry));
        RouterTasks { players, host }
    }
}

/// Build the subscriber-facing frame for an event.
async fn update_frame(registry: &SessionRegistry, event: &Event) -> ServerFrame {
    let player_name = match event.participant_id {
        Some(id) => registry.lookup_participant(id).await.map(|p| p.name),
        None => None,
    };

    ServerFrame::Update(ActionUpdate {
        time: timestamp(),
        session_code: event.session_code,
        player_id: event.participant_id,
        player_name,
        action: event.action,
    })
}

/// Drain the player queue until every submitter is gone.
pub async fn run_player_fanout(mut rx: mpsc::Receiver<Event>, registry: Arc<SessionRegistry>) {
    while let Some(event) = rx.recv().await {
        let code = event.session_code;
        debug!(
            session = %code,
            action = %event.action,
            player = ?event.participant_id,
            "player fanout"
        );

        // A departing player stops receiving before the others hear about it
        if event.action == Action::Disconnect {
            if let Some(id) = event.participant_id {
                if registry.remove_player_subscriber(code, &id).await {
                    debug!(session = %code, player = %id, "player stream removed");
                }
            }
        }

        let Some(players) = registry.player_subscribers(code).await else {
            debug!(session = %code, "session gone, event dropped");
            continue;
        };

        let frame = update_frame(&registry, &event).await;
        let mut closed = 0;
        for player in &players {
            match deliver(&player.sink, frame.clone()) {
                Delivery::Delivered => {}
                Delivery::Dropped => {
                    warn!(
                        session = %code,
                        player = %player.participant_id,
                        "player buffer full, frame dropped"
                    );
                }
                Delivery::Closed => closed += 1,
            }
        }
        drop(players);

        if closed > 0 {
            let pruned = registry.prune_closed_players(code).await;
            debug!(session = %code, pruned, "closed player streams pruned");
        }

        if event.ends_session() && registry.remove_session(code).await {
            info!(session = %code, "host left, session removed");
        }
    }

    debug!("player fanout loop exited");
}

/// Drain the host queue until every submitter is gone.
pub async fn run_host_delivery(mut rx: mpsc::Receiver<Event>, registry: Arc<SessionRegistry>) {
    while let Some(event) = rx.recv().await {
        let code = event.session_code;

        let Some(host) = registry.host_subscriber(code).await else {
            debug!(session = %code, action = %event.action, "no host subscribed, event dropped");
            continue;
        };

        let frame = update_frame(&registry, &event).await;
        match deliver(&host, frame) {
            Delivery::Delivered => {
                debug!(session = %code, action = %event.action, "delivered to host");
            }
            Delivery::Dropped => {
                warn!(session = %code, action = %event.action, "host buffer full, frame dropped");
            }
            Delivery::Closed => {
                debug!(session = %code, "host stream closed");
            }
        }
    }

    debug!("host delivery loop exited");
}
