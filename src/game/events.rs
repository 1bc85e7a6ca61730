//! Game Events
//!
//! Transient events submitted to the router. Each event is consumed once
//! by every dispatch loop it is routed to and never persisted.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::game::state::{ParticipantId, SessionCode};

/// What happened in a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// A player stream opened.
    Joined,
    /// A player pressed the buzzer.
    Buzz,
    /// A stream closed. Session-level when no participant is attached.
    Disconnect,
    /// Host locked the buzzers.
    Lock,
    /// Host re-armed the buzzers.
    Reset,
}

impl Action {
    /// Wire name of the action.
    pub const fn as_str(self) -> &'static str {
        match self {
            Action::Joined => "joined",
            Action::Buzz => "buzz",
            Action::Disconnect => "disconnect",
            Action::Lock => "lock",
            Action::Reset => "reset",
        }
    }

    /// Can the host issue this action directly.
    pub const fn is_host_control(self) -> bool {
        matches!(self, Action::Lock | Action::Reset)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which dispatch loops an event is delivered through.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Route {
    /// Fan out to every player subscriber.
    pub players: bool,
    /// Deliver to the host subscriber.
    pub host: bool,
}

/// An event addressed to one session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    /// Target session.
    pub session_code: SessionCode,
    /// Participant that caused the event. Absent for session-wide events.
    pub participant_id: Option<ParticipantId>,
    /// Event kind.
    pub action: Action,
}

impl Event {
    /// Event caused by a participant.
    pub fn from_participant(
        session_code: SessionCode,
        participant_id: ParticipantId,
        action: Action,
    ) -> Self {
        Self {
            session_code,
            participant_id: Some(participant_id),
            action,
        }
    }

    /// Session-wide event (host control or host departure).
    pub fn session_wide(session_code: SessionCode, action: Action) -> Self {
        Self {
            session_code,
            participant_id: None,
            action,
        }
    }

    /// Does this event end the whole session.
    pub fn ends_session(&self) -> bool {
        self.action == Action::Disconnect && self.participant_id.is_none()
    }

    /// Route for this event.
    ///
    /// | action       | participant | players | host |
    /// |--------------|-------------|---------|------|
    /// | joined       | any         | no      | yes  |
    /// | buzz         | any         | yes     | yes  |
    /// | disconnect   | present     | yes     | yes  |
    /// | disconnect   | absent      | yes     | no   |
    /// | lock / reset | any         | yes     | no   |
    pub fn route(&self) -> Route {
        match self.action {
            Action::Joined => Route { players: false, host: true },
            Action::Buzz => Route { players: true, host: true },
            Action::Disconnect => Route {
                players: true,
                host: self.participant_id.is_some(),
            },
            Action::Lock | Action::Reset => Route { players: true, host: false },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CODE: SessionCode = SessionCode(482913);
    const ANN: ParticipantId = ParticipantId(555555);

    #[test]
    fn test_buzz_goes_everywhere() {
        let event = Event::from_participant(CODE, ANN, Action::Buzz);
        assert_eq!(event.route(), Route { players: true, host: true });
        assert!(!event.ends_session());
    }

    #[test]
    fn test_joined_only_reaches_host() {
        let event = Event::from_participant(CODE, ANN, Action::Joined);
        assert_eq!(event.route(), Route { players: false, host: true });
    }

    #[test]
    fn test_host_controls_never_loop_back() {
        for action in [Action::Lock, Action::Reset] {
            let event = Event::session_wide(CODE, action);
            assert_eq!(event.route(), Route { players: true, host: false });
            assert!(action.is_host_control());
        }
        assert!(!Action::Buzz.is_host_control());
    }

    #[test]
    fn test_disconnect_routing() {
        let player_left = Event::from_participant(CODE, ANN, Action::Disconnect);
        assert_eq!(player_left.route(), Route { players: true, host: true });
        assert!(!player_left.ends_session());

        let host_left = Event::session_wide(CODE, Action::Disconnect);
        assert_eq!(host_left.route(), Route { players: true, host: false });
        assert!(host_left.ends_session());
    }

    #[test]
    fn test_action_wire_names() {
        assert_eq!(serde_json::to_string(&Action::Buzz).unwrap(), "\"buzz\"");
        assert_eq!(Action::Disconnect.to_string(), "disconnect");
        let parsed: Action = serde_json::from_str("\"reset\"").unwrap();
        assert_eq!(parsed, Action::Reset);
    }
}
