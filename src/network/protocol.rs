//! Protocol Messages
//!
//! Wire format between the buzzer core and its HTTP/SSE clients.
//! Every frame is a flat JSON object with camelCase keys, matching what
//! browser clients read from the event stream.

use serde::{Deserialize, Serialize};

use crate::game::events::Action;
use crate::game::state::{ParticipantId, SessionCode};

/// Current local time as an RFC 3339 string.
pub fn timestamp() -> String {
    chrono::Local::now().to_rfc3339()
}

// =============================================================================
// CLIENT -> SERVER
// =============================================================================

/// Body of a buzz submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuzzRequest {
    /// Participant pressing the buzzer.
    #[serde(rename = "playerID")]
    pub player_id: ParticipantId,
}

/// Query string of a player subscription.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JoinQuery {
    /// Display name, empty when omitted.
    #[serde(default)]
    pub name: String,
}

// =============================================================================
// SERVER -> CLIENT
// =============================================================================

/// Response to a create-session request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    /// Newly assigned session code.
    pub session_code: SessionCode,
}

/// Error body for rejected requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human-readable reason.
    pub error: String,
}

/// First frame on a player stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinAck {
    /// Local send time.
    pub time: String,
    /// Session joined.
    pub session_code: SessionCode,
    /// Id assigned to the new participant.
    #[serde(rename = "playerID")]
    pub player_id: ParticipantId,
    /// Display name as supplied.
    pub player_name: String,
}

/// A routed event as seen by a subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionUpdate {
    /// Local send time.
    pub time: String,
    /// Session the event belongs to.
    pub session_code: SessionCode,
    /// Participant that caused the event.
    #[serde(rename = "playerID", default, skip_serializing_if = "Option::is_none")]
    pub player_id: Option<ParticipantId>,
    /// Display name of that participant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_name: Option<String>,
    /// What happened.
    pub action: Action,
}

/// Periodic host-stream frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Heartbeat {
    /// Session the host is watching.
    pub session_code: SessionCode,
    /// Local send time.
    pub time: String,
}

/// Any frame pushed to an open stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerFrame {
    /// Routed event.
    Update(ActionUpdate),
    /// Player join acknowledgment.
    Ack(JoinAck),
    /// Host heartbeat.
    Heartbeat(Heartbeat),
}

impl ServerFrame {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Action carried by the frame, if any.
    pub fn action(&self) -> Option<Action> {
        match self {
            ServerFrame::Update(update) => Some(update.action),
            _ => None,
        }
    }
}
