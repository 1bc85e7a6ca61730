//! Game State
//!
//! Identifiers and participant records for buzzer sessions.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Six-digit code naming one live game session.
///
/// Immutable once assigned. Implements Ord for sorted BTreeMap iteration.
/// Wider than the generated range so any well-formed code from a client
/// parses and can be looked up.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionCode(pub u64);

impl SessionCode {
    /// Create from a raw number.
    pub const fn new(code: u64) -> Self {
        Self(code)
    }

    /// Get the raw number.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionCode {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u64>().map(Self)
    }
}

/// Process-wide participant identifier.
///
/// Not scoped per session: all players share one namespace.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub u32);

impl ParticipantId {
    /// Create from a raw number.
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw number.
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// PARTICIPANT
// =============================================================================

/// A player who opened a stream to a session.
///
/// Records are never deleted, so an id stays reserved after its stream closes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Participant identifier.
    pub id: ParticipantId,
    /// Session the participant joined.
    pub session_code: SessionCode,
    /// Caller-supplied display name (opaque, unvalidated).
    pub name: String,
}

impl Participant {
    /// Create a participant record.
    pub fn new(id: ParticipantId, session_code: SessionCode, name: impl Into<String>) -> Self {
        Self {
            id,
            session_code,
            name: name.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_code_parse() {
        assert_eq!("482913".parse::<SessionCode>().unwrap(), SessionCode(482913));
        assert_eq!(" 17 ".parse::<SessionCode>().unwrap(), SessionCode(17));
        assert!("abc".parse::<SessionCode>().is_err());
        assert!("-4".parse::<SessionCode>().is_err());
        assert_eq!(
            "4294967296".parse::<SessionCode>().unwrap(),
            SessionCode(4_294_967_296)
        );
        assert!("".parse::<SessionCode>().is_err());
    }

    #[test]
    fn test_ids_serialize_as_numbers() {
        assert_eq!(serde_json::to_string(&SessionCode(482913)).unwrap(), "482913");
        assert_eq!(serde_json::to_string(&ParticipantId(7)).unwrap(), "7");
        let id: ParticipantId = serde_json::from_str("123456").unwrap();
        assert_eq!(id.get(), 123456);
    }
}
