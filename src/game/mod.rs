//! Game Model
//!
//! Transport-independent data model of a buzzer game.
//!
//! ## Module Structure
//!
//! - `state`: Session codes, participant ids and participant records
//! - `events`: Events and their routing table

pub mod events;
pub mod state;

// Re-export key types
pub use events::{Action, Event, Route};
pub use state::{Participant, ParticipantId, SessionCode};
