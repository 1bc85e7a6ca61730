//! Core primitives.
//!
//! Identifier generation shared by sessions and participants.

pub mod ids;

// Re-export core types
pub use ids::{FixedIds, IdGenerator, RandomIds, ID_MAX, ID_MIN};
