//! # Buzzer Server
//!
//! Live quiz buzzer: one host stream per game session observes joins and
//! buzzes, while every player stream receives the session's state changes.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      BUZZER SERVER                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/             - Primitives                              │
//! │  └── ids.rs        - Random numeric identifiers              │
//! │                                                              │
//! │  game/             - Data model                              │
//! │  ├── state.rs      - Session codes, participants             │
//! │  └── events.rs     - Events and routing table                │
//! │                                                              │
//! │  network/          - Routing core and transport              │
//! │  ├── session.rs    - Session registry                        │
//! │  ├── router.rs     - Player-fanout and host-delivery loops   │
//! │  ├── connection.rs - Stream lifecycle, disconnect guards     │
//! │  ├── protocol.rs   - Wire frames                             │
//! │  └── server.rs     - HTTP + Server-Sent Events               │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Data Flow
//!
//! Transport decodes a request, the connection manager validates it and
//! submits an [`Event`](game::events::Event) to the router. The router looks
//! the session up in the registry and pushes a frame to each subscriber's
//! bounded sink; the transport serializes and flushes whatever each stream
//! yields. Disconnects travel the same path as ordinary events.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use self::core::ids::{IdGenerator, RandomIds, ID_MAX, ID_MIN};
pub use game::events::{Action, Event};
pub use game::state::{Participant, ParticipantId, SessionCode};
pub use network::{
    BuzzerServer, ConnectionManager, EventRouter, ServerConfig, SessionError, SessionRegistry,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
