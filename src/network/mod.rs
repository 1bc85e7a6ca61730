//! Network Layer
//!
//! Session registry, event routing and connection lifecycle, plus the
//! HTTP/SSE transport that drives them.

pub mod connection;
pub mod protocol;
pub mod router;
pub mod server;
pub mod session;

pub use connection::{
    ConnectionConfig, ConnectionManager, DisconnectGuard, HostConnection, PlayerConnection,
};
pub use protocol::{
    ActionUpdate, BuzzRequest, CreateSessionResponse, Heartbeat, JoinAck, ServerFrame,
};
pub use router::{EventRouter, RouterTasks};
pub use server::{BuzzerServer, ServerConfig, ServerError};
pub use session::{FrameSink, PlayerSubscriber, Session, SessionError, SessionRegistry};
