//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept, connection limit, transient error filter)
//!     → connection.rs (connection id, active count, per-connection idle tracking)
//!     → Hand off to HTTP layer (http::server)
//! ```
//!
//! # Design Decisions
//! - Bounded accept: a semaphore caps concurrent connections
//! - Each connection is tracked so shutdown can report what it drained or aborted
//! - Per-connection accept failures are not fatal; listener failures are

pub mod connection;
pub mod listener;

pub use connection::{
    ConnectionActivity, ConnectionGuard, ConnectionId, ConnectionTracker, RequestGuard,
};
pub use listener::{ConnectionPermit, Listener, ListenerError};
