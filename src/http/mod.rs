//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection (net::listener)
//!     → server.rs (hyper connection, Axum router, shutdown coordination)
//!     → request id, trace span, timeout, panic guard (tower-http layers)
//!     → middleware/rate_limit.rs (per-client admission)
//!     → healthcheck.rs or caller-supplied routes
//!     → response.rs (JSON error envelopes)
//! ```

pub mod healthcheck;
pub mod middleware;
pub mod response;
pub mod server;

pub use server::{AppState, HttpServer, ServerError, ShutdownReport};
