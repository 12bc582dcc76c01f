//! Process-lifecycle core for an HTTP API service.
//!
//! - [`limiter`]: per-client token buckets with idle eviction
//! - [`tasks`]: tracked fire-and-forget background work
//! - [`http`]: the server, its middleware and its shutdown coordination

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod limiter;
pub mod net;
pub mod observability;
pub mod tasks;

pub use config::schema::ServerConfig;
pub use http::{AppState, HttpServer, ServerError, ShutdownReport};
pub use lifecycle::{ServerState, Shutdown};
pub use limiter::LimiterRegistry;
pub use tasks::BackgroundTasks;
