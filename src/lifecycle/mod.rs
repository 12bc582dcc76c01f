//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger() (handlers registered before serving)
//!
//! Shutdown (shutdown.rs):
//!     one CancellationToken fanned out to the accept loop, every connection,
//!     the limiter janitor and the config watcher
//!
//! State (state.rs):
//!     Running → Draining → Stopped, published on a watch channel
//! ```
//!
//! # Design Decisions
//! - Shutdown is triggered exactly once; later triggers are no-ops
//! - Connection drain has a deadline, background task wait does not by default
//! - Signals are only one trigger source; tests and operators can trigger directly

pub mod shutdown;
pub mod signals;
pub mod state;

pub use shutdown::Shutdown;
pub use state::{ServerState, StateTracker};
