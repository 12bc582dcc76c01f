//! Per-client rate limiting subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request
//!     → http::middleware::rate_limit (derive client key from peer address)
//!     → registry.rs (look up or create the client's bucket, update last_seen)
//!     → bucket.rs (refill, try to take one token)
//!     → admit (next handler) or reject (429)
//!
//! Janitor (registry.rs):
//!     every sweep_interval → evict entries idle longer than idle_threshold
//! ```
//!
//! # Design Decisions
//! - State is per-process; nothing is shared across instances or persisted
//! - One exclusive lock guards the whole key map, held only for the map operation
//! - Disabling the registry is a pass-through, not an error state

pub mod bucket;
pub mod registry;

use std::time::Duration;

pub use bucket::ClientLimiter;
pub use registry::LimiterRegistry;

/// Errors raised while constructing limiter state.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LimiterError {
    /// Capacity or refill rate cannot produce a usable bucket.
    #[error("invalid quota: capacity={capacity}, refill_rate={refill_rate}")]
    InvalidQuota { capacity: u32, refill_rate: f64 },

    /// The janitor would evict clients that are still inside a sweep window.
    #[error("idle threshold {idle:?} must be greater than sweep interval {sweep:?}")]
    InvalidJanitorSchedule { sweep: Duration, idle: Duration },
}
