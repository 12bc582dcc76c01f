//! Tracked background work.
//!
//! # Data Flow
//! ```text
//! Handler calls BackgroundTasks::run(name, future)
//!     → outstanding += 1 (before the future is polled)
//!     → tokio::spawn(catch_unwind(future))
//!     → panic? log + metric, never propagated
//!     → outstanding -= 1 (drop guard, also on panic or cancellation)
//!
//! Shutdown:
//!     HttpServer drains connections → BackgroundTasks::wait() → exit
//! ```
//!
//! # Design Decisions
//! - Fire-and-forget: the caller never waits for the task
//! - Counter is atomic; waiters park on a Notify instead of polling
//! - No priorities and no cancellation of running tasks

pub mod tracker;

pub use tracker::BackgroundTasks;
