//! Metrics collection and exposition.
//!
//! # Metrics
//! - `rate_limited_total` (counter): requests rejected with 429
//! - `limiter_clients` (gauge): clients tracked after the last sweep
//! - `limiter_evictions_total` (counter): idle clients evicted by the janitor
//! - `background_tasks_outstanding` (gauge): tracked tasks still running
//! - `background_task_panics_total` (counter): panics intercepted, by task name
//! - `connections_active` (gauge): open client connections
//! - `shutdown_drain_timeouts_total` (counter): drains cut short by the deadline
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade and is a no-op until
//!   `init_metrics` installs the Prometheus recorder

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and serve it on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint started");
    Ok(())
}

pub fn record_rate_limited() {
    counter!("rate_limited_total").increment(1);
}

pub fn record_limiter_clients(count: usize) {
    gauge!("limiter_clients").set(count as f64);
}

pub fn record_limiter_evictions(count: usize) {
    counter!("limiter_evictions_total").increment(count as u64);
}

pub fn record_background_outstanding(count: usize) {
    gauge!("background_tasks_outstanding").set(count as f64);
}

pub fn record_background_panic(task: &'static str) {
    counter!("background_task_panics_total", "task" => task).increment(1);
}

pub fn record_active_connections(count: u64) {
    gauge!("connections_active").set(count as f64);
}

pub fn record_drain_timeout() {
    counter!("shutdown_drain_timeouts_total").increment(1);
}
