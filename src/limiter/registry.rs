//! Registry of per-client limiters with idle eviction.
//!
//! # Responsibilities
//! - Lazily create one [`ClientLimiter`] per client key
//! - Track when each client was last seen
//! - Evict idle clients from a periodic janitor task
//! - Act as an operational kill switch (disable = admit everything)

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::{ClientLimiter, LimiterError};
use crate::config::RateLimitConfig;
use crate::observability::metrics;

struct Entry {
    limiter: ClientLimiter,
    last_seen: Instant,
}

/// Owns every client's limiter. Share it behind an `Arc`.
pub struct LimiterRegistry {
    clients: Mutex<HashMap<String, Entry>>,
    enabled: AtomicBool,
    /// Fresh bucket cloned for each newly seen client.
    template: ClientLimiter,
}

impl LimiterRegistry {
    /// Create an enabled registry handing out buckets of `burst` tokens
    /// refilled at `requests_per_second`.
    pub fn new(requests_per_second: f64, burst: u32) -> Result<Self, LimiterError> {
        Ok(Self {
            clients: Mutex::new(HashMap::new()),
            enabled: AtomicBool::new(true),
            template: ClientLimiter::new(burst, requests_per_second)?,
        })
    }

    pub fn from_config(config: &RateLimitConfig) -> Result<Self, LimiterError> {
        let registry = Self::new(config.requests_per_second, config.burst)?;
        registry.set_enabled(config.enabled);
        Ok(registry)
    }

    /// Decide whether one request from `key` may proceed.
    pub fn admit(&self, key: &str) -> bool {
        self.admit_at(key, Instant::now())
    }

    /// Admission decision as of `now`.
    pub fn admit_at(&self, key: &str, now: Instant) -> bool {
        if !self.is_enabled() {
            return true;
        }

        let mut clients = self.lock();
        if let Some(entry) = clients.get_mut(key) {
            // Racing callers may arrive out of order; last_seen only moves forward.
            entry.last_seen = entry.last_seen.max(now);
            return entry.limiter.try_acquire_at(now);
        }

        let mut limiter = self.template.clone();
        limiter.reset_at(now);
        let admitted = limiter.try_acquire_at(now);
        clients.insert(key.to_owned(), Entry { limiter, last_seen: now });
        tracing::trace!(client = %key, clients = clients.len(), "New client limiter");
        admitted
    }

    pub fn enable(&self) {
        self.set_enabled(true);
    }

    pub fn disable(&self) {
        self.set_enabled(false);
    }

    pub fn set_enabled(&self, enabled: bool) {
        let previous = self.enabled.swap(enabled, Ordering::SeqCst);
        if previous != enabled {
            tracing::info!(enabled, "Rate limiter toggled");
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Remove every client idle for longer than `idle_threshold`.
    /// Returns the number of evicted entries.
    pub fn sweep(&self, idle_threshold: Duration) -> usize {
        self.sweep_at(Instant::now(), idle_threshold)
    }

    pub fn sweep_at(&self, now: Instant, idle_threshold: Duration) -> usize {
        let (evicted, remaining) = {
            let mut clients = self.lock();
            let before = clients.len();
            clients.retain(|_, entry| now.saturating_duration_since(entry.last_seen) <= idle_threshold);
            (before - clients.len(), clients.len())
        };

        metrics::record_limiter_clients(remaining);
        if evicted > 0 {
            metrics::record_limiter_evictions(evicted);
            tracing::debug!(evicted, remaining, "Evicted idle client limiters");
        }
        evicted
    }

    /// Spawn the janitor: every `sweep_interval`, evict clients idle longer than
    /// `idle_threshold`. The task exits once `shutdown` is cancelled.
    pub fn spawn_janitor(
        self: &Arc<Self>,
        sweep_interval: Duration,
        idle_threshold: Duration,
        shutdown: CancellationToken,
    ) -> Result<JoinHandle<()>, LimiterError> {
        if sweep_interval.is_zero() || idle_threshold <= sweep_interval {
            return Err(LimiterError::InvalidJanitorSchedule {
                sweep: sweep_interval,
                idle: idle_threshold,
            });
        }

        let registry = Arc::clone(self);
        Ok(tokio::spawn(async move {
            tracing::debug!(?sweep_interval, ?idle_threshold, "Limiter janitor starting");

            let mut ticker = time::interval_at(Instant::now() + sweep_interval, sweep_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        registry.sweep(idle_threshold);
                    }
                    _ = shutdown.cancelled() => {
                        tracing::debug!("Limiter janitor received shutdown signal, exiting loop");
                        break;
                    }
                }
            }
        }))
    }

    /// Number of tracked clients.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    /// Tokens left in a client's bucket, if the client is tracked.
    pub fn tokens(&self, key: &str) -> Option<f64> {
        self.lock().get(key).map(|entry| entry.limiter.tokens())
    }

    // Admission and sweeps never panic while holding the lock, so a poisoned
    // map is still consistent.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
