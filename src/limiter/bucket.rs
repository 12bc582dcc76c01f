//! Token bucket scoped to a single client.

use tokio::time::Instant;

use super::LimiterError;

/// A token bucket rate limiter for one client key.
///
/// Tokens accumulate at `refill_rate` per second up to `capacity` and each
/// admitted request consumes one. A rate of zero never refills, so the bucket
/// degenerates to a one-time allowance of `capacity` requests.
#[derive(Debug, Clone)]
pub struct ClientLimiter {
    capacity: f64,
    refill_rate: f64,
    tokens: f64,
    last_refill: Instant,
}

impl ClientLimiter {
    /// Create a full bucket.
    pub fn new(capacity: u32, refill_rate: f64) -> Result<Self, LimiterError> {
        Self::new_at(capacity, refill_rate, Instant::now())
    }

    /// Create a full bucket whose refill clock starts at `now`.
    pub fn new_at(capacity: u32, refill_rate: f64, now: Instant) -> Result<Self, LimiterError> {
        if capacity == 0 || !refill_rate.is_finite() || refill_rate < 0.0 {
            return Err(LimiterError::InvalidQuota {
                capacity,
                refill_rate,
            });
        }

        Ok(Self {
            capacity: capacity as f64,
            refill_rate,
            tokens: capacity as f64,
            last_refill: now,
        })
    }

    /// Try to take one token. Never blocks.
    pub fn try_acquire(&mut self) -> bool {
        self.try_acquire_at(Instant::now())
    }

    /// Try to take one token as of `now`.
    pub fn try_acquire_at(&mut self, now: Instant) -> bool {
        // A clock reading older than the last refill adds nothing.
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();

        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        if now > self.last_refill {
            self.last_refill = now;
        }

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Refill the bucket completely and restart its clock at `now`.
    pub fn reset_at(&mut self, now: Instant) {
        self.tokens = self.capacity;
        self.last_refill = now;
    }

    /// Tokens currently in the bucket, as of the last acquire attempt.
    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    pub fn capacity(&self) -> u32 {
        self.capacity as u32
    }

    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn zero_rate_allows_exactly_capacity() {
        let start = Instant::now();
        let mut limiter = ClientLimiter::new_at(5, 0.0, start).unwrap();

        let admitted = (0..20)
            .map(|i| limiter.try_acquire_at(start + Duration::from_secs(i)))
            .filter(|ok| *ok)
            .count();

        assert_eq!(admitted, 5);
        assert!(!limiter.try_acquire_at(start + Duration::from_secs(3600)));
    }

    #[test]
    fn full_refill_after_capacity_over_rate() {
        let start = Instant::now();
        let mut limiter = ClientLimiter::new_at(4, 2.0, start).unwrap();

        for _ in 0..4 {
            assert!(limiter.try_acquire_at(start));
        }
        assert!(!limiter.try_acquire_at(start));

        // C / R = 2 seconds
        let later = start + Duration::from_secs(2);
        for _ in 0..4 {
            assert!(limiter.try_acquire_at(later));
        }
        assert!(!limiter.try_acquire_at(later));
    }

    #[test]
    fn refill_is_capped_at_capacity() {
        let start = Instant::now();
        let mut limiter = ClientLimiter::new_at(3, 10.0, start).unwrap();

        let much_later = start + Duration::from_secs(600);
        assert!(limiter.try_acquire_at(much_later));
        assert!(limiter.tokens() <= 3.0);
        assert!((limiter.tokens() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn partial_refill_admits_one() {
        let start = Instant::now();
        let mut limiter = ClientLimiter::new_at(1, 2.0, start).unwrap();

        assert!(limiter.try_acquire_at(start));
        assert!(!limiter.try_acquire_at(start + Duration::from_millis(200)));
        assert!(limiter.try_acquire_at(start + Duration::from_millis(600)));
    }

    #[test]
    fn stale_clock_reading_does_not_refill() {
        let start = Instant::now() + Duration::from_secs(10);
        let mut limiter = ClientLimiter::new_at(1, 100.0, start).unwrap();

        assert!(limiter.try_acquire_at(start));
        assert!(!limiter.try_acquire_at(start - Duration::from_secs(5)));
        assert!(limiter.tokens() >= 0.0);
    }

    #[test]
    fn rejects_invalid_quota() {
        assert!(ClientLimiter::new(0, 1.0).is_err());
        assert!(ClientLimiter::new(1, -1.0).is_err());
        assert!(ClientLimiter::new(1, f64::NAN).is_err());
        assert!(ClientLimiter::new(1, f64::INFINITY).is_err());
    }
}
