//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (burst > 0, timeouts > 0, addresses parse)
//! - Keep the janitor from evicting clients that are still mid-burst
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::ServerConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("{field}: invalid socket address {value:?}")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("limiter.requests_per_second must be a finite number >= 0, got {0}")]
    InvalidRate(f64),

    #[error("limiter.idle_eviction_ms ({idle}) must be greater than limiter.sweep_interval_ms ({sweep})")]
    EvictionWithinSweep { idle: u64, sweep: u64 },
}

/// Check every semantic constraint and collect all failures.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "listener.bind_address",
            value: config.listener.bind_address.clone(),
        });
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::Zero {
            field: "listener.max_connections",
        });
    }
    let timeouts = &config.timeouts;
    for (field, value) in [
        ("timeouts.request_secs", timeouts.request_secs),
        ("timeouts.read_secs", timeouts.read_secs),
        ("timeouts.idle_secs", timeouts.idle_secs),
    ] {
        if value == 0 {
            errors.push(ValidationError::Zero { field });
        }
    }

    let limiter = &config.limiter;
    if limiter.burst == 0 {
        errors.push(ValidationError::Zero {
            field: "limiter.burst",
        });
    }
    if !limiter.requests_per_second.is_finite() || limiter.requests_per_second < 0.0 {
        errors.push(ValidationError::InvalidRate(limiter.requests_per_second));
    }
    if limiter.sweep_interval_ms == 0 {
        errors.push(ValidationError::Zero {
            field: "limiter.sweep_interval_ms",
        });
    } else if limiter.idle_eviction_ms <= limiter.sweep_interval_ms {
        errors.push(ValidationError::EvictionWithinSweep {
            idle: limiter.idle_eviction_ms,
            sweep: limiter.sweep_interval_ms,
        });
    }

    if config.shutdown.drain_timeout_ms == 0 {
        errors.push(ValidationError::Zero {
            field: "shutdown.drain_timeout_ms",
        });
    }
    if config.shutdown.task_wait_timeout_ms == Some(0) {
        errors.push(ValidationError::Zero {
            field: "shutdown.task_wait_timeout_ms",
        });
    }

    let observability = &config.observability;
    if observability.metrics_enabled && observability.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address",
            value: observability.metrics_address.clone(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(validate_config(&ServerConfig::default()), Ok(()));
    }

    #[test]
    fn collects_every_error() {
        let mut config = ServerConfig::default();
        config.listener.bind_address = "not-an-address".into();
        config.limiter.burst = 0;
        config.limiter.requests_per_second = -1.0;
        config.limiter.idle_eviction_ms = 1_000;
        config.limiter.sweep_interval_ms = 1_000;
        config.shutdown.drain_timeout_ms = 0;
        config.timeouts.read_secs = 0;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 6);
        assert!(errors.contains(&ValidationError::EvictionWithinSweep {
            idle: 1_000,
            sweep: 1_000
        }));
        assert!(errors.contains(&ValidationError::Zero {
            field: "limiter.burst"
        }));
        assert!(errors.contains(&ValidationError::Zero {
            field: "timeouts.read_secs"
        }));
    }

    #[test]
    fn zero_rate_is_a_valid_one_time_burst() {
        let mut config = ServerConfig::default();
        config.limiter.requests_per_second = 0.0;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn metrics_address_checked_only_when_enabled() {
        let mut config = ServerConfig::default();
        config.observability.metrics_address = "nope".into();
        assert!(validate_config(&config).is_ok());

        config.observability.metrics_enabled = true;
        assert!(validate_config(&config).is_err());
    }
}
