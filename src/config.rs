//! Construction-time validation shared by every policy config.
//!
//! All configs are validated eagerly: a bad value is reported as a [`ConfigurationError`]
//! before the policy exists, never on the first `execute`.
//!
//! With the `serde` feature enabled, the `*Settings` structs give a plain, millisecond-based
//! shape that can be deserialized from JSON/TOML and converted into validated configs with
//! `TryFrom`.

use std::time::Duration;

/// Invalid construction argument. Fatal, reported synchronously, never retried.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid {field}: {reason}")]
pub struct ConfigurationError {
    /// Name of the offending field.
    pub field: &'static str,
    /// Why the value was rejected.
    pub reason: String,
}

impl ConfigurationError {
    /// Build an error for `field`.
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self { field, reason: reason.into() }
    }
}

pub(crate) fn require_positive(field: &'static str, value: usize) -> Result<(), ConfigurationError> {
    if value == 0 {
        return Err(ConfigurationError::new(field, "must be > 0 (got 0)"));
    }
    Ok(())
}

pub(crate) fn require_duration(field: &'static str, value: Duration) -> Result<(), ConfigurationError> {
    if value == Duration::ZERO {
        return Err(ConfigurationError::new(field, "must be non-zero"));
    }
    if value == Duration::MAX {
        return Err(ConfigurationError::new(field, "must be finite"));
    }
    Ok(())
}

#[cfg(feature = "serde")]
pub use settings::{BulkheadSettings, CircuitBreakerSettings, TimeoutSettings};

#[cfg(feature = "serde")]
mod settings {
    use super::ConfigurationError;
    use crate::bulkhead::BulkheadConfig;
    use crate::circuit_breaker::CircuitBreakerConfig;
    use crate::timeout::TimeoutPolicy;
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    /// Serializable circuit breaker settings. Missing fields take the builder defaults.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(default, deny_unknown_fields)]
    pub struct CircuitBreakerSettings {
        pub failure_threshold: usize,
        pub success_threshold: usize,
        pub timeout_ms: u64,
        pub reset_timeout_ms: u64,
        pub half_open_max_calls: usize,
    }

    impl Default for CircuitBreakerSettings {
        fn default() -> Self {
            let cfg = CircuitBreakerConfig::default();
            Self {
                failure_threshold: cfg.failure_threshold(),
                success_threshold: cfg.success_threshold(),
                timeout_ms: millis(cfg.timeout()),
                reset_timeout_ms: millis(cfg.reset_timeout()),
                half_open_max_calls: cfg.half_open_max_calls(),
            }
        }
    }

    impl TryFrom<CircuitBreakerSettings> for CircuitBreakerConfig {
        type Error = ConfigurationError;

        fn try_from(s: CircuitBreakerSettings) -> Result<Self, Self::Error> {
            CircuitBreakerConfig::builder()
                .failure_threshold(s.failure_threshold)
                .success_threshold(s.success_threshold)
                .timeout(Duration::from_millis(s.timeout_ms))
                .reset_timeout(Duration::from_millis(s.reset_timeout_ms))
                .half_open_max_calls(s.half_open_max_calls)
                .build()
        }
    }

    /// Serializable bulkhead settings.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(default, deny_unknown_fields)]
    pub struct BulkheadSettings {
        pub max_concurrent: usize,
        pub max_queue_size: usize,
        pub queue_timeout_ms: u64,
    }

    impl Default for BulkheadSettings {
        fn default() -> Self {
            let cfg = BulkheadConfig::default();
            Self {
                max_concurrent: cfg.max_concurrent(),
                max_queue_size: cfg.max_queue_size(),
                queue_timeout_ms: millis(cfg.queue_timeout()),
            }
        }
    }

    impl TryFrom<BulkheadSettings> for BulkheadConfig {
        type Error = ConfigurationError;

        fn try_from(s: BulkheadSettings) -> Result<Self, Self::Error> {
            BulkheadConfig::new(
                s.max_concurrent,
                s.max_queue_size,
                Duration::from_millis(s.queue_timeout_ms),
            )
        }
    }

    /// Serializable timeout settings.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(default, deny_unknown_fields)]
    pub struct TimeoutSettings {
        pub timeout_ms: u64,
    }

    impl Default for TimeoutSettings {
        fn default() -> Self {
            Self { timeout_ms: millis(TimeoutPolicy::default().duration()) }
        }
    }

    impl TryFrom<TimeoutSettings> for TimeoutPolicy {
        type Error = ConfigurationError;

        fn try_from(s: TimeoutSettings) -> Result<Self, Self::Error> {
            TimeoutPolicy::new(Duration::from_millis(s.timeout_ms))
        }
    }

    fn millis(d: Duration) -> u64 {
        u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
    }
}
