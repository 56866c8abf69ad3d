//! Error types for resilience policies
use std::fmt;
use std::time::Duration;

/// Unified error type for all resilience policies.
///
/// Every rejection a policy can produce has its own variant, so callers can tell "the policy
/// turned my call away" from "my call ran and failed" (`Inner`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResilienceError<E> {
    /// The circuit breaker is open (or its half-open trial slots are taken).
    CircuitOpen {
        /// Failures recorded when the circuit opened.
        failure_count: usize,
        /// Clock time (ms) at which a trial call will be admitted.
        next_attempt_millis: u64,
        /// Time left until `next_attempt_millis`; zero while a trial is in flight.
        retry_after: Duration,
    },
    /// The operation exceeded the timeout duration.
    Timeout { elapsed: Duration, timeout: Duration },
    /// The bulkhead had no free permit and its wait queue was full.
    QueueFull { max_concurrent: usize, max_queue_size: usize },
    /// The caller waited in the bulkhead queue longer than `queue_timeout`.
    QueueTimeout { waited: Duration, queue_timeout: Duration },
    /// The underlying operation failed
    Inner(E),
}

impl<E: fmt::Display> fmt::Display for ResilienceError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CircuitOpen { failure_count, next_attempt_millis, retry_after } => write!(
                f,
                "circuit breaker open ({} failures, next attempt at {}ms, retry after {:?})",
                failure_count, next_attempt_millis, retry_after
            ),
            Self::Timeout { elapsed, timeout } => {
                write!(f, "operation timed out after {:?} (limit: {:?})", elapsed, timeout)
            }
            Self::QueueFull { max_concurrent, max_queue_size } => write!(
                f,
                "bulkhead queue full (max {} concurrent, max {} queued)",
                max_concurrent, max_queue_size
            ),
            Self::QueueTimeout { waited, queue_timeout } => write!(
                f,
                "bulkhead queue wait timed out after {:?} (limit: {:?})",
                waited, queue_timeout
            ),
            Self::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for ResilienceError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
}

impl<E> ResilienceError<E> {
    /// Check if this error is due to timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Check if this error is due to circuit breaker
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    /// Check if the bulkhead rejected the call without queueing it.
    pub fn is_queue_full(&self) -> bool {
        matches!(self, Self::QueueFull { .. })
    }

    /// Check if the call gave up waiting in the bulkhead queue.
    pub fn is_queue_timeout(&self) -> bool {
        matches!(self, Self::QueueTimeout { .. })
    }

    /// Check if this error is any bulkhead rejection.
    pub fn is_bulkhead(&self) -> bool {
        self.is_queue_full() || self.is_queue_timeout()
    }

    /// Check if this error wraps an inner error.
    pub fn is_inner(&self) -> bool {
        matches!(self, Self::Inner(_))
    }

    /// Get the inner error if this is an Inner variant
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }

    /// Borrow the inner error if present.
    pub fn as_inner(&self) -> Option<&E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }

    /// Mutably borrow the inner error if present.
    pub fn as_inner_mut(&mut self) -> Option<&mut E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }

    /// Clock time (ms) after which an open circuit admits a trial call.
    pub fn next_attempt_millis(&self) -> Option<u64> {
        match self {
            Self::CircuitOpen { next_attempt_millis, .. } => Some(*next_attempt_millis),
            _ => None,
        }
    }

    /// Suggested backoff before calling an open circuit again.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::CircuitOpen { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    /// Access timeout details as (elapsed, timeout).
    pub fn timeout_details(&self) -> Option<(Duration, Duration)> {
        match self {
            Self::Timeout { elapsed, timeout } => Some((*elapsed, *timeout)),
            _ => None,
        }
    }

    /// Access queue-wait details as (waited, queue_timeout).
    pub fn queue_details(&self) -> Option<(Duration, Duration)> {
        match self {
            Self::QueueTimeout { waited, queue_timeout } => Some((*waited, *queue_timeout)),
            _ => None,
        }
    }

    /// Transform the inner error, keeping policy rejections untouched.
    pub fn map_inner<F, E2>(self, f: F) -> ResilienceError<E2>
    where
        F: FnOnce(E) -> E2,
    {
        match self {
            Self::CircuitOpen { failure_count, next_attempt_millis, retry_after } => {
                ResilienceError::CircuitOpen { failure_count, next_attempt_millis, retry_after }
            }
            Self::Timeout { elapsed, timeout } => ResilienceError::Timeout { elapsed, timeout },
            Self::QueueFull { max_concurrent, max_queue_size } => {
                ResilienceError::QueueFull { max_concurrent, max_queue_size }
            }
            Self::QueueTimeout { waited, queue_timeout } => {
                ResilienceError::QueueTimeout { waited, queue_timeout }
            }
            Self::Inner(e) => ResilienceError::Inner(f(e)),
        }
    }
}
