use std::fmt;
use std::time::Duration;

/// Policy events emitted during execution.
///
/// Policies emit these alongside their `tracing` output so callers can collect, count or
/// forward them without parsing logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyEvent {
    /// Circuit breaker events
    CircuitBreaker(CircuitBreakerEvent),
    /// Bulkhead events
    Bulkhead(BulkheadEvent),
    /// Timeout events
    Timeout(TimeoutEvent),
}

/// Events emitted by circuit breaker policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitBreakerEvent {
    /// Circuit transitioned to open state.
    ///
    /// Subsequent calls are rejected until `next_attempt_millis`.
    Opened {
        /// Failures recorded when the circuit opened
        failure_count: usize,
        /// Clock time at which a trial call will be admitted
        next_attempt_millis: u64,
    },
    /// Circuit transitioned to half-open state and admitted a trial call.
    HalfOpen,
    /// Circuit transitioned to closed state.
    Closed,
    /// A call was rejected without running.
    Rejected {
        /// Clock time at which a trial call will be admitted
        next_attempt_millis: u64,
    },
}

/// Events emitted by bulkhead policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkheadEvent {
    /// A call obtained a permit, immediately or after queueing.
    Acquired {
        /// Calls holding a permit, this one included
        in_flight: usize,
        /// Maximum concurrency limit
        max_concurrent: usize,
    },
    /// A call found no free permit and joined the wait queue.
    Queued {
        /// Queue length including this call
        queue_length: usize,
        /// Maximum queue length
        max_queue_size: usize,
    },
    /// A call was rejected because both permits and queue were exhausted.
    Rejected {
        /// Maximum concurrency limit
        max_concurrent: usize,
        /// Maximum queue length
        max_queue_size: usize,
    },
    /// A queued call gave up waiting.
    QueueTimedOut {
        /// How long the call waited
        waited: Duration,
    },
}

/// Events emitted by timeout policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutEvent {
    /// A call exceeded the timeout duration; its result will be discarded.
    Occurred {
        /// The timeout duration that was exceeded
        timeout: Duration,
    },
    /// A call timed out and the configured fallback produced the outcome.
    Fallback {
        /// The timeout duration that was exceeded
        timeout: Duration,
    },
}

impl fmt::Display for PolicyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyEvent::CircuitBreaker(event) => write!(f, "CircuitBreaker::{}", event),
            PolicyEvent::Bulkhead(event) => write!(f, "Bulkhead::{}", event),
            PolicyEvent::Timeout(event) => write!(f, "Timeout::{}", event),
        }
    }
}

impl fmt::Display for CircuitBreakerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitBreakerEvent::Opened { failure_count, next_attempt_millis } => write!(
                f,
                "Opened(failures={}, next_attempt={}ms)",
                failure_count, next_attempt_millis
            ),
            CircuitBreakerEvent::HalfOpen => write!(f, "HalfOpen"),
            CircuitBreakerEvent::Closed => write!(f, "Closed"),
            CircuitBreakerEvent::Rejected { next_attempt_millis } => {
                write!(f, "Rejected(next_attempt={}ms)", next_attempt_millis)
            }
        }
    }
}

impl fmt::Display for BulkheadEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BulkheadEvent::Acquired { in_flight, max_concurrent } => {
                write!(f, "Acquired({}/{})", in_flight, max_concurrent)
            }
            BulkheadEvent::Queued { queue_length, max_queue_size } => {
                write!(f, "Queued({}/{})", queue_length, max_queue_size)
            }
            BulkheadEvent::Rejected { max_concurrent, max_queue_size } => {
                write!(f, "Rejected(max_concurrent={}, max_queue={})", max_concurrent, max_queue_size)
            }
            BulkheadEvent::QueueTimedOut { waited } => write!(f, "QueueTimedOut({:?})", waited),
        }
    }
}

impl fmt::Display for TimeoutEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutEvent::Occurred { timeout } => write!(f, "Occurred({:?})", timeout),
            TimeoutEvent::Fallback { timeout } => write!(f, "Fallback({:?})", timeout),
        }
    }
}

impl From<CircuitBreakerEvent> for PolicyEvent {
    fn from(event: CircuitBreakerEvent) -> Self {
        PolicyEvent::CircuitBreaker(event)
    }
}

impl From<BulkheadEvent> for PolicyEvent {
    fn from(event: BulkheadEvent) -> Self {
        PolicyEvent::Bulkhead(event)
    }
}

impl From<TimeoutEvent> for PolicyEvent {
    fn from(event: TimeoutEvent) -> Self {
        PolicyEvent::Timeout(event)
    }
}
