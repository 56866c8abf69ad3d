//! Convenient re-exports for common faultline types.
pub use crate::{
    bulkhead::{BulkheadConfig, BulkheadPolicy, BulkheadStats},
    circuit_breaker::{CircuitBreakerConfig, CircuitBreakerPolicy, CircuitState},
    clock::{Clock, ManualClock, MonotonicClock},
    config::ConfigurationError,
    error::ResilienceError,
    layer::PolicyLayer,
    policy::{Nested, Policy, ResiliencePolicy},
    stack::{ResilienceStack, ResilienceStackBuilder},
    telemetry::{LogSink, MemorySink, NullSink, PolicyEvent},
    timeout::{FallbackTimeout, TimeoutPolicy},
};
