//! Telemetry and observability for policies.
//!
//! Policies log through `tracing` unconditionally. Attaching a sink with `with_sink` also
//! delivers structured [`PolicyEvent`]s to it. Sinks are `tower::Service<PolicyEvent>`s and
//! emission is best-effort: a failing sink never affects the guarded call, and a slow one is
//! finished on a spawned task so it cannot delay admission, rejection or a deadline.
//!
//! # Event Types
//!
//! - **Circuit Breaker**: `Opened`, `HalfOpen`, `Closed`, `Rejected`
//! - **Bulkhead**: `Acquired`, `Queued`, `Rejected`, `QueueTimedOut`
//! - **Timeout**: `Occurred`, `Fallback`

pub mod events;
pub mod sinks;

pub use events::{BulkheadEvent, CircuitBreakerEvent, PolicyEvent, TimeoutEvent};
pub(crate) use sinks::emit;
#[cfg(test)]
pub(crate) use sinks::testing;
pub use sinks::{emit_best_effort, LogSink, MemorySink, NullSink, SharedSink, TelemetrySink};
