#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # faultline
//!
//! Fault-tolerance policies for async Rust: circuit breakers, bulkheads, and timeouts.
//!
//! ## Features
//!
//! - **Circuit breakers** with half-open trial calls and an injectable clock
//! - **Bulkheads** limiting concurrency, with a bounded FIFO wait queue and queue timeout
//! - **Timeouts** integrated with tokio, with an optional fallback
//! - **Composition** through the shared [`ResiliencePolicy`] contract, `Policy(a) + Policy(b)`,
//!   or the ready-made [`ResilienceStack`]
//! - **Tower** integration via [`PolicyLayer`], and telemetry sinks that are tower services
//!
//! ## Quick Start
//!
//! ```rust
//! use faultline::{CircuitBreakerPolicy, ResilienceError};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let breaker = CircuitBreakerPolicy::new(5, Duration::from_secs(30)).unwrap();
//!
//!     let result = breaker.execute(|| async {
//!         // Your async operation here
//!         Ok::<_, ResilienceError<std::io::Error>>(())
//!     }).await;
//!     assert!(result.is_ok());
//! }
//! ```

pub mod bulkhead;
pub mod circuit_breaker;
pub mod clock;
pub mod config;
pub mod error;
pub mod layer;
pub mod policy;
pub mod prelude;
pub mod stack;
pub mod telemetry;
pub mod timeout;

// Re-exports
pub use bulkhead::{BulkheadConfig, BulkheadConfigBuilder, BulkheadPolicy, BulkheadStats};
pub use circuit_breaker::{CircuitBreakerConfig, CircuitBreakerConfigBuilder, CircuitBreakerPolicy, CircuitState};
pub use clock::{Clock, ManualClock, MonotonicClock, SystemClock};
#[cfg(feature = "serde")]
pub use config::{BulkheadSettings, CircuitBreakerSettings, TimeoutSettings};
pub use config::ConfigurationError;
pub use error::ResilienceError;
pub use layer::{PolicyLayer, PolicyService};
pub use policy::{Nested, Policy, ResiliencePolicy};
pub use stack::{ResilienceStack, ResilienceStackBuilder};
pub use timeout::{FallbackTimeout, TimeoutPolicy};
