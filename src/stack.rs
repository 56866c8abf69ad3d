//! Resilience stack builder for composing policies
//!
//! The stack runs `CircuitBreaker → Timeout → Bulkhead → operation`:
//! - the breaker sees timeouts and bulkhead rejections as failures,
//! - time spent queued in the bulkhead counts against the timeout.

use crate::policy::{Nested, ResiliencePolicy};
use crate::{
    BulkheadConfig, BulkheadPolicy, CircuitBreakerConfig, CircuitBreakerPolicy, ConfigurationError,
    ResilienceError, TimeoutPolicy,
};
use futures::future::BoxFuture;
use std::future::Future;
use std::time::Duration;

/// Circuit breaker, timeout and bulkhead composed in a fixed order.
///
/// Clones share breaker and bulkhead state.
#[derive(Debug, Clone)]
pub struct ResilienceStack {
    layers: Nested<CircuitBreakerPolicy, Nested<TimeoutPolicy, BulkheadPolicy>>,
}

impl ResilienceStack {
    pub fn builder() -> ResilienceStackBuilder {
        ResilienceStackBuilder::new()
    }

    pub async fn execute<T, E, Fut, Op>(&self, operation: Op) -> Result<T, ResilienceError<E>>
    where
        T: Send + 'static,
        E: Send + 'static,
        Fut: Future<Output = Result<T, ResilienceError<E>>> + Send,
        Op: FnOnce() -> Fut + Send,
    {
        self.layers.execute(operation).await
    }

    pub fn circuit_breaker(&self) -> &CircuitBreakerPolicy {
        self.layers.outer()
    }

    pub fn timeout(&self) -> &TimeoutPolicy {
        self.layers.inner().outer()
    }

    pub fn bulkhead(&self) -> &BulkheadPolicy {
        self.layers.inner().inner()
    }

    /// True when both the breaker and the bulkhead would admit a call now.
    pub fn is_available(&self) -> bool {
        self.circuit_breaker().is_available() && self.bulkhead().is_available()
    }
}

impl Default for ResilienceStack {
    fn default() -> Self {
        let (breaker, timeout, bulkhead) = defaults();
        ResilienceStack { layers: Nested::new(breaker, Nested::new(timeout, bulkhead)) }
    }
}

impl<T, E> ResiliencePolicy<T, E> for ResilienceStack
where
    T: Send + 'static,
    E: Send + 'static,
{
    fn execute<'a, Fut, Op>(&'a self, operation: Op) -> BoxFuture<'a, Result<T, ResilienceError<E>>>
    where
        Fut: Future<Output = Result<T, ResilienceError<E>>> + Send + 'a,
        Op: FnOnce() -> Fut + Send + 'a,
    {
        self.layers.execute(operation)
    }

    fn is_available(&self) -> bool {
        ResilienceStack::is_available(self)
    }
}

fn defaults() -> (CircuitBreakerPolicy, TimeoutPolicy, BulkheadPolicy) {
    let bulkhead = BulkheadConfig::builder()
        .max_concurrent(100)
        .max_queue_size(100)
        .queue_timeout(Duration::from_secs(5))
        .build()
        .unwrap_or_default();
    (
        CircuitBreakerPolicy::with_config(CircuitBreakerConfig::default()),
        TimeoutPolicy::default(),
        BulkheadPolicy::with_config(bulkhead),
    )
}

/// Builder for [`ResilienceStack`]. Unset layers use the defaults:
/// breaker 5 failures / 60s, timeout 30s, bulkhead 100 concurrent / 100 queued / 5s.
#[derive(Debug, Clone, Default)]
pub struct ResilienceStackBuilder {
    timeout: Option<TimeoutPolicy>,
    bulkhead: Option<BulkheadPolicy>,
    circuit_breaker: Option<CircuitBreakerPolicy>,
}

impl ResilienceStackBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout(mut self, duration: Duration) -> Result<Self, ConfigurationError> {
        self.timeout = Some(TimeoutPolicy::new(duration)?);
        Ok(self)
    }

    pub fn timeout_policy(mut self, policy: TimeoutPolicy) -> Self {
        self.timeout = Some(policy);
        self
    }

    pub fn bulkhead(
        mut self,
        max_concurrent: usize,
        max_queue_size: usize,
        queue_timeout: Duration,
    ) -> Result<Self, ConfigurationError> {
        self.bulkhead = Some(BulkheadPolicy::new(max_concurrent, max_queue_size, queue_timeout)?);
        Ok(self)
    }

    pub fn bulkhead_policy(mut self, policy: BulkheadPolicy) -> Self {
        self.bulkhead = Some(policy);
        self
    }

    pub fn circuit_breaker(mut self, failures: usize, timeout: Duration) -> Result<Self, ConfigurationError> {
        self.circuit_breaker = Some(CircuitBreakerPolicy::new(failures, timeout)?);
        Ok(self)
    }

    pub fn circuit_breaker_with_config(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = Some(CircuitBreakerPolicy::with_config(config));
        self
    }

    pub fn circuit_breaker_policy(mut self, policy: CircuitBreakerPolicy) -> Self {
        self.circuit_breaker = Some(policy);
        self
    }

    pub fn build(self) -> ResilienceStack {
        let (breaker, timeout, bulkhead) = defaults();
        let breaker = self.circuit_breaker.unwrap_or(breaker);
        let timeout = self.timeout.unwrap_or(timeout);
        let bulkhead = self.bulkhead.unwrap_or(bulkhead);
        ResilienceStack { layers: Nested::new(breaker, Nested::new(timeout, bulkhead)) }
    }
}
