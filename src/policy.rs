//! The shared `execute(operation) -> result` contract and composition.
//!
//! Every policy in the crate implements [`ResiliencePolicy`], so code that only needs "run this
//! under some protection" can hold any of them, or a nesting of several.
//!
//! - [`Nested::new(outer, inner)`](Nested::new) runs `outer(inner(operation))`.
//! - `Policy(a) + Policy(b)` builds the same nesting with operator syntax; `+` chains, so
//!   `Policy(a) + Policy(b) + Policy(c)` is `a(b(c(operation)))`.
//!
//! ```
//! use faultline::prelude::*;
//! use std::time::Duration;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let guarded = Policy(CircuitBreakerPolicy::new(3, Duration::from_secs(10)).unwrap())
//!     + Policy(TimeoutPolicy::new(Duration::from_secs(1)).unwrap())
//!     + Policy(BulkheadPolicy::new(8, 32, Duration::from_millis(500)).unwrap());
//!
//! let answer: Result<u32, ResilienceError<std::io::Error>> =
//!     guarded.execute(|| async { Ok(42) }).await;
//! assert_eq!(answer.unwrap(), 42);
//! # });
//! ```

use crate::bulkhead::BulkheadPolicy;
use crate::circuit_breaker::CircuitBreakerPolicy;
use crate::timeout::{FallbackTimeout, TimeoutPolicy};
use crate::ResilienceError;
use futures::future::BoxFuture;
use std::future::Future;
use std::ops::Add;
use std::sync::Arc;

/// A policy that runs an operation under some protection.
///
/// `T` and `E` are the operation's success and error types; rejections the policy itself
/// produces travel in the other `ResilienceError` variants.
pub trait ResiliencePolicy<T, E>: Send + Sync {
    /// Run `operation` under this policy.
    fn execute<'a, Fut, Op>(&'a self, operation: Op) -> BoxFuture<'a, Result<T, ResilienceError<E>>>
    where
        Fut: Future<Output = Result<T, ResilienceError<E>>> + Send + 'a,
        Op: FnOnce() -> Fut + Send + 'a;

    /// Whether a call made now would be admitted. Never changes state.
    fn is_available(&self) -> bool;
}

impl<T, E> ResiliencePolicy<T, E> for CircuitBreakerPolicy
where
    T: Send + 'static,
    E: Send + 'static,
{
    fn execute<'a, Fut, Op>(&'a self, operation: Op) -> BoxFuture<'a, Result<T, ResilienceError<E>>>
    where
        Fut: Future<Output = Result<T, ResilienceError<E>>> + Send + 'a,
        Op: FnOnce() -> Fut + Send + 'a,
    {
        Box::pin(CircuitBreakerPolicy::execute(self, operation))
    }

    fn is_available(&self) -> bool {
        CircuitBreakerPolicy::is_available(self)
    }
}

impl<T, E> ResiliencePolicy<T, E> for BulkheadPolicy
where
    T: Send + 'static,
    E: Send + 'static,
{
    fn execute<'a, Fut, Op>(&'a self, operation: Op) -> BoxFuture<'a, Result<T, ResilienceError<E>>>
    where
        Fut: Future<Output = Result<T, ResilienceError<E>>> + Send + 'a,
        Op: FnOnce() -> Fut + Send + 'a,
    {
        Box::pin(BulkheadPolicy::execute(self, operation))
    }

    fn is_available(&self) -> bool {
        BulkheadPolicy::is_available(self)
    }
}

impl<T, E> ResiliencePolicy<T, E> for TimeoutPolicy
where
    T: Send + 'static,
    E: Send + 'static,
{
    fn execute<'a, Fut, Op>(&'a self, operation: Op) -> BoxFuture<'a, Result<T, ResilienceError<E>>>
    where
        Fut: Future<Output = Result<T, ResilienceError<E>>> + Send + 'a,
        Op: FnOnce() -> Fut + Send + 'a,
    {
        Box::pin(TimeoutPolicy::execute(self, operation))
    }

    fn is_available(&self) -> bool {
        true
    }
}

impl<F, T, E> ResiliencePolicy<T, E> for FallbackTimeout<F>
where
    F: Fn() -> Result<T, ResilienceError<E>> + Send + Sync,
    T: Send + 'static,
    E: Send + 'static,
{
    fn execute<'a, Fut, Op>(&'a self, operation: Op) -> BoxFuture<'a, Result<T, ResilienceError<E>>>
    where
        Fut: Future<Output = Result<T, ResilienceError<E>>> + Send + 'a,
        Op: FnOnce() -> Fut + Send + 'a,
    {
        Box::pin(FallbackTimeout::execute(self, operation))
    }

    fn is_available(&self) -> bool {
        true
    }
}

impl<P, T, E> ResiliencePolicy<T, E> for Arc<P>
where
    P: ResiliencePolicy<T, E> + ?Sized,
{
    fn execute<'a, Fut, Op>(&'a self, operation: Op) -> BoxFuture<'a, Result<T, ResilienceError<E>>>
    where
        Fut: Future<Output = Result<T, ResilienceError<E>>> + Send + 'a,
        Op: FnOnce() -> Fut + Send + 'a,
    {
        (**self).execute(operation)
    }

    fn is_available(&self) -> bool {
        (**self).is_available()
    }
}

/// `outer` wrapped around `inner`: the operation runs inside `inner`, which runs inside `outer`.
#[derive(Debug, Clone)]
pub struct Nested<O, I> {
    outer: O,
    inner: I,
}

impl<O, I> Nested<O, I> {
    pub fn new(outer: O, inner: I) -> Self {
        Self { outer, inner }
    }

    pub fn outer(&self) -> &O {
        &self.outer
    }

    pub fn inner(&self) -> &I {
        &self.inner
    }
}

impl<O, I, T, E> ResiliencePolicy<T, E> for Nested<O, I>
where
    O: ResiliencePolicy<T, E>,
    I: ResiliencePolicy<T, E>,
    T: Send + 'static,
    E: Send + 'static,
{
    fn execute<'a, Fut, Op>(&'a self, operation: Op) -> BoxFuture<'a, Result<T, ResilienceError<E>>>
    where
        Fut: Future<Output = Result<T, ResilienceError<E>>> + Send + 'a,
        Op: FnOnce() -> Fut + Send + 'a,
    {
        let inner = &self.inner;
        self.outer.execute(move || inner.execute(operation))
    }

    /// Admitted only if every layer would admit the call.
    fn is_available(&self) -> bool {
        self.outer.is_available() && self.inner.is_available()
    }
}

/// Opt-in wrapper enabling `+` composition: `Policy(A) + Policy(B)` runs operations in `B`
/// inside `A`.
#[derive(Debug, Clone)]
pub struct Policy<P>(pub P);

impl<P> Policy<P> {
    pub fn into_inner(self) -> P {
        self.0
    }
}

impl<A, B> Add<Policy<B>> for Policy<A> {
    type Output = Policy<Nested<A, B>>;

    fn add(self, rhs: Policy<B>) -> Self::Output {
        Policy(Nested::new(self.0, rhs.0))
    }
}

impl<P, T, E> ResiliencePolicy<T, E> for Policy<P>
where
    P: ResiliencePolicy<T, E>,
{
    fn execute<'a, Fut, Op>(&'a self, operation: Op) -> BoxFuture<'a, Result<T, ResilienceError<E>>>
    where
        Fut: Future<Output = Result<T, ResilienceError<E>>> + Send + 'a,
        Op: FnOnce() -> Fut + Send + 'a,
    {
        self.0.execute(operation)
    }

    fn is_available(&self) -> bool {
        self.0.is_available()
    }
}
