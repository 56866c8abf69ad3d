//! Timeout policy implementation
//!
//! The operation races a deadline. When the deadline wins, the operation's future is dropped:
//! the executor stops waiting for it, but anything it already handed to another task keeps
//! running and its result is discarded.

use crate::config::{require_duration, ConfigurationError};
use crate::telemetry::{emit, SharedSink, TelemetrySink, TimeoutEvent};
use crate::ResilienceError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct TimeoutPolicy {
    duration: Duration,
    sink: Option<SharedSink>,
}

impl TimeoutPolicy {
    /// Create a timeout policy. Errors if duration is zero or `Duration::MAX`.
    ///
    /// ```
    /// use faultline::TimeoutPolicy;
    /// use std::time::Duration;
    /// assert!(TimeoutPolicy::new(Duration::from_millis(50)).is_ok());
    /// assert!(TimeoutPolicy::new(Duration::ZERO).is_err());
    /// ```
    pub fn new(duration: Duration) -> Result<Self, ConfigurationError> {
        require_duration("timeout", duration)?;
        Ok(Self { duration, sink: None })
    }

    /// Inspect the configured timeout duration.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Deliver timeout events to `sink`.
    pub fn with_sink<S>(mut self, sink: S) -> Self
    where
        S: TelemetrySink,
        S::Future: Send + 'static,
    {
        self.sink = Some(SharedSink::new(sink));
        self
    }

    /// Attach a fallback that produces the outcome when the deadline is hit.
    ///
    /// The fallback's result is returned as-is: `Ok` is a successful replacement value, `Err` a
    /// replacement error.
    ///
    /// ```
    /// use faultline::{ResilienceError, TimeoutPolicy};
    /// use std::time::Duration;
    ///
    /// # tokio::runtime::Runtime::new().unwrap().block_on(async {
    /// let policy = TimeoutPolicy::new(Duration::from_millis(10))
    ///     .unwrap()
    ///     .with_fallback(|| Ok::<_, ResilienceError<std::io::Error>>("cached"));
    /// let value = policy
    ///     .execute(|| async {
    ///         tokio::time::sleep(Duration::from_secs(1)).await;
    ///         Ok("fresh")
    ///     })
    ///     .await
    ///     .unwrap();
    /// assert_eq!(value, "cached");
    /// # });
    /// ```
    pub fn with_fallback<F, T, E>(self, fallback: F) -> FallbackTimeout<F>
    where
        F: Fn() -> Result<T, ResilienceError<E>> + Send + Sync,
    {
        FallbackTimeout { timeout: self, fallback: Arc::new(fallback) }
    }

    pub async fn execute<T, E, Fut, Op>(&self, operation: Op) -> Result<T, ResilienceError<E>>
    where
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
        Op: FnOnce() -> Fut,
    {
        match self.race(operation).await {
            Ok(result) => result,
            Err(elapsed) => {
                tracing::warn!(?elapsed, timeout = ?self.duration, "Timeout: operation exceeded deadline");
                emit(&self.sink, TimeoutEvent::Occurred { timeout: self.duration });
                Err(ResilienceError::Timeout { elapsed, timeout: self.duration })
            }
        }
    }

    /// Run the race; `Err` carries the elapsed time when the deadline won.
    async fn race<T, E, Fut, Op>(&self, operation: Op) -> Result<Result<T, ResilienceError<E>>, Duration>
    where
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
        Op: FnOnce() -> Fut,
    {
        let start = Instant::now();
        tokio::time::timeout(self.duration, operation()).await.map_err(|_| start.elapsed())
    }
}

impl Default for TimeoutPolicy {
    /// 30 seconds.
    fn default() -> Self {
        Self { duration: Duration::from_secs(30), sink: None }
    }
}

/// A [`TimeoutPolicy`] whose deadline produces the fallback's outcome instead of `Timeout`.
pub struct FallbackTimeout<F> {
    timeout: TimeoutPolicy,
    fallback: Arc<F>,
}

impl<F> Clone for FallbackTimeout<F> {
    fn clone(&self) -> Self {
        Self { timeout: self.timeout.clone(), fallback: self.fallback.clone() }
    }
}

impl<F> std::fmt::Debug for FallbackTimeout<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackTimeout")
            .field("duration", &self.timeout.duration)
            .field("fallback", &"<fallback>")
            .finish()
    }
}

impl<F> FallbackTimeout<F> {
    pub fn duration(&self) -> Duration {
        self.timeout.duration
    }

    pub async fn execute<T, E, Fut, Op>(&self, operation: Op) -> Result<T, ResilienceError<E>>
    where
        F: Fn() -> Result<T, ResilienceError<E>>,
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
        Op: FnOnce() -> Fut,
    {
        match self.timeout.race(operation).await {
            Ok(result) => result,
            Err(elapsed) => {
                tracing::warn!(?elapsed, timeout = ?self.timeout.duration, "Timeout: using fallback");
                emit(&self.timeout.sink, TimeoutEvent::Fallback { timeout: self.timeout.duration });
                (self.fallback)()
            }
        }
    }
}
