//! Circuit breaker: fail fast while a dependency is unhealthy, try recovery after a cooldown.
//!
//! # State machine
//! - **Closed** (initial): calls run; failures are counted and any success resets the count.
//!   Reaching `failure_threshold` opens the circuit.
//! - **Open**: calls are rejected without running until `next_attempt_millis`. The first call
//!   after that moves the circuit to half-open and runs as a trial.
//! - **HalfOpen**: at most `half_open_max_calls` trial calls run at once. `success_threshold`
//!   successful trials close the circuit; any failed trial reopens it with a fresh cooldown.
//!
//! Every state change bumps an internal epoch. A call remembers the epoch it was admitted in,
//! and its outcome is discarded if the circuit has moved on by the time it completes.

use crate::clock::{Clock, MonotonicClock};
use crate::config::{require_duration, require_positive, ConfigurationError};
use crate::telemetry::{emit, CircuitBreakerEvent, SharedSink, TelemetrySink};
use crate::ResilienceError;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Current state of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircuitState {
    /// Normal operating mode.
    Closed,
    /// Short-circuits calls until the cooldown elapses.
    Open,
    /// Trial mode allowing a limited number of trial calls.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        };
        f.write_str(name)
    }
}

/// Validated configuration for the circuit breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    failure_threshold: usize,
    success_threshold: usize,
    timeout: Duration,
    reset_timeout: Duration,
    half_open_max_calls: usize,
}

impl CircuitBreakerConfig {
    /// Create a config with validation. `half_open_max_calls` defaults to 1.
    ///
    /// # Examples
    /// ```
    /// use faultline::CircuitBreakerConfig;
    /// use std::time::Duration;
    /// let cfg = CircuitBreakerConfig::new(5, 2, Duration::from_secs(30), Duration::from_secs(60))
    ///     .unwrap();
    /// assert_eq!(cfg.success_threshold(), 2);
    /// assert!(CircuitBreakerConfig::new(0, 1, Duration::from_secs(1), Duration::from_secs(1)).is_err());
    /// ```
    pub fn new(
        failure_threshold: usize,
        success_threshold: usize,
        timeout: Duration,
        reset_timeout: Duration,
    ) -> Result<Self, ConfigurationError> {
        Self::builder()
            .failure_threshold(failure_threshold)
            .success_threshold(success_threshold)
            .timeout(timeout)
            .reset_timeout(reset_timeout)
            .build()
    }

    /// Start a builder seeded with the defaults.
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::default()
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        require_positive("failure_threshold", self.failure_threshold)?;
        require_positive("success_threshold", self.success_threshold)?;
        require_duration("timeout", self.timeout)?;
        require_duration("reset_timeout", self.reset_timeout)?;
        require_positive("half_open_max_calls", self.half_open_max_calls)?;
        Ok(())
    }

    /// Failures in Closed before the circuit opens.
    pub fn failure_threshold(&self) -> usize {
        self.failure_threshold
    }

    /// Successful trials in HalfOpen before the circuit closes.
    pub fn success_threshold(&self) -> usize {
        self.success_threshold
    }

    /// How long the circuit stays Open before a trial is admitted.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Reserved; carried for callers that report it, not used by the state machine.
    pub fn reset_timeout(&self) -> Duration {
        self.reset_timeout
    }

    /// Maximum concurrent trial calls while HalfOpen.
    pub fn half_open_max_calls(&self) -> usize {
        self.half_open_max_calls
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 1,
            timeout: Duration::from_secs(60),
            reset_timeout: Duration::from_secs(60),
            half_open_max_calls: 1,
        }
    }
}

/// Builder for [`CircuitBreakerConfig`]; `build()` validates.
#[derive(Debug, Clone, Default)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    /// Consecutive failures that open the circuit.
    pub fn failure_threshold(mut self, value: usize) -> Self {
        self.config.failure_threshold = value;
        self
    }

    /// Successful trials needed to close from HalfOpen.
    pub fn success_threshold(mut self, value: usize) -> Self {
        self.config.success_threshold = value;
        self
    }

    /// How long the circuit stays open before admitting a trial.
    pub fn timeout(mut self, value: Duration) -> Self {
        self.config.timeout = value;
        self
    }

    /// Stored and validated; the state machine does not consult it.
    pub fn reset_timeout(mut self, value: Duration) -> Self {
        self.config.reset_timeout = value;
        self
    }

    /// Raise above 1 to admit several concurrent trials while HalfOpen.
    pub fn half_open_max_calls(mut self, value: usize) -> Self {
        self.config.half_open_max_calls = value;
        self
    }

    pub fn build(self) -> Result<CircuitBreakerConfig, ConfigurationError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: usize,
    success_count: usize,
    next_attempt_millis: u64,
    half_open_in_flight: usize,
    epoch: u64,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            next_attempt_millis: 0,
            half_open_in_flight: 0,
            epoch: 0,
        }
    }

    fn transition(&mut self, to: CircuitState) {
        self.state = to;
        self.half_open_in_flight = 0;
        self.epoch = self.epoch.wrapping_add(1);
    }
}

enum Admission {
    Run { epoch: u64, trial: bool, entered_half_open: bool },
    Reject { failure_count: usize, next_attempt_millis: u64, retry_after: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    Opened { failure_count: usize, next_attempt_millis: u64, from: CircuitState },
    Closed,
}

/// Releases a half-open trial slot if the trial never reports an outcome (panic or drop).
struct TrialGuard<'a> {
    state: &'a Mutex<BreakerState>,
    epoch: u64,
    armed: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut s = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if s.epoch == self.epoch && s.state == CircuitState::HalfOpen {
                s.half_open_in_flight = s.half_open_in_flight.saturating_sub(1);
            }
        }
    }
}

/// Circuit breaker policy guarding an async operation.
///
/// Clones share the same underlying state via `Arc`, so all handles observe and affect the same
/// circuit lifecycle.
#[derive(Debug, Clone)]
pub struct CircuitBreakerPolicy {
    state: Arc<Mutex<BreakerState>>,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    sink: Option<SharedSink>,
}

impl CircuitBreakerPolicy {
    /// Create a breaker with the given failure threshold and cooldown, other settings default.
    ///
    /// # Examples
    /// ```
    /// use faultline::CircuitBreakerPolicy;
    /// use std::time::Duration;
    /// let breaker = CircuitBreakerPolicy::new(5, Duration::from_secs(30)).unwrap();
    /// assert!(breaker.is_available());
    /// ```
    pub fn new(failure_threshold: usize, timeout: Duration) -> Result<Self, ConfigurationError> {
        let config =
            CircuitBreakerConfig::builder().failure_threshold(failure_threshold).timeout(timeout).build()?;
        Ok(Self::with_config(config))
    }

    /// Create a breaker from a validated config.
    pub fn with_config(config: CircuitBreakerConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(BreakerState::new())),
            config,
            clock: Arc::new(MonotonicClock::default()),
            sink: None,
        }
    }

    /// Override the clock (useful for deterministic tests).
    ///
    /// # Example
    /// ```
    /// # use faultline::{CircuitBreakerPolicy, ManualClock};
    /// # use std::time::Duration;
    /// let clock = ManualClock::new();
    /// let breaker = CircuitBreakerPolicy::new(1, Duration::from_secs(1))
    ///     .unwrap()
    ///     .with_clock(clock.clone());
    /// ```
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Deliver state-change and rejection events to `sink`.
    pub fn with_sink<S>(mut self, sink: S) -> Self
    where
        S: TelemetrySink,
        S::Future: Send + 'static,
    {
        self.sink = Some(SharedSink::new(sink));
        self
    }

    /// The configuration this breaker runs with.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Executes the provided async operation under circuit breaker protection.
    ///
    /// # Errors
    /// Returns `ResilienceError::CircuitOpen` without running the operation while the circuit is
    /// open or all half-open trial slots are taken. Errors from the operation are returned
    /// unchanged after being recorded as a failure.
    pub async fn execute<T, E, Fut, Op>(&self, operation: Op) -> Result<T, ResilienceError<E>>
    where
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
        Op: FnOnce() -> Fut,
    {
        let (epoch, trial, entered_half_open) = match self.admit() {
            Admission::Run { epoch, trial, entered_half_open } => (epoch, trial, entered_half_open),
            Admission::Reject { failure_count, next_attempt_millis, retry_after } => {
                tracing::debug!(next_attempt_millis, "Circuit breaker: call rejected");
                emit(&self.sink, CircuitBreakerEvent::Rejected { next_attempt_millis });
                return Err(ResilienceError::CircuitOpen {
                    failure_count,
                    next_attempt_millis,
                    retry_after,
                });
            }
        };

        let mut guard = trial.then(|| TrialGuard { state: &self.state, epoch, armed: true });

        if entered_half_open {
            tracing::info!("Circuit breaker → half-open");
            emit(&self.sink, CircuitBreakerEvent::HalfOpen);
        }

        let result = operation().await;

        if let Some(g) = guard.as_mut() {
            g.armed = false;
        }
        let transition = self.record(epoch, trial, result.is_ok());
        drop(guard);

        match transition {
            Some(Transition::Opened { failure_count, next_attempt_millis, from }) => {
                if from == CircuitState::HalfOpen {
                    tracing::warn!(failure_count, "Circuit breaker: trial failed → open");
                } else {
                    tracing::error!(
                        failure_count,
                        threshold = self.config.failure_threshold,
                        "Circuit breaker → open"
                    );
                }
                emit(&self.sink, CircuitBreakerEvent::Opened { failure_count, next_attempt_millis });
            }
            Some(Transition::Closed) => {
                tracing::info!("Circuit breaker → closed");
                emit(&self.sink, CircuitBreakerEvent::Closed);
            }
            None => {}
        }

        result
    }

    fn admit(&self) -> Admission {
        let now = self.clock.now_millis();
        let mut s = self.lock();
        match s.state {
            CircuitState::Closed => Admission::Run { epoch: s.epoch, trial: false, entered_half_open: false },
            CircuitState::Open => {
                if now < s.next_attempt_millis {
                    return Admission::Reject {
                        failure_count: s.failure_count,
                        next_attempt_millis: s.next_attempt_millis,
                        retry_after: Duration::from_millis(s.next_attempt_millis - now),
                    };
                }
                s.transition(CircuitState::HalfOpen);
                s.success_count = 0;
                s.half_open_in_flight = 1;
                Admission::Run { epoch: s.epoch, trial: true, entered_half_open: true }
            }
            CircuitState::HalfOpen => {
                if s.half_open_in_flight >= self.config.half_open_max_calls {
                    return Admission::Reject {
                        failure_count: s.failure_count,
                        next_attempt_millis: s.next_attempt_millis,
                        retry_after: Duration::ZERO,
                    };
                }
                s.half_open_in_flight += 1;
                tracing::debug!(
                    in_flight = s.half_open_in_flight,
                    max = self.config.half_open_max_calls,
                    "Circuit breaker: half-open trial"
                );
                Admission::Run { epoch: s.epoch, trial: true, entered_half_open: false }
            }
        }
    }

    /// Apply one call's outcome. Outcomes from an earlier epoch are dropped.
    fn record(&self, epoch: u64, trial: bool, success: bool) -> Option<Transition> {
        let now = self.clock.now_millis();
        let mut s = self.lock();
        if s.epoch != epoch {
            tracing::trace!(epoch, current = s.epoch, "Circuit breaker: stale outcome ignored");
            return None;
        }
        if trial {
            s.half_open_in_flight = s.half_open_in_flight.saturating_sub(1);
        }

        match (s.state, success) {
            (CircuitState::Closed, true) => {
                s.failure_count = 0;
                None
            }
            (CircuitState::Closed, false) => {
                s.failure_count += 1;
                if s.failure_count >= self.config.failure_threshold {
                    Some(self.open(&mut s, now, CircuitState::Closed))
                } else {
                    None
                }
            }
            (CircuitState::HalfOpen, true) => {
                s.success_count += 1;
                if s.success_count >= self.config.success_threshold {
                    s.transition(CircuitState::Closed);
                    s.failure_count = 0;
                    s.success_count = 0;
                    s.next_attempt_millis = 0;
                    Some(Transition::Closed)
                } else {
                    None
                }
            }
            (CircuitState::HalfOpen, false) => {
                s.failure_count += 1;
                Some(self.open(&mut s, now, CircuitState::HalfOpen))
            }
            // No call is ever admitted in an Open epoch.
            (CircuitState::Open, _) => None,
        }
    }

    fn open(&self, s: &mut BreakerState, now: u64, from: CircuitState) -> Transition {
        let cooldown = u64::try_from(self.config.timeout.as_millis()).unwrap_or(u64::MAX);
        s.transition(CircuitState::Open);
        s.success_count = 0;
        s.next_attempt_millis = now.saturating_add(cooldown);
        Transition::Opened { failure_count: s.failure_count, next_attempt_millis: s.next_attempt_millis, from }
    }

    /// Force the circuit closed and clear all counters, whatever the current state.
    pub fn reset(&self) {
        let mut s = self.lock();
        s.transition(CircuitState::Closed);
        s.failure_count = 0;
        s.success_count = 0;
        s.next_attempt_millis = 0;
        tracing::info!("Circuit breaker reset → closed");
    }

    /// Whether a call made now would be admitted. Does not change state.
    pub fn is_available(&self) -> bool {
        let now = self.clock.now_millis();
        let s = self.lock();
        match s.state {
            CircuitState::Closed => true,
            CircuitState::Open => now >= s.next_attempt_millis,
            CircuitState::HalfOpen => s.half_open_in_flight < self.config.half_open_max_calls,
        }
    }

    /// Current breaker state.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failure_count(&self) -> usize {
        self.lock().failure_count
    }

    /// Successful trials so far; only meaningful while HalfOpen.
    pub fn success_count(&self) -> usize {
        self.lock().success_count
    }

    /// Clock time at which an open circuit admits a trial; 0 when never opened or after a close.
    pub fn next_attempt_millis(&self) -> u64 {
        self.lock().next_attempt_millis
    }

    /// Trial calls currently running while HalfOpen.
    pub fn in_flight_trials(&self) -> usize {
        self.lock().half_open_in_flight
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::telemetry::testing::SlowSink;
    use crate::telemetry::{MemorySink, PolicyEvent};
    use futures::future::join_all;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct TestError(String);

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "TestError: {}", self.0)
        }
    }

    impl std::error::Error for TestError {}

    fn breaker(failures: usize, successes: usize, timeout_ms: u64) -> (CircuitBreakerPolicy, ManualClock) {
        let clock = ManualClock::new();
        let config = CircuitBreakerConfig::builder()
            .failure_threshold(failures)
            .success_threshold(successes)
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .expect("valid config");
        (CircuitBreakerPolicy::with_config(config).with_clock(clock.clone()), clock)
    }

    async fn fail(breaker: &CircuitBreakerPolicy) -> Result<(), ResilienceError<TestError>> {
        breaker.execute(|| async { Err(ResilienceError::Inner(TestError("fail".into()))) }).await
    }

    async fn succeed(breaker: &CircuitBreakerPolicy) -> Result<u32, ResilienceError<TestError>> {
        breaker.execute(|| async { Ok(7) }).await
    }

    #[test]
    fn rejects_zero_values_at_construction() {
        let err = CircuitBreakerPolicy::new(0, Duration::from_secs(1)).unwrap_err();
        assert_eq!(err.field, "failure_threshold");

        let err = CircuitBreakerPolicy::new(1, Duration::ZERO).unwrap_err();
        assert_eq!(err.field, "timeout");

        let err = CircuitBreakerConfig::builder().success_threshold(0).build().unwrap_err();
        assert_eq!(err.field, "success_threshold");

        let err = CircuitBreakerConfig::builder().reset_timeout(Duration::ZERO).build().unwrap_err();
        assert_eq!(err.field, "reset_timeout");

        let err = CircuitBreakerConfig::builder().half_open_max_calls(0).build().unwrap_err();
        assert_eq!(err.field, "half_open_max_calls");
    }

    #[tokio::test]
    async fn test_circuit_starts_closed() {
        let (breaker, _) = breaker(3, 1, 1000);
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(succeed(&breaker).await.unwrap(), 7);
        assert_eq!(breaker.failure_count(), 0);
        assert!(breaker.is_available());
    }

    #[tokio::test]
    async fn open_circuit_rejects_without_running_operation() {
        let (breaker, clock) = breaker(2, 1, 1000);
        clock.set(5_000);
        let _ = fail(&breaker).await;
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.next_attempt_millis(), 6_000);

        clock.advance(400);
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        let err = breaker
            .execute(|| async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ResilienceError<TestError>>(())
            })
            .await
            .unwrap_err();

        assert_eq!(counter.load(Ordering::SeqCst), 0, "operation must not run while open");
        assert_eq!(err.next_attempt_millis(), Some(6_000));
        assert_eq!(err.retry_after(), Some(Duration::from_millis(600)));
        assert!(!breaker.is_available());
    }

    #[tokio::test]
    async fn trial_success_closes_and_resets_counters() {
        let (breaker, clock) = breaker(2, 1, 1000);
        let _ = fail(&breaker).await;
        let _ = fail(&breaker).await;
        assert!(succeed(&breaker).await.unwrap_err().is_circuit_open());

        clock.advance(1000);
        assert!(breaker.is_available());
        assert_eq!(breaker.state(), CircuitState::Open, "is_available must not transition");

        assert_eq!(succeed(&breaker).await.unwrap(), 7);
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
        assert_eq!(breaker.success_count(), 0);
        assert_eq!(breaker.next_attempt_millis(), 0);
    }

    #[tokio::test]
    async fn failed_trial_reopens_with_fresh_cooldown() {
        let (breaker, clock) = breaker(1, 1, 1000);
        let _ = fail(&breaker).await;
        assert_eq!(breaker.next_attempt_millis(), 1000);

        clock.advance(1500);
        let result = fail(&breaker).await;
        assert!(result.unwrap_err().is_inner(), "trial error passes through unchanged");
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.next_attempt_millis(), 2500);
        assert!(succeed(&breaker).await.unwrap_err().is_circuit_open());
    }

    #[tokio::test]
    async fn success_threshold_requires_several_trials() {
        let (breaker, clock) = breaker(1, 3, 100);
        let _ = fail(&breaker).await;
        clock.advance(100);

        for expected in 1..3 {
            succeed(&breaker).await.unwrap();
            assert_eq!(breaker.state(), CircuitState::HalfOpen);
            assert_eq!(breaker.success_count(), expected);
        }
        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.success_count(), 0);
    }

    #[tokio::test]
    async fn failure_during_half_open_discards_success_count() {
        let (breaker, clock) = breaker(1, 3, 100);
        let _ = fail(&breaker).await;
        clock.advance(100);
        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.success_count(), 1);

        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.success_count(), 0);
    }

    #[tokio::test]
    async fn test_successes_in_closed_state_reset_failure_count() {
        let (breaker, _) = breaker(3, 1, 1000);
        let _ = fail(&breaker).await;
        let _ = fail(&breaker).await;
        assert_eq!(breaker.failure_count(), 2);

        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.failure_count(), 0);

        for _ in 0..2 {
            let result = fail(&breaker).await;
            assert!(matches!(result, Err(ResilienceError::Inner(_))));
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn reset_forces_closed_from_any_state() {
        let (breaker, clock) = breaker(1, 2, 100);
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);
        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
        assert_eq!(breaker.next_attempt_millis(), 0);

        let _ = fail(&breaker).await;
        clock.advance(100);
        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.success_count(), 0);
        assert_eq!(breaker.in_flight_trials(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_limits_concurrent_calls() {
        let (breaker, clock) = breaker(1, 1, 100);
        let _ = fail(&breaker).await;
        clock.advance(100);

        let counter = Arc::new(AtomicUsize::new(0));
        let calls = (0..3).map(|_| {
            let breaker = breaker.clone();
            let counter = counter.clone();
            async move {
                breaker
                    .execute(|| async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok::<_, ResilienceError<TestError>>(42)
                    })
                    .await
            }
        });
        let results = join_all(calls).await;

        let successes = results.iter().filter(|r| r.is_ok()).count();
        let rejected = results.iter().filter(|r| matches!(r, Err(e) if e.is_circuit_open())).count();
        assert_eq!(successes, 1, "only the single trial may run");
        assert_eq!(rejected, 2);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn raised_half_open_limit_admits_parallel_trials() {
        let clock = ManualClock::new();
        let config = CircuitBreakerConfig::builder()
            .failure_threshold(1)
            .success_threshold(2)
            .timeout(Duration::from_millis(100))
            .half_open_max_calls(2)
            .build()
            .unwrap();
        let breaker = CircuitBreakerPolicy::with_config(config).with_clock(clock.clone());
        let _ = fail(&breaker).await;
        clock.advance(100);

        let trial = || {
            let breaker = breaker.clone();
            async move {
                breaker
                    .execute(|| async {
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        Ok::<_, ResilienceError<TestError>>(())
                    })
                    .await
            }
        };
        let results = join_all(vec![trial(), trial()]).await;
        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_slot_recovers_on_panic() {
        let (breaker, clock) = breaker(1, 1, 10);
        let _ = fail(&breaker).await;
        clock.advance(10);

        let result: Result<Result<(), ResilienceError<TestError>>, _> =
            std::panic::AssertUnwindSafe(async { breaker.execute(|| async { panic!("boom") }).await })
                .catch_unwind()
                .await;
        assert!(result.is_err());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert_eq!(breaker.in_flight_trials(), 0);
        assert!(breaker.is_available());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_outcome_from_closed_epoch_is_ignored() {
        let (breaker, clock) = breaker(1, 1, 100);
        let slow = {
            let breaker = breaker.clone();
            tokio::spawn(async move {
                breaker
                    .execute(|| async {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Err::<(), _>(ResilienceError::Inner(TestError("late".into())))
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;

        // Open, then recover, while the slow call is still running.
        let _ = fail(&breaker).await;
        clock.advance(100);
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        let trial = {
            let breaker = breaker.clone();
            tokio::spawn(async move {
                breaker
                    .execute(|| async move {
                        c.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok::<_, ResilienceError<TestError>>(())
                    })
                    .await
            })
        };

        let _ = slow.await.unwrap();
        assert_eq!(breaker.state(), CircuitState::HalfOpen, "late failure must not reopen");
        trial.await.unwrap().unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_trial_caller_frees_the_half_open_slot() {
        let sink = SlowSink::new(Duration::from_secs(1));
        let (breaker, clock) = breaker(1, 1, 100);
        let breaker = breaker.with_sink(sink.clone());
        let _ = fail(&breaker).await;
        clock.advance(100);

        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            breaker.execute(|| std::future::pending::<Result<(), ResilienceError<TestError>>>()),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert_eq!(breaker.in_flight_trials(), 0);
        assert!(breaker.is_available());

        assert_eq!(succeed(&breaker).await.unwrap(), 7);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_sink_does_not_delay_rejection_or_trials() {
        let sink = SlowSink::new(Duration::from_secs(1));
        let (breaker, clock) = breaker(1, 1, 100);
        let breaker = breaker.with_sink(sink.clone());
        let started = tokio::time::Instant::now();

        let _ = fail(&breaker).await;
        assert!(succeed(&breaker).await.unwrap_err().is_circuit_open());
        clock.advance(100);
        assert_eq!(succeed(&breaker).await.unwrap(), 7);
        assert_eq!(started.elapsed(), Duration::ZERO);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(sink.delivered(), 4, "opened, rejected, half-open, closed");
    }

    #[tokio::test]
    async fn emits_transition_events() {
        let sink = MemorySink::new();
        let (breaker, clock) = breaker(1, 1, 100);
        let breaker = breaker.with_sink(sink.clone());

        let _ = fail(&breaker).await;
        let _ = succeed(&breaker).await;
        clock.advance(100);
        let _ = succeed(&breaker).await;

        assert_eq!(
            sink.events(),
            vec![
                PolicyEvent::CircuitBreaker(CircuitBreakerEvent::Opened {
                    failure_count: 1,
                    next_attempt_millis: 100
                }),
                PolicyEvent::CircuitBreaker(CircuitBreakerEvent::Rejected { next_attempt_millis: 100 }),
                PolicyEvent::CircuitBreaker(CircuitBreakerEvent::HalfOpen),
                PolicyEvent::CircuitBreaker(CircuitBreakerEvent::Closed),
            ]
        );
    }

    #[tokio::test]
    async fn stress_concurrent_half_open_transitions() {
        let (breaker, clock) = breaker(1, 1, 5);
        let _ = fail(&breaker).await;
        clock.advance(10);

        let tasks = 200;
        let barrier = Arc::new(tokio::sync::Barrier::new(tasks));
        let mut handles = vec![];
        for _ in 0..tasks {
            let b = breaker.clone();
            let g = barrier.clone();
            handles.push(tokio::spawn(async move {
                g.wait().await;
                let _ = fail(&b).await;
            }));
        }

        let _ = join_all(handles).await;
        assert!(breaker.in_flight_trials() <= breaker.config().half_open_max_calls());
        assert_eq!(breaker.state(), CircuitState::Open);
    }
}
