//! Bulkhead: bounded concurrency with a bounded FIFO wait queue.
//!
//! A call takes a free permit if there is one. Otherwise it joins the wait queue, unless the
//! queue already holds `max_queue_size` callers, in which case it is rejected at once with
//! `QueueFull`. A queued caller waits at most `queue_timeout` before giving up with
//! `QueueTimeout`.
//!
//! A finishing call hands its permit straight to the longest-waiting caller, so a permit freed
//! while others wait is never visible as "available" and cannot be taken by a newcomer.
//! Grants are sent while the state lock is held; a waiter whose deadline fires checks, under
//! the same lock, whether it is still queued, which settles any race with a concurrent grant.

use crate::config::{require_duration, require_positive, ConfigurationError};
use crate::telemetry::{emit, BulkheadEvent, SharedSink, TelemetrySink};
use crate::ResilienceError;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// Validated bulkhead configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkheadConfig {
    max_concurrent: usize,
    max_queue_size: usize,
    queue_timeout: Duration,
}

impl BulkheadConfig {
    /// Create a config with validation; every value must be non-zero.
    pub fn new(
        max_concurrent: usize,
        max_queue_size: usize,
        queue_timeout: Duration,
    ) -> Result<Self, ConfigurationError> {
        let cfg = Self { max_concurrent, max_queue_size, queue_timeout };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Start a builder seeded with the defaults.
    pub fn builder() -> BulkheadConfigBuilder {
        BulkheadConfigBuilder::default()
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        require_positive("max_concurrent", self.max_concurrent)?;
        require_positive("max_queue_size", self.max_queue_size)?;
        require_duration("queue_timeout", self.queue_timeout)
    }

    /// Calls allowed to run at once.
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Callers allowed to wait for a permit.
    pub fn max_queue_size(&self) -> usize {
        self.max_queue_size
    }

    /// Longest a queued caller waits.
    pub fn queue_timeout(&self) -> Duration {
        self.queue_timeout
    }
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self { max_concurrent: 10, max_queue_size: 100, queue_timeout: Duration::from_secs(5) }
    }
}

/// Builder for [`BulkheadConfig`]; `build()` validates.
#[derive(Debug, Clone, Default)]
pub struct BulkheadConfigBuilder {
    config: BulkheadConfig,
}

impl BulkheadConfigBuilder {
    /// Set the permit count.
    pub fn max_concurrent(mut self, value: usize) -> Self {
        self.config.max_concurrent = value;
        self
    }

    /// Set the wait queue capacity.
    pub fn max_queue_size(mut self, value: usize) -> Self {
        self.config.max_queue_size = value;
        self
    }

    /// Set the longest queue wait.
    pub fn queue_timeout(mut self, value: Duration) -> Self {
        self.config.queue_timeout = value;
        self
    }

    pub fn build(self) -> Result<BulkheadConfig, ConfigurationError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Point-in-time view of a bulkhead, read without side effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkheadStats {
    pub available_permits: usize,
    pub in_flight: usize,
    pub queue_length: usize,
    pub max_concurrent: usize,
    pub max_queue_size: usize,
}

#[derive(Debug)]
struct Waiter {
    id: u64,
    grant: oneshot::Sender<()>,
}

#[derive(Debug)]
struct BulkheadState {
    available: usize,
    queue: VecDeque<Waiter>,
    next_id: u64,
}

impl BulkheadState {
    /// Give a freed permit to the oldest live waiter, or return it to the pool.
    fn release(&mut self) {
        while let Some(waiter) = self.queue.pop_front() {
            if waiter.grant.send(()).is_ok() {
                return;
            }
        }
        self.available += 1;
    }

    /// Remove a waiter; `false` means it was already granted a permit.
    fn withdraw(&mut self, id: u64) -> bool {
        match self.queue.iter().position(|w| w.id == id) {
            Some(pos) => {
                self.queue.remove(pos);
                true
            }
            None => false,
        }
    }
}

/// A held permit; dropping it releases the slot to the next waiter.
struct Permit<'a> {
    state: &'a Mutex<BulkheadState>,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        lock(self.state).release();
    }
}

/// Cleans up a queue entry whose caller stopped waiting (future dropped).
struct WaitGuard<'a> {
    state: &'a Mutex<BulkheadState>,
    id: u64,
    armed: bool,
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut s = lock(self.state);
            if !s.withdraw(self.id) {
                // Granted just before the caller went away: pass the permit on.
                s.release();
            }
        }
    }
}

enum Entry {
    Granted { in_flight: usize },
    Queued { id: u64, grant: oneshot::Receiver<()>, queue_length: usize },
    Full,
}

/// Bulkhead policy limiting concurrent executions, with a bounded wait queue.
///
/// Clones share permits and queue.
#[derive(Debug, Clone)]
pub struct BulkheadPolicy {
    state: Arc<Mutex<BulkheadState>>,
    config: BulkheadConfig,
    sink: Option<SharedSink>,
}

impl BulkheadPolicy {
    /// Create a bulkhead with validation.
    ///
    /// ```
    /// use faultline::BulkheadPolicy;
    /// use std::time::Duration;
    /// let bulkhead = BulkheadPolicy::new(4, 16, Duration::from_secs(1)).unwrap();
    /// assert_eq!(bulkhead.stats().available_permits, 4);
    /// assert!(BulkheadPolicy::new(0, 16, Duration::from_secs(1)).is_err());
    /// ```
    pub fn new(
        max_concurrent: usize,
        max_queue_size: usize,
        queue_timeout: Duration,
    ) -> Result<Self, ConfigurationError> {
        Ok(Self::with_config(BulkheadConfig::new(max_concurrent, max_queue_size, queue_timeout)?))
    }

    /// Create a bulkhead from a validated config.
    pub fn with_config(config: BulkheadConfig) -> Self {
        let state = BulkheadState {
            available: config.max_concurrent,
            queue: VecDeque::with_capacity(config.max_queue_size.min(1024)),
            next_id: 0,
        };
        Self { state: Arc::new(Mutex::new(state)), config, sink: None }
    }

    /// Deliver admission and rejection events to `sink`.
    pub fn with_sink<S>(mut self, sink: S) -> Self
    where
        S: TelemetrySink,
        S::Future: Send + 'static,
    {
        self.sink = Some(SharedSink::new(sink));
        self
    }

    pub fn config(&self) -> &BulkheadConfig {
        &self.config
    }

    /// Run `operation` once a permit is held.
    ///
    /// # Errors
    /// `QueueFull` when no permit is free and the queue is at capacity; `QueueTimeout` when the
    /// caller waited `queue_timeout` without being granted a permit. In both cases the operation
    /// never runs. Errors from the operation itself are returned unchanged after the permit is
    /// released.
    pub async fn execute<T, E, Fut, Op>(&self, operation: Op) -> Result<T, ResilienceError<E>>
    where
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
        Op: FnOnce() -> Fut,
    {
        let permit = self.acquire().await?;
        let result = operation().await;
        drop(permit);
        result
    }

    async fn acquire<E>(&self) -> Result<Permit<'_>, ResilienceError<E>> {
        let entry = {
            let mut s = self.lock();
            if s.available > 0 {
                s.available -= 1;
                Entry::Granted { in_flight: self.config.max_concurrent - s.available }
            } else if s.queue.len() >= self.config.max_queue_size {
                Entry::Full
            } else {
                let id = s.next_id;
                s.next_id = s.next_id.wrapping_add(1);
                let (tx, rx) = oneshot::channel();
                s.queue.push_back(Waiter { id, grant: tx });
                Entry::Queued { id, grant: rx, queue_length: s.queue.len() }
            }
        };

        match entry {
            Entry::Granted { in_flight } => {
                let permit = Permit { state: &self.state };
                tracing::debug!(in_flight, max = self.config.max_concurrent, "Bulkhead: permit acquired");
                self.emit_acquired(in_flight);
                Ok(permit)
            }
            Entry::Full => {
                tracing::warn!(
                    max_concurrent = self.config.max_concurrent,
                    max_queue_size = self.config.max_queue_size,
                    "Bulkhead: queue full, rejecting"
                );
                emit(
                    &self.sink,
                    BulkheadEvent::Rejected {
                        max_concurrent: self.config.max_concurrent,
                        max_queue_size: self.config.max_queue_size,
                    },
                );
                Err(ResilienceError::QueueFull {
                    max_concurrent: self.config.max_concurrent,
                    max_queue_size: self.config.max_queue_size,
                })
            }
            Entry::Queued { id, mut grant, queue_length } => {
                let mut wait = WaitGuard { state: &self.state, id, armed: true };
                let started = Instant::now();
                let deadline = started + self.config.queue_timeout;
                tracing::debug!(queue_length, "Bulkhead: waiting for permit");
                emit(&self.sink, BulkheadEvent::Queued { queue_length, max_queue_size: self.config.max_queue_size });

                let granted = match tokio::time::timeout_at(deadline, &mut grant).await {
                    Ok(received) => received.is_ok(),
                    Err(_) => {
                        let mut s = self.lock();
                        !s.withdraw(id)
                    }
                };
                wait.armed = false;
                let waited = started.elapsed();

                if granted {
                    let permit = Permit { state: &self.state };
                    let in_flight = self.stats().in_flight;
                    tracing::debug!(?waited, "Bulkhead: permit granted from queue");
                    self.emit_acquired(in_flight);
                    Ok(permit)
                } else {
                    tracing::warn!(?waited, queue_timeout = ?self.config.queue_timeout, "Bulkhead: queue wait timed out");
                    emit(&self.sink, BulkheadEvent::QueueTimedOut { waited });
                    Err(ResilienceError::QueueTimeout { waited, queue_timeout: self.config.queue_timeout })
                }
            }
        }
    }

    fn emit_acquired(&self, in_flight: usize) {
        emit(&self.sink, BulkheadEvent::Acquired { in_flight, max_concurrent: self.config.max_concurrent });
    }

    /// True if a permit is free or the queue has room for one more waiter.
    pub fn is_available(&self) -> bool {
        let s = self.lock();
        s.available > 0 || s.queue.len() < self.config.max_queue_size
    }

    pub fn stats(&self) -> BulkheadStats {
        let s = self.lock();
        BulkheadStats {
            available_permits: s.available,
            in_flight: self.config.max_concurrent - s.available,
            queue_length: s.queue.len(),
            max_concurrent: self.config.max_concurrent,
            max_queue_size: self.config.max_queue_size,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BulkheadState> {
        lock(&self.state)
    }
}

fn lock(state: &Mutex<BulkheadState>) -> MutexGuard<'_, BulkheadState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}
