use super::events::PolicyEvent;
use futures::FutureExt;
use std::collections::VecDeque;
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use tower::util::BoxCloneSyncService;
use tower::{Service, ServiceExt};

type BoxError = Box<dyn std::error::Error + Send + Sync>;
type SinkFuture<E> = Pin<Box<dyn Future<Output = Result<(), E>> + Send>>;

/// A telemetry sink that consumes policy events.
pub trait TelemetrySink:
    tower::Service<PolicyEvent, Response = (), Error = Self::SinkError>
    + Clone
    + Send
    + Sync
    + 'static
{
    /// The error type for this sink.
    type SinkError: std::error::Error + Send + Sync + 'static;
}

/// Best-effort emit helper that honors `poll_ready` and swallows errors.
pub async fn emit_best_effort<S>(sink: S, event: PolicyEvent)
where
    S: tower::Service<PolicyEvent, Response = ()> + Send + 'static,
    S::Future: Send + 'static,
{
    if let Ok(mut ready_sink) = sink.ready_oneshot().await {
        let _ = ready_sink.call(event).await;
    }
}

/// Type-erased sink attached to a policy with `with_sink`.
#[derive(Clone)]
pub struct SharedSink(BoxCloneSyncService<PolicyEvent, (), BoxError>);

impl SharedSink {
    /// Erase a concrete sink so policies can hold any of them behind one type.
    pub fn new<S>(sink: S) -> Self
    where
        S: TelemetrySink,
        S::Future: Send + 'static,
    {
        Self(BoxCloneSyncService::new(sink.map_err(|e: S::SinkError| -> BoxError { Box::new(e) })))
    }

    /// Deliver `event` without blocking the caller.
    ///
    /// A sink that completes on first poll (the in-process sinks) is served inline, so events
    /// stay ordered. Anything slower finishes on a spawned task; outside a tokio runtime the
    /// remainder is dropped.
    pub(crate) fn emit(&self, event: PolicyEvent) {
        let mut delivery = Box::pin(emit_best_effort(self.0.clone(), event));
        if (&mut delivery).now_or_never().is_some() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(delivery);
            }
            Err(_) => tracing::trace!("telemetry sink pending outside a runtime; event dropped"),
        }
    }
}

impl std::fmt::Debug for SharedSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedSink(<sink>)")
    }
}

/// Emit to an optional sink; policies without a sink skip the call entirely.
pub(crate) fn emit(sink: &Option<SharedSink>, event: impl Into<PolicyEvent>) {
    if let Some(sink) = sink {
        sink.emit(event.into());
    }
}

/// A no-op telemetry sink that discards all events.
#[derive(Clone, Debug, Default)]
pub struct NullSink;

impl Service<PolicyEvent> for NullSink {
    type Response = ();
    type Error = Infallible;
    type Future = SinkFuture<Infallible>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _event: PolicyEvent) -> Self::Future {
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for NullSink {
    type SinkError = Infallible;
}

/// A telemetry sink that logs events using the `tracing` crate.
#[derive(Clone, Debug, Default)]
pub struct LogSink;

impl Service<PolicyEvent> for LogSink {
    type Response = ();
    type Error = Infallible;
    type Future = SinkFuture<Infallible>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: PolicyEvent) -> Self::Future {
        tracing::info!(event = %event, "policy_event");
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for LogSink {
    type SinkError = Infallible;
}

/// A telemetry sink that stores events in memory, evicting the oldest past `capacity`.
#[derive(Clone, Debug)]
pub struct MemorySink {
    events: Arc<Mutex<VecDeque<PolicyEvent>>>,
    capacity: usize,
    evicted: Arc<AtomicU64>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(VecDeque::new())),
            capacity: capacity.max(1),
            evicted: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn events(&self) -> Vec<PolicyEvent> {
        self.lock().iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<PolicyEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl Service<PolicyEvent> for MemorySink {
    type Response = ();
    type Error = Infallible;
    type Future = SinkFuture<Infallible>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: PolicyEvent) -> Self::Future {
        let mut guard = self.lock();
        if guard.len() >= self.capacity {
            guard.pop_front();
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        guard.push_back(event);
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for MemorySink {
    type SinkError = Infallible;
}


/// Sinks with controllable latency for policy tests.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::time::Duration;

    /// Takes `delay` to accept each event.
    #[derive(Clone, Debug)]
    pub(crate) struct SlowSink {
        delay: Duration,
        delivered: Arc<AtomicU64>,
    }

    impl SlowSink {
        pub(crate) fn new(delay: Duration) -> Self {
            Self { delay, delivered: Arc::new(AtomicU64::new(0)) }
        }

        pub(crate) fn delivered(&self) -> u64 {
            self.delivered.load(Ordering::SeqCst)
        }
    }

    impl Service<PolicyEvent> for SlowSink {
        type Response = ();
        type Error = Infallible;
        type Future = SinkFuture<Infallible>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _event: PolicyEvent) -> Self::Future {
            let delay = self.delay;
            let delivered = self.delivered.clone();
            Box::pin(async move {
                tokio::time::sleep(delay).await;
                delivered.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }
    }

    impl TelemetrySink for SlowSink {
        type SinkError = Infallible;
    }
}
