//! Tower integration: run each request of a `tower::Service` under a policy.
//!
//! ```
//! use faultline::prelude::*;
//! use std::time::Duration;
//! use tower::{service_fn, ServiceBuilder, ServiceExt};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let policy = TimeoutPolicy::new(Duration::from_secs(1)).unwrap();
//! let svc = ServiceBuilder::new()
//!     .layer(PolicyLayer::new(policy))
//!     .service(service_fn(|name: &'static str| async move {
//!         Ok::<_, std::io::Error>(format!("hello {name}"))
//!     }));
//!
//! assert_eq!(svc.oneshot("faultline").await.unwrap(), "hello faultline");
//! # });
//! ```

use crate::policy::ResiliencePolicy;
use crate::ResilienceError;
use futures::future::BoxFuture;
use std::task::{Context, Poll};
use tower_layer::Layer;
use tower_service::Service;

/// Wraps services so every call runs under `policy`. Clones of the layer share policy state.
#[derive(Debug, Clone)]
pub struct PolicyLayer<P> {
    policy: P,
}

impl<P> PolicyLayer<P> {
    pub fn new(policy: P) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }
}

impl<P: Clone, S> Layer<S> for PolicyLayer<P> {
    type Service = PolicyService<P, S>;

    fn layer(&self, service: S) -> Self::Service {
        PolicyService { inner: service, policy: self.policy.clone() }
    }
}

/// Service produced by [`PolicyLayer`]. Errors from the wrapped service arrive as
/// `ResilienceError::Inner`.
#[derive(Debug, Clone)]
pub struct PolicyService<P, S> {
    inner: S,
    policy: P,
}

impl<P, S> PolicyService<P, S> {
    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<P, S, Request> Service<Request> for PolicyService<P, S>
where
    Request: Send + 'static,
    S: Service<Request> + Clone + Send + 'static,
    S::Response: Send + 'static,
    S::Error: Send + 'static,
    S::Future: Send + 'static,
    P: ResiliencePolicy<S::Response, S::Error> + Clone + 'static,
{
    type Response = S::Response;
    type Error = ResilienceError<S::Error>;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(ResilienceError::Inner)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        // The instance polled ready is the one that must serve the request.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let policy = self.policy.clone();
        Box::pin(async move {
            policy.execute(move || async move { inner.call(req).await.map_err(ResilienceError::Inner) }).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BulkheadPolicy, CircuitBreakerPolicy};
    use std::time::Duration;
    use tower::{service_fn, ServiceExt};

    #[tokio::test]
    async fn service_errors_become_inner() {
        let breaker = CircuitBreakerPolicy::new(2, Duration::from_secs(60)).unwrap();
        let svc = PolicyLayer::new(breaker.clone())
            .layer(service_fn(|_: ()| async {
                Err::<(), _>(std::io::Error::new(std::io::ErrorKind::Other, "boom"))
            }));

        let err = svc.clone().oneshot(()).await.unwrap_err();
        assert!(err.is_inner());
        assert_eq!(breaker.failure_count(), 1);

        let _ = svc.clone().oneshot(()).await;
        let rejected = svc.oneshot(()).await.unwrap_err();
        assert!(rejected.is_circuit_open());
    }

    #[tokio::test]
    async fn bulkhead_limits_through_layer() {
        let bulkhead = BulkheadPolicy::new(1, 1, Duration::from_millis(10)).unwrap();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let release_rx = std::sync::Arc::new(tokio::sync::Mutex::new(Some(release_rx)));

        let svc = PolicyLayer::new(bulkhead.clone()).layer(service_fn(move |_: ()| {
            let release_rx = release_rx.clone();
            async move {
                let rx = release_rx.lock().await.take();
                if let Some(rx) = rx {
                    let _ = rx.await;
                }
                Ok::<_, std::io::Error>(())
            }
        }));

        let holder = tokio::spawn(svc.clone().oneshot(()));
        while bulkhead.stats().in_flight == 0 {
            tokio::task::yield_now().await;
        }

        let rejected = svc.clone().oneshot(()).await.unwrap_err();
        assert!(rejected.is_queue_timeout());

        release_tx.send(()).unwrap();
        holder.await.unwrap().unwrap();
        assert_eq!(bulkhead.stats().available_permits, 1);
    }
}
