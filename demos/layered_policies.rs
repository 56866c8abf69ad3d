//! Layers breaker, timeout and bulkhead over a tower service, with a fallback for slow calls.
use faultline::prelude::*;
use std::time::Duration;
use tower::{Service, ServiceBuilder, ServiceExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let stack = ResilienceStackBuilder::new()
        .circuit_breaker(3, Duration::from_secs(10))?
        .timeout(Duration::from_millis(100))?
        .bulkhead(4, 8, Duration::from_millis(500))?
        .build();

    let mut svc = ServiceBuilder::new().layer(PolicyLayer::new(stack.clone())).service_fn(
        |req: &'static str| async move {
            if req == "slow" {
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
            Ok::<_, std::io::Error>(req)
        },
    );

    println!("fast: {:?}", svc.ready().await?.call("ok").await);
    println!("slow: {:?}", svc.ready().await?.call("slow").await.map_err(|e| e.to_string()));

    let cached = TimeoutPolicy::new(Duration::from_millis(50))?
        .with_fallback(|| Ok::<_, ResilienceError<std::io::Error>>("cached"));
    let guarded = Policy(stack.circuit_breaker().clone()) + Policy(cached);
    let value: Result<&str, ResilienceError<std::io::Error>> = guarded
        .execute(|| async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok("fresh")
        })
        .await;
    println!("with fallback: {}", value?);
    println!("breaker: {}, failures: {}", stack.circuit_breaker().state(), stack.circuit_breaker().failure_count());

    Ok(())
}
