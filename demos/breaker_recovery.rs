//! Walks a circuit breaker through open, half-open and closed with a manual clock.
use faultline::prelude::*;
use faultline::telemetry::LogSink;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_max_level(tracing::Level::DEBUG).init();

    let clock = ManualClock::new();
    let config = CircuitBreakerConfig::builder()
        .failure_threshold(2)
        .success_threshold(2)
        .timeout(Duration::from_secs(5))
        .build()?;
    let breaker = CircuitBreakerPolicy::with_config(config).with_clock(clock.clone()).with_sink(LogSink);

    for attempt in 1..=2 {
        let result = breaker
            .execute(|| async {
                Err::<(), _>(ResilienceError::Inner(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "backend down",
                )))
            })
            .await;
        println!("attempt {attempt}: {:?} -> {}", result.map_err(|e| e.to_string()), breaker.state());
    }

    let rejected = breaker.execute(|| async { Ok::<_, ResilienceError<std::io::Error>>("unreachable") }).await;
    if let Err(e) = rejected {
        println!("rejected: {e} (retry after {:?})", e.retry_after());
    }

    clock.advance(5_000);
    for trial in 1..=2 {
        let value = breaker.execute(|| async { Ok::<_, ResilienceError<std::io::Error>>("pong") }).await?;
        println!("trial {trial}: {value} -> {}", breaker.state());
    }

    Ok(())
}
