//! Shows a bulkhead admitting two calls, queueing two, and rejecting the rest.
use faultline::prelude::*;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let bulkhead = BulkheadPolicy::new(2, 2, Duration::from_secs(1))?;
    let mut handles = Vec::new();

    for id in 0..5u32 {
        let bh = bulkhead.clone();
        handles.push(tokio::spawn(async move {
            bh.execute(|| async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok::<_, ResilienceError<std::io::Error>>(id)
            })
            .await
        }));
        tokio::task::yield_now().await;
    }

    println!("while busy: {:?}", bulkhead.stats());

    for handle in handles {
        match handle.await? {
            Ok(id) => println!("call {id} completed"),
            Err(e) if e.is_queue_full() => println!("rejected: {e}"),
            Err(e) => println!("failed: {e}"),
        }
    }

    println!("after: {:?}", bulkhead.stats());
    Ok(())
}
