//! Protecting calls to a flaky inventory backend with timeout, retry, and a shared breaker.
//!
//! Run with `cargo run --example protected_calls`.
use holdfast::prelude::*;
use holdfast::telemetry::{LogSink, MemorySink, MulticastSink};
use holdfast::{presets, BreakerRegistry};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_target(false).init();

    let events = MemorySink::new();
    let sink = MulticastSink::new(LogSink, events.clone());
    let registry = BreakerRegistry::new();
    let breaker = registry.get_or_insert_with("inventory", || {
        CircuitBreaker::builder("inventory")
            .failure_threshold(2)
            .recovery_timeout(Duration::from_millis(200))
            .with_sink(sink.clone())
            .build()
            .unwrap_or_else(|err| panic!("demo breaker config is valid: {err}"))
    });

    let stack = ResilienceStack::builder()
        .timeout(
            with_timeout(Duration::from_millis(100), TimeoutKind::Network, "inventory")?
                .with_sink(sink.clone()),
        )
        .retry(
            presets::transient_retry::<io::ErrorKind>()
                .backoff(Backoff::exponential(Duration::from_millis(20)).with_max(Duration::from_millis(80))?)
                .permanent(io::ErrorKind::PermissionDenied)
                .operation("inventory")
                .with_sink(sink.clone())
                .build()?,
        )
        .circuit_breaker(breaker.clone())
        .build();

    // 1. Transient failures, then success.
    let calls = Arc::new(AtomicUsize::new(0));
    let stock = stack
        .execute(|| {
            let calls = calls.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ResilienceError::Inner(io::Error::from(io::ErrorKind::ConnectionReset)))
                } else {
                    Ok(17)
                }
            }
        })
        .await?;
    println!("stock after {} attempts: {stock}", calls.load(Ordering::SeqCst));

    // 2. A slow backend times out on every attempt and trips the breaker.
    for _ in 0..2 {
        let slow: Result<u32, ResilienceError<io::Error>> = stack
            .execute(|| async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok(0)
            })
            .await;
        println!("slow call: {}", slow.map_or_else(|e| e.to_string(), |v| v.to_string()));
    }
    println!("breaker state: {}", breaker.state());

    // 3. Rejected without running while open.
    let rejected: Result<u32, ResilienceError<io::Error>> =
        stack.execute(|| async { Ok(1) }).await;
    if let Err(err) = rejected {
        println!("rejected: {err}");
    }

    // 4. After the cooldown a probe closes the circuit again.
    tokio::time::sleep(Duration::from_millis(250)).await;
    let recovered = stack.execute(|| async { Ok::<_, ResilienceError<io::Error>>(21) }).await?;
    println!("recovered: {recovered}, breaker state: {}", breaker.state());

    for snapshot in registry.snapshot() {
        println!(
            "{}: {} (failures={}, successes={})",
            snapshot.name, snapshot.state, snapshot.failure_count, snapshot.success_count
        );
    }
    println!("{} telemetry events recorded", events.len());
    Ok(())
}
