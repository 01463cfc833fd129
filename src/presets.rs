//! Pre-configured policies for the dependency classes a service typically protects.
//!
//! ## Quick Start
//!
//! ```rust
//! use holdfast::presets;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let db_breaker = presets::database_breaker().build()?;
//! let db_timeout = presets::database_timeout();
//! assert_eq!(db_breaker.name(), "database");
//! assert_eq!(db_timeout.operation(), "database");
//! # Ok(())
//! # }
//! ```
//!
//! Breaker presets return builders so callers can attach a clock or telemetry sink before
//! building; build each breaker once and share it.
//!
//! ## Available Presets
//!
//! - [`database_breaker`] / [`database_timeout`]: relational and document stores
//! - [`external_api_breaker`] / [`external_api_timeout`]: third-party HTTP APIs
//! - [`inference_breaker`] / [`inference_timeout`]: model inference backends
//! - [`transient_retry`]: retry for transient network failures
//! - [`guarded_service`]: tower stack Breaker → Retry → Timeout around a service

use crate::error::KindTag;
use crate::{
    with_retry, CircuitBreaker, CircuitBreakerBuilder, CircuitBreakerLayer, CircuitBreakerService,
    Jitter, RetryLayer, RetryPolicy, RetryPolicyBuilder, RetryService, TimeoutKind,
    TimeoutLayer, TimeoutPolicy, TimeoutService,
};
use std::time::Duration;
use tower::ServiceBuilder;

const DATABASE_FAILURE_THRESHOLD: usize = 5;
const DATABASE_RECOVERY_SECS: u64 = 60;
const DATABASE_TIMEOUT_SECS: u64 = 10;

const EXTERNAL_API_FAILURE_THRESHOLD: usize = 5;
const EXTERNAL_API_RECOVERY_SECS: u64 = 30;
const EXTERNAL_API_TIMEOUT_SECS: u64 = 15;

const INFERENCE_FAILURE_THRESHOLD: usize = 3;
const INFERENCE_RECOVERY_SECS: u64 = 120;
const INFERENCE_TIMEOUT_SECS: u64 = 60;

const TRANSIENT_RETRY_ATTEMPTS: usize = 3;
const TRANSIENT_RETRY_INITIAL_MILLIS: u64 = 500;
const TRANSIENT_RETRY_MULTIPLIER: f64 = 2.0;
const TRANSIENT_RETRY_MAX_SECS: u64 = 10;

/// Database breaker: opens after 5 failures, 60s recovery.
pub fn database_breaker() -> CircuitBreakerBuilder {
    CircuitBreaker::builder("database")
        .failure_threshold(DATABASE_FAILURE_THRESHOLD)
        .recovery_timeout(Duration::from_secs(DATABASE_RECOVERY_SECS))
}

/// External API breaker: opens after 5 failures, 30s recovery.
pub fn external_api_breaker() -> CircuitBreakerBuilder {
    CircuitBreaker::builder("external_api")
        .failure_threshold(EXTERNAL_API_FAILURE_THRESHOLD)
        .recovery_timeout(Duration::from_secs(EXTERNAL_API_RECOVERY_SECS))
}

/// Inference breaker: opens after 3 failures, 120s recovery. Inference backends recover slowly
/// (model reloads, GPU contention), so the cooldown is long.
pub fn inference_breaker() -> CircuitBreakerBuilder {
    CircuitBreaker::builder("inference")
        .failure_threshold(INFERENCE_FAILURE_THRESHOLD)
        .recovery_timeout(Duration::from_secs(INFERENCE_RECOVERY_SECS))
}

/// 10s network timeout labelled `database`.
pub fn database_timeout() -> TimeoutPolicy {
    TimeoutPolicy::unchecked(Duration::from_secs(DATABASE_TIMEOUT_SECS))
        .with_kind(TimeoutKind::Network)
        .with_operation("database")
}

/// 15s network timeout labelled `external_api`.
pub fn external_api_timeout() -> TimeoutPolicy {
    TimeoutPolicy::unchecked(Duration::from_secs(EXTERNAL_API_TIMEOUT_SECS))
        .with_kind(TimeoutKind::Network)
        .with_operation("external_api")
}

/// 60s processing timeout labelled `inference`.
pub fn inference_timeout() -> TimeoutPolicy {
    TimeoutPolicy::unchecked(Duration::from_secs(INFERENCE_TIMEOUT_SECS))
        .with_kind(TimeoutKind::Processing)
        .with_operation("inference")
}

/// Three attempts, 500ms doubling to at most 10s, full jitter. Add `retryable`/`permanent`
/// kinds before building.
pub fn transient_retry<K: KindTag>() -> RetryPolicyBuilder<K> {
    with_retry(
        TRANSIENT_RETRY_ATTEMPTS,
        Duration::from_millis(TRANSIENT_RETRY_INITIAL_MILLIS),
        TRANSIENT_RETRY_MULTIPLIER,
        Duration::from_secs(TRANSIENT_RETRY_MAX_SECS),
    )
    .with_jitter(Jitter::full())
}

/// Wrap `service` as Breaker → Retry → Timeout → service.
///
/// The breaker records one outcome per request after retries; each attempt gets the full
/// timeout.
///
/// # Example
/// ```rust
/// use holdfast::{presets, ResilienceError};
/// use tower::{service_fn, ServiceExt};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let svc = presets::guarded_service(
///     service_fn(|id: u32| async move {
///         Ok::<_, ResilienceError<std::io::Error>>(format!("user-{id}"))
///     }),
///     presets::database_timeout(),
///     presets::transient_retry::<std::io::ErrorKind>().build()?,
///     presets::database_breaker().build()?,
/// );
///
/// assert_eq!(svc.oneshot(7).await?, "user-7");
/// # Ok(())
/// # }
/// ```
pub fn guarded_service<S, K>(
    service: S,
    timeout: TimeoutPolicy,
    retry: RetryPolicy<K>,
    breaker: CircuitBreaker,
) -> CircuitBreakerService<RetryService<TimeoutService<S>, K>>
where
    K: KindTag,
{
    ServiceBuilder::new()
        .layer(CircuitBreakerLayer::new(breaker))
        .layer(RetryLayer::new(retry))
        .layer(TimeoutLayer::new(timeout))
        .service(service)
}
