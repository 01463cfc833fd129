#![forbid(unsafe_code)]

//! # holdfast
//!
//! Resilience core for async Rust: bounded execution, retry with exponential backoff, and
//! circuit breakers, for wrapping calls to unreliable dependencies (databases, external APIs,
//! inference backends).
//!
//! ## Features
//!
//! - **Timeouts** that distinguish processing from network deadlines and carry an operation label
//! - **Retry policies** classifying failures by kind (permanent vs retryable sets), with capped
//!   exponential backoff and optional jitter
//! - **Circuit breakers** with lazy half-open probing, shared by cloning
//! - **Composition** through [`ResilienceStack`] or tower layers
//! - **Cancellation** through [`CancelToken`]
//! - **Telemetry** events alongside `tracing` logs
//!
//! ## Quick Start
//!
//! ```rust
//! use holdfast::{with_retry, with_timeout, CircuitBreaker, ResilienceError, ResilienceStack, TimeoutKind};
//! use std::io;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let breaker = CircuitBreaker::new("inventory", 5, Duration::from_secs(30))?;
//!     let stack = ResilienceStack::builder()
//!         .timeout(with_timeout(Duration::from_secs(2), TimeoutKind::Network, "inventory")?)
//!         .retry(
//!             with_retry(3, Duration::from_millis(100), 2.0, Duration::from_secs(1))
//!                 .permanent(io::ErrorKind::PermissionDenied)
//!                 .build()?,
//!         )
//!         .circuit_breaker(breaker)
//!         .build();
//!
//!     let stock = stack
//!         .execute(|| async { Ok::<_, ResilienceError<io::Error>>(42) })
//!         .await?;
//!     assert_eq!(stock, 42);
//!     Ok(())
//! }
//! ```

pub mod backoff;
pub mod cancel;
pub mod circuit_breaker;
pub mod circuit_breaker_registry;
pub mod clock;
pub mod config;
pub mod error;
pub mod jitter;
pub mod prelude;
pub mod presets;
pub mod retry;
pub mod sleeper;
pub mod stack;
pub mod telemetry;
pub mod timeout;

// Re-exports
pub use backoff::{Backoff, BackoffError, MAX_BACKOFF};
pub use cancel::CancelToken;
pub use circuit_breaker::{
    BreakerSnapshot, CallPermit, CircuitBreaker, CircuitBreakerBuilder, CircuitBreakerConfig,
    CircuitBreakerError, CircuitBreakerLayer, CircuitBreakerService, CircuitState,
};
pub use circuit_breaker_registry::{BreakerRegistry, RegistryError};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use error::{Classify, CircuitOpenError, FailureKind, KindTag, ResilienceError, TimeoutKind};
pub use jitter::Jitter;
pub use retry::{with_retry, BuildError, RetryLayer, RetryPolicy, RetryPolicyBuilder, RetryService};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use stack::{ResilienceStack, ResilienceStackBuilder};
pub use timeout::{
    with_timeout, TimeoutError, TimeoutFuture, TimeoutLayer, TimeoutPolicy, TimeoutService,
    MAX_TIMEOUT,
};
