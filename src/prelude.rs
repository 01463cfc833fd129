//! Convenient re-exports for common holdfast types.
pub use crate::{
    backoff::{Backoff, BackoffError},
    cancel::CancelToken,
    circuit_breaker::{CircuitBreaker, CircuitBreakerError, CircuitBreakerLayer, CircuitState},
    error::{Classify, CircuitOpenError, FailureKind, ResilienceError, TimeoutKind},
    jitter::Jitter,
    retry::{with_retry, BuildError, RetryLayer, RetryPolicy},
    stack::ResilienceStack,
    timeout::{with_timeout, TimeoutError, TimeoutLayer, TimeoutPolicy},
};
