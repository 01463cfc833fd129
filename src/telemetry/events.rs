use crate::TimeoutKind;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Policy events emitted during execution.
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyEvent {
    /// Retry policy events
    Retry(RetryEvent),
    /// Circuit breaker events
    CircuitBreaker(CircuitBreakerEvent),
    /// Timeout events
    Timeout(TimeoutEvent),
}

/// Why a retry policy stopped before using all attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GiveUpReason {
    /// Failure kind is declared permanent.
    Permanent,
    /// A retryable set is configured and the kind is not in it.
    NotRetryable,
    /// The call chain was cancelled.
    Cancelled,
}

/// Events emitted by retry policies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryEvent {
    /// A failed attempt will be retried after `delay`.
    Attempt {
        operation: Arc<str>,
        /// The attempt that just failed (1-indexed)
        attempt: usize,
        /// The backoff delay before the next attempt
        delay: Duration,
    },
    /// The policy returned the failure without exhausting its attempts.
    GaveUp { operation: Arc<str>, attempt: usize, reason: GiveUpReason },
    /// All attempts failed.
    Exhausted {
        operation: Arc<str>,
        /// Total number of attempts made
        total_attempts: usize,
        /// Total time spent, including backoff sleeps
        total_duration: Duration,
    },
}

/// Events emitted by circuit breakers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CircuitBreakerEvent {
    /// Circuit transitioned to open; calls are rejected until the cooldown elapses.
    Opened {
        name: Arc<str>,
        /// Failures recorded when the circuit opened
        failure_count: usize,
    },
    /// Cooldown elapsed and a probe call was admitted.
    HalfOpen { name: Arc<str> },
    /// The probe succeeded; normal operation resumes.
    Closed { name: Arc<str> },
    /// A call was rejected without running.
    Rejected { name: Arc<str>, failure_count: usize },
}

/// Events emitted by timeout policies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeoutEvent {
    /// An operation exceeded its deadline and was abandoned.
    Occurred { operation: Arc<str>, kind: TimeoutKind, timeout: Duration },
}

impl fmt::Display for PolicyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyEvent::Retry(event) => write!(f, "Retry::{}", event),
            PolicyEvent::CircuitBreaker(event) => write!(f, "CircuitBreaker::{}", event),
            PolicyEvent::Timeout(event) => write!(f, "Timeout::{}", event),
        }
    }
}

impl fmt::Display for RetryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryEvent::Attempt { operation, attempt, delay } => {
                write!(f, "Attempt({}, #{}, delay={:?})", operation, attempt, delay)
            }
            RetryEvent::GaveUp { operation, attempt, reason } => {
                write!(f, "GaveUp({}, #{}, {:?})", operation, attempt, reason)
            }
            RetryEvent::Exhausted { operation, total_attempts, total_duration } => write!(
                f,
                "Exhausted({}, attempts={}, duration={:?})",
                operation, total_attempts, total_duration
            ),
        }
    }
}

impl fmt::Display for CircuitBreakerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitBreakerEvent::Opened { name, failure_count } => {
                write!(f, "Opened({}, failures={})", name, failure_count)
            }
            CircuitBreakerEvent::HalfOpen { name } => write!(f, "HalfOpen({})", name),
            CircuitBreakerEvent::Closed { name } => write!(f, "Closed({})", name),
            CircuitBreakerEvent::Rejected { name, failure_count } => {
                write!(f, "Rejected({}, failures={})", name, failure_count)
            }
        }
    }
}

impl fmt::Display for TimeoutEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutEvent::Occurred { operation, kind, timeout } => {
                write!(f, "Occurred({}, {}, timeout={:?})", operation, kind, timeout)
            }
        }
    }
}
