//! Error taxonomy shared by every policy.
//!
//! Failures are tagged with a kind so retry policies can classify them by set membership:
//! application errors implement [`Classify`], and [`ResilienceError`] lifts that kind into
//! [`FailureKind`] alongside the kinds the policies manufacture themselves (timeouts, breaker
//! rejections, cancellation).
use std::fmt;
use std::hash::Hash;
use std::io;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Bounds every kind tag satisfies: cheap to copy, hashable for set membership, shareable.
pub trait KindTag: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static {}

impl<T> KindTag for T where T: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static {}

/// Tags a failure with an enumerable kind.
pub trait Classify {
    /// Kind tag checked by retry policies.
    type Kind: KindTag;

    /// Kind of this failure.
    fn kind(&self) -> Self::Kind;
}

impl Classify for io::Error {
    type Kind = io::ErrorKind;

    fn kind(&self) -> io::ErrorKind {
        io::Error::kind(self)
    }
}

/// Which class of deadline was exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum TimeoutKind {
    /// Local processing took too long (parsing, inference, computation).
    #[default]
    Processing,
    /// A downstream dependency did not answer in time.
    Network,
}

impl fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutKind::Processing => write!(f, "processing"),
            TimeoutKind::Network => write!(f, "network"),
        }
    }
}

/// Rejection produced when a circuit breaker declines to run the guarded operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error(
    "circuit breaker '{name}' is open ({failure_count} failures, retry in {retry_after:?})"
)]
pub struct CircuitOpenError {
    /// Breaker identifier.
    pub name: Arc<str>,
    /// Failures recorded at the time of rejection.
    pub failure_count: usize,
    /// Wall-clock time of the most recent recorded failure.
    pub last_failure_at: Option<SystemTime>,
    /// Remaining cooldown before a probe is admitted; zero while a probe is in flight.
    pub retry_after: Duration,
}

/// Unified error type for all resilience policies.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ResilienceError<E> {
    /// The operation exceeded its deadline.
    #[error("{kind} timeout: '{operation}' exceeded {timeout:?} (elapsed {elapsed:?})")]
    Timeout {
        /// Processing or network deadline.
        kind: TimeoutKind,
        /// Label of the bounded operation.
        operation: Arc<str>,
        /// Configured bound.
        timeout: Duration,
        /// Time actually waited.
        elapsed: Duration,
    },
    /// The circuit breaker rejected the call; the operation never ran.
    #[error(transparent)]
    CircuitOpen(CircuitOpenError),
    /// The calling context cancelled the work.
    #[error("operation cancelled")]
    Cancelled,
    /// The underlying operation failed.
    #[error(transparent)]
    Inner(E),
}

/// Kind tag of a [`ResilienceError`], used by retry classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind<K> {
    /// Deadline exceeded.
    Timeout(TimeoutKind),
    /// Breaker rejection.
    CircuitOpen,
    /// Cancelled by the caller. Never retried.
    Cancelled,
    /// Application failure of kind `K`.
    Inner(K),
}

impl<E> From<CircuitOpenError> for ResilienceError<E> {
    fn from(err: CircuitOpenError) -> Self {
        ResilienceError::CircuitOpen(err)
    }
}

impl<E: Classify> Classify for ResilienceError<E> {
    type Kind = FailureKind<E::Kind>;

    fn kind(&self) -> Self::Kind {
        match self {
            Self::Timeout { kind, .. } => FailureKind::Timeout(*kind),
            Self::CircuitOpen(_) => FailureKind::CircuitOpen,
            Self::Cancelled => FailureKind::Cancelled,
            Self::Inner(e) => FailureKind::Inner(e.kind()),
        }
    }
}

impl<E> ResilienceError<E> {
    /// Check if this error is due to timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Check if this error is a breaker rejection
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen(_))
    }

    /// Check if the work was cancelled
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Check if this error wraps an inner error.
    pub fn is_inner(&self) -> bool {
        matches!(self, Self::Inner(_))
    }

    /// Get the inner error if this is an Inner variant
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }

    /// Borrow the inner error if present.
    pub fn as_inner(&self) -> Option<&E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }

    /// Access timeout details as (kind, configured bound).
    pub fn timeout_details(&self) -> Option<(TimeoutKind, Duration)> {
        match self {
            Self::Timeout { kind, timeout, .. } => Some((*kind, *timeout)),
            _ => None,
        }
    }

    /// Access the breaker rejection, if present.
    pub fn circuit_open(&self) -> Option<&CircuitOpenError> {
        match self {
            Self::CircuitOpen(rejection) => Some(rejection),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
    #[error("{0}")]
    struct DummyError(&'static str);

    impl Classify for DummyError {
        type Kind = &'static str;

        fn kind(&self) -> &'static str {
            self.0
        }
    }

    fn rejection() -> CircuitOpenError {
        CircuitOpenError {
            name: Arc::from("db"),
            failure_count: 10,
            last_failure_at: None,
            retry_after: Duration::from_secs(30),
        }
    }

    #[test]
    fn timeout_error_display() {
        let err: ResilienceError<io::Error> = ResilienceError::Timeout {
            kind: TimeoutKind::Network,
            operation: Arc::from("fetch_profile"),
            timeout: Duration::from_secs(5),
            elapsed: Duration::from_millis(5100),
        };
        let msg = err.to_string();
        assert!(msg.contains("network timeout"));
        assert!(msg.contains("fetch_profile"));
        assert!(msg.contains("5s"));
    }

    #[test]
    fn circuit_open_error_display() {
        let err: ResilienceError<io::Error> = rejection().into();
        let msg = err.to_string();
        assert!(msg.contains("circuit breaker 'db'"));
        assert!(msg.contains("10"));
    }

    #[test]
    fn inner_error_is_transparent() {
        let err = ResilienceError::Inner(DummyError("boom"));
        assert_eq!(err.to_string(), "boom");
        assert!(err.source().is_none());
        assert_eq!(err.into_inner(), Some(DummyError("boom")));
    }

    #[test]
    fn kind_lifts_inner_classification() {
        let inner: ResilienceError<DummyError> = ResilienceError::Inner(DummyError("parse"));
        assert_eq!(inner.kind(), FailureKind::Inner("parse"));

        let timeout: ResilienceError<DummyError> = ResilienceError::Timeout {
            kind: TimeoutKind::Processing,
            operation: Arc::from("op"),
            timeout: Duration::from_millis(100),
            elapsed: Duration::from_millis(100),
        };
        assert_eq!(timeout.kind(), FailureKind::Timeout(TimeoutKind::Processing));

        let open: ResilienceError<DummyError> = rejection().into();
        assert_eq!(open.kind(), FailureKind::CircuitOpen);
        assert_eq!(ResilienceError::<DummyError>::Cancelled.kind(), FailureKind::Cancelled);
    }

    #[test]
    fn io_errors_classify_by_error_kind() {
        let err = io::Error::new(io::ErrorKind::ConnectionReset, "reset");
        assert_eq!(Classify::kind(&err), io::ErrorKind::ConnectionReset);
    }

    #[test]
    fn predicates_cover_all_variants() {
        let timeout: ResilienceError<DummyError> = ResilienceError::Timeout {
            kind: TimeoutKind::Network,
            operation: Arc::from("op"),
            timeout: Duration::from_secs(2),
            elapsed: Duration::from_secs(2),
        };
        assert!(timeout.is_timeout());
        assert!(!timeout.is_circuit_open());
        assert_eq!(timeout.timeout_details(), Some((TimeoutKind::Network, Duration::from_secs(2))));

        let open: ResilienceError<DummyError> = rejection().into();
        assert!(open.is_circuit_open());
        assert_eq!(open.circuit_open().map(|r| r.failure_count), Some(10));

        let cancelled: ResilienceError<DummyError> = ResilienceError::Cancelled;
        assert!(cancelled.is_cancelled());
        assert!(cancelled.as_inner().is_none());

        let inner = ResilienceError::Inner(DummyError("x"));
        assert!(inner.is_inner());
        assert_eq!(inner.as_inner().map(|e| e.0), Some("x"));
    }
}
