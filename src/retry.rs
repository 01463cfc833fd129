//! Retry policy for fallible async operations.
//!
//! Semantics:
//! - `max_attempts` counts total attempts (initial try + retries).
//! - Failures are classified by their [`FailureKind`]: `Cancelled` is never retried, a kind in
//!   the permanent set is returned immediately, and when a retryable set is configured only kinds
//!   inside it are retried. Without a retryable set every non-permanent kind is retried,
//!   including timeouts and breaker rejections.
//! - Between attempts the policy sleeps `jitter(backoff.delay(n))` where `n` is the attempt that
//!   just failed, so the first retry waits the initial delay.
//! - When attempts run out the last failure is returned unchanged.
//!
//! Invariants:
//! - Attempts never exceed `max_attempts`.
//! - No sleep follows the final attempt.
//!
//! Example
//! ```rust
//! use std::time::Duration;
//! use holdfast::{with_retry, ResilienceError};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let policy = with_retry::<std::io::ErrorKind>(
//!     3,
//!     Duration::from_millis(10),
//!     2.0,
//!     Duration::from_millis(100),
//! )
//! .permanent(std::io::ErrorKind::PermissionDenied)
//! .build()
//! .unwrap();
//!
//! let result: Result<(), ResilienceError<std::io::Error>> = policy
//!     .execute(|| async {
//!         Err(ResilienceError::Inner(std::io::Error::from(std::io::ErrorKind::PermissionDenied)))
//!     })
//!     .await;
//! assert!(result.is_err());
//! # });
//! ```

use crate::backoff::BackoffError;
use crate::error::KindTag;
use crate::telemetry::{GiveUpReason, NullSink, PolicyEvent, RetryEvent, TelemetrySink};
use crate::{Backoff, CancelToken, Classify, FailureKind, Jitter, ResilienceError, Sleeper, TokioSleeper};
use futures::future::BoxFuture;
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::Instant;
use tower::ServiceExt;
use tower_layer::Layer;
use tower_service::Service;

/// Errors produced while building a retry policy.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BuildError {
    /// `max_attempts` must be > 0.
    #[error("max_attempts must be > 0 (got {0})")]
    InvalidMaxAttempts(usize),
    #[error(transparent)]
    Backoff(#[from] BackoffError),
}

/// Retry policy combining backoff, jitter, kind classification and a sleeper.
///
/// `K` is the application's failure kind, i.e. `E::Kind` for the errors this policy handles.
#[derive(Clone)]
pub struct RetryPolicy<K> {
    max_attempts: usize,
    backoff: Backoff,
    jitter: Jitter,
    retryable: Option<Arc<HashSet<FailureKind<K>>>>,
    permanent: Arc<HashSet<FailureKind<K>>>,
    sleeper: Arc<dyn Sleeper>,
    sink: Arc<dyn TelemetrySink>,
    operation: Arc<str>,
}

impl<K: fmt::Debug> fmt::Debug for RetryPolicy<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("operation", &self.operation)
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("jitter", &self.jitter)
            .field("retryable", &self.retryable)
            .field("permanent", &self.permanent)
            .field("sleeper", &self.sleeper)
            .finish()
    }
}

/// Start a retry policy from the four numeric knobs: total attempts, the delay before the first
/// retry, the growth factor, and the delay cap.
///
/// Invalid knobs surface from [`RetryPolicyBuilder::build`].
pub fn with_retry<K: KindTag>(
    max_attempts: usize,
    initial_delay: Duration,
    backoff_multiplier: f64,
    max_delay: Duration,
) -> RetryPolicyBuilder<K> {
    let backoff = if initial_delay.is_zero() {
        Err(BackoffError::BaseMustBePositive)
    } else {
        Backoff::exponential(initial_delay)
            .with_multiplier(backoff_multiplier)
            .and_then(|b| b.with_max(max_delay))
    };
    let mut builder = RetryPolicyBuilder::new().max_attempts(max_attempts);
    builder.backoff = backoff;
    builder
}

impl<K: KindTag> RetryPolicy<K> {
    /// Construct a new builder with defaults.
    pub fn builder() -> RetryPolicyBuilder<K> {
        RetryPolicyBuilder::new()
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Whether a failure of `kind` would be retried (attempts permitting).
    pub fn is_retryable(&self, kind: &FailureKind<K>) -> bool {
        self.give_up_reason(kind).is_none()
    }

    fn give_up_reason(&self, kind: &FailureKind<K>) -> Option<GiveUpReason> {
        if matches!(kind, FailureKind::Cancelled) {
            return Some(GiveUpReason::Cancelled);
        }
        if self.permanent.contains(kind) {
            return Some(GiveUpReason::Permanent);
        }
        match &self.retryable {
            Some(set) if !set.contains(kind) => Some(GiveUpReason::NotRetryable),
            _ => None,
        }
    }

    /// Execute an async operation with retry semantics.
    pub async fn execute<T, E, Fut, Op>(&self, operation: Op) -> Result<T, ResilienceError<E>>
    where
        E: Classify<Kind = K> + fmt::Display,
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
        Op: FnMut() -> Fut,
    {
        self.run(operation, None).await
    }

    /// Like [`execute`](Self::execute), but stops with `Cancelled` as soon as `cancel` fires,
    /// whether an attempt or a backoff sleep is in progress.
    pub async fn execute_cancellable<T, E, Fut, Op>(
        &self,
        operation: Op,
        cancel: &CancelToken,
    ) -> Result<T, ResilienceError<E>>
    where
        E: Classify<Kind = K> + fmt::Display,
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
        Op: FnMut() -> Fut,
    {
        self.run(operation, Some(cancel)).await
    }

    /// Turn `operation` into a unit of work that retries under this policy on every call.
    pub fn wrap<T, E, Fut, Op>(
        &self,
        operation: Op,
    ) -> impl FnMut() -> BoxFuture<'static, Result<T, ResilienceError<E>>>
    where
        T: Send + 'static,
        E: Classify<Kind = K> + fmt::Display + Send + 'static,
        Fut: Future<Output = Result<T, ResilienceError<E>>> + Send + 'static,
        Op: FnMut() -> Fut + Clone + Send + 'static,
    {
        let policy = self.clone();
        move || {
            let policy = policy.clone();
            let operation = operation.clone();
            Box::pin(async move { policy.execute(operation).await })
        }
    }

    async fn run<T, E, Fut, Op>(
        &self,
        mut operation: Op,
        cancel: Option<&CancelToken>,
    ) -> Result<T, ResilienceError<E>>
    where
        E: Classify<Kind = K> + fmt::Display,
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
        Op: FnMut() -> Fut,
    {
        let start = Instant::now();
        let mut attempt = 1;
        loop {
            let outcome = match cancel {
                Some(token) if token.is_cancelled() => return Err(self.cancelled(attempt)),
                Some(token) => tokio::select! {
                    biased;
                    _ = token.cancelled() => return Err(self.cancelled(attempt)),
                    result = operation() => result,
                },
                None => operation().await,
            };

            let err = match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::debug!(operation = %self.operation, attempt, "retry succeeded");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if let Some(reason) = self.give_up_reason(&err.kind()) {
                tracing::info!(
                    operation = %self.operation,
                    attempt,
                    reason = ?reason,
                    error = %err,
                    "failure not retried"
                );
                self.emit(RetryEvent::GaveUp { operation: self.operation.clone(), attempt, reason });
                return Err(err);
            }

            if attempt >= self.max_attempts {
                let total_duration = start.elapsed();
                tracing::error!(
                    operation = %self.operation,
                    attempts = attempt,
                    elapsed = ?total_duration,
                    error = %err,
                    "retry attempts exhausted"
                );
                self.emit(RetryEvent::Exhausted {
                    operation: self.operation.clone(),
                    total_attempts: attempt,
                    total_duration,
                });
                return Err(err);
            }

            let delay = self.jitter.apply(self.backoff.delay(attempt));
            tracing::warn!(
                operation = %self.operation,
                attempt,
                max_attempts = self.max_attempts,
                delay = ?delay,
                error = %err,
                "attempt failed, retrying"
            );
            self.emit(RetryEvent::Attempt { operation: self.operation.clone(), attempt, delay });

            match cancel {
                Some(token) => tokio::select! {
                    biased;
                    _ = token.cancelled() => return Err(self.cancelled(attempt)),
                    _ = self.sleeper.sleep(delay) => {}
                },
                None => self.sleeper.sleep(delay).await,
            }
            attempt += 1;
        }
    }

    fn cancelled<E>(&self, attempt: usize) -> ResilienceError<E> {
        tracing::info!(operation = %self.operation, attempt, "retry loop cancelled");
        self.emit(RetryEvent::GaveUp {
            operation: self.operation.clone(),
            attempt,
            reason: GiveUpReason::Cancelled,
        });
        ResilienceError::Cancelled
    }

    fn emit(&self, event: RetryEvent) {
        self.sink.emit(&PolicyEvent::Retry(event));
    }
}

/// Builder for `RetryPolicy`.
pub struct RetryPolicyBuilder<K> {
    max_attempts: usize,
    backoff: Result<Backoff, BackoffError>,
    jitter: Jitter,
    retryable: Option<HashSet<FailureKind<K>>>,
    permanent: HashSet<FailureKind<K>>,
    sleeper: Arc<dyn Sleeper>,
    sink: Arc<dyn TelemetrySink>,
    operation: Arc<str>,
}

impl<K: fmt::Debug> fmt::Debug for RetryPolicyBuilder<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicyBuilder")
            .field("operation", &self.operation)
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("jitter", &self.jitter)
            .field("retryable", &self.retryable)
            .field("permanent", &self.permanent)
            .field("sleeper", &self.sleeper)
            .finish()
    }
}

impl<K: KindTag> RetryPolicyBuilder<K> {
    /// Three attempts, doubling from one second up to a minute, no jitter, retry everything
    /// that is not cancelled.
    pub fn new() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::exponential(Duration::from_secs(1)).with_max(Duration::from_secs(60)),
            jitter: Jitter::None,
            retryable: None,
            permanent: HashSet::new(),
            sleeper: Arc::new(TokioSleeper),
            sink: Arc::new(NullSink),
            operation: Arc::from("operation"),
        }
    }

    /// Set total attempts (initial + retries). Must be > 0.
    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = Ok(backoff);
        self
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    /// Restrict retries to the listed kinds. Call repeatedly to add more.
    pub fn retryable(self, kind: K) -> Self {
        self.retryable_kind(FailureKind::Inner(kind))
    }

    /// Like [`retryable`](Self::retryable) for policy-produced kinds such as timeouts.
    pub fn retryable_kind(mut self, kind: FailureKind<K>) -> Self {
        self.retryable.get_or_insert_with(HashSet::new).insert(kind);
        self
    }

    /// Never retry `kind`. Takes precedence over the retryable set.
    pub fn permanent(self, kind: K) -> Self {
        self.permanent_kind(FailureKind::Inner(kind))
    }

    pub fn permanent_kind(mut self, kind: FailureKind<K>) -> Self {
        self.permanent.insert(kind);
        self
    }

    /// Provide a custom sleeper implementation.
    pub fn with_sleeper<S: Sleeper + 'static>(mut self, sleeper: S) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    /// Send `RetryEvent`s to `sink`.
    pub fn with_sink<S: TelemetrySink + 'static>(mut self, sink: S) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    /// Label used in logs and events.
    pub fn operation(mut self, operation: impl Into<Arc<str>>) -> Self {
        self.operation = operation.into();
        self
    }

    /// Build the retry policy, validating inputs.
    pub fn build(self) -> Result<RetryPolicy<K>, BuildError> {
        if self.max_attempts == 0 {
            return Err(BuildError::InvalidMaxAttempts(0));
        }
        Ok(RetryPolicy {
            max_attempts: self.max_attempts,
            backoff: self.backoff?,
            jitter: self.jitter,
            retryable: self.retryable.map(Arc::new),
            permanent: Arc::new(self.permanent),
            sleeper: self.sleeper,
            sink: self.sink,
            operation: self.operation,
        })
    }
}

impl<K: KindTag> Default for RetryPolicyBuilder<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Tower layer retrying each request under a [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryLayer<K> {
    policy: RetryPolicy<K>,
}

impl<K> RetryLayer<K> {
    pub fn new(policy: RetryPolicy<K>) -> Self {
        Self { policy }
    }
}

impl<S, K: Clone> Layer<S> for RetryLayer<K> {
    type Service = RetryService<S, K>;

    fn layer(&self, inner: S) -> Self::Service {
        RetryService { inner, policy: self.policy.clone() }
    }
}

/// Retry service produced by `RetryLayer`. Each attempt drives a fresh clone of the inner
/// service with a clone of the request.
#[derive(Debug, Clone)]
pub struct RetryService<S, K> {
    inner: S,
    policy: RetryPolicy<K>,
}

impl<S, K, E, Request> Service<Request> for RetryService<S, K>
where
    Request: Clone + Send + 'static,
    S: Service<Request, Error = ResilienceError<E>> + Clone + Send + 'static,
    S::Response: Send + 'static,
    S::Future: Send + 'static,
    E: Classify<Kind = K> + fmt::Display + Send + 'static,
    K: KindTag,
{
    type Response = S::Response;
    type Error = ResilienceError<E>;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let policy = self.policy.clone();
        let inner = self.inner.clone();
        Box::pin(async move {
            policy
                .execute(move || {
                    let svc = inner.clone();
                    let req = req.clone();
                    async move { svc.oneshot(req).await }
                })
                .await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::MemorySink;
    use crate::{InstantSleeper, TimeoutKind, TrackingSleeper};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Kind {
        Connection,
        Auth,
        Parse,
    }

    #[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
    #[error("test error: {0:?}")]
    struct TestError(Kind);

    impl Classify for TestError {
        type Kind = Kind;

        fn kind(&self) -> Kind {
            self.0
        }
    }

    fn fail(kind: Kind) -> ResilienceError<TestError> {
        ResilienceError::Inner(TestError(kind))
    }

    fn policy(max_attempts: usize) -> RetryPolicyBuilder<Kind> {
        RetryPolicy::builder()
            .max_attempts(max_attempts)
            .backoff(Backoff::constant(Duration::from_millis(10)))
            .with_sleeper(InstantSleeper)
    }

    #[tokio::test]
    async fn success_first_attempt() {
        let policy = policy(3).build().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        let result = policy
            .execute(|| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ResilienceError<TestError>>(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn success_after_retries() {
        let policy = policy(5).build().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        let result = policy
            .execute(|| {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 {
                        Err(fail(Kind::Connection))
                    } else {
                        Ok("connected")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "connected");
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhaustion_returns_last_failure_unchanged() {
        let policy = policy(3).build().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        let result: Result<(), _> = policy
            .execute(|| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(fail(Kind::Connection))
                }
            })
            .await;

        assert_eq!(result.unwrap_err().into_inner(), Some(TestError(Kind::Connection)));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_kind_is_attempted_once() {
        let policy = policy(5).permanent(Kind::Auth).build().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        let result: Result<(), _> = policy
            .execute(|| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(fail(Kind::Auth))
                }
            })
            .await;

        assert_eq!(result.unwrap_err().into_inner(), Some(TestError(Kind::Auth)));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn kinds_outside_retryable_set_are_not_retried() {
        let policy = policy(4).retryable(Kind::Connection).build().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        let result: Result<(), _> = policy
            .execute(|| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(fail(Kind::Parse))
                }
            })
            .await;

        assert!(result.unwrap_err().is_inner());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn permanent_takes_precedence_over_retryable() {
        let policy = policy(3).retryable(Kind::Auth).permanent(Kind::Auth).build().unwrap();
        assert!(!policy.is_retryable(&FailureKind::Inner(Kind::Auth)));
    }

    #[test]
    fn cancelled_is_never_retryable() {
        let policy = policy(3).retryable_kind(FailureKind::Cancelled).build().unwrap();
        assert!(!policy.is_retryable(&FailureKind::Cancelled));
    }

    #[tokio::test]
    async fn timeouts_and_rejections_retry_by_default() {
        let policy = policy(3).build().unwrap();
        assert!(policy.is_retryable(&FailureKind::Timeout(TimeoutKind::Network)));
        assert!(policy.is_retryable(&FailureKind::CircuitOpen));

        let counter = Arc::new(AtomicUsize::new(0));
        let result: Result<(), ResilienceError<TestError>> = policy
            .execute(|| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(ResilienceError::Timeout {
                        kind: TimeoutKind::Processing,
                        operation: Arc::from("op"),
                        timeout: Duration::from_millis(5),
                        elapsed: Duration::from_millis(5),
                    })
                }
            })
            .await;
        assert!(result.unwrap_err().is_timeout());
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn cancelled_failure_is_returned_immediately() {
        let policy = policy(5).build().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        let result: Result<(), ResilienceError<TestError>> = policy
            .execute(|| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(ResilienceError::Cancelled)
                }
            })
            .await;

        assert!(result.unwrap_err().is_cancelled());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn backoff_delays_grow_and_stop_before_final_attempt() {
        let sleeper = TrackingSleeper::new();
        let policy = with_retry::<Kind>(
            4,
            Duration::from_millis(100),
            2.0,
            Duration::from_millis(300),
        )
        .with_sleeper(sleeper.clone())
        .build()
        .unwrap();

        let _: Result<(), _> = policy.execute(|| async { Err(fail(Kind::Connection)) }).await;

        assert_eq!(
            sleeper.calls(),
            vec![Duration::from_millis(100), Duration::from_millis(200), Duration::from_millis(300)]
        );
    }

    #[tokio::test]
    async fn jittered_delays_stay_within_backoff() {
        let sleeper = TrackingSleeper::new();
        let policy = policy(4)
            .backoff(Backoff::exponential(Duration::from_millis(100)))
            .with_jitter(Jitter::full())
            .with_sleeper(sleeper.clone())
            .build()
            .unwrap();

        let _: Result<(), _> = policy.execute(|| async { Err(fail(Kind::Connection)) }).await;

        let calls = sleeper.calls();
        assert_eq!(calls.len(), 3);
        for (i, delay) in calls.iter().enumerate() {
            assert!(*delay <= Duration::from_millis(100 << i));
        }
    }

    #[test]
    fn builder_rejects_invalid_knobs() {
        assert_eq!(
            RetryPolicy::<Kind>::builder().max_attempts(0).build().unwrap_err(),
            BuildError::InvalidMaxAttempts(0)
        );
        assert!(matches!(
            with_retry::<Kind>(3, Duration::from_secs(1), 0.5, Duration::from_secs(5))
                .build()
                .unwrap_err(),
            BuildError::Backoff(BackoffError::InvalidMultiplier(_))
        ));
        assert!(matches!(
            with_retry::<Kind>(3, Duration::from_secs(10), 2.0, Duration::from_secs(5))
                .build()
                .unwrap_err(),
            BuildError::Backoff(BackoffError::MaxLessThanBase { .. })
        ));
        assert_eq!(
            with_retry::<Kind>(3, Duration::ZERO, 2.0, Duration::from_secs(1))
                .build()
                .unwrap_err(),
            BuildError::Backoff(BackoffError::BaseMustBePositive)
        );
    }

    #[test]
    fn builder_debug_shows_knobs_and_deferred_errors() {
        let builder = with_retry::<Kind>(4, Duration::ZERO, 2.0, Duration::from_secs(1))
            .operation("billing")
            .permanent(Kind::Auth);
        let rendered = format!("{builder:?}");
        assert!(rendered.starts_with("RetryPolicyBuilder"));
        assert!(rendered.contains("billing"));
        assert!(rendered.contains("max_attempts: 4"));
        assert!(rendered.contains("BaseMustBePositive"));
        assert!(rendered.contains("Auth"));
    }

    #[tokio::test]
    async fn emits_attempt_and_exhausted_events() {
        let sink = MemorySink::new();
        let policy = policy(2).operation("lookup").with_sink(sink.clone()).build().unwrap();

        let _: Result<(), _> = policy.execute(|| async { Err(fail(Kind::Connection)) }).await;

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[0],
            PolicyEvent::Retry(RetryEvent::Attempt { attempt: 1, operation, .. }) if &**operation == "lookup"
        ));
        assert!(matches!(
            &events[1],
            PolicyEvent::Retry(RetryEvent::Exhausted { total_attempts: 2, .. })
        ));
    }

    #[tokio::test]
    async fn emits_give_up_for_permanent_failure() {
        let sink = MemorySink::new();
        let policy = policy(3).permanent(Kind::Auth).with_sink(sink.clone()).build().unwrap();

        let _: Result<(), _> = policy.execute(|| async { Err(fail(Kind::Auth)) }).await;

        assert_eq!(
            sink.events(),
            vec![PolicyEvent::Retry(RetryEvent::GaveUp {
                operation: Arc::from("operation"),
                attempt: 1,
                reason: GiveUpReason::Permanent,
            })]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff_sleep() {
        let policy = RetryPolicy::<Kind>::builder()
            .max_attempts(5)
            .backoff(Backoff::constant(Duration::from_secs(30)))
            .build()
            .unwrap();
        let token = CancelToken::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });

        let result: Result<(), _> = policy
            .execute_cancellable(
                || {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Err(fail(Kind::Connection))
                    }
                },
                &token,
            )
            .await;

        assert!(result.unwrap_err().is_cancelled());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn already_cancelled_token_skips_work() {
        let policy = policy(3).build().unwrap();
        let token = CancelToken::new();
        token.cancel();
        let counter = Arc::new(AtomicUsize::new(0));

        let result: Result<(), ResilienceError<TestError>> = policy
            .execute_cancellable(
                || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { Ok(()) }
                },
                &token,
            )
            .await;

        assert!(result.unwrap_err().is_cancelled());
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn wrapped_operation_retries_on_each_call() {
        let policy = policy(2).build().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let op = {
            let counter = counter.clone();
            move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(fail(Kind::Connection))
                }
            }
        };

        let mut wrapped = policy.wrap(op);
        assert!(wrapped().await.is_err());
        assert!(wrapped().await.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }
}
