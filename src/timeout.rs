//! Bounded execution.
//!
//! [`TimeoutPolicy`] races a unit of work against a deadline. If the work finishes first its
//! result (or failure, untouched) is returned; otherwise the work future is dropped and the call
//! fails with [`ResilienceError::Timeout`] carrying the configured bound, the timeout kind and
//! the operation label.
//!
//! ```rust
//! use holdfast::{with_timeout, ResilienceError, TimeoutKind};
//! use std::time::Duration;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let timeout = with_timeout(Duration::from_secs(2), TimeoutKind::Network, "fetch_profile")
//!     .unwrap();
//! let result = timeout
//!     .execute(|| async { Ok::<_, ResilienceError<std::io::Error>>("profile") })
//!     .await;
//! assert_eq!(result.unwrap(), "profile");
//! # });
//! ```

use crate::telemetry::{NullSink, PolicyEvent, TelemetrySink, TimeoutEvent};
use crate::{CancelToken, ResilienceError, TimeoutKind};
use futures::future::BoxFuture;
use pin_project::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::Instant;
use tower_layer::Layer;
use tower_service::Service;

/// Largest accepted timeout (one year); anything longer is treated as a configuration mistake.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Errors produced when constructing a timeout policy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimeoutError {
    #[error("timeout duration must be greater than zero")]
    Zero,
    #[error("timeout duration {0:?} exceeds the one-year maximum")]
    TooLarge(Duration),
}

/// Deadline for a single unit of work. Immutable; clone freely.
#[derive(Debug, Clone)]
pub struct TimeoutPolicy {
    duration: Duration,
    kind: TimeoutKind,
    operation: Arc<str>,
    sink: Arc<dyn TelemetrySink>,
}

/// Build a timeout policy with an explicit kind and operation label.
pub fn with_timeout(
    duration: Duration,
    kind: TimeoutKind,
    operation: impl Into<Arc<str>>,
) -> Result<TimeoutPolicy, TimeoutError> {
    Ok(TimeoutPolicy::new(duration)?.with_kind(kind).with_operation(operation))
}

impl TimeoutPolicy {
    /// Create a processing-class timeout labelled `"operation"`.
    pub fn new(duration: Duration) -> Result<Self, TimeoutError> {
        if duration.is_zero() {
            return Err(TimeoutError::Zero);
        }
        if duration > MAX_TIMEOUT {
            return Err(TimeoutError::TooLarge(duration));
        }
        Ok(Self::unchecked(duration))
    }

    /// Skip validation; only for durations known to be in range.
    pub(crate) fn unchecked(duration: Duration) -> Self {
        Self {
            duration,
            kind: TimeoutKind::Processing,
            operation: Arc::from("operation"),
            sink: Arc::new(NullSink),
        }
    }

    pub fn with_kind(mut self, kind: TimeoutKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_operation(mut self, operation: impl Into<Arc<str>>) -> Self {
        self.operation = operation.into();
        self
    }

    /// Send `TimeoutEvent`s to `sink`.
    pub fn with_sink<S: TelemetrySink + 'static>(mut self, sink: S) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn timeout_kind(&self) -> TimeoutKind {
        self.kind
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Run `operation` under the deadline.
    pub async fn execute<T, E, Fut, Op>(&self, operation: Op) -> Result<T, ResilienceError<E>>
    where
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
        Op: FnOnce() -> Fut,
    {
        let start = Instant::now();
        tracing::debug!(operation = %self.operation, timeout = ?self.duration, "bounded operation started");

        match tokio::time::timeout(self.duration, operation()).await {
            Ok(result) => {
                tracing::debug!(
                    operation = %self.operation,
                    elapsed = ?start.elapsed(),
                    ok = result.is_ok(),
                    "bounded operation completed"
                );
                result
            }
            Err(_) => Err(self.expired(start.elapsed())),
        }
    }

    /// Like [`execute`](Self::execute), but aborts with `Cancelled` as soon as `cancel` fires.
    pub async fn execute_cancellable<T, E, Fut, Op>(
        &self,
        operation: Op,
        cancel: &CancelToken,
    ) -> Result<T, ResilienceError<E>>
    where
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
        Op: FnOnce() -> Fut,
    {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(operation = %self.operation, "bounded operation cancelled");
                Err(ResilienceError::Cancelled)
            }
            result = self.execute(operation) => result,
        }
    }

    /// Turn `operation` into a new unit of work that runs under this deadline on every call.
    pub fn wrap<T, E, Fut, Op>(
        &self,
        mut operation: Op,
    ) -> impl FnMut() -> BoxFuture<'static, Result<T, ResilienceError<E>>>
    where
        T: Send + 'static,
        E: Send + 'static,
        Fut: Future<Output = Result<T, ResilienceError<E>>> + Send + 'static,
        Op: FnMut() -> Fut,
    {
        let policy = self.clone();
        move || {
            let work = operation();
            let policy = policy.clone();
            Box::pin(async move { policy.execute(move || work).await })
        }
    }

    fn expired<E>(&self, elapsed: Duration) -> ResilienceError<E> {
        tracing::warn!(
            operation = %self.operation,
            kind = %self.kind,
            timeout = ?self.duration,
            elapsed = ?elapsed,
            "operation timed out"
        );
        self.sink.emit(&PolicyEvent::Timeout(TimeoutEvent::Occurred {
            operation: self.operation.clone(),
            kind: self.kind,
            timeout: self.duration,
        }));
        ResilienceError::Timeout {
            kind: self.kind,
            operation: self.operation.clone(),
            timeout: self.duration,
            elapsed,
        }
    }
}

/// Tower layer applying a [`TimeoutPolicy`] to every request.
#[derive(Debug, Clone)]
pub struct TimeoutLayer {
    policy: TimeoutPolicy,
}

impl TimeoutLayer {
    pub fn new(policy: TimeoutPolicy) -> Self {
        Self { policy }
    }
}

impl<S> Layer<S> for TimeoutLayer {
    type Service = TimeoutService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TimeoutService { inner, policy: self.policy.clone() }
    }
}

/// Service produced by [`TimeoutLayer`].
#[derive(Debug, Clone)]
pub struct TimeoutService<S> {
    inner: S,
    policy: TimeoutPolicy,
}

impl<S, Request, E> Service<Request> for TimeoutService<S>
where
    S: Service<Request, Error = ResilienceError<E>>,
{
    type Response = S::Response;
    type Error = ResilienceError<E>;
    type Future = TimeoutFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        TimeoutFuture {
            inner: tokio::time::timeout(self.policy.duration, self.inner.call(req)),
            policy: self.policy.clone(),
            start: Instant::now(),
        }
    }
}

/// Response future of [`TimeoutService`].
#[pin_project]
#[derive(Debug)]
pub struct TimeoutFuture<F> {
    #[pin]
    inner: tokio::time::Timeout<F>,
    policy: TimeoutPolicy,
    start: Instant,
}

impl<F, T, E> Future for TimeoutFuture<F>
where
    F: Future<Output = Result<T, ResilienceError<E>>>,
{
    type Output = Result<T, ResilienceError<E>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        match this.inner.poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(this.policy.expired(this.start.elapsed()))),
            Poll::Pending => Poll::Pending,
        }
    }
}
