//! Circuit breaker guarding one logical dependency.
//!
//! State machine:
//! - **Closed**: calls run. Every recorded failure increments `failure_count`; reaching
//!   `failure_threshold` opens the circuit. Successes do not reset the count.
//! - **Open**: calls are rejected with [`CircuitOpenError`] without running. The first call after
//!   `recovery_timeout` has elapsed since the last failure moves the breaker to half-open and is
//!   admitted as a probe.
//! - **HalfOpen**: up to `half_open_max_calls` probes run. The first probe to complete decides:
//!   success closes the circuit and zeroes the count, failure reopens it.
//!
//! Every transition bumps an epoch. Permits remember the epoch they were admitted in; failures
//! reported by a permit from an earlier window are ignored and never drive a transition.
//!
//! All state lives behind one mutex per breaker; clones share it.

use crate::clock::{Clock, MonotonicClock};
use crate::telemetry::{CircuitBreakerEvent, NullSink, PolicyEvent, TelemetrySink};
use crate::{CircuitOpenError, ResilienceError};
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::{Duration, SystemTime};
use tower_layer::Layer;
use tower_service::Service;

/// Current state of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum CircuitState {
    /// Normal operating mode.
    Closed,
    /// Short-circuits calls until recovery timeout elapses.
    Open,
    /// Probe mode allowing a limited number of calls to test recovery.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Errors produced when validating breaker configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CircuitBreakerError {
    #[error("failure_threshold must be > 0 (got {provided})")]
    InvalidFailureThreshold { provided: usize },
    #[error("recovery_timeout must be at least 1ms (got {0:?})")]
    InvalidRecoveryTimeout(Duration),
    #[error("half_open_max_calls must be > 0 (got {provided})")]
    InvalidHalfOpenLimit { provided: usize },
}

/// Validated configuration for the circuit breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    failure_threshold: usize,
    recovery_timeout: Duration,
    half_open_max_calls: usize,
}

impl CircuitBreakerConfig {
    /// Create a config with validation.
    pub fn new(
        failure_threshold: usize,
        recovery_timeout: Duration,
        half_open_max_calls: usize,
    ) -> Result<Self, CircuitBreakerError> {
        if failure_threshold == 0 {
            return Err(CircuitBreakerError::InvalidFailureThreshold { provided: 0 });
        }
        // Cooldowns are tracked in whole milliseconds.
        if recovery_timeout < Duration::from_millis(1) {
            return Err(CircuitBreakerError::InvalidRecoveryTimeout(recovery_timeout));
        }
        if half_open_max_calls == 0 {
            return Err(CircuitBreakerError::InvalidHalfOpenLimit { provided: 0 });
        }
        Ok(Self { failure_threshold, recovery_timeout, half_open_max_calls })
    }

    /// Failures that open the circuit from Closed.
    pub fn failure_threshold(&self) -> usize {
        self.failure_threshold
    }

    /// Cooldown measured from the last failure before a probe is admitted.
    pub fn recovery_timeout(&self) -> Duration {
        self.recovery_timeout
    }

    /// Maximum concurrent probes while Half-Open.
    pub fn half_open_max_calls(&self) -> usize {
        self.half_open_max_calls
    }
}

/// Point-in-time view of a breaker, for health endpoints and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub name: Arc<str>,
    pub state: CircuitState,
    /// Failures since the circuit last closed.
    pub failure_count: usize,
    /// Lifetime successes.
    pub success_count: u64,
    pub last_failure_at: Option<SystemTime>,
    /// Half-open trial calls currently running.
    pub half_open_in_flight: usize,
}

#[derive(Debug)]
struct Core {
    state: CircuitState,
    failure_count: usize,
    last_failure_millis: Option<u64>,
    last_failure_at: Option<SystemTime>,
    half_open_in_flight: usize,
    epoch: u64,
}

#[derive(Debug)]
struct Shared {
    name: Arc<str>,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn TelemetrySink>,
    core: Mutex<Core>,
    success_count: AtomicU64,
}

/// Circuit breaker guarding an async operation.
///
/// Clones share the same underlying state via `Arc`, so all handles observe and affect the same
/// circuit lifecycle. Build one per dependency at startup and hand clones to every call site.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    inner: Arc<Shared>,
}

impl CircuitBreaker {
    /// Create a breaker with a single half-open probe.
    ///
    /// # Examples
    /// ```
    /// use holdfast::CircuitBreaker;
    /// use std::time::Duration;
    /// let breaker = CircuitBreaker::new("postgres", 5, Duration::from_secs(60)).unwrap();
    /// assert_eq!(breaker.name(), "postgres");
    /// ```
    pub fn new(
        name: impl Into<Arc<str>>,
        failure_threshold: usize,
        recovery_timeout: Duration,
    ) -> Result<Self, CircuitBreakerError> {
        Self::builder(name)
            .failure_threshold(failure_threshold)
            .recovery_timeout(recovery_timeout)
            .build()
    }

    /// Start a builder for a breaker named `name`.
    pub fn builder(name: impl Into<Arc<str>>) -> CircuitBreakerBuilder {
        CircuitBreakerBuilder::new(name)
    }

    /// Dependency name used in logs, events and rejections.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Stored state. An open breaker whose cooldown has elapsed still reports `Open` until the
    /// next call moves it to half-open.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Failures recorded since the circuit last closed.
    pub fn failure_count(&self) -> usize {
        self.lock().failure_count
    }

    /// Successful guarded calls over the breaker's lifetime.
    pub fn success_count(&self) -> u64 {
        self.inner.success_count.load(Ordering::Relaxed)
    }

    /// Wall-clock time of the most recent recorded failure.
    pub fn last_failure_at(&self) -> Option<SystemTime> {
        self.lock().last_failure_at
    }

    /// The validated settings this breaker was built with.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.inner.config
    }

    /// Copy of the current state and counters, taken under one lock.
    ///
    /// ```
    /// use holdfast::{CircuitBreaker, CircuitState};
    /// use std::time::Duration;
    /// let breaker = CircuitBreaker::new("search", 1, Duration::from_secs(30)).unwrap();
    /// breaker.try_acquire().unwrap().failure();
    /// let snapshot = breaker.snapshot();
    /// assert_eq!(snapshot.state, CircuitState::Open);
    /// assert_eq!(snapshot.failure_count, breaker.failure_count());
    /// assert!(snapshot.last_failure_at.is_some());
    /// ```
    pub fn snapshot(&self) -> BreakerSnapshot {
        let core = self.lock();
        BreakerSnapshot {
            name: self.inner.name.clone(),
            state: core.state,
            failure_count: core.failure_count,
            success_count: self.success_count(),
            last_failure_at: core.last_failure_at,
            half_open_in_flight: core.half_open_in_flight,
        }
    }

    /// Force the breaker back to Closed with a zero failure count.
    pub fn reset(&self) {
        let previous = {
            let mut core = self.lock();
            let previous = core.state;
            core.state = CircuitState::Closed;
            core.failure_count = 0;
            core.last_failure_millis = None;
            core.last_failure_at = None;
            core.half_open_in_flight = 0;
            core.epoch += 1;
            previous
        };
        tracing::info!(breaker = %self.inner.name, from = %previous, "circuit breaker reset");
        if previous != CircuitState::Closed {
            self.emit(CircuitBreakerEvent::Closed { name: self.inner.name.clone() });
        }
    }

    /// Ask for permission to run one call.
    ///
    /// The returned permit must be settled with [`CallPermit::success`], [`CallPermit::failure`]
    /// or [`CallPermit::record`]. Dropping it unsettled frees its probe slot without recording.
    pub fn try_acquire(&self) -> Result<CallPermit, CircuitOpenError> {
        let now = self.inner.clock.now_millis();
        let mut core = self.lock();
        let state = core.state;
        match state {
            CircuitState::Closed => {
                let epoch = core.epoch;
                drop(core);
                Ok(CallPermit::new(self.clone(), epoch, false))
            }
            CircuitState::Open => {
                let recovery = millis(self.inner.config.recovery_timeout);
                let elapsed =
                    core.last_failure_millis.map_or(u64::MAX, |at| now.saturating_sub(at));
                if elapsed >= recovery {
                    core.state = CircuitState::HalfOpen;
                    core.epoch += 1;
                    core.half_open_in_flight = 1;
                    let epoch = core.epoch;
                    drop(core);
                    tracing::info!(breaker = %self.inner.name, "circuit breaker half-open, admitting probe");
                    self.emit(CircuitBreakerEvent::HalfOpen { name: self.inner.name.clone() });
                    Ok(CallPermit::new(self.clone(), epoch, true))
                } else {
                    let rejection =
                        self.rejection(&core, Duration::from_millis(recovery - elapsed));
                    drop(core);
                    Err(self.rejected(rejection))
                }
            }
            CircuitState::HalfOpen => {
                if core.half_open_in_flight < self.inner.config.half_open_max_calls {
                    core.half_open_in_flight += 1;
                    let epoch = core.epoch;
                    tracing::debug!(
                        breaker = %self.inner.name,
                        in_flight = core.half_open_in_flight,
                        max = self.inner.config.half_open_max_calls,
                        "half-open probe admitted"
                    );
                    drop(core);
                    Ok(CallPermit::new(self.clone(), epoch, true))
                } else {
                    let rejection = self.rejection(&core, Duration::ZERO);
                    drop(core);
                    Err(self.rejected(rejection))
                }
            }
        }
    }

    /// Run `operation` under the breaker.
    ///
    /// Rejections never invoke the operation. The operation's own failure is recorded and then
    /// returned unchanged; `Cancelled` releases the permit without counting as a failure.
    pub async fn guard<T, E, Fut, Op>(&self, operation: Op) -> Result<T, ResilienceError<E>>
    where
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
        Op: FnOnce() -> Fut,
    {
        let permit = self.try_acquire()?;
        let result = operation().await;
        permit.record(&result);
        result
    }

    /// Turn `operation` into a unit of work that is guarded on every call.
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
        let breaker = self.clone();
        move || {
            let breaker = breaker.clone();
            match breaker.try_acquire() {
                Ok(permit) => {
                    let work = operation();
                    Box::pin(async move {
                        let result = work.await;
                        permit.record(&result);
                        result
                    })
                }
                Err(rejection) => Box::pin(futures::future::ready(Err(rejection.into()))),
            }
        }
    }

    fn on_success(&self, epoch: u64, probe: bool) {
        self.inner.success_count.fetch_add(1, Ordering::Relaxed);
        let closed = {
            let mut core = self.lock();
            let decides = probe && core.epoch == epoch && core.state == CircuitState::HalfOpen;
            if decides {
                core.state = CircuitState::Closed;
                core.failure_count = 0;
                core.half_open_in_flight = 0;
                core.epoch += 1;
            }
            decides
        };
        if closed {
            tracing::info!(breaker = %self.inner.name, "probe succeeded, circuit breaker closed");
            self.emit(CircuitBreakerEvent::Closed { name: self.inner.name.clone() });
        }
    }

    fn on_failure(&self, epoch: u64, probe: bool) {
        let now = self.inner.clock.now_millis();
        let outcome = {
            let mut core = self.lock();
            // While open every failure counts and pushes the cooldown out. Otherwise only
            // outcomes from the current window are recorded.
            if core.state != CircuitState::Open && core.epoch != epoch {
                None
            } else {
                core.failure_count = core.failure_count.saturating_add(1);
                core.last_failure_millis = Some(now);
                core.last_failure_at = Some(SystemTime::now());
                let opens = match core.state {
                    CircuitState::HalfOpen => probe,
                    CircuitState::Closed => {
                        core.failure_count >= self.inner.config.failure_threshold
                    }
                    CircuitState::Open => false,
                };
                if opens {
                    core.state = CircuitState::Open;
                    core.half_open_in_flight = 0;
                    core.epoch += 1;
                }
                Some((opens, core.failure_count))
            }
        };

        match outcome {
            Some((true, failures)) => {
                tracing::error!(
                    breaker = %self.inner.name,
                    failures,
                    threshold = self.inner.config.failure_threshold,
                    recovery_timeout = ?self.inner.config.recovery_timeout,
                    "circuit breaker opened"
                );
                self.emit(CircuitBreakerEvent::Opened {
                    name: self.inner.name.clone(),
                    failure_count: failures,
                });
            }
            Some((false, failures)) => {
                tracing::debug!(breaker = %self.inner.name, failures, "failure recorded");
            }
            None => {
                tracing::debug!(breaker = %self.inner.name, "ignoring failure from an earlier window");
            }
        }
    }

    fn release(&self, epoch: u64, probe: bool) {
        if !probe {
            return;
        }
        let mut core = self.lock();
        if core.epoch == epoch && core.state == CircuitState::HalfOpen {
            core.half_open_in_flight = core.half_open_in_flight.saturating_sub(1);
        }
    }

    fn rejection(&self, core: &Core, retry_after: Duration) -> CircuitOpenError {
        CircuitOpenError {
            name: self.inner.name.clone(),
            failure_count: core.failure_count,
            last_failure_at: core.last_failure_at,
            retry_after,
        }
    }

    fn rejected(&self, rejection: CircuitOpenError) -> CircuitOpenError {
        tracing::debug!(
            breaker = %self.inner.name,
            failures = rejection.failure_count,
            retry_after = ?rejection.retry_after,
            "call rejected by open circuit"
        );
        self.emit(CircuitBreakerEvent::Rejected {
            name: self.inner.name.clone(),
            failure_count: rejection.failure_count,
        });
        rejection
    }

    fn emit(&self, event: CircuitBreakerEvent) {
        self.inner.sink.emit(&PolicyEvent::CircuitBreaker(event));
    }

    fn lock(&self) -> MutexGuard<'_, Core> {
        self.inner.core.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Builder for [`CircuitBreaker`]. Defaults: 5 failures, 60 s recovery, one probe.
#[derive(Debug)]
pub struct CircuitBreakerBuilder {
    name: Arc<str>,
    failure_threshold: usize,
    recovery_timeout: Duration,
    half_open_max_calls: usize,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn TelemetrySink>,
}

impl CircuitBreakerBuilder {
    fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            half_open_max_calls: 1,
            clock: Arc::new(MonotonicClock::default()),
            sink: Arc::new(NullSink),
        }
    }

    /// Failures that open the circuit. Must be at least 1.
    pub fn failure_threshold(mut self, threshold: usize) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Cooldown after the last failure before a trial call is let through. Must be at least 1ms.
    pub fn recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }

    /// Trial calls admitted concurrently while half-open.
    pub fn half_open_max_calls(mut self, limit: usize) -> Self {
        self.half_open_max_calls = limit;
        self
    }

    /// Override the clock (useful for deterministic tests).
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Send `CircuitBreakerEvent`s to `sink`.
    pub fn with_sink<S: TelemetrySink + 'static>(mut self, sink: S) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    /// Validate the settings and create the breaker in the closed state.
    pub fn build(self) -> Result<CircuitBreaker, CircuitBreakerError> {
        let config = CircuitBreakerConfig::new(
            self.failure_threshold,
            self.recovery_timeout,
            self.half_open_max_calls,
        )?;
        Ok(CircuitBreaker {
            inner: Arc::new(Shared {
                name: self.name,
                config,
                clock: self.clock,
                sink: self.sink,
                core: Mutex::new(Core {
                    state: CircuitState::Closed,
                    failure_count: 0,
                    last_failure_millis: None,
                    last_failure_at: None,
                    half_open_in_flight: 0,
                    epoch: 0,
                }),
                success_count: AtomicU64::new(0),
            }),
        })
    }
}

/// Admission ticket for one call through a breaker.
#[must_use = "an unsettled permit records nothing"]
#[derive(Debug)]
pub struct CallPermit {
    breaker: CircuitBreaker,
    epoch: u64,
    probe: bool,
    settled: bool,
}

impl CallPermit {
    fn new(breaker: CircuitBreaker, epoch: u64, probe: bool) -> Self {
        Self { breaker, epoch, probe, settled: false }
    }

    /// Whether this call is a half-open probe.
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    /// Record a success. Success of a half-open trial call closes the circuit.
    pub fn success(mut self) {
        self.settled = true;
        self.breaker.on_success(self.epoch, self.probe);
    }

    /// Record a failure. Opens the circuit at the threshold or when a half-open trial call fails.
    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.epoch, self.probe);
    }

    /// Settle from a call result. `Cancelled` releases the permit without recording.
    pub fn record<T, E>(self, result: &Result<T, ResilienceError<E>>) {
        match result {
            Ok(_) => self.success(),
            Err(ResilienceError::Cancelled) => drop(self),
            Err(_) => self.failure(),
        }
    }
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.release(self.epoch, self.probe);
        }
    }
}

/// Tower layer guarding every request with a shared [`CircuitBreaker`].
#[derive(Debug, Clone)]
pub struct CircuitBreakerLayer {
    breaker: CircuitBreaker,
}

impl CircuitBreakerLayer {
    pub fn new(breaker: CircuitBreaker) -> Self {
        Self { breaker }
    }
}

impl<S> Layer<S> for CircuitBreakerLayer {
    type Service = CircuitBreakerService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CircuitBreakerService { inner, breaker: self.breaker.clone() }
    }
}

/// Service produced by [`CircuitBreakerLayer`].
#[derive(Debug, Clone)]
pub struct CircuitBreakerService<S> {
    inner: S,
    breaker: CircuitBreaker,
}

impl<S, Request, E> Service<Request> for CircuitBreakerService<S>
where
    S: Service<Request, Error = ResilienceError<E>>,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
    E: Send + 'static,
{
    type Response = S::Response;
    type Error = ResilienceError<E>;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        match self.breaker.try_acquire() {
            Ok(permit) => {
                let fut = self.inner.call(req);
                Box::pin(async move {
                    let result = fut.await;
                    permit.record(&result);
                    result
                })
            }
            Err(rejection) => Box::pin(futures::future::ready(Err(rejection.into()))),
        }
    }
}
