//! Where retry policies wait out their backoff.
//!
//! [`RetryPolicy`](crate::RetryPolicy) never calls `tokio::time::sleep` directly; it asks its
//! [`Sleeper`]. Production code keeps the default [`TokioSleeper`]. Tests swap in
//! [`InstantSleeper`] to skip delays or [`TrackingSleeper`] to assert on the delay sequence.

use futures::future::{self, BoxFuture, FutureExt};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Waits for a backoff delay. Implementations must be cheap to call from the retry loop.
pub trait Sleeper: Send + Sync + std::fmt::Debug {
    fn sleep(&self, delay: Duration) -> BoxFuture<'static, ()>;
}

/// Sleeps on the tokio timer, so paused test runtimes advance it virtually.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    fn sleep(&self, delay: Duration) -> BoxFuture<'static, ()> {
        tokio::time::sleep(delay).boxed()
    }
}

/// Returns immediately regardless of the delay.
#[derive(Debug, Default, Clone, Copy)]
pub struct InstantSleeper;

impl Sleeper for InstantSleeper {
    fn sleep(&self, _delay: Duration) -> BoxFuture<'static, ()> {
        future::ready(()).boxed()
    }
}

/// Records each requested delay and returns immediately. Clones share the record.
#[derive(Debug, Clone, Default)]
pub struct TrackingSleeper {
    delays: Arc<Mutex<Vec<Duration>>>,
}

impl TrackingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays requested so far, in order.
    pub fn calls(&self) -> Vec<Duration> {
        self.record().clone()
    }

    /// Sum of all requested delays.
    pub fn total(&self) -> Duration {
        self.record().iter().sum()
    }

    pub fn clear(&self) {
        self.record().clear();
    }

    fn record(&self) -> MutexGuard<'_, Vec<Duration>> {
        self.delays.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Sleeper for TrackingSleeper {
    fn sleep(&self, delay: Duration) -> BoxFuture<'static, ()> {
        self.record().push(delay);
        future::ready(()).boxed()
    }
}
