//! Resilience stack builder for composing policies
//!
//! Stack order, outermost first: CircuitBreaker → Retry → Timeout → Operation. The breaker sees
//! one outcome per stack call (after retries), and every retry attempt gets the full timeout.
//! Absent layers are skipped.

use crate::error::KindTag;
use crate::{CancelToken, CircuitBreaker, Classify, ResilienceError, RetryPolicy, TimeoutPolicy};
use std::fmt;
use std::future::Future;

#[derive(Debug, Clone)]
pub struct ResilienceStack<K> {
    timeout: Option<TimeoutPolicy>,
    retry: Option<RetryPolicy<K>>,
    circuit_breaker: Option<CircuitBreaker>,
}

impl<K: KindTag> ResilienceStack<K> {
    pub fn builder() -> ResilienceStackBuilder<K> {
        ResilienceStackBuilder::new()
    }

    pub fn timeout(&self) -> Option<&TimeoutPolicy> {
        self.timeout.as_ref()
    }

    pub fn retry(&self) -> Option<&RetryPolicy<K>> {
        self.retry.as_ref()
    }

    pub fn circuit_breaker(&self) -> Option<&CircuitBreaker> {
        self.circuit_breaker.as_ref()
    }

    pub async fn execute<T, E, Fut, Op>(&self, mut operation: Op) -> Result<T, ResilienceError<E>>
    where
        E: Classify<Kind = K> + fmt::Display,
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
        Op: FnMut() -> Fut,
    {
        let timeout = self.timeout.as_ref();
        let mut attempt = move || {
            let work = operation();
            async move {
                match timeout {
                    Some(policy) => policy.execute(move || work).await,
                    None => work.await,
                }
            }
        };

        let retried = async {
            match &self.retry {
                Some(policy) => policy.execute(&mut attempt).await,
                None => attempt().await,
            }
        };

        match &self.circuit_breaker {
            Some(breaker) => breaker.guard(move || retried).await,
            None => retried.await,
        }
    }

    /// Like [`execute`](Self::execute), but abandons the whole chain with `Cancelled` as soon as
    /// `cancel` fires. An in-flight attempt or backoff sleep is dropped and the breaker permit is
    /// released without recording an outcome.
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
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!("resilience stack cancelled");
                Err(ResilienceError::Cancelled)
            }
            result = self.execute(operation) => result,
        }
    }
}

pub struct ResilienceStackBuilder<K> {
    timeout: Option<TimeoutPolicy>,
    retry: Option<RetryPolicy<K>>,
    circuit_breaker: Option<CircuitBreaker>,
}

impl<K: KindTag> ResilienceStackBuilder<K> {
    pub fn new() -> Self {
        Self { timeout: None, retry: None, circuit_breaker: None }
    }

    pub fn timeout(mut self, policy: TimeoutPolicy) -> Self {
        self.timeout = Some(policy);
        self
    }

    pub fn retry(mut self, policy: RetryPolicy<K>) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Guard the stack with `breaker`. Pass a clone of the breaker shared by every call site that
    /// protects the same dependency.
    pub fn circuit_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.circuit_breaker = Some(breaker);
        self
    }

    pub fn build(self) -> ResilienceStack<K> {
        ResilienceStack {
            timeout: self.timeout,
            retry: self.retry,
            circuit_breaker: self.circuit_breaker,
        }
    }
}

impl<K: KindTag> Default for ResilienceStackBuilder<K> {
    fn default() -> Self {
        Self::new()
    }
}
