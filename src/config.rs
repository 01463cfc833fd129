//! Plain configuration structs for loading policies from files or environment.
//!
//! Durations are seconds as `f64` so configs read naturally (`0.1`, `30`). With the `serde`
//! feature (on by default) every struct derives `Serialize`/`Deserialize`; missing fields fall
//! back to the same defaults as the builders. Conversion validates and returns [`ConfigError`].
//!
//! ```rust
//! use holdfast::config::{BreakerConfig, ResilienceConfig, RetryConfig, TimeoutConfig};
//! use holdfast::TimeoutKind;
//!
//! let config = ResilienceConfig {
//!     timeout: Some(TimeoutConfig {
//!         duration_secs: 2.5,
//!         kind: TimeoutKind::Network,
//!         operation: "fetch_profile".into(),
//!     }),
//!     retry: Some(RetryConfig::default()),
//!     breaker: Some(BreakerConfig::named("profiles")),
//! };
//! let stack = config.build_stack::<std::io::ErrorKind>().unwrap();
//! assert_eq!(stack.circuit_breaker().unwrap().name(), "profiles");
//! ```

use crate::backoff::BackoffError;
use crate::circuit_breaker::{CircuitBreakerBuilder, CircuitBreakerError};
use crate::error::KindTag;
use crate::retry::BuildError;
use crate::timeout::TimeoutError;
use crate::{
    with_retry, BreakerRegistry, CircuitBreaker, ResilienceStack, RetryPolicyBuilder, TimeoutKind,
    TimeoutPolicy,
};
use std::time::Duration;

/// Errors produced while turning configuration into policies.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("{field} must be a finite, non-negative number of seconds (got {value})")]
    InvalidSeconds { field: &'static str, value: f64 },
    #[error("{field} must be greater than zero")]
    NotPositive { field: &'static str },
    #[error("invalid timeout: {0}")]
    Timeout(#[from] TimeoutError),
    #[error("invalid retry policy: {0}")]
    Retry(#[from] BuildError),
    #[error("invalid backoff: {0}")]
    Backoff(#[from] BackoffError),
    #[error("invalid circuit breaker: {0}")]
    Breaker(#[from] CircuitBreakerError),
}

fn seconds(field: &'static str, value: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(value).map_err(|_| ConfigError::InvalidSeconds { field, value })
}

fn positive_seconds(field: &'static str, value: f64) -> Result<Duration, ConfigError> {
    let duration = seconds(field, value)?;
    if duration.is_zero() {
        return Err(ConfigError::NotPositive { field });
    }
    Ok(duration)
}

#[cfg(feature = "serde")]
fn default_operation() -> String {
    "operation".to_string()
}

fn default_max_attempts() -> usize {
    3
}

fn default_initial_delay_secs() -> f64 {
    1.0
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_delay_secs() -> f64 {
    60.0
}

fn default_failure_threshold() -> usize {
    5
}

fn default_recovery_timeout_secs() -> f64 {
    60.0
}

fn default_half_open_max_calls() -> usize {
    1
}

/// Deadline for one unit of work.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(deny_unknown_fields))]
pub struct TimeoutConfig {
    pub duration_secs: f64,
    #[cfg_attr(feature = "serde", serde(default))]
    pub kind: TimeoutKind,
    #[cfg_attr(feature = "serde", serde(default = "default_operation"))]
    pub operation: String,
}

impl TimeoutConfig {
    pub fn to_policy(&self) -> Result<TimeoutPolicy, ConfigError> {
        let duration = seconds("timeout.duration_secs", self.duration_secs)?;
        Ok(TimeoutPolicy::new(duration)?
            .with_kind(self.kind)
            .with_operation(self.operation.as_str()))
    }
}

/// Retry knobs; kind filters are code, not config, so they are added on the returned builder.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(deny_unknown_fields))]
pub struct RetryConfig {
    #[cfg_attr(feature = "serde", serde(default = "default_max_attempts"))]
    pub max_attempts: usize,
    #[cfg_attr(feature = "serde", serde(default = "default_initial_delay_secs"))]
    pub initial_delay_secs: f64,
    #[cfg_attr(feature = "serde", serde(default = "default_backoff_multiplier"))]
    pub backoff_multiplier: f64,
    #[cfg_attr(feature = "serde", serde(default = "default_max_delay_secs"))]
    pub max_delay_secs: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_secs: default_initial_delay_secs(),
            backoff_multiplier: default_backoff_multiplier(),
            max_delay_secs: default_max_delay_secs(),
        }
    }
}

impl RetryConfig {
    /// Validated builder; call `retryable`/`permanent` on it, then `build`.
    pub fn to_builder<K: KindTag>(&self) -> Result<RetryPolicyBuilder<K>, ConfigError> {
        if self.max_attempts == 0 {
            return Err(BuildError::InvalidMaxAttempts(0).into());
        }
        let initial = positive_seconds("retry.initial_delay_secs", self.initial_delay_secs)?;
        let max = positive_seconds("retry.max_delay_secs", self.max_delay_secs)?;
        crate::Backoff::exponential(initial)
            .with_multiplier(self.backoff_multiplier)?
            .with_max(max)?;
        Ok(with_retry(self.max_attempts, initial, self.backoff_multiplier, max))
    }
}

/// One named circuit breaker.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(deny_unknown_fields))]
pub struct BreakerConfig {
    pub name: String,
    #[cfg_attr(feature = "serde", serde(default = "default_failure_threshold"))]
    pub failure_threshold: usize,
    #[cfg_attr(feature = "serde", serde(default = "default_recovery_timeout_secs"))]
    pub recovery_timeout_secs: f64,
    #[cfg_attr(feature = "serde", serde(default = "default_half_open_max_calls"))]
    pub half_open_max_calls: usize,
}

impl BreakerConfig {
    /// Defaults with the given name: 5 failures, 60s recovery, one probe.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            failure_threshold: default_failure_threshold(),
            recovery_timeout_secs: default_recovery_timeout_secs(),
            half_open_max_calls: default_half_open_max_calls(),
        }
    }

    /// Builder with the configured values, for attaching a clock or sink before building.
    pub fn to_builder(&self) -> Result<CircuitBreakerBuilder, ConfigError> {
        let recovery = seconds("breaker.recovery_timeout_secs", self.recovery_timeout_secs)?;
        Ok(CircuitBreaker::builder(self.name.as_str())
            .failure_threshold(self.failure_threshold)
            .recovery_timeout(recovery)
            .half_open_max_calls(self.half_open_max_calls))
    }

    pub fn build(&self) -> Result<CircuitBreaker, ConfigError> {
        Ok(self.to_builder()?.build()?)
    }
}

/// Full stack configuration; absent sections are skipped.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(deny_unknown_fields, default))]
pub struct ResilienceConfig {
    pub timeout: Option<TimeoutConfig>,
    pub retry: Option<RetryConfig>,
    pub breaker: Option<BreakerConfig>,
}

impl ResilienceConfig {
    /// Build a stack with a fresh breaker.
    pub fn build_stack<K: KindTag>(&self) -> Result<ResilienceStack<K>, ConfigError> {
        let breaker = self.breaker.as_ref().map(BreakerConfig::build).transpose()?;
        self.assemble(breaker)
    }

    /// Build a stack whose breaker comes from `registry`, so stacks configured with the same
    /// breaker name share one circuit.
    pub fn build_stack_in<K: KindTag>(
        &self,
        registry: &BreakerRegistry,
    ) -> Result<ResilienceStack<K>, ConfigError> {
        let breaker = match &self.breaker {
            Some(config) => match registry.get(&config.name) {
                Some(existing) => Some(existing),
                None => {
                    let built = config.build()?;
                    Some(registry.get_or_insert_with(&config.name, || built))
                }
            },
            None => None,
        };
        self.assemble(breaker)
    }

    fn assemble<K: KindTag>(
        &self,
        breaker: Option<CircuitBreaker>,
    ) -> Result<ResilienceStack<K>, ConfigError> {
        let mut builder = ResilienceStack::builder();
        if let Some(timeout) = &self.timeout {
            builder = builder.timeout(timeout.to_policy()?);
        }
        if let Some(retry) = &self.retry {
            builder = builder.retry(retry.to_builder::<K>()?.build()?);
        }
        if let Some(breaker) = breaker {
            builder = builder.circuit_breaker(breaker);
        }
        Ok(builder.build())
    }
}
