//! Telemetry and observability for holdfast policies.
//!
//! Every policy logs through `tracing`. In addition, policies can be handed a
//! [`TelemetrySink`] that receives structured [`PolicyEvent`]s, which is how tests and
//! dashboards observe backoff delays and breaker transitions without scraping logs.
//!
//! # Event Types
//!
//! - **Retry**: `Attempt`, `GaveUp`, `Exhausted`
//! - **Circuit Breaker**: `Opened`, `HalfOpen`, `Closed`, `Rejected`
//! - **Timeout**: `Occurred`
//!
//! Sinks are called synchronously from policy hooks, so implementations must not block.

pub mod events;
pub mod sinks;

pub use events::{CircuitBreakerEvent, GiveUpReason, PolicyEvent, RetryEvent, TimeoutEvent};
pub use sinks::{LogSink, MemorySink, MulticastSink, NullSink, StreamingSink, TelemetrySink};
