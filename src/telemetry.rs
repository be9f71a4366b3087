//! Telemetry for outbound policies.
//!
//! The pipeline emits a [`PolicyEvent`] for every retry, timeout, rate-limit refusal,
//! deduplicated join, and finished request. Events flow through a [`TelemetrySink`], which
//! is any cloneable `tower::Service<PolicyEvent>`, so sinks compose with ordinary tower
//! combinators.
//!
//! ```rust
//! use portcullis::telemetry::{PolicyEvent, RequestOutcome, RetryEvent};
//! use std::time::Duration;
//!
//! let retry = PolicyEvent::Retry(RetryEvent::Attempt { attempt: 1, delay: Duration::from_millis(1200) });
//! let done = PolicyEvent::Request(RequestOutcome::Success { duration: Duration::from_millis(80) });
//! assert_eq!(retry.to_string(), "Retry::Attempt(#1, delay=1.2s)");
//! assert!(done.to_string().starts_with("Request::Success"));
//! ```

pub mod events;
pub mod sinks;

pub use events::{DedupEvent, PolicyEvent, RateLimitEvent, RequestOutcome, RetryEvent, TimeoutEvent};
pub use sinks::{emit_best_effort, LogSink, MemorySink, NullSink, TelemetrySink};
