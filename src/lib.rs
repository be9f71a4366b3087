#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # Portcullis
//!
//! Client admission control for async services: who gets in, how often, and what happens to
//! the calls that leave.
//!
//! ## Features
//!
//! - **Fixed-window rate limiting** per client key, with a tower layer that sets the
//!   `X-RateLimit-*` headers and answers 429 with `Retry-After`
//! - **TTL cache** with lazy expiry, pattern invalidation, and a read-through helper
//! - **Outbound pipelines** composing timeout, retry with jittered exponential backoff,
//!   single-flight deduplication, and outbound quotas
//! - **Performance monitor** tracking average latency, error rate, and slow requests
//! - **Realtime queue client** that keeps a live projection of a server-pushed queue over a
//!   reconnecting, heartbeating duplex connection
//!
//! ## Quick Start
//!
//! ```rust
//! use portcullis::presets;
//!
//! #[tokio::main]
//! async fn main() {
//!     let limiter = presets::redeem();
//!     assert!(limiter.check("203.0.113.7").allowed);
//!
//!     let pipeline = presets::default_pipeline::<u32, std::io::Error>().build();
//!     let value = pipeline
//!         .execute(|| async { Ok::<_, std::io::Error>(7) })
//!         .await
//!         .unwrap();
//!     assert_eq!(value, 7);
//! }
//! ```

pub mod adaptive;
pub mod admission;
pub mod backoff;
pub mod cache;
pub mod clock;
pub mod config;
pub mod dedup;
pub mod error;
pub mod jitter;
pub mod metrics;
pub mod pipeline;
pub mod presets;
pub mod rate_limit;
pub mod realtime;
pub mod retry;
pub mod sleeper;
pub mod sweep;
pub mod telemetry;
pub mod timeout;

// Re-exports
pub use adaptive::DynamicConfig;
pub use admission::AdmissionControl;
pub use backoff::Backoff;
pub use cache::{CacheStats, TtlCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::PortcullisConfig;
pub use dedup::Deduplicator;
pub use error::{BuildError, ConfigError, ResilienceError};
pub use jitter::Jitter;
pub use metrics::{PerformanceMonitor, PerformanceSnapshot};
pub use pipeline::{ResiliencePipeline, ResiliencePipelineBuilder};
pub use rate_limit::{
    apply_quota_headers, ForwardedFor, HeaderKey, KeyExtractor, QuotaRejection, RateLimitConfig,
    RateLimitLayer, RateLimitService, RateLimitStatus, RateLimiter,
};
pub use realtime::{QueueProjection, QueueUpdateEvent, RealtimeConfig, RealtimeQueueClient};
pub use retry::{RetryPolicy, RetryPolicyBuilder};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use sweep::{spawn_sweeper, Sweep, SweeperHandle};
pub use timeout::TimeoutPolicy;
