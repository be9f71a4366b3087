//! Fixed-window rate limiting.
//!
//! - [`RateLimiter`]: one named, independent counter store (`login`, `redeem`, ...).
//! - [`RateLimitLayer`]: tower middleware that rejects over-quota requests with `429`.
//! - [`KeyExtractor`]: how a request maps to a counter key.
//!
//! # Window semantics
//!
//! The first hit for a key (or the first hit at or after `window_reset_at`) opens a new
//! window: `count = 1`, `window_reset_at = now + window`. Later hits only increment `count`;
//! the reset point never moves. Counting continues past the limit, so callers must compare
//! `count` with the limit rather than trust a single boolean. Because the window is fixed,
//! up to `2 * max_requests` calls can land around a window boundary.
//!
//! ```rust
//! use portcullis::RateLimiter;
//! use std::time::Duration;
//!
//! let limiter = RateLimiter::new("login", 5, Duration::from_secs(900)).unwrap();
//! for _ in 0..5 {
//!     assert!(limiter.check("1.2.3.4").allowed);
//! }
//! let sixth = limiter.check("1.2.3.4");
//! assert!(!sixth.allowed);
//! assert_eq!(sixth.remaining, 0);
//! ```

use crate::adaptive::DynamicConfig;
use crate::clock::{Clock, SystemClock};
use crate::error::{ceil_secs, BuildError};
use crate::sweep::Sweep;
use std::sync::Arc;
use std::time::Duration;

pub mod key;
pub mod middleware;
pub mod store;

pub use key::{ForwardedFor, HeaderKey, KeyExtractor, UNKNOWN_CLIENT};
pub use middleware::{apply_quota_headers, QuotaRejection, RateLimitLayer, RateLimitService};
use store::WindowStore;

/// Message used when a limiter is not given its own.
pub const DEFAULT_REJECTION_MESSAGE: &str = "Too many requests, please try again later.";

/// Counter state for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitEntry {
    /// Hits observed in the current window, including ones past the limit.
    pub count: u32,
    /// Epoch millis at which the current window closes.
    pub window_reset_at: u64,
}

/// Outcome of a quota check, computed from post-increment state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitStatus {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Epoch millis at which the window resets.
    pub reset_at: u64,
}

impl RateLimitStatus {
    fn from_entry(entry: RateLimitEntry, limit: u32) -> Self {
        Self {
            allowed: entry.count <= limit,
            limit,
            remaining: limit.saturating_sub(entry.count),
            reset_at: entry.window_reset_at,
        }
    }

    /// Time left until the window resets.
    pub fn retry_after(&self, now_millis: u64) -> Duration {
        Duration::from_millis(self.reset_at.saturating_sub(now_millis))
    }

    /// `ceil((reset_at - now) / 1000)`, the `Retry-After` value.
    pub fn retry_after_secs(&self, now_millis: u64) -> u64 {
        ceil_secs(self.retry_after(now_millis))
    }

    /// Reset instant in epoch seconds, rounded up, the `X-RateLimit-Reset` value.
    pub fn reset_epoch_secs(&self) -> u64 {
        self.reset_at.div_ceil(1000)
    }
}

/// Validated limiter settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    max_requests: u32,
    window: Duration,
    message: String,
}

impl RateLimitConfig {
    pub fn new(max_requests: u32, window: Duration) -> Result<Self, BuildError> {
        if max_requests == 0 {
            return Err(BuildError::ZeroMaxRequests);
        }
        if window.is_zero() {
            return Err(BuildError::ZeroWindow);
        }
        Ok(Self { max_requests, window, message: DEFAULT_REJECTION_MESSAGE.to_string() })
    }

    /// Compile-time shapes only; both values must be non-zero.
    pub(crate) fn preset(max_requests: u32, window: Duration, message: &str) -> Self {
        debug_assert!(max_requests > 0 && !window.is_zero());
        Self { max_requests, window, message: message.to_string() }
    }

    /// Human-readable message returned with rejections.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// A named fixed-window counter store.
///
/// Distinct instances never share counters, even for the same key. Wrap in `Arc` to share
/// between the middleware, the sweeper, and application code.
#[derive(Debug)]
pub struct RateLimiter {
    name: String,
    limit: DynamicConfig<u32>,
    window: Duration,
    message: String,
    store: WindowStore,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Create a limiter using the system clock.
    pub fn new(
        name: impl Into<String>,
        max_requests: u32,
        window: Duration,
    ) -> Result<Self, BuildError> {
        Ok(Self::from_config(name, RateLimitConfig::new(max_requests, window)?))
    }

    /// Create a limiter from validated settings.
    pub fn from_config(name: impl Into<String>, config: RateLimitConfig) -> Self {
        Self {
            name: name.into(),
            limit: DynamicConfig::new(config.max_requests),
            window: config.window,
            message: config.message,
            store: WindowStore::default(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Override the clock (deterministic tests, simulations).
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Count one hit for `key` against an explicit window.
    pub fn increment(&self, key: &str, window: Duration) -> RateLimitEntry {
        self.store.increment(key, self.clock.now_millis(), window)
    }

    /// Count one hit for `key` against this limiter's window and evaluate it.
    pub fn check(&self, key: &str) -> RateLimitStatus {
        let entry = self.increment(key, self.window);
        let status = RateLimitStatus::from_entry(entry, self.max_requests());
        if !status.allowed {
            tracing::warn!(
                limiter = %self.name,
                key,
                count = entry.count,
                limit = status.limit,
                "rate limit exceeded"
            );
        }
        status
    }

    /// Like [`check`](Self::check), but shaped for early return.
    pub fn admit(&self, key: &str) -> Result<RateLimitStatus, QuotaRejection> {
        let status = self.check(key);
        if status.allowed {
            Ok(status)
        } else {
            Err(QuotaRejection::new(status, self.clock.now_millis(), self.message.clone()))
        }
    }

    /// Current status for `key` without counting a hit.
    pub fn peek(&self, key: &str) -> RateLimitStatus {
        let now = self.clock.now_millis();
        let limit = self.max_requests();
        match self.store.get(key) {
            Some(entry) if now < entry.window_reset_at => RateLimitStatus::from_entry(entry, limit),
            _ => RateLimitStatus {
                allowed: true,
                limit,
                remaining: limit,
                reset_at: now.saturating_add(duration_millis(self.window)),
            },
        }
    }

    /// Forget `key`'s window. Returns whether an entry existed.
    pub fn reset(&self, key: &str) -> bool {
        self.store.remove(key)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_requests(&self) -> u32 {
        *self.limit.get()
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Change the limit; applies from the next check. Zero is clamped to one.
    pub fn set_max_requests(&self, max_requests: u32) {
        self.limit.set(max_requests.max(1));
    }

    /// Shared handle to the live limit.
    pub fn limit_handle(&self) -> DynamicConfig<u32> {
        self.limit.clone()
    }

    /// Number of tracked keys (expired ones included until swept).
    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }
}

impl Sweep for RateLimiter {
    fn sweep(&self) -> usize {
        self.store.sweep(self.clock.now_millis())
    }

    fn label(&self) -> &str {
        &self.name
    }
}

pub(crate) fn duration_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
