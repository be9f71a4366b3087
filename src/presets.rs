//! Named limiter and pipeline presets for the admin console.
//!
//! | Limiter | Max requests | Window |
//! |---|---|---|
//! | [`api`] | 100 | 15 min |
//! | [`login`] | 5 | 15 min |
//! | [`redeem`] | 10 | 1 min |
//! | [`export`] | 5 | 1 min |
//! | [`batch`] | 3 | 1 min |
//!
//! Every call returns a fresh, independent store.
//!
//! ```rust
//! use portcullis::presets;
//!
//! let login = presets::login();
//! let redeem = presets::redeem();
//! for _ in 0..5 {
//!     login.check("1.2.3.4");
//! }
//! assert!(!login.check("1.2.3.4").allowed);
//! assert!(redeem.check("1.2.3.4").allowed);
//! ```

use crate::pipeline::{ResiliencePipeline, ResiliencePipelineBuilder};
use crate::rate_limit::{RateLimitConfig, RateLimiter};
use crate::retry::RetryPolicy;
use crate::timeout::TimeoutPolicy;
use std::time::Duration;

const FIFTEEN_MIN: Duration = Duration::from_secs(15 * 60);
const ONE_MIN: Duration = Duration::from_secs(60);

/// A limiter preset by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimiterPreset {
    Api,
    Login,
    Redeem,
    Export,
    Batch,
}

impl LimiterPreset {
    pub const ALL: [LimiterPreset; 5] = [
        LimiterPreset::Api,
        LimiterPreset::Login,
        LimiterPreset::Redeem,
        LimiterPreset::Export,
        LimiterPreset::Batch,
    ];

    pub fn name(self) -> &'static str {
        match self {
            LimiterPreset::Api => "api",
            LimiterPreset::Login => "login",
            LimiterPreset::Redeem => "redeem",
            LimiterPreset::Export => "export",
            LimiterPreset::Batch => "batch",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.name() == name)
    }

    fn shape(self) -> (u32, Duration, &'static str) {
        match self {
            LimiterPreset::Api => (100, FIFTEEN_MIN, "Too many requests, please try again later."),
            LimiterPreset::Login => (5, FIFTEEN_MIN, "Too many login attempts, please try again later."),
            LimiterPreset::Redeem => (10, ONE_MIN, "Too many redemption requests, please slow down."),
            LimiterPreset::Export => (5, ONE_MIN, "Too many export requests, please try again later."),
            LimiterPreset::Batch => (3, ONE_MIN, "Too many batch operations, please try again later."),
        }
    }

    pub fn config(self) -> RateLimitConfig {
        let (max, window, message) = self.shape();
        RateLimitConfig::preset(max, window, message)
    }

    pub fn build(self) -> RateLimiter {
        RateLimiter::from_config(self.name(), self.config())
    }
}

/// 100 requests per 15 minutes.
pub fn api() -> RateLimiter {
    LimiterPreset::Api.build()
}

/// 5 attempts per 15 minutes.
pub fn login() -> RateLimiter {
    LimiterPreset::Login.build()
}

/// 10 redemptions per minute.
pub fn redeem() -> RateLimiter {
    LimiterPreset::Redeem.build()
}

/// 5 exports per minute.
pub fn export() -> RateLimiter {
    LimiterPreset::Export.build()
}

/// 3 batch operations per minute.
pub fn batch() -> RateLimiter {
    LimiterPreset::Batch.build()
}

/// 30 s timeout, 2 retries at 1 s exponential base with up to 1 s of jitter.
pub fn default_pipeline<T, E>() -> ResiliencePipelineBuilder<T, E> {
    ResiliencePipeline::builder()
        .timeout(TimeoutPolicy::default())
        .retry(RetryPolicy::default())
}

/// Redemption calls: 15 s timeout, same retry schedule, deduplicated by key.
pub fn redemption_pipeline<T, E>() -> ResiliencePipelineBuilder<T, E> {
    ResiliencePipeline::builder()
        .timeout(TimeoutPolicy::redemption())
        .retry(RetryPolicy::default())
        .dedup()
}
