//! JSON configuration for the whole admission layer.
//!
//! Durations are milliseconds; keys are camelCase. Every section is optional and falls back to
//! the preset defaults.
//!
//! ```rust
//! use portcullis::config::PortcullisConfig;
//!
//! let config = PortcullisConfig::from_json_str(r#"{
//!     "limiters": { "login": { "maxRequests": 3, "windowMs": 600000 } },
//!     "pipeline": { "timeoutMs": 15000 }
//! }"#).unwrap();
//! assert_eq!(config.limiters()["login"].max_requests(), 3);
//! assert_eq!(config.limiters()["batch"].max_requests(), 3);
//! ```

use crate::backoff::Backoff;
use crate::cache::{DEFAULT_SWEEP_INTERVAL, DEFAULT_TTL};
use crate::error::{BuildError, ConfigError};
use crate::jitter::Jitter;
use crate::metrics::DEFAULT_SLOW_THRESHOLD;
use crate::presets::LimiterPreset;
use crate::rate_limit::RateLimitConfig;
use crate::realtime::RealtimeConfig;
use crate::retry::{RetryPolicy, DEFAULT_BASE_DELAY, DEFAULT_MAX_JITTER, DEFAULT_MAX_RETRIES};
use crate::timeout::{TimeoutPolicy, DEFAULT_TIMEOUT};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Interval of the limiter sweep (5 minutes).
pub const DEFAULT_LIMITER_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct LimiterSection {
    max_requests: u32,
    window_ms: u64,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
struct CacheSection {
    default_ttl_ms: Option<u64>,
    sweep_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
struct PipelineSection {
    timeout_ms: Option<u64>,
    max_retries: Option<usize>,
    base_delay_ms: Option<u64>,
    max_jitter_ms: Option<u64>,
    slow_threshold_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RealtimeSection {
    endpoint: String,
    #[serde(default)]
    heartbeat_ms: Option<u64>,
    #[serde(default)]
    reconnect_delay_ms: Option<u64>,
    #[serde(default)]
    history_capacity: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
struct RawConfig {
    limiters: BTreeMap<String, LimiterSection>,
    sweep_interval_ms: Option<u64>,
    cache: CacheSection,
    pipeline: PipelineSection,
    realtime: Option<RealtimeSection>,
}

/// Validated cache settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSettings {
    pub default_ttl: Duration,
    pub sweep_interval: Duration,
}

/// Validated outbound pipeline settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    pub timeout: TimeoutPolicy,
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_jitter: Duration,
    pub slow_threshold: Duration,
}

impl PipelineSettings {
    /// Retry policy with these settings and the tokio sleeper.
    pub fn retry_policy<E>(&self) -> RetryPolicy<E> {
        RetryPolicy::builder()
            .max_retries(self.max_retries)
            .backoff(Backoff::exponential(self.base_delay))
            .with_jitter(Jitter::additive(self.max_jitter))
            .build()
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            timeout: TimeoutPolicy::default(),
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_jitter: DEFAULT_MAX_JITTER,
            slow_threshold: DEFAULT_SLOW_THRESHOLD,
        }
    }
}

/// Fully validated configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortcullisConfig {
    limiters: BTreeMap<String, RateLimitConfig>,
    limiter_sweep_interval: Duration,
    cache: CacheSettings,
    pipeline: PipelineSettings,
    realtime: Option<RealtimeConfig>,
}

impl Default for PortcullisConfig {
    fn default() -> Self {
        Self {
            limiters: preset_limiters(),
            limiter_sweep_interval: DEFAULT_LIMITER_SWEEP_INTERVAL,
            cache: CacheSettings { default_ttl: DEFAULT_TTL, sweep_interval: DEFAULT_SWEEP_INTERVAL },
            pipeline: PipelineSettings::default(),
            realtime: None,
        }
    }
}

fn preset_limiters() -> BTreeMap<String, RateLimitConfig> {
    LimiterPreset::ALL.into_iter().map(|p| (p.name().to_string(), p.config())).collect()
}

fn invalid(section: impl Into<String>) -> impl FnOnce(BuildError) -> ConfigError {
    let section = section.into();
    move |source| ConfigError::Invalid { section, source }
}

fn positive_ms(ms: Option<u64>, default: Duration, name: &'static str) -> Result<Duration, BuildError> {
    match ms {
        None => Ok(default),
        Some(0) => Err(BuildError::ZeroDuration { name }),
        Some(ms) => Ok(Duration::from_millis(ms)),
    }
}

impl PortcullisConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_json::from_str(json)?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        // named limiters override presets of the same name
        let mut limiters = preset_limiters();
        for (name, section) in raw.limiters {
            let mut config = RateLimitConfig::new(section.max_requests, Duration::from_millis(section.window_ms))
                .map_err(invalid(format!("limiters.{name}")))?;
            if let Some(message) = section.message {
                config = config.with_message(message);
            }
            limiters.insert(name, config);
        }

        let limiter_sweep_interval =
            positive_ms(raw.sweep_interval_ms, DEFAULT_LIMITER_SWEEP_INTERVAL, "sweepIntervalMs")
                .map_err(invalid("root"))?;

        let cache = CacheSettings {
            default_ttl: positive_ms(raw.cache.default_ttl_ms, DEFAULT_TTL, "defaultTtlMs")
                .map_err(invalid("cache"))?,
            sweep_interval: positive_ms(raw.cache.sweep_interval_ms, DEFAULT_SWEEP_INTERVAL, "sweepIntervalMs")
                .map_err(invalid("cache"))?,
        };

        let p = raw.pipeline;
        let timeout = match p.timeout_ms {
            None => TimeoutPolicy::new(DEFAULT_TIMEOUT),
            Some(ms) => TimeoutPolicy::new(Duration::from_millis(ms)),
        }
        .map_err(invalid("pipeline"))?;
        let pipeline = PipelineSettings {
            timeout,
            max_retries: p.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            base_delay: p.base_delay_ms.map_or(DEFAULT_BASE_DELAY, Duration::from_millis),
            max_jitter: p.max_jitter_ms.map_or(DEFAULT_MAX_JITTER, Duration::from_millis),
            slow_threshold: p.slow_threshold_ms.map_or(DEFAULT_SLOW_THRESHOLD, Duration::from_millis),
        };

        let realtime = raw.realtime.map(realtime_config).transpose().map_err(invalid("realtime"))?;

        Ok(Self { limiters, limiter_sweep_interval, cache, pipeline, realtime })
    }

    /// Limiter settings by name, presets included.
    pub fn limiters(&self) -> &BTreeMap<String, RateLimitConfig> {
        &self.limiters
    }

    pub fn limiter_sweep_interval(&self) -> Duration {
        self.limiter_sweep_interval
    }

    pub fn cache(&self) -> CacheSettings {
        self.cache
    }

    pub fn pipeline(&self) -> &PipelineSettings {
        &self.pipeline
    }

    pub fn realtime(&self) -> Option<&RealtimeConfig> {
        self.realtime.as_ref()
    }
}

fn realtime_config(section: RealtimeSection) -> Result<RealtimeConfig, BuildError> {
    // accept either a socket url or the application origin
    let mut config = if section.endpoint.starts_with("ws") {
        RealtimeConfig::new(&section.endpoint)?
    } else {
        RealtimeConfig::for_origin(&section.endpoint)?
    };
    if let Some(ms) = section.heartbeat_ms {
        config = config.with_heartbeat(Duration::from_millis(ms))?;
    }
    if let Some(ms) = section.reconnect_delay_ms {
        config = config.with_reconnect_delay(Duration::from_millis(ms))?;
    }
    if let Some(capacity) = section.history_capacity {
        config = config.with_history_capacity(capacity)?;
    }
    Ok(config)
}
