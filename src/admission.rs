//! Application-lifetime container for the admission layer.
//!
//! One [`AdmissionControl`] owns the named limiters, the shared performance monitor, and the
//! outbound pipeline settings. Construct it once at startup and hand out clones of the
//! pieces; tests build a fresh one per case.
//!
//! ```rust
//! use portcullis::AdmissionControl;
//! use http::HeaderMap;
//!
//! let admission = AdmissionControl::new();
//! let mut headers = HeaderMap::new();
//! headers.insert("x-forwarded-for", "203.0.113.7".parse().unwrap());
//! let status = admission.admit("login", &headers).unwrap().unwrap();
//! assert_eq!(status.remaining, 4);
//! ```

use crate::cache::TtlCache;
use crate::clock::Clock;
use crate::config::{CacheSettings, PipelineSettings, PortcullisConfig};
use crate::metrics::PerformanceMonitor;
use crate::pipeline::{ResiliencePipeline, ResiliencePipelineBuilder};
use crate::rate_limit::{ForwardedFor, KeyExtractor, QuotaRejection, RateLimitLayer, RateLimitStatus, RateLimiter};
use crate::sweep::{spawn_sweeper, SweeperHandle};
use http::HeaderMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AdmissionControl {
    limiters: BTreeMap<String, Arc<RateLimiter>>,
    sweep_interval: Duration,
    cache: CacheSettings,
    pipeline: PipelineSettings,
    monitor: PerformanceMonitor,
}

impl Default for AdmissionControl {
    fn default() -> Self {
        Self::new()
    }
}

impl AdmissionControl {
    /// The five preset limiters with default pipeline settings.
    pub fn new() -> Self {
        Self::from_config(&PortcullisConfig::default())
    }

    pub fn from_config(config: &PortcullisConfig) -> Self {
        Self::build(config, |limiter| limiter)
    }

    /// Like [`from_config`](Self::from_config) with every limiter and the monitor on `clock`.
    pub fn with_clock<C>(config: &PortcullisConfig, clock: C) -> Self
    where
        C: Clock + Clone + 'static,
    {
        let mut control = Self::build(config, |limiter| limiter.with_clock(clock.clone()));
        control.monitor =
            PerformanceMonitor::with_clock(clock).with_slow_threshold(config.pipeline().slow_threshold);
        control
    }

    fn build(config: &PortcullisConfig, mut finish: impl FnMut(RateLimiter) -> RateLimiter) -> Self {
        let limiters = config
            .limiters()
            .iter()
            .map(|(name, settings)| {
                let limiter = finish(RateLimiter::from_config(name.clone(), settings.clone()));
                (name.clone(), Arc::new(limiter))
            })
            .collect();
        Self {
            limiters,
            sweep_interval: config.limiter_sweep_interval(),
            cache: config.cache(),
            pipeline: config.pipeline().clone(),
            monitor: PerformanceMonitor::new().with_slow_threshold(config.pipeline().slow_threshold),
        }
    }

    /// Register (or replace) a limiter under its own name.
    pub fn insert(&mut self, limiter: RateLimiter) -> Arc<RateLimiter> {
        let limiter = Arc::new(limiter);
        self.limiters.insert(limiter.name().to_string(), limiter.clone());
        limiter
    }

    pub fn limiter(&self, name: &str) -> Option<Arc<RateLimiter>> {
        self.limiters.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.limiters.keys().map(String::as_str)
    }

    /// Tower layer enforcing limiter `name`, keyed by client address.
    pub fn inbound(&self, name: &str) -> Option<RateLimitLayer> {
        self.limiter(name).map(RateLimitLayer::new)
    }

    pub fn inbound_with_keys<K: KeyExtractor>(&self, name: &str, keys: K) -> Option<RateLimitLayer<K>> {
        self.limiter(name).map(|limiter| RateLimitLayer::with_keys(limiter, keys))
    }

    /// Framework-agnostic inbound check: count one hit for the request's client address.
    ///
    /// `None` when no limiter is registered under `name`.
    pub fn admit(
        &self,
        name: &str,
        headers: &HeaderMap,
    ) -> Option<Result<RateLimitStatus, QuotaRejection>> {
        let limiter = self.limiters.get(name)?;
        Some(limiter.admit(&ForwardedFor.key(headers)))
    }

    /// Outbound pipeline with the configured timeout and retry, recording into the shared
    /// monitor.
    pub fn outbound<T, E>(&self) -> ResiliencePipelineBuilder<T, E> {
        ResiliencePipeline::builder()
            .timeout(self.pipeline.timeout)
            .retry(self.pipeline.retry_policy())
            .monitor(self.monitor.clone())
    }

    /// Outbound pipeline that also self-throttles through limiter `name` under `key`.
    pub fn outbound_limited<T, E>(&self, name: &str, key: impl Into<String>) -> Option<ResiliencePipelineBuilder<T, E>> {
        let limiter = self.limiter(name)?;
        Some(self.outbound().rate_limit(limiter, key))
    }

    /// A cache with the configured default TTL, swept on the configured interval until the
    /// handle is dropped. Must be called within a tokio runtime.
    pub fn cache<V>(&self) -> (Arc<TtlCache<V>>, SweeperHandle)
    where
        V: Clone + Send + Sync + 'static,
    {
        let cache = Arc::new(TtlCache::new(self.cache.default_ttl));
        let sweeper = spawn_sweeper(&cache, self.cache.sweep_interval);
        (cache, sweeper)
    }

    pub fn monitor(&self) -> &PerformanceMonitor {
        &self.monitor
    }

    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }

    /// One sweeper per limiter plus the hourly metrics reset. Drop the handles to stop them.
    pub fn spawn_maintenance(&self) -> Vec<SweeperHandle> {
        let mut handles: Vec<_> =
            self.limiters.values().map(|limiter| spawn_sweeper(limiter, self.sweep_interval)).collect();
        handles.push(self.monitor.spawn_hourly_reset());
        handles
    }
}
