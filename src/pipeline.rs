//! Composition of the outbound stages.
//!
//! Order when every stage is configured, outermost first:
//!
//! ```text
//! Metrics -> Dedup -> RateLimit -> Retry -> Timeout -> operation
//! ```
//!
//! Metrics see exactly one outcome per caller. A caller that joins an in-flight call shares
//! its result and does not consume outbound quota. Each retry attempt gets its own timeout.
//!
//! Plain calls accept any `Send` error type. Keyed calls hand every joined caller a clone of
//! the shared result, so they also need `T: Clone` and `E: Clone`.
//!
//! ```rust
//! use portcullis::{ResiliencePipeline, InstantSleeper, RetryPolicy};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let fetch = ResiliencePipeline::<String, std::io::Error>::builder()
//!     .retry(RetryPolicy::builder().with_sleeper(InstantSleeper).build())
//!     .build();
//! let body = fetch.execute(|| async { Ok("[]".to_string()) }).await.unwrap();
//! assert_eq!(body, "[]");
//!
//! let redeem = ResiliencePipeline::<String, String>::builder()
//!     .retry(RetryPolicy::builder().with_sleeper(InstantSleeper).build())
//!     .dedup()
//!     .build();
//! let receipt = redeem
//!     .execute_keyed("redeem:ABC:e@x.com", || async { Ok("queued".to_string()) })
//!     .await
//!     .unwrap();
//! assert_eq!(receipt, "queued");
//! assert_eq!(redeem.monitor().snapshot().request_count, 1);
//! # });
//! ```

use crate::dedup::Deduplicator;
use crate::metrics::PerformanceMonitor;
use crate::rate_limit::RateLimiter;
use crate::retry::RetryPolicy;
use crate::telemetry::{
    emit_best_effort, DedupEvent, NullSink, PolicyEvent, RateLimitEvent, RequestOutcome, RetryEvent,
    TelemetrySink, TimeoutEvent,
};
use crate::timeout::TimeoutPolicy;
use crate::ResilienceError;
use futures::future::{BoxFuture, FutureExt};
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;

/// Outbound self-throttling: one limiter and the key this client counts under.
#[derive(Debug, Clone)]
struct OutboundQuota {
    limiter: Arc<RateLimiter>,
    key: String,
}

impl OutboundQuota {
    fn admit<E>(&self) -> Result<(), ResilienceError<E>> {
        let status = self.limiter.check(&self.key);
        if status.allowed {
            return Ok(());
        }
        Err(ResilienceError::RateLimited {
            limit: status.limit,
            retry_after: status.retry_after(self.limiter.now_millis()),
        })
    }
}

/// Timeout, retry, deduplication, outbound quota, and metrics around an async operation.
///
/// Operations return `Result<T, E>`; upstream errors surface as [`ResilienceError::Inner`].
pub struct ResiliencePipeline<T, E, S = NullSink> {
    timeout: Option<TimeoutPolicy>,
    retry: RetryPolicy<E>,
    dedup: Option<Deduplicator<T, E>>,
    quota: Option<OutboundQuota>,
    monitor: PerformanceMonitor,
    sink: S,
}

impl<T, E, S: Clone> Clone for ResiliencePipeline<T, E, S> {
    fn clone(&self) -> Self {
        Self {
            timeout: self.timeout,
            retry: self.retry.clone(),
            dedup: self.dedup.clone(),
            quota: self.quota.clone(),
            monitor: self.monitor.clone(),
            sink: self.sink.clone(),
        }
    }
}

impl<T, E, S> std::fmt::Debug for ResiliencePipeline<T, E, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResiliencePipeline")
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .field("dedup", &self.dedup.is_some())
            .field("quota", &self.quota)
            .finish()
    }
}

impl<T, E> ResiliencePipeline<T, E, NullSink> {
    pub fn builder() -> ResiliencePipelineBuilder<T, E, NullSink> {
        ResiliencePipelineBuilder::new()
    }
}

impl<T, E, S> ResiliencePipeline<T, E, S> {
    /// Shared accumulator this pipeline records into.
    pub fn monitor(&self) -> &PerformanceMonitor {
        &self.monitor
    }

    pub fn timeout(&self) -> Option<&TimeoutPolicy> {
        self.timeout.as_ref()
    }

    pub fn retry_policy(&self) -> &RetryPolicy<E> {
        &self.retry
    }

    pub fn deduplicator(&self) -> Option<&Deduplicator<T, E>> {
        self.dedup.as_ref()
    }
}

impl<T, E, S> ResiliencePipeline<T, E, S>
where
    T: Send + 'static,
    E: Send + 'static,
    S: TelemetrySink + Sync,
    S::Future: Send + 'static,
{
    /// Run `operation` through every stage except deduplication.
    pub async fn execute<Op, Fut>(&self, operation: Op) -> Result<T, ResilienceError<E>>
    where
        Op: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let start = Instant::now();
        let result = self.flight(operation).await;
        self.finish(start, result).await
    }

    async fn finish(
        &self,
        start: Instant,
        result: Result<T, ResilienceError<E>>,
    ) -> Result<T, ResilienceError<E>> {
        let duration = start.elapsed();
        self.monitor.record(duration, result.is_err());
        let outcome = match result {
            Ok(_) => RequestOutcome::Success { duration },
            Err(_) => RequestOutcome::Failure { duration },
        };
        emit_best_effort(self.sink.clone(), PolicyEvent::Request(outcome)).await;
        result
    }

    /// Quota, retry, and timeout as one shareable future.
    fn flight<Op, Fut>(&self, mut operation: Op) -> BoxFuture<'static, Result<T, ResilienceError<E>>>
    where
        Op: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let timeout = self.timeout;
        let retry = self.retry.clone();
        let quota = self.quota.clone();
        let sink = self.sink.clone();

        async move {
            if let Some(quota) = &quota {
                if let Err(err) = quota.admit::<E>() {
                    let event = PolicyEvent::RateLimit(RateLimitEvent::Rejected {
                        limiter: quota.limiter.name().to_string(),
                        key: quota.key.clone(),
                        retry_after: err.retry_after().unwrap_or_default(),
                    });
                    emit_best_effort(sink.clone(), event).await;
                    return Err(err);
                }
            }

            let attempt_sink = sink.clone();
            let attempt = move || {
                let call = operation().map(|r| r.map_err(ResilienceError::Inner));
                let sink = attempt_sink.clone();
                async move {
                    let Some(timeout) = timeout else {
                        return call.await;
                    };
                    let result = timeout.execute(|| call).await;
                    if result.as_ref().is_err_and(ResilienceError::is_timeout) {
                        let event =
                            PolicyEvent::Timeout(TimeoutEvent::Occurred { timeout: timeout.duration() });
                        emit_best_effort(sink, event).await;
                    }
                    result
                }
            };
            let on_retry = |attempt: usize, delay| {
                let event = PolicyEvent::Retry(RetryEvent::Attempt { attempt, delay });
                emit_best_effort(sink.clone(), event)
            };
            retry.execute_observed(attempt, on_retry).await
        }
        .boxed()
    }
}

// A shared flight hands every joined caller a clone of the one result.
impl<T, E, S> ResiliencePipeline<T, E, S>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    S: TelemetrySink + Sync,
    S::Future: Send + 'static,
{
    /// Run `operation` under the idempotency `key`.
    ///
    /// While a call for `key` is in flight, later callers share its result instead of
    /// invoking `operation`. Without a configured deduplicator this behaves like
    /// [`execute`](Self::execute).
    pub async fn execute_keyed<Op, Fut>(
        &self,
        key: &str,
        operation: Op,
    ) -> Result<T, ResilienceError<E>>
    where
        Op: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let start = Instant::now();
        let result = match &self.dedup {
            Some(dedup) => {
                let flight = self.flight(operation);
                let (result, joined) = dedup.run_observed(key, move || flight).await;
                if joined {
                    let event = PolicyEvent::Dedup(DedupEvent::Joined { key: key.to_string() });
                    emit_best_effort(self.sink.clone(), event).await;
                }
                result
            }
            None => self.flight(operation).await,
        };
        self.finish(start, result).await
    }
}

/// Builder for [`ResiliencePipeline`].
///
/// Defaults: 30 s timeout, two retries (1 s exponential base, up to 1 s jitter), no
/// deduplication, no outbound quota, a fresh monitor, and [`NullSink`].
pub struct ResiliencePipelineBuilder<T, E, S = NullSink> {
    timeout: Option<TimeoutPolicy>,
    retry: RetryPolicy<E>,
    dedup: Option<Deduplicator<T, E>>,
    quota: Option<OutboundQuota>,
    monitor: Option<PerformanceMonitor>,
    sink: S,
}

impl<T, E> ResiliencePipelineBuilder<T, E, NullSink> {
    pub fn new() -> Self {
        Self {
            timeout: Some(TimeoutPolicy::default()),
            retry: RetryPolicy::default(),
            dedup: None,
            quota: None,
            monitor: None,
            sink: NullSink,
        }
    }
}

impl<T, E> Default for ResiliencePipelineBuilder<T, E, NullSink> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E, S> ResiliencePipelineBuilder<T, E, S> {
    /// Per-attempt timeout.
    pub fn timeout(mut self, policy: TimeoutPolicy) -> Self {
        self.timeout = Some(policy);
        self
    }

    pub fn no_timeout(mut self) -> Self {
        self.timeout = None;
        self
    }

    pub fn retry(mut self, policy: RetryPolicy<E>) -> Self {
        self.retry = policy;
        self
    }

    /// Run every operation exactly once.
    pub fn no_retry(mut self) -> Self {
        self.retry = RetryPolicy::builder().max_retries(0).build();
        self
    }

    /// Coalesce keyed calls with a fresh deduplicator.
    pub fn dedup(self) -> Self {
        self.dedup_with(Deduplicator::new())
    }

    /// Coalesce keyed calls through a shared deduplicator.
    pub fn dedup_with(mut self, dedup: Deduplicator<T, E>) -> Self {
        self.dedup = Some(dedup);
        self
    }

    /// Consult `limiter` under `key` before each call; a denial fails fast with
    /// [`ResilienceError::RateLimited`].
    pub fn rate_limit(mut self, limiter: Arc<RateLimiter>, key: impl Into<String>) -> Self {
        self.quota = Some(OutboundQuota { limiter, key: key.into() });
        self
    }

    /// Record into a shared monitor instead of a private one.
    pub fn monitor(mut self, monitor: PerformanceMonitor) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn sink<S2>(self, sink: S2) -> ResiliencePipelineBuilder<T, E, S2> {
        ResiliencePipelineBuilder {
            timeout: self.timeout,
            retry: self.retry,
            dedup: self.dedup,
            quota: self.quota,
            monitor: self.monitor,
            sink,
        }
    }

    pub fn build(self) -> ResiliencePipeline<T, E, S> {
        ResiliencePipeline {
            timeout: self.timeout,
            retry: self.retry,
            dedup: self.dedup,
            quota: self.quota,
            monitor: self.monitor.unwrap_or_default(),
            sink: self.sink,
        }
    }
}
