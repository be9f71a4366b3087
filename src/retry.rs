//! Retries for outbound calls: bounded attempts, backoff plus jitter between them.
//!
//! Semantics:
//! - `max_retries` counts retries after the initial try, so an operation runs at most
//!   `max_retries + 1` times.
//! - The delay before retry `n` (1-indexed) is `backoff.delay(n)` passed through the jitter.
//!   The defaults give `1s * 2^(n-1) + uniform[0, 1s)`.
//! - `Inner(E)` errors are retried when `should_retry` accepts them. `Timeout` is retried
//!   unless disabled with [`RetryPolicyBuilder::retry_on_timeout`]. `RateLimited` is never
//!   retried.
//! - On exhaustion the last error is returned unchanged.
//!
//! ```rust
//! use std::time::Duration;
//! use portcullis::{Backoff, InstantSleeper, Jitter, RetryPolicy, ResilienceError};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let policy = RetryPolicy::<std::io::Error>::builder()
//!     .max_retries(2)
//!     .backoff(Backoff::exponential(Duration::from_millis(100)))
//!     .with_jitter(Jitter::None)
//!     .with_sleeper(InstantSleeper)
//!     .build();
//! let result: Result<(), ResilienceError<std::io::Error>> = policy
//!     .execute(|| async { Err(ResilienceError::Inner(std::io::Error::other("down"))) })
//!     .await;
//! assert_eq!(result.unwrap_err().to_string(), "down");
//! # });
//! ```

use crate::{Backoff, Jitter, ResilienceError, Sleeper, TokioSleeper};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: usize = 2;
/// Default exponential base delay.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);
/// Default upper bound of the additive jitter.
pub const DEFAULT_MAX_JITTER: Duration = Duration::from_millis(1000);

/// Bounded retry with backoff, jitter, and an error filter.
pub struct RetryPolicy<E> {
    max_retries: usize,
    backoff: Backoff,
    jitter: Jitter,
    retry_on_timeout: bool,
    should_retry: Arc<dyn Fn(&E) -> bool + Send + Sync>,
    sleeper: Arc<dyn Sleeper>,
}

// Hand-written: the error type only appears behind the predicate `Arc`, so clones need no
// `E: Clone`.
impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            max_retries: self.max_retries,
            backoff: self.backoff.clone(),
            jitter: self.jitter,
            retry_on_timeout: self.retry_on_timeout,
            should_retry: Arc::clone(&self.should_retry),
            sleeper: Arc::clone(&self.sleeper),
        }
    }
}

impl<E> std::fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("backoff", &self.backoff)
            .field("jitter", &self.jitter)
            .field("retry_on_timeout", &self.retry_on_timeout)
            .field("sleeper", &self.sleeper)
            .field("should_retry", &"<predicate>")
            .finish()
    }
}

impl<E> RetryPolicy<E> {
    /// Start from the outbound defaults.
    pub fn builder() -> RetryPolicyBuilder<E> {
        RetryPolicyBuilder::new()
    }

    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    fn is_retryable(&self, err: &ResilienceError<E>) -> bool {
        match err {
            ResilienceError::Inner(e) => (self.should_retry)(e),
            ResilienceError::Timeout { .. } => self.retry_on_timeout,
            ResilienceError::RateLimited { .. } => false,
        }
    }

    /// Jittered delay before retry number `retry` (1-indexed).
    pub fn delay_for(&self, retry: usize) -> Duration {
        self.jitter.apply(self.backoff.delay(retry))
    }

    /// Run `operation`, retrying transient failures until the retry budget is spent.
    pub async fn execute<T, Fut, Op>(&self, operation: Op) -> Result<T, ResilienceError<E>>
    where
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
        Op: FnMut() -> Fut,
    {
        self.execute_observed(operation, |_, _| std::future::ready(())).await
    }

    /// Like [`execute`](Self::execute), awaiting `on_retry(retry, delay)` before each sleep.
    pub(crate) async fn execute_observed<T, Fut, Op, Obs, ObsFut>(
        &self,
        mut operation: Op,
        mut on_retry: Obs,
    ) -> Result<T, ResilienceError<E>>
    where
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
        Op: FnMut() -> Fut,
        Obs: FnMut(usize, Duration) -> ObsFut,
        ObsFut: Future<Output = ()>,
    {
        let mut attempt = 0;
        loop {
            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            if attempt >= self.max_retries || !self.is_retryable(&err) {
                return Err(err);
            }

            attempt += 1;
            let delay = self.delay_for(attempt);
            tracing::warn!(
                retry = attempt,
                max_retries = self.max_retries,
                ?delay,
                timeout = err.is_timeout(),
                "retrying failed operation"
            );
            on_retry(attempt, delay).await;
            self.sleeper.sleep(delay).await;
        }
    }
}

impl<E> Default for RetryPolicy<E> {
    fn default() -> Self {
        RetryPolicyBuilder::new().build()
    }
}

/// Configures a [`RetryPolicy`]. Starts from the outbound defaults.
pub struct RetryPolicyBuilder<E> {
    max_retries: usize,
    backoff: Backoff,
    jitter: Jitter,
    retry_on_timeout: bool,
    should_retry: Arc<dyn Fn(&E) -> bool + Send + Sync>,
    sleeper: Arc<dyn Sleeper>,
}

impl<E> RetryPolicyBuilder<E> {
    /// Two retries, 1 s exponential base, up to 1 s additive jitter.
    pub fn new() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: Backoff::exponential(DEFAULT_BASE_DELAY),
            jitter: Jitter::additive(DEFAULT_MAX_JITTER),
            retry_on_timeout: true,
            should_retry: Arc::new(|_| true),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Retries after the first attempt. Zero disables retrying.
    pub fn max_retries(mut self, retries: usize) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    /// Whether a per-attempt timeout counts as a retryable failure.
    pub fn retry_on_timeout(mut self, enabled: bool) -> Self {
        self.retry_on_timeout = enabled;
        self
    }

    /// Which operation errors count as transient.
    pub fn should_retry<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Arc::new(predicate);
        self
    }

    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn build(self) -> RetryPolicy<E> {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff: self.backoff,
            jitter: self.jitter,
            retry_on_timeout: self.retry_on_timeout,
            should_retry: self.should_retry,
            sleeper: self.sleeper,
        }
    }
}

impl<E> Default for RetryPolicyBuilder<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InstantSleeper, TrackingSleeper};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct TestError(String);

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "TestError: {}", self.0)
        }
    }

    impl std::error::Error for TestError {}

    fn counting_failures(
        counter: &AtomicUsize,
        failures: usize,
    ) -> impl FnMut() -> std::future::Ready<Result<usize, ResilienceError<TestError>>> + '_ {
        move || {
            let attempt = counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(if attempt < failures {
                Err(ResilienceError::Inner(TestError(format!("attempt {attempt}"))))
            } else {
                Ok(attempt)
            })
        }
    }

    #[tokio::test]
    async fn succeeds_after_max_retries_failures() {
        let policy = RetryPolicy::builder().max_retries(2).with_sleeper(InstantSleeper).build();
        let counter = AtomicUsize::new(0);

        let result = policy.execute(counting_failures(&counter, 2)).await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(counter.load(Ordering::SeqCst), 3, "max_retries + 1 invocations");
    }

    #[tokio::test]
    async fn exhaustion_returns_last_error_unchanged() {
        let policy = RetryPolicy::builder().max_retries(2).with_sleeper(InstantSleeper).build();
        let counter = AtomicUsize::new(0);

        let err = policy.execute(counting_failures(&counter, usize::MAX)).await.unwrap_err();

        assert_eq!(err.into_inner(), Some(TestError("attempt 2".into())));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn clones_keep_the_predicate_for_non_clone_errors() {
        #[derive(Debug)]
        struct Refused(u16);

        let original = RetryPolicy::<Refused>::builder()
            .max_retries(3)
            .should_retry(|e: &Refused| e.0 >= 500)
            .with_sleeper(InstantSleeper)
            .build();
        let policy = original.clone();
        let counter = AtomicUsize::new(0);

        let err = policy
            .execute(|| {
                counter.fetch_add(1, Ordering::SeqCst);
                std::future::ready(Err::<(), _>(ResilienceError::Inner(Refused(404))))
            })
            .await
            .unwrap_err();

        assert_eq!(err.into_inner().map(|e| e.0), Some(404));
        assert_eq!(counter.load(Ordering::SeqCst), 1, "4xx is not retried");
        assert_eq!(policy.max_retries(), original.max_retries());
    }

    #[tokio::test]
    async fn delays_double_without_jitter() {
        let sleeper = TrackingSleeper::new();
        let policy = RetryPolicy::builder()
            .max_retries(3)
            .backoff(Backoff::exponential(Duration::from_millis(1000)))
            .with_jitter(Jitter::None)
            .with_sleeper(sleeper.clone())
            .build();
        let counter = AtomicUsize::new(0);

        let _ = policy.execute(counting_failures(&counter, usize::MAX)).await;

        assert_eq!(
            sleeper.delays(),
            vec![Duration::from_millis(1000), Duration::from_millis(2000), Duration::from_millis(4000)]
        );
    }

    #[tokio::test]
    async fn default_jitter_stays_within_one_second() {
        let sleeper = TrackingSleeper::new();
        let policy = RetryPolicy::builder().with_sleeper(sleeper.clone()).build();
        let counter = AtomicUsize::new(0);

        let _ = policy.execute(counting_failures(&counter, usize::MAX)).await;

        let delays = sleeper.delays();
        assert_eq!(delays.len(), DEFAULT_MAX_RETRIES);
        assert!(delays[0] >= Duration::from_millis(1000) && delays[0] < Duration::from_millis(2000));
        assert!(delays[1] >= Duration::from_millis(2000) && delays[1] < Duration::from_millis(3000));
    }

    #[tokio::test]
    async fn predicate_can_reject_retry() {
        let policy = RetryPolicy::builder()
            .should_retry(|e: &TestError| !e.0.starts_with("attempt 0"))
            .with_sleeper(InstantSleeper)
            .build();
        let counter = AtomicUsize::new(0);

        let _ = policy.execute(counting_failures(&counter, usize::MAX)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rate_limited_is_never_retried() {
        let policy = RetryPolicy::<TestError>::builder().with_sleeper(InstantSleeper).build();
        let counter = AtomicUsize::new(0);

        let err = policy
            .execute(|| {
                counter.fetch_add(1, Ordering::SeqCst);
                async {
                    Err::<(), _>(ResilienceError::RateLimited {
                        limit: 10,
                        retry_after: Duration::from_secs(30),
                    })
                }
            })
            .await
            .unwrap_err();

        assert!(err.is_rate_limited());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn timeouts_retry_unless_disabled() {
        let timeout = || async {
            Err::<(), _>(ResilienceError::<TestError>::Timeout {
                elapsed: Duration::from_secs(1),
                timeout: Duration::from_secs(1),
            })
        };

        let sleeper = TrackingSleeper::new();
        let policy = RetryPolicy::<TestError>::builder().with_sleeper(sleeper.clone()).build();
        assert!(policy.execute(timeout).await.unwrap_err().is_timeout());
        assert_eq!(sleeper.calls(), 2);

        let sleeper = TrackingSleeper::new();
        let policy = RetryPolicy::<TestError>::builder()
            .retry_on_timeout(false)
            .with_sleeper(sleeper.clone())
            .build();
        assert!(policy.execute(timeout).await.unwrap_err().is_timeout());
        assert_eq!(sleeper.calls(), 0);
    }
}
