use super::key::{ForwardedFor, KeyExtractor};
use super::{RateLimitStatus, RateLimiter};
use futures::future::BoxFuture;
use http::header::{HeaderValue, CONTENT_TYPE, RETRY_AFTER};
use http::{HeaderMap, Request, Response, StatusCode};
use std::sync::Arc;
use std::task::{Context, Poll};
use tower_layer::Layer;
use tower_service::Service;

pub const X_RATELIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const X_RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";
pub const X_RATELIMIT_RESET: &str = "x-ratelimit-reset";

/// Write the three `X-RateLimit-*` headers for `status`.
pub fn apply_quota_headers(headers: &mut HeaderMap, status: &RateLimitStatus) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(status.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(status.remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(status.reset_epoch_secs()));
}

/// A terminal over-quota decision. Never retried by this crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaRejection {
    status: RateLimitStatus,
    retry_after_secs: u64,
    message: String,
}

impl QuotaRejection {
    pub(crate) fn new(status: RateLimitStatus, now_millis: u64, message: String) -> Self {
        let retry_after_secs = status.retry_after_secs(now_millis);
        Self { status, retry_after_secs, message }
    }

    pub fn status(&self) -> &RateLimitStatus {
        &self.status
    }

    pub fn retry_after_secs(&self) -> u64 {
        self.retry_after_secs
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// `{"success":false,"message":...,"retryAfter":...}`
    pub fn body(&self) -> serde_json::Value {
        serde_json::json!({
            "success": false,
            "message": self.message,
            "retryAfter": self.retry_after_secs,
        })
    }

    /// `429` with the JSON body, quota headers (`remaining = 0`), and `Retry-After`.
    pub fn into_response<B: From<String>>(self) -> Response<B> {
        let mut response = Response::new(B::from(self.body().to_string()));
        *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;
        let headers = response.headers_mut();
        let exhausted = RateLimitStatus { remaining: 0, ..self.status };
        apply_quota_headers(headers, &exhausted);
        headers.insert(RETRY_AFTER, HeaderValue::from(self.retry_after_secs));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        response
    }
}

impl std::fmt::Display for QuotaRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (retry after {}s)", self.message, self.retry_after_secs)
    }
}

impl std::error::Error for QuotaRejection {}

/// A layer that enforces a [`RateLimiter`] on inbound HTTP requests.
pub struct RateLimitLayer<K = ForwardedFor> {
    limiter: Arc<RateLimiter>,
    keys: Arc<K>,
}

// The extractor is shared behind an `Arc`, so cloning never needs `K: Clone`.
impl<K> Clone for RateLimitLayer<K> {
    fn clone(&self) -> Self {
        Self { limiter: Arc::clone(&self.limiter), keys: Arc::clone(&self.keys) }
    }
}

impl RateLimitLayer<ForwardedFor> {
    /// Key requests by client address.
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter, keys: Arc::new(ForwardedFor) }
    }
}

impl<K> RateLimitLayer<K> {
    /// Key requests with a custom extractor.
    pub fn with_keys(limiter: Arc<RateLimiter>, keys: K) -> Self {
        Self { limiter, keys: Arc::new(keys) }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }
}

impl<S, K> Layer<S> for RateLimitLayer<K> {
    type Service = RateLimitService<S, K>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService { inner, limiter: self.limiter.clone(), keys: self.keys.clone() }
    }
}

/// Middleware service produced by [`RateLimitLayer`].
pub struct RateLimitService<S, K = ForwardedFor> {
    inner: S,
    limiter: Arc<RateLimiter>,
    keys: Arc<K>,
}

impl<S: Clone, K> Clone for RateLimitService<S, K> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            limiter: Arc::clone(&self.limiter),
            keys: Arc::clone(&self.keys),
        }
    }
}

impl<S, K, ReqBody, ResBody> Service<Request<ReqBody>> for RateLimitService<S, K>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    K: KeyExtractor + 'static,
    ReqBody: Send + 'static,
    ResBody: From<String> + Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        // counted before the handler runs; the headers reflect post-increment state
        let key = self.keys.key(req.headers());
        let decision = self.limiter.admit(&key);

        // the clone is not ready; keep the one poll_ready was called on
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            match decision {
                Err(rejection) => Ok(rejection.into_response()),
                Ok(status) => {
                    let mut response = inner.call(req).await?;
                    apply_quota_headers(response.headers_mut(), &status);
                    Ok(response)
                }
            }
        })
    }
}
