//! Error types for admission and resilience policies
use std::fmt;
use std::time::Duration;

/// Unified error type surfaced by outbound policies.
///
/// A call produces exactly one of these. When retries are exhausted the last observed
/// error is returned unchanged, so `Inner` always carries the upstream's own reason.
#[derive(Debug, Clone)]
pub enum ResilienceError<E> {
    /// The attempt ran past its deadline.
    Timeout { elapsed: Duration, timeout: Duration },
    /// A rate limiter refused the call before it started
    RateLimited { limit: u32, retry_after: Duration },
    /// The operation itself failed.
    Inner(E),
}

impl<E: fmt::Display> fmt::Display for ResilienceError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout { elapsed, timeout } => {
                write!(f, "operation timed out after {:?} (limit: {:?})", elapsed, timeout)
            }
            Self::RateLimited { limit, retry_after } => {
                write!(
                    f,
                    "rate limit of {} requests exceeded; retry after {}s",
                    limit,
                    ceil_secs(*retry_after)
                )
            }
            Self::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for ResilienceError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
}

impl<E> ResilienceError<E> {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    pub fn is_inner(&self) -> bool {
        matches!(self, Self::Inner(_))
    }

    /// Take the operation's own error, if that is what this is.
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }

    /// The operation's own error, if any.
    pub fn as_inner(&self) -> Option<&E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }

    /// Access timeout details as `(elapsed, timeout)`.
    pub fn timeout_details(&self) -> Option<(Duration, Duration)> {
        match self {
            Self::Timeout { elapsed, timeout } => Some((*elapsed, *timeout)),
            _ => None,
        }
    }

    /// How long a rate-limited caller should wait.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }
}

/// Whole seconds, rounded up. Used for `Retry-After`.
pub(crate) fn ceil_secs(d: Duration) -> u64 {
    let millis = u64::try_from(d.as_millis()).unwrap_or(u64::MAX);
    millis.div_ceil(1000)
}

/// Errors produced while building a policy, store, or client.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("max_requests must be > 0")]
    ZeroMaxRequests,
    #[error("window must be > 0")]
    ZeroWindow,
    #[error("timeout must be non-zero and finite (got {0:?})")]
    InvalidTimeout(Duration),
    #[error("{name} must be > 0")]
    ZeroDuration { name: &'static str },
    #[error("history capacity must be > 0")]
    ZeroCapacity,
    #[error("invalid realtime endpoint `{endpoint}`: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
}

/// Errors produced while loading configuration.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("invalid config document: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid `{section}` section: {source}")]
    Invalid {
        section: String,
        #[source]
        source: BuildError,
    },
}
