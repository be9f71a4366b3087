use std::fmt;
use std::time::Duration;

/// Events emitted while an outbound call runs through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyEvent {
    Retry(RetryEvent),
    Timeout(TimeoutEvent),
    RateLimit(RateLimitEvent),
    Dedup(DedupEvent),
    /// Emitted once per pipeline call, after every stage has finished.
    Request(RequestOutcome),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryEvent {
    /// A retry is about to be made after sleeping `delay`.
    Attempt {
        /// 1-indexed retry number
        attempt: usize,
        delay: Duration,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutEvent {
    Occurred { timeout: Duration },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitEvent {
    /// The outbound limiter refused the call before it started.
    Rejected { limiter: String, key: String, retry_after: Duration },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DedupEvent {
    /// The call joined one already in flight for `key`.
    Joined { key: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Success { duration: Duration },
    Failure { duration: Duration },
}

impl RequestOutcome {
    pub fn duration(&self) -> Duration {
        match self {
            RequestOutcome::Success { duration } | RequestOutcome::Failure { duration } => *duration,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, RequestOutcome::Failure { .. })
    }
}

impl fmt::Display for PolicyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyEvent::Retry(event) => write!(f, "Retry::{}", event),
            PolicyEvent::Timeout(event) => write!(f, "Timeout::{}", event),
            PolicyEvent::RateLimit(event) => write!(f, "RateLimit::{}", event),
            PolicyEvent::Dedup(event) => write!(f, "Dedup::{}", event),
            PolicyEvent::Request(event) => write!(f, "Request::{}", event),
        }
    }
}

impl fmt::Display for RetryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryEvent::Attempt { attempt, delay } => {
                write!(f, "Attempt(#{}, delay={:?})", attempt, delay)
            }
        }
    }
}

impl fmt::Display for TimeoutEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutEvent::Occurred { timeout } => write!(f, "Occurred(timeout={:?})", timeout),
        }
    }
}

impl fmt::Display for RateLimitEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateLimitEvent::Rejected { limiter, key, retry_after } => {
                write!(f, "Rejected({}/{}, retry_after={:?})", limiter, key, retry_after)
            }
        }
    }
}

impl fmt::Display for DedupEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DedupEvent::Joined { key } => write!(f, "Joined({})", key),
        }
    }
}

impl fmt::Display for RequestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestOutcome::Success { duration } => write!(f, "Success(duration={:?})", duration),
            RequestOutcome::Failure { duration } => write!(f, "Failure(duration={:?})", duration),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formats() {
        let event = PolicyEvent::RateLimit(RateLimitEvent::Rejected {
            limiter: "redeem".into(),
            key: "admin-1".into(),
            retry_after: Duration::from_secs(12),
        });
        assert_eq!(event.to_string(), "RateLimit::Rejected(redeem/admin-1, retry_after=12s)");

        let event = PolicyEvent::Dedup(DedupEvent::Joined { key: "redeem:ABC".into() });
        assert_eq!(event.to_string(), "Dedup::Joined(redeem:ABC)");

        let event = PolicyEvent::Timeout(TimeoutEvent::Occurred { timeout: Duration::from_secs(15) });
        assert_eq!(event.to_string(), "Timeout::Occurred(timeout=15s)");
    }

    #[test]
    fn outcome_accessors() {
        let failed = RequestOutcome::Failure { duration: Duration::from_millis(2500) };
        assert!(failed.is_failure());
        assert_eq!(failed.duration(), Duration::from_millis(2500));
    }
}
