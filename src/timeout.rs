//! Per-attempt deadline for outbound calls.
//!
//! The operation is raced against a timer. When the timer wins, the operation's future is
//! dropped, which cancels any cancellable I/O it was driving; its eventual result is never
//! observed.

use crate::error::BuildError;
use crate::ResilienceError;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Default outbound timeout (30 s).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Timeout used on the redemption path (15 s).
pub const REDEMPTION_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutPolicy {
    duration: Duration,
}

impl TimeoutPolicy {
    /// Create a timeout policy. The duration must be non-zero and finite.
    pub fn new(duration: Duration) -> Result<Self, BuildError> {
        if duration.is_zero() || duration == Duration::MAX {
            return Err(BuildError::InvalidTimeout(duration));
        }
        Ok(Self { duration })
    }

    /// The 15 s redemption-path timeout.
    pub const fn redemption() -> Self {
        Self { duration: REDEMPTION_TIMEOUT }
    }

    /// The deadline applied to each attempt.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub async fn execute<T, E, Fut, Op>(&self, operation: Op) -> Result<T, ResilienceError<E>>
    where
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
        Op: FnOnce() -> Fut,
    {
        let start = Instant::now();

        match tokio::time::timeout(self.duration, operation()).await {
            Ok(result) => result,
            Err(_) => {
                let elapsed = start.elapsed();
                tracing::warn!(?elapsed, timeout = ?self.duration, "operation timed out");
                Err(ResilienceError::Timeout { elapsed, timeout: self.duration })
            }
        }
    }
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self { duration: DEFAULT_TIMEOUT }
    }
}
