//! Jitter strategies to prevent synchronized retry storms.
//!
//! - `None`: exact backoff delay, for tests and tightly controlled workflows.
//! - `Full`: uniform in `[0, delay]`.
//! - `Equal`: uniform in `[delay/2, delay]`.
//! - `Additive`: `delay + uniform[0, max)`, the default for outbound calls
//!   (`base * 2^attempt + random(0, 1s)`).
//!
//! RNG: `rand`'s thread-local RNG by default; deterministic RNGs can be injected via
//! [`Jitter::apply_with_rng`].

use rand::{rng, Rng};
use std::time::Duration;

/// Jitter strategy for randomizing retry delays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Jitter {
    None,
    Full,
    Equal,
    /// Adds a random amount in `[0, max)` on top of the delay.
    Additive(Duration),
}

impl Jitter {
    pub fn full() -> Self {
        Jitter::Full
    }

    pub fn equal() -> Self {
        Jitter::Equal
    }

    pub fn additive(max: Duration) -> Self {
        Jitter::Additive(max)
    }

    /// Apply jitter to a delay duration
    pub fn apply(&self, delay: Duration) -> Duration {
        let mut rng = rng();
        self.apply_with_rng(delay, &mut rng)
    }

    /// Apply jitter with a caller-supplied RNG.
    pub fn apply_with_rng<R: Rng>(&self, delay: Duration, rng: &mut R) -> Duration {
        let millis = as_millis_saturated(delay);
        match self {
            Jitter::None => delay,
            Jitter::Full => {
                if millis == 0 {
                    return Duration::ZERO;
                }
                Duration::from_millis(rng.random_range(0..=millis))
            }
            Jitter::Equal => {
                if millis == 0 {
                    return Duration::ZERO;
                }
                Duration::from_millis(rng.random_range(millis / 2..=millis))
            }
            Jitter::Additive(max) => {
                let spread = as_millis_saturated(*max);
                if spread == 0 {
                    return delay;
                }
                delay.saturating_add(Duration::from_millis(rng.random_range(0..spread)))
            }
        }
    }
}

fn as_millis_saturated(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
