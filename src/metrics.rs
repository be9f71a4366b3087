//! Latency and error accounting for outbound calls.
//!
//! [`PerformanceMonitor`] is a cheap-to-clone handle over shared atomic counters. Every clone
//! records into the same accumulator, so one monitor can be shared by all pipelines in a
//! process. Rates are derived on [`snapshot`](PerformanceMonitor::snapshot).

use crate::clock::{Clock, SystemClock};
use crate::rate_limit::duration_millis;
use crate::sweep::{sweep_period, SweeperHandle};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Calls slower than this are counted as slow.
pub const DEFAULT_SLOW_THRESHOLD: Duration = Duration::from_millis(2000);
/// Interval of [`PerformanceMonitor::spawn_hourly_reset`].
pub const RESET_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Default)]
struct Counters {
    requests: AtomicU64,
    total_ms: AtomicU64,
    errors: AtomicU64,
    slow: AtomicU64,
    last_reset: AtomicU64,
}

/// Point-in-time view of the accumulator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerformanceSnapshot {
    pub request_count: u64,
    pub total_response_time_ms: u64,
    /// `total / count`, or 0 with no requests.
    pub average_response_time_ms: f64,
    pub error_count: u64,
    /// Percentage in `[0, 100]`.
    pub error_rate: f64,
    pub slow_request_count: u64,
    /// Percentage in `[0, 100]`.
    pub slow_request_rate: f64,
    /// Epoch millis of the last reset (or construction).
    pub last_reset: u64,
}

#[derive(Debug, Clone)]
pub struct PerformanceMonitor {
    counters: Arc<Counters>,
    slow_threshold_ms: u64,
    clock: Arc<dyn Clock>,
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl PerformanceMonitor {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }

    pub fn with_clock<C: Clock + 'static>(clock: C) -> Self {
        let monitor = Self {
            counters: Arc::new(Counters::default()),
            slow_threshold_ms: duration_millis(DEFAULT_SLOW_THRESHOLD),
            clock: Arc::new(clock),
        };
        monitor.counters.last_reset.store(monitor.clock.now_millis(), Ordering::Relaxed);
        monitor
    }

    pub fn with_slow_threshold(mut self, threshold: Duration) -> Self {
        self.slow_threshold_ms = duration_millis(threshold);
        self
    }

    pub fn slow_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_threshold_ms)
    }

    /// Record one finished call.
    pub fn record(&self, response_time: Duration, is_error: bool) {
        let ms = duration_millis(response_time);
        let c = &self.counters;
        c.requests.fetch_add(1, Ordering::Relaxed);
        c.total_ms.fetch_add(ms, Ordering::Relaxed);
        if is_error {
            c.errors.fetch_add(1, Ordering::Relaxed);
        }
        if ms > self.slow_threshold_ms {
            c.slow.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(response_time_ms = ms, "slow request");
        }
    }

    pub fn snapshot(&self) -> PerformanceSnapshot {
        let c = &self.counters;
        let request_count = c.requests.load(Ordering::Relaxed);
        let total_response_time_ms = c.total_ms.load(Ordering::Relaxed);
        let error_count = c.errors.load(Ordering::Relaxed);
        let slow_request_count = c.slow.load(Ordering::Relaxed);
        let ratio = |part: u64, scale: f64| {
            if request_count == 0 {
                0.0
            } else {
                part as f64 / request_count as f64 * scale
            }
        };
        PerformanceSnapshot {
            request_count,
            total_response_time_ms,
            average_response_time_ms: ratio(total_response_time_ms, 1.0),
            error_count,
            error_rate: ratio(error_count, 100.0),
            slow_request_count,
            slow_request_rate: ratio(slow_request_count, 100.0),
            last_reset: c.last_reset.load(Ordering::Relaxed),
        }
    }

    /// Zero every counter and stamp `last_reset`.
    pub fn reset(&self) {
        let c = &self.counters;
        c.requests.store(0, Ordering::Relaxed);
        c.total_ms.store(0, Ordering::Relaxed);
        c.errors.store(0, Ordering::Relaxed);
        c.slow.store(0, Ordering::Relaxed);
        c.last_reset.store(self.clock.now_millis(), Ordering::Relaxed);
    }

    /// Reset every hour until the handle is dropped.
    pub fn spawn_hourly_reset(&self) -> SweeperHandle {
        self.spawn_reset(RESET_INTERVAL)
    }

    /// Reset every `every`, raised to at least [`MIN_SWEEP_INTERVAL`](crate::sweep::MIN_SWEEP_INTERVAL).
    pub fn spawn_reset(&self, every: Duration) -> SweeperHandle {
        let every = sweep_period(every, "performance monitor");
        let monitor = self.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let before = monitor.snapshot();
                monitor.reset();
                tracing::info!(
                    requests = before.request_count,
                    avg_ms = before.average_response_time_ms,
                    error_rate = before.error_rate,
                    "performance counters reset"
                );
            }
        });
        SweeperHandle::from_task(task)
    }
}
