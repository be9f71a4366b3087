//! Periodic eviction for the in-memory stores.
//!
//! One task per store, not one timer per key. The task only holds a `Weak` reference, so
//! dropping the last `Arc` to the store ends the sweep on its next tick; dropping the
//! returned [`SweeperHandle`] ends it immediately.

use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;

/// A store whose expired entries can be removed in one pass.
pub trait Sweep: Send + Sync {
    /// Remove every expired entry and return how many were removed.
    fn sweep(&self) -> usize;

    /// Label used in logs.
    fn label(&self) -> &str {
        "store"
    }
}

/// Owns a running sweep task. Aborts the task on drop.
#[derive(Debug)]
pub struct SweeperHandle {
    task: JoinHandle<()>,
}

impl SweeperHandle {
    pub(crate) fn from_task(task: JoinHandle<()>) -> Self {
        Self { task }
    }

    /// Stop sweeping now.
    pub fn stop(self) {
        drop(self);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Shortest period a background task will tick at.
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(1);

/// `tokio::time::interval` panics on a zero period; raise it to [`MIN_SWEEP_INTERVAL`].
pub(crate) fn sweep_period(every: Duration, label: &str) -> Duration {
    if every < MIN_SWEEP_INTERVAL {
        tracing::warn!(task = label, requested = ?every, "sweep interval raised to 1ms");
        return MIN_SWEEP_INTERVAL;
    }
    every
}

/// Spawn a task that calls [`Sweep::sweep`] every `every` (at least [`MIN_SWEEP_INTERVAL`]).
/// Must be called within a tokio runtime.
pub fn spawn_sweeper<T>(target: &Arc<T>, every: Duration) -> SweeperHandle
where
    T: Sweep + 'static,
{
    let every = sweep_period(every, target.label());
    let weak: Weak<T> = Arc::downgrade(target);
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // interval fires immediately; skip that tick so the first pass runs after `every`
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(store) = weak.upgrade() else {
                break;
            };
            let removed = store.sweep();
            if removed > 0 {
                tracing::debug!(store = store.label(), removed, "swept expired entries");
            }
        }
    });
    SweeperHandle { task }
}
