//! In-memory window storage.
//!
//! A single coarse `Mutex` guards the map. Each operation, the sweep included, holds it for
//! one short pass and never across an await, so reads and writes for unrelated keys only
//! contend for that instant.

use super::{duration_millis, RateLimitEntry};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Default)]
pub(crate) struct WindowStore {
    entries: Mutex<HashMap<String, RateLimitEntry>>,
}

impl WindowStore {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, RateLimitEntry>> {
        // every critical section leaves the map consistent, so a poisoned guard is usable
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Read-check-then-write for one key under the lock.
    pub(crate) fn increment(&self, key: &str, now: u64, window: Duration) -> RateLimitEntry {
        let mut entries = self.lock();
        match entries.get_mut(key) {
            Some(entry) if now < entry.window_reset_at => {
                entry.count = entry.count.saturating_add(1);
                *entry
            }
            _ => {
                // expired windows are replaced, never mutated
                let fresh = RateLimitEntry {
                    count: 1,
                    window_reset_at: now.saturating_add(duration_millis(window)),
                };
                entries.insert(key.to_string(), fresh);
                fresh
            }
        }
    }

    pub(crate) fn get(&self, key: &str) -> Option<RateLimitEntry> {
        self.lock().get(key).copied()
    }

    pub(crate) fn remove(&self, key: &str) -> bool {
        self.lock().remove(key).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    pub(crate) fn sweep(&self, now: u64) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.window_reset_at >= now);
        before - entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_hit_opens_window() {
        let store = WindowStore::default();
        let entry = store.increment("k", 100, Duration::from_millis(50));
        assert_eq!(entry, RateLimitEntry { count: 1, window_reset_at: 150 });
    }

    #[test]
    fn hit_at_reset_instant_opens_new_window() {
        let store = WindowStore::default();
        store.increment("k", 0, Duration::from_millis(50));
        store.increment("k", 49, Duration::from_millis(50));
        let entry = store.increment("k", 50, Duration::from_millis(50));
        assert_eq!(entry, RateLimitEntry { count: 1, window_reset_at: 100 });
    }

    #[test]
    fn sweep_keeps_entries_resetting_now() {
        let store = WindowStore::default();
        store.increment("a", 0, Duration::from_millis(10));
        store.increment("b", 0, Duration::from_millis(20));
        assert_eq!(store.sweep(10), 0);
        assert_eq!(store.sweep(11), 1);
        assert!(store.get("a").is_none());
        assert!(store.get("b").is_some());
    }
}
