//! Keyed in-memory cache with per-entry expiry.
//!
//! Expiry is enforced twice: lazily, when a read finds an expired entry (it is removed and
//! the read misses), and by [`spawn_sweeper`](crate::sweep::spawn_sweeper), which removes
//! expired entries whether or not they are read again.
//!
//! ```rust
//! use portcullis::TtlCache;
//! use std::time::Duration;
//!
//! let cache: TtlCache<String> = TtlCache::new(Duration::from_secs(300));
//! cache.set("users:page:1", "[...]".to_string(), Duration::from_secs(60));
//! assert_eq!(cache.get("users:page:1").as_deref(), Some("[...]"));
//! ```

use crate::clock::{Clock, SystemClock};
use crate::rate_limit::duration_millis;
use crate::sweep::Sweep;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Default TTL for [`TtlCache::set_default`] when none is configured (5 minutes).
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);
/// Sweep interval used by the presets (2 minutes).
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(2 * 60);

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    data: V,
    stored_at: u64,
    ttl_millis: u64,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: u64) -> bool {
        now > self.stored_at.saturating_add(self.ttl_millis)
    }
}

/// Hit/miss counters since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Generic TTL cache. Values are cloned out on read; wrap large values in `Arc`.
#[derive(Debug)]
pub struct TtlCache<V> {
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
    default_ttl: Duration,
    clock: Arc<dyn Clock>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V> TtlCache<V>
where
    V: Clone + Send + Sync,
{
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            default_ttl,
            clock: Arc::new(SystemClock),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Override the clock (deterministic tests).
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry<V>>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Value for `key` if present and not expired. Expired entries are removed.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now_millis();
        let mut entries = self.lock();
        let hit = match entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key);
                None
            }
            Some(entry) => Some(entry.data.clone()),
            None => None,
        };
        drop(entries);

        if hit.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        tracing::debug!(key, hit = hit.is_some(), "cache lookup");
        hit
    }

    /// Store `data` under `key`, replacing any prior entry and restarting its clock.
    pub fn set(&self, key: impl Into<String>, data: V, ttl: Duration) {
        let entry = CacheEntry {
            data,
            stored_at: self.clock.now_millis(),
            ttl_millis: duration_millis(ttl),
        };
        self.lock().insert(key.into(), entry);
    }

    /// Store with the cache's default TTL.
    pub fn set_default(&self, key: impl Into<String>, data: V) {
        self.set(key, data, self.default_ttl);
    }

    /// Remove `key`. Returns whether an entry existed.
    pub fn delete(&self, key: &str) -> bool {
        self.lock().remove(key).is_some()
    }

    /// Whether `key` holds a live entry. Does not touch hit/miss counters.
    pub fn contains(&self, key: &str) -> bool {
        let now = self.clock.now_millis();
        self.lock().get(key).is_some_and(|entry| !entry.is_expired(now))
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Stored entries, expired-but-unswept ones included.
    pub fn size(&self) -> usize {
        self.lock().len()
    }

    pub fn keys(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    /// Remove every key containing `pattern`. O(n) in the number of keys.
    pub fn invalidate(&self, pattern: &str) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|key, _| !key.contains(pattern));
        let removed = before - entries.len();
        tracing::debug!(pattern, removed, "cache invalidated");
        removed
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.size(),
        }
    }

    /// Cached value for `key`, or the result of `producer` (stored on success).
    ///
    /// Concurrent misses for the same key each run `producer`; pair with
    /// [`Deduplicator`](crate::Deduplicator) to coalesce them.
    pub async fn with_cache<F, Fut, E>(&self, key: &str, producer: F, ttl: Duration) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(hit) = self.get(key) {
            return Ok(hit);
        }
        let value = producer().await?;
        self.set(key, value.clone(), ttl);
        Ok(value)
    }
}

impl<V> Sweep for TtlCache<V>
where
    V: Clone + Send + Sync,
{
    fn sweep(&self) -> usize {
        let now = self.clock.now_millis();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    fn label(&self) -> &str {
        "ttl_cache"
    }
}

/// Key builders for the admin console's cached reads.
pub mod keys {
    pub fn list(resource: &str, page: u32, page_size: u32, filter: Option<&str>) -> String {
        match filter {
            Some(f) if !f.is_empty() => format!("{resource}:list:{page}:{page_size}:{f}"),
            _ => format!("{resource}:list:{page}:{page_size}"),
        }
    }

    pub fn item(resource: &str, id: impl std::fmt::Display) -> String {
        format!("{resource}:item:{id}")
    }

    pub fn stats(resource: &str) -> String {
        format!("{resource}:stats")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::convert::Infallible;
    use std::sync::atomic::AtomicUsize;

    fn cache(clock: &ManualClock) -> TtlCache<String> {
        TtlCache::new(DEFAULT_TTL).with_clock(clock.clone())
    }

    #[test]
    fn entry_expires_after_ttl() {
        let clock = ManualClock::new(0);
        let cache = cache(&clock);
        cache.set("k", "v".into(), Duration::from_millis(1000));
        assert_eq!(cache.get("k").as_deref(), Some("v"));

        clock.advance_millis(1000);
        assert_eq!(cache.get("k").as_deref(), Some("v"), "expiry is strictly after ttl");

        clock.advance_millis(100);
        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.size(), 0, "expired read removes the entry");
    }

    #[test]
    fn overwrite_restarts_clock() {
        let clock = ManualClock::new(0);
        let cache = cache(&clock);
        cache.set("k", "a".into(), Duration::from_millis(100));
        clock.advance_millis(90);
        cache.set("k", "b".into(), Duration::from_millis(100));
        clock.advance_millis(90);
        assert_eq!(cache.get("k").as_deref(), Some("b"));
    }

    #[test]
    fn delete_and_clear() {
        let clock = ManualClock::new(0);
        let cache = cache(&clock);
        cache.set_default("a", "1".into());
        cache.set_default("b", "2".into());
        assert!(cache.delete("a"));
        assert!(!cache.delete("a"));
        cache.clear();
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn invalidate_matches_substring() {
        let clock = ManualClock::new(0);
        let cache = cache(&clock);
        cache.set_default(keys::list("accounts", 1, 20, None), "p1".into());
        cache.set_default(keys::list("accounts", 2, 20, Some("active")), "p2".into());
        cache.set_default(keys::item("codes", 7), "c7".into());

        assert_eq!(cache.invalidate("accounts:"), 2);
        assert_eq!(cache.keys(), vec!["codes:item:7".to_string()]);
    }

    #[test]
    fn sweep_removes_unread_expired_entries() {
        let clock = ManualClock::new(0);
        let cache = cache(&clock);
        cache.set("short", "s".into(), Duration::from_millis(10));
        cache.set("long", "l".into(), Duration::from_secs(60));
        clock.advance_millis(11);

        assert_eq!(cache.sweep(), 1);
        assert!(cache.contains("long"));
        assert!(!cache.contains("short"));
    }

    #[test]
    fn stats_track_hits_and_misses() {
        let clock = ManualClock::new(0);
        let cache = cache(&clock);
        cache.get("missing");
        cache.set_default("k", "v".into());
        cache.get("k");
        cache.get("k");
        assert_eq!(cache.stats(), CacheStats { hits: 2, misses: 1, entries: 1 });
    }

    #[tokio::test]
    async fn with_cache_runs_producer_once_per_ttl() {
        let clock = ManualClock::new(0);
        let cache = cache(&clock);
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let value = cache
                .with_cache(
                    "dashboard",
                    || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, Infallible>("fresh".to_string())
                    },
                    Duration::from_secs(30),
                )
                .await
                .unwrap();
            assert_eq!(value, "fresh");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        clock.advance_millis(30_001);
        cache
            .with_cache(
                "dashboard",
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, Infallible>("again".to_string())
                },
                Duration::from_secs(30),
            )
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn with_cache_does_not_store_errors() {
        let clock = ManualClock::new(0);
        let cache = cache(&clock);
        let err = cache
            .with_cache("k", || async { Err::<String, _>("upstream down") }, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err, "upstream down");
        assert_eq!(cache.size(), 0);
    }
}
