//! Single-flight deduplication of in-flight calls.
//!
//! Callers that present the same key while a call for that key is running share its result
//! instead of starting a second one. The map only holds weak handles, and the entry is removed
//! as soon as the call settles, successfully or not, so the next call with that key starts fresh.
//!
//! ```rust
//! use portcullis::{Deduplicator, ResilienceError};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let dedup: Deduplicator<u32, std::convert::Infallible> = Deduplicator::new();
//! let value = dedup.run("redeem:ABC", || async { Ok(7) }).await;
//! assert_eq!(value.unwrap(), 7);
//! assert!(dedup.is_empty());
//! # });
//! ```

use crate::ResilienceError;
use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

type Flight<T, E> = Shared<BoxFuture<'static, Result<T, ResilienceError<E>>>>;
type WeakFlight<T, E> = WeakShared<BoxFuture<'static, Result<T, ResilienceError<E>>>>;
type FlightMap<T, E> = HashMap<String, (u64, WeakFlight<T, E>)>;

/// Coalesces concurrent calls that share an idempotency key.
///
/// `T` and `E` must be `Clone` because every waiter receives its own copy of the settled
/// result. Wrap values in `Arc` when identity matters.
pub struct Deduplicator<T, E> {
    in_flight: Arc<Mutex<FlightMap<T, E>>>,
    next_id: Arc<AtomicU64>,
}

impl<T, E> Clone for Deduplicator<T, E> {
    fn clone(&self) -> Self {
        Self { in_flight: self.in_flight.clone(), next_id: self.next_id.clone() }
    }
}

impl<T, E> std::fmt::Debug for Deduplicator<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deduplicator").field("in_flight", &self.len()).finish()
    }
}

impl<T, E> Default for Deduplicator<T, E> {
    fn default() -> Self {
        Self { in_flight: Arc::new(Mutex::new(HashMap::new())), next_id: Arc::new(AtomicU64::new(0)) }
    }
}

impl<T, E> Deduplicator<T, E> {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FlightMap<T, E>> {
        self.in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of keys with a call in flight.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_in_flight(&self, key: &str) -> bool {
        let live = self.lock().get(key).and_then(|(_, weak)| weak.upgrade());
        // dropping the upgraded handle may settle the flight, which takes the lock
        live.is_some()
    }
}

impl<T, E> Deduplicator<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Run `operation` under `key`, or join the call already in flight for `key`.
    ///
    /// `operation` is only invoked when no call is in flight.
    pub async fn run<F, Fut>(&self, key: &str, operation: F) -> Result<T, ResilienceError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ResilienceError<E>>> + Send + 'static,
    {
        self.run_observed(key, operation).await.0
    }

    /// Like [`run`](Self::run), also reporting whether an existing call was joined.
    pub(crate) async fn run_observed<F, Fut>(
        &self,
        key: &str,
        operation: F,
    ) -> (Result<T, ResilienceError<E>>, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ResilienceError<E>>> + Send + 'static,
    {
        let (flight, joined) = {
            let mut map = self.lock();
            match map.get(key).and_then(|(_, weak)| weak.upgrade()) {
                Some(existing) => (existing, true),
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let flight = self.launch(key.to_string(), id, operation());
                    if let Some(weak) = flight.downgrade() {
                        map.insert(key.to_string(), (id, weak));
                    }
                    (flight, false)
                }
            }
        };
        if joined {
            tracing::debug!(key, "joined in-flight call");
        }
        (flight.await, joined)
    }

    fn launch<Fut>(&self, key: String, id: u64, operation: Fut) -> Flight<T, E>
    where
        Fut: Future<Output = Result<T, ResilienceError<E>>> + Send + 'static,
    {
        let registry = Arc::downgrade(&self.in_flight);
        let guard = Settle { registry, key, id };
        async move {
            // removal happens on settle and also if every waiter is dropped mid-flight
            let _guard = guard;
            operation.await
        }
        .boxed()
        .shared()
    }
}

/// Removes the map entry for one flight when dropped, unless a newer flight replaced it.
struct Settle<T, E> {
    registry: std::sync::Weak<Mutex<FlightMap<T, E>>>,
    key: String,
    id: u64,
}

impl<T, E> Drop for Settle<T, E> {
    fn drop(&mut self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut map = registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if map.get(&self.key).is_some_and(|(id, _)| *id == self.id) {
            map.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Upstream(&'static str);

    #[tokio::test(start_paused = true)]
    async fn concurrent_calls_share_one_invocation() {
        let dedup: Deduplicator<Arc<String>, Upstream> = Deduplicator::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let op = |calls: Arc<AtomicUsize>| {
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(Arc::new("redeemed".to_string()))
            }
        };

        let key = "redeem:ABC:e@x.com";
        let (a, b) = tokio::join!(dedup.run(key, op(calls.clone())), dedup.run(key, op(calls.clone())));

        let (a, b) = (a.unwrap(), b.unwrap());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(dedup.is_empty());
    }

    #[tokio::test]
    async fn failure_is_shared_then_forgotten() {
        let dedup: Deduplicator<u32, Upstream> = Deduplicator::new();
        let calls = AtomicUsize::new(0);

        let failing = || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ResilienceError::Inner(Upstream("code already used"))) }
        };
        let err = dedup.run("k", failing).await.unwrap_err();
        assert_eq!(err.into_inner(), Some(Upstream("code already used")));
        assert!(dedup.is_empty());

        let value = dedup
            .run("k", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(1) }
            })
            .await;
        assert_eq!(value.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2, "a settled key starts fresh");
    }

    #[tokio::test(start_paused = true)]
    async fn distinct_keys_do_not_coalesce() {
        let dedup: Deduplicator<&'static str, Upstream> = Deduplicator::new();
        let slow = |v: &'static str| {
            move || async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(v)
            }
        };
        let (a, b) = tokio::join!(dedup.run("a", slow("a")), dedup.run("b", slow("b")));
        assert_eq!((a.unwrap(), b.unwrap()), ("a", "b"));
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_flight_is_removed() {
        let dedup: Deduplicator<u32, Upstream> = Deduplicator::new();
        let pending = dedup.run("k", || std::future::pending());
        tokio::select! {
            _ = pending => unreachable!(),
            _ = tokio::time::sleep(Duration::from_millis(10)) => {}
        }
        assert!(!dedup.is_in_flight("k"));
        assert!(dedup.is_empty());
    }
}
