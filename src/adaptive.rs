//! Live-tunable values shared between a store and its operators.
//!
//! Reads go through `ArcSwap` when the `arc-swap` feature is on (the default). Enabling
//! `adaptive-rwlock`, or building without `arc-swap`, uses a `RwLock` instead.

use std::sync::Arc;

#[cfg(all(feature = "arc-swap", not(feature = "adaptive-rwlock")))]
mod backend {
    use arc_swap::ArcSwap;
    use std::sync::Arc;

    #[cfg(test)]
    pub(super) const NAME: &str = "arc-swap";

    #[derive(Debug)]
    pub(super) struct Slot<T>(ArcSwap<T>);

    impl<T> Slot<T> {
        pub(super) fn new(value: T) -> Self {
            Self(ArcSwap::from_pointee(value))
        }

        pub(super) fn load(&self) -> Arc<T> {
            self.0.load_full()
        }

        pub(super) fn store(&self, value: T) {
            self.0.store(Arc::new(value));
        }
    }
}

#[cfg(any(not(feature = "arc-swap"), feature = "adaptive-rwlock"))]
mod backend {
    use std::sync::{Arc, RwLock};

    #[cfg(test)]
    pub(super) const NAME: &str = "rwlock";

    #[derive(Debug)]
    pub(super) struct Slot<T>(RwLock<Arc<T>>);

    impl<T> Slot<T> {
        pub(super) fn new(value: T) -> Self {
            Self(RwLock::new(Arc::new(value)))
        }

        pub(super) fn load(&self) -> Arc<T> {
            self.0.read().unwrap_or_else(|p| p.into_inner()).clone()
        }

        pub(super) fn store(&self, value: T) {
            *self.0.write().unwrap_or_else(|p| p.into_inner()) = Arc::new(value);
        }
    }
}

/// Cheap reads and whole-value replacement for shared settings.
///
/// Clones observe the same value, so a handle returned by e.g.
/// [`RateLimiter::limit_handle`](crate::RateLimiter::limit_handle) retunes the limiter that
/// produced it.
#[derive(Debug)]
pub struct DynamicConfig<T> {
    slot: Arc<backend::Slot<T>>,
}

impl<T> Clone for DynamicConfig<T> {
    fn clone(&self) -> Self {
        Self { slot: Arc::clone(&self.slot) }
    }
}

impl<T> DynamicConfig<T> {
    pub fn new(value: T) -> Self {
        Self { slot: Arc::new(backend::Slot::new(value)) }
    }

    /// Snapshot the current value.
    pub fn get(&self) -> Arc<T> {
        self.slot.load()
    }

    /// Replace the value; later `get` calls on every clone see it.
    pub fn set(&self, value: T) {
        self.slot.store(value);
    }
}
