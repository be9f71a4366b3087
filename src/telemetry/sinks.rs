use super::events::PolicyEvent;
use futures::future::{ready, Ready};
use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use tower::Service;

/// A telemetry sink that consumes policy events.
pub trait TelemetrySink:
    tower::Service<PolicyEvent, Response = (), Error = Self::SinkError> + Clone + Send + 'static
{
    type SinkError: std::error::Error + Send + 'static;
}

/// Sends one event, waiting for `poll_ready` first.
///
/// Telemetry never fails a call: a sink that is not ready or errors just loses the event.
pub async fn emit_best_effort<S>(sink: S, event: PolicyEvent)
where
    S: tower::Service<PolicyEvent, Response = ()> + Send + Clone + 'static,
    S::Error: std::error::Error + Send + 'static,
    S::Future: Send + 'static,
{
    use tower::ServiceExt;

    if let Ok(mut ready_sink) = sink.ready_oneshot().await {
        let _ = ready_sink.call(event).await;
    }
}

// The built-in sinks record synchronously and are always ready.
macro_rules! recording_sink {
    ($($sink:ty),+ $(,)?) => {$(
        impl Service<PolicyEvent> for $sink {
            type Response = ();
            type Error = Infallible;
            type Future = Ready<Result<(), Infallible>>;

            fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
                Poll::Ready(Ok(()))
            }

            fn call(&mut self, event: PolicyEvent) -> Self::Future {
                self.record(event);
                ready(Ok(()))
            }
        }

        impl TelemetrySink for $sink {
            type SinkError = Infallible;
        }
    )+};
}

recording_sink!(NullSink, LogSink, MemorySink);

/// Discards all events. The pipeline default.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl NullSink {
    fn record(&self, _event: PolicyEvent) {}
}

/// Writes each event to `tracing`. Rejections and timeouts log at warn, the rest at debug.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;

impl LogSink {
    fn record(&self, event: PolicyEvent) {
        match event {
            PolicyEvent::RateLimit(_) | PolicyEvent::Timeout(_) => {
                tracing::warn!(event = %event, "admission event")
            }
            _ => tracing::debug!(event = %event, "admission event"),
        }
    }
}

/// Bounded in-memory log of recent events, oldest first. Mostly for tests and diagnostics.
#[derive(Clone, Debug)]
pub struct MemorySink {
    inner: Arc<Mutex<VecDeque<PolicyEvent>>>,
    capacity: usize,
    dropped: Arc<AtomicU64>,
}

impl MemorySink {
    const DEFAULT_CAPACITY: usize = 1_024;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    fn log(&self) -> MutexGuard<'_, VecDeque<PolicyEvent>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, event: PolicyEvent) {
        let mut log = self.log();
        if log.len() == self.capacity {
            log.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        log.push_back(event);
    }

    pub fn events(&self) -> Vec<PolicyEvent> {
        self.log().iter().cloned().collect()
    }

    /// Recorded events matching `filter`, oldest first.
    pub fn matching(&self, filter: impl Fn(&PolicyEvent) -> bool) -> Vec<PolicyEvent> {
        self.log().iter().filter(|e| filter(e)).cloned().collect()
    }

    pub fn clear(&self) {
        self.log().clear();
    }

    pub fn len(&self) -> usize {
        self.log().len()
    }

    pub fn is_empty(&self) -> bool {
        self.log().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Events pushed out by newer ones since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}
