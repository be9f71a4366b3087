use super::event::QueueUpdateEvent;
use super::projection::{ConnectionPhase, QueueProjection, DEFAULT_HISTORY_CAPACITY};
use super::transport::{Connection, Connector, TokenProvider};
use crate::backoff::Backoff;
use crate::clock::{Clock, SystemClock};
use crate::error::BuildError;
use crate::sleeper::{Sleeper, TokioSleeper};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use url::Url;

/// Path of the queue endpoint under the application origin.
pub const SWITCH_QUEUE_PATH: &str = "/api/ws/switch-queue";
/// Control frame sent on every heartbeat tick.
pub const DEFAULT_PING_PAYLOAD: &str = r#"{"type":"ping"}"#;

const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(15);
const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Connection settings for [`RealtimeQueueClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealtimeConfig {
    endpoint: Url,
    heartbeat: Duration,
    reconnect: Backoff,
    history_capacity: usize,
    ping_payload: String,
}

impl RealtimeConfig {
    /// Connect to a `ws://` or `wss://` endpoint.
    pub fn new(endpoint: &str) -> Result<Self, BuildError> {
        let url = Url::parse(endpoint).map_err(|e| invalid(endpoint, e.to_string()))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(invalid(endpoint, format!("unsupported scheme `{}`", url.scheme())));
        }
        Ok(Self {
            endpoint: url,
            heartbeat: DEFAULT_HEARTBEAT,
            reconnect: Backoff::constant(DEFAULT_RECONNECT_DELAY),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            ping_payload: DEFAULT_PING_PAYLOAD.to_string(),
        })
    }

    /// Derive the queue endpoint from the application's http(s) origin.
    ///
    /// ```rust
    /// use portcullis::realtime::RealtimeConfig;
    ///
    /// let config = RealtimeConfig::for_origin("https://admin.example.com").unwrap();
    /// assert_eq!(config.endpoint().as_str(), "wss://admin.example.com/api/ws/switch-queue");
    /// ```
    pub fn for_origin(origin: &str) -> Result<Self, BuildError> {
        let mut url = Url::parse(origin).map_err(|e| invalid(origin, e.to_string()))?;
        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => return Err(invalid(origin, format!("unsupported scheme `{other}`"))),
        };
        url.set_scheme(scheme).map_err(|()| invalid(origin, "cannot change scheme".into()))?;
        url.set_path(SWITCH_QUEUE_PATH);
        url.set_query(None);
        url.set_fragment(None);
        Self::new(url.as_str())
    }

    pub fn with_heartbeat(mut self, every: Duration) -> Result<Self, BuildError> {
        if every.is_zero() {
            return Err(BuildError::ZeroDuration { name: "heartbeat" });
        }
        self.heartbeat = every;
        Ok(self)
    }

    /// Fixed delay before each reconnect attempt.
    pub fn with_reconnect_delay(self, delay: Duration) -> Result<Self, BuildError> {
        if delay.is_zero() {
            return Err(BuildError::ZeroDuration { name: "reconnect delay" });
        }
        Ok(self.with_reconnect_backoff(Backoff::constant(delay)))
    }

    /// Reconnect schedule; attempt `n` waits `backoff.delay(n)`.
    pub fn with_reconnect_backoff(mut self, backoff: Backoff) -> Self {
        self.reconnect = backoff;
        self
    }

    pub fn with_history_capacity(mut self, capacity: usize) -> Result<Self, BuildError> {
        if capacity == 0 {
            return Err(BuildError::ZeroCapacity);
        }
        self.history_capacity = capacity;
        Ok(self)
    }

    pub fn with_ping_payload(mut self, payload: impl Into<String>) -> Self {
        self.ping_payload = payload.into();
        self
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn heartbeat(&self) -> Duration {
        self.heartbeat
    }

    pub fn reconnect(&self) -> &Backoff {
        &self.reconnect
    }

    pub fn history_capacity(&self) -> usize {
        self.history_capacity
    }

    pub fn ping_payload(&self) -> &str {
        &self.ping_payload
    }

    /// The endpoint with `?token=` appended.
    pub fn url_with_token(&self, token: &str) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut().append_pair("token", token);
        url
    }
}

fn invalid(endpoint: &str, reason: String) -> BuildError {
    BuildError::InvalidEndpoint { endpoint: endpoint.to_string(), reason }
}

/// Builder for [`RealtimeQueueClient`].
pub struct RealtimeQueueClientBuilder {
    config: RealtimeConfig,
    connector: Arc<dyn Connector>,
    tokens: Arc<dyn TokenProvider>,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
}

impl RealtimeQueueClientBuilder {
    pub fn clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Sleeper used for reconnect delays.
    pub fn sleeper<S: Sleeper + 'static>(mut self, sleeper: S) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    /// Start the connection task. Must be called within a tokio runtime.
    pub fn spawn(self) -> RealtimeQueueClient {
        let (state_tx, state_rx) = watch::channel(QueueProjection::new(self.config.history_capacity));
        let state_tx = Arc::new(state_tx);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let worker = Worker {
            config: self.config,
            connector: self.connector,
            tokens: self.tokens,
            clock: self.clock,
            sleeper: self.sleeper,
            state: state_tx.clone(),
            shutdown: shutdown_rx,
        };
        let task = tokio::spawn(worker.run());

        RealtimeQueueClient { state: state_tx, updates: state_rx, shutdown: shutdown_tx, task: Some(task) }
    }
}

/// Handle to the background connection task.
///
/// Dropping the handle signals the task to stop; [`shutdown`](Self::shutdown) also waits for it.
pub struct RealtimeQueueClient {
    state: Arc<watch::Sender<QueueProjection>>,
    updates: watch::Receiver<QueueProjection>,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for RealtimeQueueClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeQueueClient").field("phase", &self.updates.borrow().phase()).finish()
    }
}

impl RealtimeQueueClient {
    pub fn builder(
        config: RealtimeConfig,
        connector: Arc<dyn Connector>,
        tokens: Arc<dyn TokenProvider>,
    ) -> RealtimeQueueClientBuilder {
        RealtimeQueueClientBuilder {
            config,
            connector,
            tokens,
            clock: Arc::new(SystemClock),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Start with the system clock and tokio timers.
    pub fn spawn(
        config: RealtimeConfig,
        connector: Arc<dyn Connector>,
        tokens: Arc<dyn TokenProvider>,
    ) -> Self {
        Self::builder(config, connector, tokens).spawn()
    }

    /// Read-only stream of projections, one per change.
    pub fn subscribe(&self) -> watch::Receiver<QueueProjection> {
        self.updates.clone()
    }

    /// Copy of the current projection.
    pub fn snapshot(&self) -> QueueProjection {
        self.updates.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.updates.borrow().is_connected()
    }

    pub fn reconnect_scheduled(&self) -> bool {
        self.updates.borrow().reconnect_scheduled()
    }

    /// Whether the connection task is still alive. False after shutdown or when no token
    /// was available at startup. A token that goes missing later only delays reconnects.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Empty the event ring without touching the connection.
    pub fn clear_updates(&self) {
        self.state.send_modify(QueueProjection::clear_updates);
    }

    /// Stop the heartbeat, cancel any pending reconnect, close the connection, and wait.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for RealtimeQueueClient {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

enum SessionEnd {
    Lost,
    Shutdown,
}

struct Worker {
    config: RealtimeConfig,
    connector: Arc<dyn Connector>,
    tokens: Arc<dyn TokenProvider>,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    state: Arc<watch::Sender<QueueProjection>>,
    shutdown: watch::Receiver<bool>,
}

impl Worker {
    fn stopping(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn set_phase(&self, phase: ConnectionPhase) {
        self.state.send_modify(|p| p.set_phase(phase));
    }

    async fn run(mut self) {
        let mut attempt = 0usize;
        let mut first_pass = true;
        while !self.stopping() {
            match self.tokens.token() {
                Some(token) => {
                    self.set_phase(ConnectionPhase::Connecting);
                    let url = self.config.url_with_token(&token);
                    let connected = tokio::select! {
                        biased;
                        _ = self.shutdown.changed() => break,
                        result = self.connector.connect(&url) => result,
                    };
                    match connected {
                        Ok(connection) => {
                            attempt = 0;
                            self.set_phase(ConnectionPhase::Connected);
                            tracing::info!(endpoint = %self.config.endpoint, "realtime queue connected");
                            if let SessionEnd::Shutdown = self.session(connection).await {
                                break;
                            }
                            tracing::info!(endpoint = %self.config.endpoint, "realtime queue disconnected");
                        }
                        Err(err) => {
                            tracing::warn!(endpoint = %self.config.endpoint, error = %err, "realtime connect failed");
                        }
                    }
                }
                // never authenticated: nothing to wait for
                None if first_pass => {
                    tracing::warn!(endpoint = %self.config.endpoint, "no session token; realtime queue not connected");
                    self.set_phase(ConnectionPhase::Disconnected);
                    return;
                }
                None => {
                    tracing::warn!(endpoint = %self.config.endpoint, "session token missing; retrying on the reconnect schedule");
                }
            }
            first_pass = false;

            attempt += 1;
            let delay = self.config.reconnect.delay(attempt);
            self.state.send_modify(|p| {
                p.set_phase(ConnectionPhase::Reconnecting);
                p.set_reconnect_scheduled(true);
            });
            tracing::debug!(?delay, attempt, "realtime reconnect scheduled");
            let cancelled = tokio::select! {
                biased;
                _ = self.shutdown.changed() => true,
                _ = self.sleeper.sleep(delay) => false,
            };
            self.state.send_modify(|p| p.set_reconnect_scheduled(false));
            if cancelled {
                break;
            }
        }
        self.set_phase(ConnectionPhase::Disconnected);
    }

    async fn session(&mut self, mut connection: Box<dyn Connection>) -> SessionEnd {
        let period = self.config.heartbeat;
        let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let end = loop {
            tokio::select! {
                biased;
                _ = self.shutdown.changed() => break SessionEnd::Shutdown,
                frame = connection.recv() => match frame {
                    Some(Ok(text)) => self.on_frame(&text),
                    Some(Err(err)) => {
                        tracing::warn!(error = %err, "realtime receive failed");
                        break SessionEnd::Lost;
                    }
                    None => break SessionEnd::Lost,
                },
                _ = heartbeat.tick() => {
                    // missed pongs are not treated as failure; the close event is authoritative
                    if let Err(err) = connection.send_text(&self.config.ping_payload).await {
                        tracing::debug!(error = %err, "heartbeat send failed");
                    }
                }
            }
        };

        drop(heartbeat);
        self.set_phase(ConnectionPhase::Disconnected);
        if let SessionEnd::Shutdown = end {
            if let Err(err) = connection.close().await {
                tracing::debug!(error = %err, "close after shutdown failed");
            }
        }
        end
    }

    fn on_frame(&self, text: &str) {
        match QueueUpdateEvent::parse(text) {
            Ok(event) => {
                let now = self.clock.now_millis();
                tracing::debug!(kind = ?event.kind, request_id = ?event.request_id, "queue event");
                self.state.send_modify(|p| p.apply(event, now));
            }
            Err(err) => tracing::warn!(error = %err, "dropping unparseable queue frame"),
        }
    }
}
