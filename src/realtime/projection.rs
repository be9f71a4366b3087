use super::event::{EventKind, QueueUpdateEvent};
use std::collections::VecDeque;

/// Events kept in the ring before the oldest is discarded.
pub const DEFAULT_HISTORY_CAPACITY: usize = 50;

/// Where the client is in its connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionPhase {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Waiting out the reconnect delay.
    Reconnecting,
}

/// Derived view of the server's queue. Cached server truth, possibly stale between events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectionState {
    pub connected: bool,
    /// Epoch millis of the last successfully parsed event.
    pub last_update_at: Option<u64>,
    /// Overwritten by every `queue_status` event that carries a count.
    pub pending_count: u32,
}

/// What subscribers see: the connection state and the newest-first event ring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueProjection {
    phase: ConnectionPhase,
    state: ConnectionState,
    updates: VecDeque<QueueUpdateEvent>,
    capacity: usize,
    reconnect_scheduled: bool,
}

impl Default for QueueProjection {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl QueueProjection {
    pub fn new(capacity: usize) -> Self {
        Self {
            phase: ConnectionPhase::Disconnected,
            state: ConnectionState::default(),
            updates: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            reconnect_scheduled: false,
        }
    }

    /// Fold one parsed event in at `now_millis`.
    pub fn apply(&mut self, event: QueueUpdateEvent, now_millis: u64) {
        if event.kind == EventKind::QueueStatus {
            if let Some(count) = event.pending_count {
                self.state.pending_count = count;
            }
        }
        self.state.last_update_at = Some(now_millis);
        self.updates.push_front(event);
        self.updates.truncate(self.capacity);
    }

    /// Empty the ring. Connection state is untouched.
    pub fn clear_updates(&mut self) {
        self.updates.clear();
    }

    pub(crate) fn set_phase(&mut self, phase: ConnectionPhase) {
        self.phase = phase;
        self.state.connected = phase == ConnectionPhase::Connected;
    }

    pub(crate) fn set_reconnect_scheduled(&mut self, scheduled: bool) {
        self.reconnect_scheduled = scheduled;
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state.connected
    }

    pub fn pending_count(&self) -> u32 {
        self.state.pending_count
    }

    /// Events, newest first.
    pub fn updates(&self) -> impl Iterator<Item = &QueueUpdateEvent> {
        self.updates.iter()
    }

    pub fn latest(&self) -> Option<&QueueUpdateEvent> {
        self.updates.front()
    }

    pub fn len(&self) -> usize {
        self.updates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether a reconnect is pending.
    pub fn reconnect_scheduled(&self) -> bool {
        self.reconnect_scheduled
    }
}
