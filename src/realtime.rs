//! Live projection of the server's switch-queue events.
//!
//! [`RealtimeQueueClient`] owns one persistent duplex connection. It heartbeats the
//! connection, reconnects after a drop, and folds every inbound [`QueueUpdateEvent`] into a
//! [`QueueProjection`] published through a `tokio::sync::watch` channel. The projection holds
//! a bounded newest-first ring of events plus the derived [`ConnectionState`].
//!
//! Connectivity problems never surface as errors to subscribers. They only show up as
//! `connected == false` and silence in the event stream.
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> (drop) -> Reconnecting -> Connecting -> ...
//! ```
//!
//! The transport is abstract ([`Connector`]/[`Connection`]); the `portcullis-ws` crate
//! provides the WebSocket implementation.

mod client;
mod event;
mod projection;
mod transport;

pub use client::{RealtimeConfig, RealtimeQueueClient, RealtimeQueueClientBuilder, DEFAULT_PING_PAYLOAD, SWITCH_QUEUE_PATH};
pub use event::{EventKind, EventTimestamp, ParseError, QueueUpdateEvent};
pub use projection::{ConnectionPhase, ConnectionState, QueueProjection, DEFAULT_HISTORY_CAPACITY};
pub use transport::{Connection, Connector, StaticToken, TokenProvider, TransportError};
