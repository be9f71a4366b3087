//! WebSocket transport for `portcullis::realtime` (companion crate).
//!
//! [`WsConnector`] opens one `tokio-tungstenite` stream per connect attempt. Text frames are
//! handed to the client; ping, pong, and binary frames are skipped. Control-frame replies are
//! flushed by tungstenite on the next read or write.
//!
//! ```rust,no_run
//! use portcullis::realtime::{RealtimeConfig, RealtimeQueueClient, StaticToken};
//! use portcullis_ws::WsConnector;
//! use std::sync::Arc;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RealtimeConfig::for_origin("http://localhost:3000")?;
//! let client = RealtimeQueueClient::spawn(
//!     config,
//!     Arc::new(WsConnector::new()),
//!     Arc::new(StaticToken::new("session-token")),
//! );
//! let mut updates = client.subscribe();
//! updates.changed().await?;
//! println!("pending: {}", updates.borrow().pending_count());
//! # Ok(()) }
//! ```

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use portcullis::realtime::{Connection, Connector, TransportError};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Opens WebSocket connections with `tokio-tungstenite`.
#[derive(Debug, Clone)]
pub struct WsConnector {
    connect_timeout: Duration,
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl WsConnector {
    pub fn new() -> Self {
        Self { connect_timeout: DEFAULT_CONNECT_TIMEOUT }
    }

    /// Give up on the handshake after `timeout`; the client then schedules a reconnect.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Connection>, TransportError> {
        let handshake = tokio_tungstenite::connect_async(url.as_str());
        let (stream, response) = tokio::time::timeout(self.connect_timeout, handshake)
            .await
            .map_err(|_| TransportError::Connect(format!("handshake timed out after {:?}", self.connect_timeout)))?
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        tracing::debug!(host = url.host_str(), status = %response.status(), "websocket handshake complete");
        Ok(Box::new(WsConnection { stream, closed: false }))
    }
}

/// One open WebSocket stream.
pub struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    closed: bool,
}

impl std::fmt::Debug for WsConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsConnection").field("closed", &self.closed).finish()
    }
}

#[async_trait]
impl Connection for WsConnection {
    async fn send_text(&mut self, frame: &str) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.stream
            .send(Message::Text(frame.to_string()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        if self.closed {
            return None;
        }
        while let Some(message) = self.stream.next().await {
            match message {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Close(frame)) => {
                    tracing::debug!(?frame, "websocket closed by peer");
                    self.closed = true;
                    return None;
                }
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Binary(_) | Message::Frame(_)) => {}
                Err(e) => {
                    self.closed = true;
                    return Some(Err(TransportError::Receive(e.to_string())));
                }
            }
        }
        self.closed = true;
        None
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.stream.close(None).await.map_err(|e| TransportError::Send(e.to_string()))
    }
}
