use async_trait::async_trait;
use url::Url;

/// Transport failures. Never surfaced to subscribers; they trigger a reconnect.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("send failed: {0}")]
    Send(String),
    #[error("receive failed: {0}")]
    Receive(String),
    #[error("connection closed")]
    Closed,
}

/// Opens connections to the queue endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    /// `url` already carries the session token.
    async fn connect(&self, url: &Url) -> Result<Box<dyn Connection>, TransportError>;
}

/// One open duplex connection exchanging text frames.
#[async_trait]
pub trait Connection: Send {
    async fn send_text(&mut self, frame: &str) -> Result<(), TransportError>;

    /// Next inbound text frame. `None` once the peer has closed.
    async fn recv(&mut self) -> Option<Result<String, TransportError>>;

    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Supplies the session token read at each connect attempt.
pub trait TokenProvider: Send + Sync {
    /// `None` while the caller is not authenticated.
    fn token(&self) -> Option<String>;
}

impl<F> TokenProvider for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn token(&self) -> Option<String> {
        self()
    }
}

/// A fixed token, or none.
#[derive(Debug, Clone, Default)]
pub struct StaticToken(Option<String>);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(token.into()))
    }

    pub fn none() -> Self {
        Self(None)
    }
}

impl TokenProvider for StaticToken {
    fn token(&self) -> Option<String> {
        self.0.clone()
    }
}
