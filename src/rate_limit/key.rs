//! Request-to-key derivation for inbound limiting.
//!
//! Forwarding headers are client-controlled. Only trust [`ForwardedFor`] when the service
//! sits behind a proxy that overwrites them.

use http::{HeaderMap, HeaderName};

/// Key used when no client address can be determined.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Derives the counter key for a request.
pub trait KeyExtractor: Send + Sync {
    fn key(&self, headers: &HeaderMap) -> String;
}

impl<F> KeyExtractor for F
where
    F: Fn(&HeaderMap) -> String + Send + Sync,
{
    fn key(&self, headers: &HeaderMap) -> String {
        self(headers)
    }
}

/// First hop of `X-Forwarded-For`, else `X-Real-IP`, else [`UNKNOWN_CLIENT`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ForwardedFor;

impl KeyExtractor for ForwardedFor {
    fn key(&self, headers: &HeaderMap) -> String {
        client_address(headers).unwrap_or(UNKNOWN_CLIENT).to_string()
    }
}

fn client_address(headers: &HeaderMap) -> Option<&str> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|chain| chain.split(',').next())
        .map(str::trim)
        .filter(|hop| !hop.is_empty());
    forwarded.or_else(|| {
        headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
    })
}

/// Keys by a single header (e.g. an authenticated session id), falling back to
/// [`ForwardedFor`] when the header is absent.
#[derive(Debug, Clone)]
pub struct HeaderKey {
    name: HeaderName,
}

impl HeaderKey {
    pub fn new(name: HeaderName) -> Self {
        Self { name }
    }
}

impl KeyExtractor for HeaderKey {
    fn key(&self, headers: &HeaderMap) -> String {
        headers
            .get(&self.name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| format!("{}:{}", self.name, v))
            .unwrap_or_else(|| ForwardedFor.key(headers))
    }
}
