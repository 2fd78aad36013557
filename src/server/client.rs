//! Client identity for rate limiting.
//!
//! A trusted reverse proxy reports the real client in `X-Forwarded-For`; the
//! first address in that header wins. Without one (or when forwarded headers
//! are not trusted) the transport-level peer address is used.
//!
//! The peer address is only available when the server is run with
//! `into_make_service_with_connect_info::<SocketAddr>()`.

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, FromRequestParts};
use http::request::Parts;
use http::HeaderMap;

/// Header carrying the client address chain set by reverse proxies.
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Key used when no address can be determined.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Whether `X-Forwarded-For` is honored, stored as a request extension by the
/// router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForwardedForPolicy {
    pub trusted: bool,
}

impl Default for ForwardedForPolicy {
    fn default() -> Self {
        Self { trusted: true }
    }
}

/// Rate-limit identity of the requesting client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientKey(pub String);

impl ClientKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

/// Derive a client key from request headers and the peer address.
pub fn derive_client_key(
    headers: &HeaderMap,
    remote: Option<SocketAddr>,
    trust_forwarded_for: bool,
) -> String {
    if trust_forwarded_for {
        if let Some(forwarded) = first_forwarded_address(headers) {
            return forwarded;
        }
    }

    match remote {
        Some(addr) => addr.ip().to_string(),
        None => UNKNOWN_CLIENT.to_string(),
    }
}

fn first_forwarded_address(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(FORWARDED_FOR_HEADER)?.to_str().ok()?;
    let first = value.split(',').next()?.trim();
    if first.is_empty() {
        None
    } else {
        Some(first.to_string())
    }
}

impl<S> FromRequestParts<S> for ClientKey
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let policy = parts
            .extensions
            .get::<ForwardedForPolicy>()
            .copied()
            .unwrap_or_default();

        let remote = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);

        Ok(ClientKey(derive_client_key(
            &parts.headers,
            remote,
            policy.trusted,
        )))
    }
}
