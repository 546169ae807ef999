//! Explicit per-request context handed to handlers.

use crate::auth::{Authenticated, TraceId};
use crate::error::ApiError;
use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::HeaderMap;
use axum::http::request::Parts;
use std::net::SocketAddr;

/// What a handler knows about the caller.
#[derive(Clone, Debug)]
pub struct RequestContext {
    pub trace_id: TraceId,
    /// Best-effort caller address, recorded on new sessions.
    pub client_address: String,
}

/// Resolve the caller address: `Client-IP`, then the first `X-Forwarded-For`
/// entry, then the socket peer, then `"unknown"`.
pub fn client_address(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    if let Some(ip) = header("client-ip") {
        return ip.to_string();
    }
    if let Some(forwarded) = header("x-forwarded-for")
        && let Some(first) = forwarded.split(',').next().map(str::trim)
        && !first.is_empty()
    {
        return first.to_string();
    }
    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        // Handlers must never run for a request the auth middleware did not accept.
        if parts.extensions.get::<Authenticated>().is_none() {
            return Err(ApiError::Unauthorized(
                "authentication required".to_string(),
            ));
        }

        let trace_id = parts
            .extensions
            .get::<TraceId>()
            .cloned()
            .unwrap_or_default();
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ci| ci.0);

        Ok(Self {
            trace_id,
            client_address: client_address(&parts.headers, peer),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, HeaderValue::from_static(v));
        }
        map
    }

    #[test]
    fn test_client_address_precedence() {
        let peer: SocketAddr = "192.0.2.9:4000".parse().unwrap();

        let h = headers(&[("client-ip", "198.51.100.1"), ("x-forwarded-for", "203.0.113.5")]);
        assert_eq!(client_address(&h, Some(peer)), "198.51.100.1");

        let h = headers(&[("x-forwarded-for", "203.0.113.5, 10.0.0.1")]);
        assert_eq!(client_address(&h, Some(peer)), "203.0.113.5");

        assert_eq!(client_address(&HeaderMap::new(), Some(peer)), "192.0.2.9");
        assert_eq!(client_address(&HeaderMap::new(), None), "unknown");
    }
}
