//! Client identifier resolution.

use axum::extract::{ConnectInfo, Request};
use axum::http::HeaderMap;
use std::net::SocketAddr;

/// Identifier used when nothing about the caller can be determined.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Resolves the rate limit key for a request.
///
/// The gate treats the returned string as opaque.
pub trait ClientIdentity: Send + Sync {
    /// Return the identifier for the client that sent `request`.
    fn identify(&self, request: &Request) -> String;
}

/// Resolves the caller's address, honoring proxy headers.
///
/// Order: first `X-Forwarded-For` hop, then `X-Real-IP`, then the peer
/// address from [`ConnectInfo`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RealIpResolver;

impl ClientIdentity for RealIpResolver {
    fn identify(&self, request: &Request) -> String {
        forwarded_for(request.headers())
            .or_else(|| real_ip(request.headers()))
            .or_else(|| {
                request
                    .extensions()
                    .get::<ConnectInfo<SocketAddr>>()
                    .map(|ConnectInfo(addr)| addr.ip().to_string())
            })
            .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
    }
}

fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn real_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-real-ip")
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
