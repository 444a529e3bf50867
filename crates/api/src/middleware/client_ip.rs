//! Client address extractor for Axum handlers.

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;
use replay_core::geo::client_ip;

/// The caller's IP: first `X-Forwarded-For` entry, then `X-Real-IP`, then
/// the socket peer address. `None` when none of these is available, e.g.
/// when the router is driven without connection info.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIp(pub Option<String>);

impl<S: Send + Sync> FromRequestParts<S> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let forwarded_for = header("x-forwarded-for");
        let real_ip = header("x-real-ip");
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string());

        Ok(ClientIp(client_ip(
            forwarded_for.as_deref(),
            real_ip.as_deref(),
            peer.as_deref(),
        )))
    }
}
