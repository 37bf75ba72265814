use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::debug;

use super::client_ip::extract_client_ip;
use super::handlers::RedirectState;

/// Client address as resolved from the trusted forwarding headers
#[derive(Copy, Clone, Debug)]
pub struct ClientAddress(pub IpAddr);

/// Per-client admission control, keyed by the resolved client address.
pub async fn rate_limit(
    State(state): State<Arc<RedirectState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let client_ip = extract_client_ip(request.headers(), peer.ip(), state.trusted_proxy_mode);

    if !state.limiter.admit(&client_ip.to_string()) {
        debug!(client_ip = %client_ip, "rate limit exceeded");
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({ "error": "Rate limit exceeded. Please try again later." })),
        )
            .into_response();
    }

    request.extensions_mut().insert(ClientAddress(client_ip));
    next.run(request).await
}
