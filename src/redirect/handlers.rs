use axum::{
    extract::{Path, State},
    http::{
        header::{self, HeaderMap, HeaderName, HeaderValue},
        StatusCode,
    },
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::Serialize;
use std::sync::Arc;

use super::middleware::ClientAddress;
use crate::config::TrustedProxyMode;
use crate::limiter::RateLimiter;
use crate::resolver::{Resolution, ResolveRequest, Resolver, Validity};

pub const CACHE_HIT_HEADER: &str = "x-redrx-cache-hit";

pub struct RedirectState {
    pub resolver: Arc<Resolver>,
    pub limiter: Arc<RateLimiter>,
    pub trusted_proxy_mode: TrustedProxyMode,
}

/// Body of the interstitial response; the warning page itself is rendered
/// by the frontend.
#[derive(Debug, Serialize)]
pub struct InterstitialView {
    pub short_code: String,
    pub target_url: String,
    pub splash_page: bool,
    pub sensitive_warning: bool,
}

fn cache_hit_header(cache_hit: bool) -> [(HeaderName, HeaderValue); 1] {
    [(
        HeaderName::from_static(CACHE_HIT_HEADER),
        HeaderValue::from_static(if cache_hit { "true" } else { "false" }),
    )]
}

fn header_string(headers: &HeaderMap, name: HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Resolve a short code and answer with a redirect, an interstitial or a
/// rejection.
pub async fn redirect_url(
    State(state): State<Arc<RedirectState>>,
    Path(code): Path<String>,
    Extension(ClientAddress(client_ip)): Extension<ClientAddress>,
    headers: HeaderMap,
) -> Response {
    let request = ResolveRequest {
        short_code: code,
        client_ip: client_ip.to_string(),
        user_agent: header_string(&headers, header::USER_AGENT).unwrap_or_default(),
        referrer: header_string(&headers, header::REFERER).unwrap_or_else(|| "Direct".to_string()),
    };

    let (record, validity, cache_hit) = match state.resolver.resolve(&request).await {
        Ok(Resolution::Found {
            record,
            validity,
            cache_hit,
        }) => (record, validity, cache_hit),
        Ok(Resolution::NotFound) => {
            return (StatusCode::NOT_FOUND, "URL not found").into_response();
        }
        Err(err) => {
            tracing::error!(short_code = %request.short_code, error = %err, "failed to resolve short code");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response();
        }
    };

    let cache_header = cache_hit_header(cache_hit);

    match validity {
        Validity::Disabled => {
            (StatusCode::GONE, cache_header, "This link has been deactivated").into_response()
        }
        Validity::Expired => {
            (StatusCode::GONE, cache_header, "This link has expired").into_response()
        }
        Validity::Restricted => (
            StatusCode::FORBIDDEN,
            cache_header,
            "Access denied: Your IP is not allowed",
        )
            .into_response(),
        Validity::Interstitial { sensitive_warning } => (
            StatusCode::OK,
            cache_header,
            Json(InterstitialView {
                short_code: record.short_code,
                target_url: record.target_url,
                splash_page: record.splash_page,
                sensitive_warning,
            }),
        )
            .into_response(),
        Validity::Active => match HeaderValue::try_from(record.target_url.as_str()) {
            Ok(location) => (
                StatusCode::FOUND,
                cache_header,
                [(header::LOCATION, location)],
            )
                .into_response(),
            Err(err) => {
                tracing::error!(short_code = %record.short_code, error = %err, "target URL is not a valid Location header");
                (StatusCode::INTERNAL_SERVER_ERROR, cache_header, "Internal server error")
                    .into_response()
            }
        },
    }
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    #[derive(Serialize)]
    struct HealthResponse {
        status: String,
    }

    Json(HealthResponse {
        status: "OK".to_string(),
    })
}
