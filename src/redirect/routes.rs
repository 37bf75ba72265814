use axum::{middleware, routing::get, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::handlers::{health_check, redirect_url, RedirectState};
use super::middleware::rate_limit;

pub fn create_redirect_router(state: Arc<RedirectState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(
            "/{code}",
            get(redirect_url).layer(middleware::from_fn_with_state(
                Arc::clone(&state),
                rate_limit,
            )),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
