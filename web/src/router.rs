//! HTTP router for the bridge.

use crate::handlers::{bridge_request, health_check, readiness};
use crate::middleware::request_id_layer;
use crate::state::AppState;
use axum::{Router, extract::DefaultBodyLimit, routing::get};
use tower_http::trace::TraceLayer;

/// Default request body limit (1 MiB, the broker's default message size).
pub const DEFAULT_BODY_LIMIT: usize = 1024 * 1024;

/// Build the application router.
///
/// - `GET /health`: liveness
/// - `GET /health/ready`: readiness with the in-flight call count
/// - anything else, any method: bridged
#[must_use]
pub fn router(state: AppState) -> Router {
    router_with_body_limit(state, DEFAULT_BODY_LIMIT)
}

/// Build the application router with a custom body limit in bytes.
#[must_use]
pub fn router_with_body_limit(state: AppState, body_limit: usize) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/health/ready", get(readiness))
        .fallback(bridge_request)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(request_id_layer())
        .with_state(state)
}
