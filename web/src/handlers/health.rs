//! Health check endpoints.
//!
//! Used by load balancers and orchestrators to check the bridge process.

use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;

/// Liveness check.
///
/// Returns 200 OK while the process is serving HTTP. Does not touch the broker.
///
/// # Endpoint
///
/// ```text
/// GET /health
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

/// Readiness report.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Readiness {
    /// Always `"ready"` when served
    pub status: &'static str,
    /// Calls currently awaiting a reply
    pub in_flight: usize,
}

/// Readiness check with bridge diagnostics.
///
/// # Endpoint
///
/// ```text
/// GET /health/ready
/// ```
///
/// # Response
///
/// ```json
/// { "status": "ready", "in_flight": 3 }
/// ```
#[allow(clippy::unused_async)]
pub async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<Readiness>) {
    (
        StatusCode::OK,
        Json(Readiness {
            status: "ready",
            in_flight: state.bridge().in_flight(),
        }),
    )
}
