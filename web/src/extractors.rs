//! Custom Axum extractors.
//!
//! - [`BridgedRequest`]: the whole HTTP request as a [`BridgeRequest`]
//! - [`RequestId`]: the request id assigned by the middleware
//!
//! # Examples
//!
//! ```ignore
//! async fn handler(
//!     State(state): State<AppState>,
//!     request_id: RequestId,
//!     BridgedRequest(request): BridgedRequest,
//! ) -> Result<Response, AppError> {
//!     tracing::info!(request_id = %request_id.0, path = %request.path, "Bridging");
//!     // ...
//! }
//! ```

use crate::error::AppError;
use axum::{
    async_trait,
    body::Bytes,
    extract::{FromRequest, FromRequestParts, Request},
    http::{HeaderMap, StatusCode, request::Parts},
};
use reqbridge_core::BridgeRequest;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Request id for log correlation.
///
/// Read from the extensions populated by
/// [`request_id_layer`](crate::middleware::request_id_layer); a fresh UUID v4
/// when the layer is not installed.
#[derive(Debug, Clone, Copy)]
pub struct RequestId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for RequestId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let request_id = parts
            .extensions
            .get::<Uuid>()
            .copied()
            .unwrap_or_else(Uuid::new_v4);

        Ok(Self(request_id))
    }
}

/// The HTTP request in bridge form: method, path, headers and raw body.
///
/// Repeated headers are joined with `", "`. Header values that are not valid
/// UTF-8 are dropped. The body size is bounded by the router's body limit.
#[derive(Debug, Clone)]
pub struct BridgedRequest(pub BridgeRequest);

#[async_trait]
impl<S> FromRequest<S> for BridgedRequest
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let method = req.method().to_string();
        let path = req.uri().path().to_string();
        let headers = flatten_headers(req.headers());

        let body = Bytes::from_request(req, state).await.map_err(|rejection| {
            if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
                AppError::payload_too_large("Request body too large")
            } else {
                AppError::bad_request("Failed to read request body")
            }
        })?;

        Ok(Self(BridgeRequest {
            method,
            path,
            headers,
            body: body.to_vec(),
        }))
    }
}

fn flatten_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut flattened: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let Ok(value) = value.to_str() else {
            continue;
        };
        flattened
            .entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    flattened
}
