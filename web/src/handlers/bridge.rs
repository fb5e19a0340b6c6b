//! Catch-all handler that bridges HTTP requests onto the broker.

use crate::error::AppError;
use crate::extractors::{BridgedRequest, RequestId};
use crate::middleware::BridgeOutcome;
use crate::state::AppState;
use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};

/// Bridge one HTTP request and answer with the reply payload.
///
/// Any method, any path not claimed by another route. The reply body is
/// returned verbatim with 200; failures map through [`AppError`] to 422,
/// 500, 502 or 504. Either way the response carries a [`BridgeOutcome`]
/// for the request span.
pub async fn bridge_request(
    State(state): State<AppState>,
    RequestId(request_id): RequestId,
    BridgedRequest(request): BridgedRequest,
) -> Response {
    tracing::debug!(
        request_id = %request_id,
        method = %request.method,
        path = %request.path,
        body_bytes = request.body.len(),
        "Bridging request"
    );

    let (mut response, outcome) = match state.bridge().call(request).await {
        Ok(payload) => (reply_response(payload), "reply"),
        Err(err) => {
            let outcome = err.outcome();
            (AppError::from(err).into_response(), outcome)
        },
    };
    response.extensions_mut().insert(BridgeOutcome(outcome));
    response
}

/// 200 response carrying `payload` as-is.
///
/// JSON payloads are labelled `application/json`; anything else is
/// `application/octet-stream`.
#[must_use]
pub fn reply_response(payload: Vec<u8>) -> Response {
    let content_type = if serde_json::from_slice::<serde::de::IgnoredAny>(&payload).is_ok() {
        HeaderValue::from_static("application/json")
    } else {
        HeaderValue::from_static("application/octet-stream")
    };

    let mut response = (StatusCode::OK, Body::from(payload)).into_response();
    response.headers_mut().insert(header::CONTENT_TYPE, content_type);
    response
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn json_replies_are_labelled() {
        let response = reply_response(b"{\"id\":\"abc123\",\"value\":\"ok\"}".to_vec());

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
    }

    #[test]
    fn opaque_replies_are_octet_stream() {
        let response = reply_response(vec![0xde, 0xad, 0xbe, 0xef]);

        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/octet-stream"
        );
    }
}
