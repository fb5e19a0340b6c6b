//! Request-id middleware.
//!
//! Every HTTP request gets a request id, taken from the `X-Request-ID` header
//! when it is a valid UUID and generated otherwise. The id is stored in the
//! request extensions, recorded on an `http_request` tracing span and echoed
//! back in the response header.
//!
//! The request id identifies the HTTP exchange in logs. It is unrelated to
//! the bridge's correlation id, which is unguessable and never exposed.
//!
//! Once the response is ready the span also gets the response `status` and,
//! for bridged calls, the call `outcome` (`reply`, `timeout`, `publish_error`
//! and so on) that the bridge handler attaches as a [`BridgeOutcome`].
//!
//! # Example
//!
//! ```ignore
//! use axum::Router;
//! use reqbridge_web::middleware::request_id_layer;
//!
//! let app = Router::new()
//!     .fallback(bridge_request)
//!     .layer(request_id_layer());
//! ```

use axum::{extract::Request, http::HeaderValue, response::Response};
use std::task::{Context, Poll};
use std::time::Instant;
use tower::{Layer, Service};
use tracing::{Instrument, field};
use uuid::Uuid;

/// Header name for the request id.
pub const REQUEST_ID_HEADER: &str = "X-Request-ID";

/// Outcome label of a bridged call, carried in the response extensions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BridgeOutcome(pub &'static str);

/// Create a layer that assigns a request id to every request.
#[must_use]
pub const fn request_id_layer() -> RequestIdLayer {
    RequestIdLayer
}

/// Layer for request-id tracking.
#[derive(Clone, Debug)]
pub struct RequestIdLayer;

impl<S> Layer<S> for RequestIdLayer {
    type Service = RequestIdMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestIdMiddleware { inner }
    }
}

/// Middleware service for request-id tracking.
#[derive(Clone, Debug)]
pub struct RequestIdMiddleware<S> {
    inner: S,
}

impl<S> Service<Request> for RequestIdMiddleware<S>
where
    S: Service<Request, Response = Response> + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let request_id = req
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| Uuid::parse_str(s).ok())
            .unwrap_or_else(Uuid::new_v4);

        req.extensions_mut().insert(request_id);

        let span = tracing::info_span!(
            "http_request",
            request_id = %request_id,
            method = %req.method(),
            path = %req.uri().path(),
            status = field::Empty,
            outcome = field::Empty,
        );

        let started = Instant::now();
        let fut = self.inner.call(req);

        Box::pin(async move {
            let mut response = fut.instrument(span.clone()).await?;

            span.record("status", response.status().as_u16());
            if let Some(BridgeOutcome(outcome)) = response.extensions().get::<BridgeOutcome>() {
                span.record("outcome", *outcome);
            }
            span.in_scope(|| {
                tracing::debug!(
                    elapsed_ms = started.elapsed().as_millis(),
                    "Request completed"
                );
            });

            if let Ok(header_value) = HeaderValue::from_str(&request_id.to_string()) {
                response
                    .headers_mut()
                    .insert(REQUEST_ID_HEADER, header_value);
            }

            Ok(response)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use axum::{
        Router,
        body::Body,
        http::{Request, StatusCode},
        response::IntoResponse,
        routing::{get, post},
    };
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use tower::ServiceExt;
    use tracing::field::{Field, Visit};
    use tracing::span::{Attributes, Id, Record};
    use tracing::Subscriber;
    use tracing_subscriber::layer::{Context as LayerContext, SubscriberExt};
    use tracing_subscriber::util::SubscriberInitExt;

    fn app() -> Router {
        Router::new()
            .route("/test", get(|| async { "ok" }))
            .layer(request_id_layer())
    }

    /// Span fields as last recorded, by name.
    #[derive(Clone, Default)]
    struct SpanFields(Arc<Mutex<HashMap<&'static str, String>>>);

    impl SpanFields {
        fn get(&self, name: &str) -> Option<String> {
            self.0.lock().unwrap().get(name).cloned()
        }
    }

    impl Visit for SpanFields {
        fn record_str(&mut self, field: &Field, value: &str) {
            self.0.lock().unwrap().insert(field.name(), value.to_string());
        }

        fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
            self.0.lock().unwrap().insert(field.name(), format!("{value:?}"));
        }
    }

    impl<S: Subscriber> tracing_subscriber::Layer<S> for SpanFields {
        fn on_new_span(&self, attrs: &Attributes<'_>, _: &Id, _: LayerContext<'_, S>) {
            attrs.record(&mut self.clone());
        }

        fn on_record(&self, _: &Id, values: &Record<'_>, _: LayerContext<'_, S>) {
            values.record(&mut self.clone());
        }
    }

    fn recording() -> (SpanFields, tracing::subscriber::DefaultGuard) {
        let fields = SpanFields::default();
        let guard = tracing_subscriber::registry()
            .with(fields.clone())
            .set_default();
        (fields, guard)
    }

    #[tokio::test]
    async fn test_span_records_status_and_bridge_outcome() {
        let (fields, _guard) = recording();
        let app = Router::new()
            .route(
                "/orders",
                post(|| async {
                    let mut response = StatusCode::BAD_GATEWAY.into_response();
                    response
                        .extensions_mut()
                        .insert(BridgeOutcome("publish_error"));
                    response
                }),
            )
            .layer(request_id_layer());
        let request = Request::builder()
            .method("POST")
            .uri("/orders")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(fields.get("method").as_deref(), Some("POST"));
        assert_eq!(fields.get("path").as_deref(), Some("/orders"));
        assert_eq!(fields.get("status").as_deref(), Some("502"));
        assert_eq!(fields.get("outcome").as_deref(), Some("publish_error"));
    }

    #[tokio::test]
    async fn test_span_has_no_outcome_for_unbridged_routes() {
        let (fields, _guard) = recording();

        let request = Request::builder().uri("/test").body(Body::empty()).unwrap();
        app().oneshot(request).await.unwrap();

        assert_eq!(fields.get("status").as_deref(), Some("200"));
        assert_eq!(fields.get("outcome"), None);
    }

    #[tokio::test]
    async fn test_request_id_generated_if_missing() {
        let request = Request::builder().uri("/test").body(Body::empty()).unwrap();

        let response = app().oneshot(request).await.unwrap();

        let request_id = response
            .headers()
            .get(REQUEST_ID_HEADER)
            .expect("Request ID header should be present");
        assert!(Uuid::parse_str(request_id.to_str().unwrap()).is_ok());
    }

    #[tokio::test]
    async fn test_request_id_preserved_from_request() {
        let request_uuid = Uuid::new_v4();
        let request = Request::builder()
            .uri("/test")
            .header(REQUEST_ID_HEADER, request_uuid.to_string())
            .body(Body::empty())
            .unwrap();

        let response = app().oneshot(request).await.unwrap();

        let response_id = response
            .headers()
            .get(REQUEST_ID_HEADER)
            .expect("Request ID header should be present")
            .to_str()
            .unwrap();
        assert_eq!(response_id, request_uuid.to_string());
    }

    #[tokio::test]
    async fn test_invalid_uuid_generates_new() {
        let request = Request::builder()
            .uri("/test")
            .header(REQUEST_ID_HEADER, "not-a-uuid")
            .body(Body::empty())
            .unwrap();

        let response = app().oneshot(request).await.unwrap();

        let request_id = response
            .headers()
            .get(REQUEST_ID_HEADER)
            .expect("Request ID header should be present")
            .to_str()
            .unwrap();
        assert!(Uuid::parse_str(request_id).is_ok());
        assert_ne!(request_id, "not-a-uuid");
    }
}
