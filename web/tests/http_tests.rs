//! HTTP-level tests for the bridge router over the in-memory gateway.

#![allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect

use axum::body::Body;
use axum::http::{HeaderName, HeaderValue, Method, Request, StatusCode};
use axum_test::TestServer;
use reqbridge_core::RequestEnvelope;
use reqbridge_runtime::RequestBridge;
use reqbridge_testing::{InMemoryGateway, ScriptedReply, helpers::reply_for};
use reqbridge_web::{AppState, BridgeOutcome, REQUEST_ID_HEADER, router, router_with_body_limit};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn state_for(gateway: &InMemoryGateway, timeout: Duration) -> AppState {
    let bridge = RequestBridge::builder(Arc::new(gateway.clone()))
        .timeout(timeout)
        .build()
        .unwrap();
    AppState::new(Arc::new(bridge))
}

fn server_for(gateway: &InMemoryGateway, timeout: Duration) -> TestServer {
    TestServer::new(router(state_for(gateway, timeout))).unwrap()
}

fn echo_gateway() -> InMemoryGateway {
    let gateway = InMemoryGateway::new();
    gateway.respond_with(|m| {
        let route = format!("{} {}", m.metadata().method, m.metadata().path);
        Some(ScriptedReply::after(Duration::from_millis(5), reply_for(m, &route)))
    });
    gateway
}

#[tokio::test]
async fn health_is_always_ok() {
    let server = server_for(&InMemoryGateway::new(), Duration::from_millis(100));

    let response = server.get("/health").await;

    response.assert_status_ok();
    response.assert_text("ok");
}

#[tokio::test]
async fn readiness_reports_in_flight_calls() {
    let server = server_for(&InMemoryGateway::new(), Duration::from_millis(100));

    let response = server.get("/health/ready").await;

    response.assert_status_ok();
    assert_eq!(
        response.json::<Value>(),
        json!({"status": "ready", "in_flight": 0})
    );
}

#[tokio::test]
async fn reply_is_returned_with_200() {
    let gateway = echo_gateway();
    let server = server_for(&gateway, Duration::from_millis(1000));

    let response = server.post("/orders").json(&json!({"qty": 2})).await;

    response.assert_status_ok();
    let body = response.json::<Value>();
    assert_eq!(body["value"], "POST /orders");
    assert_eq!(body["id"], json!(gateway.published()[0].id()));
    assert!(response.headers().contains_key(REQUEST_ID_HEADER));
    assert_eq!(gateway.open_subscriptions(), 0);
}

#[tokio::test]
async fn any_method_and_path_is_bridged() {
    let gateway = echo_gateway();
    let server = server_for(&gateway, Duration::from_millis(1000));

    let response = server.method(Method::DELETE, "/items/7").await;

    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["value"], "DELETE /items/7");

    let message = &gateway.published()[0];
    assert_eq!(message.destination(), "items.7");
    let envelope: RequestEnvelope = serde_json::from_slice(message.payload()).unwrap();
    assert_eq!(envelope.body, Value::Null);
}

#[tokio::test]
async fn request_headers_reach_the_envelope() {
    let gateway = echo_gateway();
    let server = server_for(&gateway, Duration::from_millis(1000));

    server
        .put("/profiles/me")
        .add_header(HeaderName::from_static("x-tenant"), HeaderValue::from_static("acme"))
        .json(&json!({"name": "Ada"}))
        .await
        .assert_status_ok();

    let envelope: RequestEnvelope =
        serde_json::from_slice(gateway.published()[0].payload()).unwrap();
    assert_eq!(envelope.headers["x-tenant"], "acme");
    assert_eq!(envelope.method, "PUT");
    assert_eq!(envelope.body, json!({"name": "Ada"}));
}

#[tokio::test]
async fn missing_reply_is_gateway_timeout() {
    let gateway = InMemoryGateway::new();
    let server = server_for(&gateway, Duration::from_millis(50));

    let response = server.get("/slow").await;

    response.assert_status(StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(response.json::<Value>()["code"], "GATEWAY_TIMEOUT");
    assert_eq!(gateway.open_subscriptions(), 0);
}

#[tokio::test]
async fn publish_failure_is_bad_gateway_without_detail() {
    let gateway = InMemoryGateway::new();
    gateway.fail_next_publish();
    let server = server_for(&gateway, Duration::from_millis(1000));

    let response = server.post("/orders").json(&json!({})).await;

    response.assert_status(StatusCode::BAD_GATEWAY);
    let body = response.json::<Value>();
    assert_eq!(body["code"], "BAD_GATEWAY");
    assert!(!body["message"].as_str().unwrap().contains("injected"));
    assert_eq!(gateway.open_subscriptions(), 0);
}

#[tokio::test]
async fn malformed_json_is_unprocessable() {
    let gateway = echo_gateway();
    let server = server_for(&gateway, Duration::from_millis(1000));

    let response = server.post("/orders").text("{\"qty\":").await;

    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(response.json::<Value>()["code"], "MALFORMED_BODY");
    assert!(gateway.published().is_empty());
}

#[tokio::test]
async fn oversized_body_is_rejected() {
    let gateway = echo_gateway();
    let server =
        TestServer::new(router_with_body_limit(state_for(&gateway, Duration::from_millis(1000)), 16))
            .unwrap();

    let response = server
        .post("/orders")
        .json(&json!({"note": "this body is longer than sixteen bytes"}))
        .await;

    response.assert_status(StatusCode::PAYLOAD_TOO_LARGE);
    assert!(gateway.published().is_empty());
}

async fn outcome_of(gateway: &InMemoryGateway, timeout: Duration, uri: &str) -> Option<BridgeOutcome> {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let response = router(state_for(gateway, timeout))
        .oneshot(request)
        .await
        .unwrap();
    response.extensions().get::<BridgeOutcome>().copied()
}

#[tokio::test]
async fn bridged_responses_carry_the_call_outcome() {
    let gateway = echo_gateway();
    assert_eq!(
        outcome_of(&gateway, Duration::from_millis(1000), "/orders").await,
        Some(BridgeOutcome("reply"))
    );

    let silent = InMemoryGateway::new();
    assert_eq!(
        outcome_of(&silent, Duration::from_millis(50), "/orders").await,
        Some(BridgeOutcome("timeout"))
    );

    let failing = InMemoryGateway::new();
    failing.fail_next_publish();
    assert_eq!(
        outcome_of(&failing, Duration::from_millis(1000), "/orders").await,
        Some(BridgeOutcome("publish_error"))
    );
}

#[tokio::test]
async fn health_responses_carry_no_outcome() {
    assert_eq!(
        outcome_of(&InMemoryGateway::new(), Duration::from_millis(100), "/health").await,
        None
    );
}
