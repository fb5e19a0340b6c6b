//! Axum transport adapter for the request bridge.
//!
//! Turns every HTTP request into one bridged call and the call's outcome
//! into an HTTP response.
//!
//! # Request Flow
//!
//! 1. **HTTP request** arrives; the middleware assigns a request id
//! 2. **Extract** method, path, headers and body into a `BridgeRequest`
//! 3. **Call** the `RequestBridge`, which publishes and awaits the reply
//! 4. **Map** the outcome: reply → 200 with the payload verbatim,
//!    failures → 422 / 500 / 502 / 504 with a JSON error body
//!
//! # Example
//!
//! ```ignore
//! use reqbridge_web::{AppState, router};
//! use std::sync::Arc;
//!
//! let bridge = Arc::new(RequestBridge::new(gateway)?);
//! let app = router(AppState::new(bridge));
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3333").await?;
//! axum::serve(listener, app).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod state;

pub use error::AppError;
pub use extractors::{BridgedRequest, RequestId};
pub use middleware::{BridgeOutcome, REQUEST_ID_HEADER, request_id_layer};
pub use router::{DEFAULT_BODY_LIMIT, router, router_with_body_limit};
pub use state::AppState;

