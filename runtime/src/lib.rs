//! # Reqbridge Runtime
//!
//! Runtime for bridging synchronous calls onto a publish/subscribe broker.
//!
//! ## Core Components
//!
//! - **ReplyRegistry**: In-flight calls keyed by correlation id, settled exactly once
//! - **RequestBridge**: Orchestrates one call: register → subscribe → publish → await → close
//! - **RetryingGateway**: Optional publish retry policy applied at the gateway
//! - **Metrics**: Prometheus instrumentation for calls and subscriptions
//!
//! ## Example
//!
//! ```ignore
//! use reqbridge_runtime::RequestBridge;
//! use reqbridge_core::BridgeRequest;
//!
//! let bridge = RequestBridge::builder(gateway)
//!     .timeout(Duration::from_millis(500))
//!     .build()?;
//!
//! let response = bridge
//!     .handle(BridgeRequest::new("POST", "/orders/create", br#"{"sku":"A1"}"#.to_vec()))
//!     .await;
//! assert_eq!(response.status, 200);
//! ```

/// Request bridge orchestration
pub mod bridge;

/// Bridge configuration
pub mod config;

/// Prometheus metrics for observability
pub mod metrics;

/// Reply registry of in-flight calls
pub mod registry;

/// Gateway-level publish retries
pub mod retry;

pub use bridge::{BridgeError, CallState, RequestBridge, RequestBridgeBuilder};
pub use config::BridgeConfig;
pub use registry::{PendingCall, RegistryError, ReplyRegistry, Resolution};
pub use retry::{RetryPolicy, RetryingGateway};
