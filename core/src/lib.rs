//! # Reqbridge Core
//!
//! Core types and traits for bridging synchronous request/response calls onto
//! an asynchronous publish/subscribe broker.
//!
//! ## Core Concepts
//!
//! - **CorrelationId**: Unguessable token tying a published request to its reply
//! - **OutboundMessage**: The request as published, tagged with its id
//! - **InboundReply**: A reply observed on a scoped subscription
//! - **BrokerGateway**: Publish + per-call scoped subscribe, injected as a trait object
//! - **Subscription**: Per-call handle whose `close()` frees broker resources
//!
//! ## Architecture Principles
//!
//! - Subscribe before publish
//! - One subscription per call, never pooled
//! - Each call resolves exactly once
//!
//! Orchestration (reply registry, request bridge) lives in `reqbridge-runtime`.

pub mod correlation;
pub mod gateway;
pub mod message;

pub use correlation::{
    CorrelationId, CorrelationIdGenerator, EntropySource, IdError, OsEntropy, encoded_id_len,
};
pub use gateway::{
    BrokerGateway, Delivery, DeliveryGate, GatewayError, GatewayFuture, ReleaseFn, ReplyHandler,
    Subscription,
};
pub use message::{
    BridgeRequest, BridgeResponse, InboundReply, MessageMetadata, OutboundMessage, RequestEnvelope,
    destination_for,
};
