//! Broker gateway abstraction.
//!
//! The bridge talks to the broker through [`BrokerGateway`]: one `publish` for
//! outbound requests and one `subscribe_scoped` per call for its reply. The
//! gateway pushes replies into a [`ReplyHandler`] and hands back a
//! [`Subscription`] whose `close()` releases the per-call broker resources.
//!
//! # Ordering
//!
//! ```text
//! subscribe_scoped(id) ──► Subscription active ──► publish(msg tagged id)
//!                                  │
//!                 reply(id) ───────┴──► on_reply(InboundReply)
//! ```
//!
//! `subscribe_scoped` resolves only once the subscription is able to observe
//! every reply published after it returns. Callers publish afterwards, so a
//! fast responder can never answer before anyone is listening.
//!
//! # Implementations
//!
//! - `InMemoryGateway` (reqbridge-testing) - for tests
//! - `RedpandaGateway` (reqbridge-redpanda) - Kafka-compatible brokers
//!
//! # Dyn Compatibility
//!
//! Methods return `Pin<Box<dyn Future>>` so the bridge can hold an
//! `Arc<dyn BrokerGateway>`.

use crate::correlation::CorrelationId;
use crate::message::{InboundReply, OutboundMessage};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

/// Errors that can occur during gateway operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Failed to connect to the broker
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The message could not be handed off to the broker
    #[error("Publish failed for destination '{destination}': {reason}")]
    PublishFailed {
        /// The destination that failed
        destination: String,
        /// The reason for failure
        reason: String,
    },

    /// The scoped subscription could not be established
    #[error("Subscription failed for correlation id '{id}': {reason}")]
    SubscribeFailed {
        /// The correlation id being subscribed
        id: CorrelationId,
        /// The reason for failure
        reason: String,
    },

    /// Unrecoverable error on an established subscription
    #[error("Transport error: {0}")]
    Transport(String),
}

/// An item pushed by the gateway into a scoped subscription.
pub type Delivery = Result<InboundReply, GatewayError>;

/// Callback invoked by the gateway for each delivery on a scoped subscription.
///
/// Runs on the gateway's delivery context, never on the caller's task. It must
/// not block.
pub type ReplyHandler = Arc<dyn Fn(Delivery) + Send + Sync>;

/// Boxed future returned by gateway operations.
pub type GatewayFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, GatewayError>> + Send + 'a>>;

/// Serializes deliveries against `close()` for one subscription.
///
/// Gateways route every delivery through [`DeliveryGate::deliver`]. Once
/// [`DeliveryGate::close`] returns, the handler has been dropped and will not
/// run again, including from a delivery that was already in progress.
pub struct DeliveryGate {
    handler: Mutex<Option<ReplyHandler>>,
}

impl DeliveryGate {
    /// Create an open gate around `handler`.
    #[must_use]
    pub fn new(handler: ReplyHandler) -> Arc<Self> {
        Arc::new(Self {
            handler: Mutex::new(Some(handler)),
        })
    }

    /// Invoke the handler if the gate is still open.
    ///
    /// Returns `false` once the gate is closed; delivery loops stop on it.
    pub fn deliver(&self, delivery: Delivery) -> bool {
        let guard = self.handler.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(handler) => {
                handler(delivery);
                true
            },
            None => false,
        }
    }

    /// Close the gate, waiting for an in-progress delivery to finish.
    pub fn close(&self) {
        let handler = self
            .handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(handler);
    }

    /// Whether deliveries are still accepted.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl fmt::Debug for DeliveryGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryGate")
            .field("open", &self.is_open())
            .finish()
    }
}

/// Releases gateway-side resources (consumer, task, buffers) of a subscription.
pub type ReleaseFn = Box<dyn FnOnce() + Send + Sync>;

/// Handle to one call's scoped subscription.
///
/// Owned by exactly one call. Closing is idempotent and also happens on drop,
/// so every exit path releases the broker resources exactly once.
pub struct Subscription {
    id: CorrelationId,
    gate: Arc<DeliveryGate>,
    release: Option<ReleaseFn>,
}

impl Subscription {
    /// Assemble a subscription from its gate and release hook.
    #[must_use]
    pub fn new(id: CorrelationId, gate: Arc<DeliveryGate>, release: ReleaseFn) -> Self {
        Self {
            id,
            gate,
            release: Some(release),
        }
    }

    /// Correlation id this subscription is scoped to.
    #[must_use]
    pub const fn id(&self) -> &CorrelationId {
        &self.id
    }

    /// Whether `close()` has already run.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.release.is_none()
    }

    /// Stop deliveries and release broker resources.
    ///
    /// No handler invocation happens after this returns.
    pub fn close(&mut self) {
        if let Some(release) = self.release.take() {
            self.gate.close();
            release();
            tracing::trace!(correlation_id = %self.id, "Scoped subscription closed");
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Trait for broker gateway implementations.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; one gateway serves every
/// concurrent call.
pub trait BrokerGateway: Send + Sync {
    /// Hand `message` off to the broker (at-least-once).
    ///
    /// Any retry policy lives inside the gateway; an error here is final for
    /// the call.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PublishFailed`] if the broker did not accept
    /// the message.
    fn publish<'a>(&'a self, message: &'a OutboundMessage) -> GatewayFuture<'a, ()>;

    /// Open a subscription delivering only replies addressed to `id`.
    ///
    /// Resolves once the subscription is actively delivering.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::SubscribeFailed`] if the broker-side resources
    /// could not be created.
    fn subscribe_scoped<'a>(
        &'a self,
        id: &'a CorrelationId,
        on_reply: ReplyHandler,
    ) -> GatewayFuture<'a, Subscription>;

    /// Broker address responders must reply to for `id`.
    fn reply_address(&self, id: &CorrelationId) -> String;
}
