//! Request bridge: one blocking call in, one publish/subscribe exchange out.
//!
//! # Call Lifecycle
//!
//! ```text
//! CREATED ──► PUBLISHED ──┬──► RESOLVED ──┐
//!    │                    ├──► EXPIRED  ──┼──► CLOSED
//!    └──(subscribe/publish├──► FAILED   ──┘
//!        failure)─────────┘
//! ```
//!
//! 1. Allocate a correlation id and register it in the [`ReplyRegistry`]
//! 2. Open a scoped subscription whose handler resolves the registry entry
//! 3. Publish the request (only after the subscription is active)
//! 4. Wait for the result slot or the deadline, whichever comes first
//!
//! The deadline covers steps 2 and 3 as well: a subscribe or publish still
//! running when it elapses is abandoned and the call is EXPIRED unpublished.
//! 5. Close the subscription on every exit path
//!
//! If the caller's future is dropped mid-call (client disconnect), the call is
//! expired and its subscription closed exactly as on a deadline.

use crate::config::BridgeConfig;
use crate::metrics::BridgeMetrics;
use crate::registry::{PendingCall, RegistryError, ReplyRegistry, Resolution};
use chrono::Utc;
use reqbridge_core::{
    BridgeRequest, BridgeResponse, BrokerGateway, CorrelationId, CorrelationIdGenerator, Delivery,
    EntropySource, GatewayError, IdError, OutboundMessage, ReplyHandler, Subscription,
    destination_for,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{Instant, timeout_at};

/// Errors a bridged call can end with.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// The secure random source failed; the call never started
    #[error("Correlation id generation failed: {0}")]
    IdentifierGeneration(#[from] IdError),

    /// The request body is not valid JSON
    #[error("Malformed JSON body: {0}")]
    MalformedBody(String),

    /// The scoped subscription could not be opened; nothing was published
    #[error("Subscribe failed: {0}")]
    Subscribe(GatewayError),

    /// The request could not be handed to the broker
    #[error("Publish failed: {0}")]
    Publish(GatewayError),

    /// The subscription reported an unrecoverable error while waiting
    #[error("Broker failed while awaiting reply: {0}")]
    Broker(GatewayError),

    /// No reply arrived before the deadline
    #[error("No reply within {timeout:?}")]
    Timeout {
        /// The configured timeout
        timeout: Duration,
    },

    /// A freshly generated id was already in flight
    #[error("Correlation id collision")]
    DuplicateId,
}

impl BridgeError {
    /// HTTP-equivalent status for this error.
    #[must_use]
    pub const fn status(&self) -> u16 {
        match self {
            Self::IdentifierGeneration(_) | Self::DuplicateId => 500,
            Self::MalformedBody(_) => 422,
            Self::Subscribe(_) | Self::Publish(_) | Self::Broker(_) => 502,
            Self::Timeout { .. } => 504,
        }
    }

    /// Stable machine-readable code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::IdentifierGeneration(_) | Self::DuplicateId => "INTERNAL_ERROR",
            Self::MalformedBody(_) => "MALFORMED_BODY",
            Self::Subscribe(_) | Self::Publish(_) | Self::Broker(_) => "BAD_GATEWAY",
            Self::Timeout { .. } => "GATEWAY_TIMEOUT",
        }
    }

    /// Caller-facing message. Never includes broker addresses or internal detail.
    #[must_use]
    pub const fn public_message(&self) -> &'static str {
        match self {
            Self::IdentifierGeneration(_) | Self::DuplicateId => "Failed to start request",
            Self::MalformedBody(_) => "Malformed JSON body",
            Self::Subscribe(_) => "Cannot set up reply retrieval",
            Self::Publish(_) => "Cannot forward request for processing",
            Self::Broker(_) => "Broker failed while awaiting reply",
            Self::Timeout { .. } => "No reply received in time",
        }
    }

    /// Outcome label used for metrics and request logs.
    #[must_use]
    pub const fn outcome(&self) -> &'static str {
        match self {
            Self::IdentifierGeneration(_) => "id_error",
            Self::MalformedBody(_) => "malformed",
            Self::Subscribe(_) => "subscribe_error",
            Self::Publish(_) => "publish_error",
            Self::Broker(_) => "broker_error",
            Self::Timeout { .. } => "timeout",
            Self::DuplicateId => "duplicate_id",
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: &'static str,
}

/// Per-call lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    /// Id allocated and registered
    Created,
    /// Request handed to the broker
    Published,
    /// A reply won
    Resolved,
    /// The deadline (or caller cancellation) won
    Expired,
    /// Subscribe, publish or broker failure
    Failed,
}

impl CallState {
    const fn is_terminal(self) -> bool {
        matches!(self, Self::Resolved | Self::Expired | Self::Failed)
    }
}

/// Owns one call's registry entry and subscription until the call is CLOSED.
///
/// Dropping the guard before a terminal state counts as cancellation: the
/// entry is expired so a late reply cannot resolve it.
struct CallGuard<'a> {
    registry: &'a ReplyRegistry,
    id: CorrelationId,
    state: CallState,
    subscription: Option<Subscription>,
}

impl<'a> CallGuard<'a> {
    const fn new(registry: &'a ReplyRegistry, id: CorrelationId) -> Self {
        Self {
            registry,
            id,
            state: CallState::Created,
            subscription: None,
        }
    }

    fn transition(&mut self, next: CallState) {
        tracing::debug!(correlation_id = %self.id, from = ?self.state, to = ?next, "Call state transition");
        self.state = next;
    }

    /// FAILED before any reply could exist: drop the entry without a result.
    fn abort(&mut self) {
        self.registry.cancel(&self.id);
        self.transition(CallState::Failed);
    }

    /// EXPIRED while a broker step was still running; the step is abandoned.
    fn expire(&mut self, step: &'static str, timeout: Duration) -> BridgeError {
        self.registry.expire(&self.id);
        self.transition(CallState::Expired);
        tracing::warn!(
            correlation_id = %self.id,
            step,
            timeout_ms = timeout.as_millis(),
            "Deadline elapsed before the broker step completed"
        );
        BridgeError::Timeout { timeout }
    }
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        if !self.state.is_terminal() && self.registry.expire(&self.id) {
            tracing::debug!(correlation_id = %self.id, state = ?self.state, "Call cancelled by caller");
            BridgeMetrics::record_cancelled();
        }
        if let Some(mut subscription) = self.subscription.take() {
            subscription.close();
        }
        tracing::trace!(correlation_id = %self.id, "Call closed");
    }
}

/// Turns synchronous calls into correlated publish/subscribe exchanges.
///
/// Cheap to share behind an `Arc`; every call is independent.
///
/// # Example
///
/// ```ignore
/// let bridge = RequestBridge::builder(gateway)
///     .timeout(Duration::from_secs(1))
///     .build()?;
///
/// let reply = bridge.call(BridgeRequest::new("POST", "/orders", body)).await?;
/// ```
pub struct RequestBridge {
    gateway: Arc<dyn BrokerGateway>,
    registry: Arc<ReplyRegistry>,
    ids: CorrelationIdGenerator,
    config: BridgeConfig,
}

impl RequestBridge {
    /// Create a bridge with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::IdentifierGeneration`] if the entropy source is unusable.
    pub fn new(gateway: Arc<dyn BrokerGateway>) -> Result<Self, BridgeError> {
        Self::builder(gateway).build()
    }

    /// Create a builder around `gateway`.
    #[must_use]
    pub fn builder(gateway: Arc<dyn BrokerGateway>) -> RequestBridgeBuilder {
        RequestBridgeBuilder {
            gateway,
            config: BridgeConfig::default(),
            entropy: None,
            registry: None,
        }
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// The registry backing this bridge.
    #[must_use]
    pub const fn registry(&self) -> &Arc<ReplyRegistry> {
        &self.registry
    }

    /// Number of calls currently awaiting a reply.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.registry.len()
    }

    /// Bridge one call and map the outcome to a status and body.
    pub async fn handle(&self, request: BridgeRequest) -> BridgeResponse {
        match self.call(request).await {
            Ok(payload) => BridgeResponse::ok(payload),
            Err(err) => BridgeResponse {
                status: err.status(),
                body: serde_json::to_vec(&ErrorBody {
                    code: err.code(),
                    message: err.public_message(),
                })
                .unwrap_or_default(),
            },
        }
    }

    /// Bridge one call, returning the reply payload.
    ///
    /// # Errors
    ///
    /// Returns exactly one [`BridgeError`] per failed call; see its variants.
    #[tracing::instrument(
        name = "bridge_call",
        skip_all,
        fields(method = %request.method, path = %request.path, correlation_id = tracing::field::Empty)
    )]
    pub async fn call(&self, request: BridgeRequest) -> Result<Vec<u8>, BridgeError> {
        let started = Instant::now();
        let result = self.execute(&request).await;

        let outcome = match &result {
            Ok(_) => "reply",
            Err(err) => err.outcome(),
        };
        BridgeMetrics::record_call(outcome, started.elapsed());
        result
    }

    async fn execute(&self, request: &BridgeRequest) -> Result<Vec<u8>, BridgeError> {
        let body = request
            .json_body()
            .map_err(|e| BridgeError::MalformedBody(e.to_string()))?;

        let id = self.ids.generate().map_err(|e| {
            tracing::error!(error = %e, "Correlation id generation failed");
            BridgeError::from(e)
        })?;
        tracing::Span::current().record("correlation_id", tracing::field::display(&id));

        let message = OutboundMessage::new(
            id.clone(),
            request,
            body,
            destination_for(&self.config.topic_prefix, &request.path),
            self.gateway.reply_address(&id),
        )
        .map_err(|e| BridgeError::MalformedBody(e.to_string()))?;

        let mut pending = self.register(&id)?;
        let deadline = pending.deadline();
        let mut call = CallGuard::new(&self.registry, id.clone());

        let subscribe = self
            .gateway
            .subscribe_scoped(&id, self.reply_handler(id.clone()));
        let subscription = match timeout_at(deadline, subscribe).await {
            Ok(Ok(subscription)) => subscription,
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Scoped subscribe failed");
                call.abort();
                return Err(BridgeError::Subscribe(e));
            },
            Err(_elapsed) => return Err(call.expire("subscribe", self.config.timeout)),
        };
        call.subscription = Some(subscription);

        match timeout_at(deadline, self.gateway.publish(&message)).await {
            Ok(Ok(())) => {},
            Ok(Err(e)) => {
                tracing::error!(destination = message.destination(), error = %e, "Publish failed");
                call.abort();
                return Err(BridgeError::Publish(e));
            },
            Err(_elapsed) => return Err(call.expire("publish", self.config.timeout)),
        }
        call.transition(CallState::Published);

        let resolution = self.await_resolution(&mut pending).await;
        match resolution {
            Resolution::Reply(payload) => {
                call.transition(CallState::Resolved);
                tracing::debug!(
                    bytes = payload.len(),
                    elapsed_ms = Utc::now()
                        .signed_duration_since(pending.created_at())
                        .num_milliseconds(),
                    "Reply received"
                );
                Ok(payload)
            },
            Resolution::Expired => {
                call.transition(CallState::Expired);
                tracing::warn!(timeout_ms = self.config.timeout.as_millis(), "Call timed out");
                Err(BridgeError::Timeout {
                    timeout: self.config.timeout,
                })
            },
            Resolution::Failed(e) => {
                call.transition(CallState::Failed);
                tracing::error!(error = %e, "Broker failed while awaiting reply");
                Err(BridgeError::Broker(e))
            },
        }
    }

    fn register(&self, id: &CorrelationId) -> Result<PendingCall, BridgeError> {
        let deadline = Instant::now() + self.config.timeout;
        self.registry
            .register(id.clone(), deadline)
            .map_err(|RegistryError::DuplicateId(id)| {
                tracing::error!(
                    correlation_id = %id,
                    "FATAL: correlation id collision, entropy source is suspect"
                );
                BridgeError::DuplicateId
            })
    }

    /// Handler run by the gateway on its delivery context.
    fn reply_handler(&self, id: CorrelationId) -> ReplyHandler {
        let registry = Arc::clone(&self.registry);
        Arc::new(move |delivery: Delivery| match delivery {
            Ok(reply) if reply.id == id => {
                if !registry.resolve(&reply.id, reply.payload) {
                    tracing::debug!(correlation_id = %reply.id, "Late or duplicate reply ignored");
                    BridgeMetrics::record_late_reply();
                }
            },
            Ok(reply) => {
                tracing::warn!(
                    expected = %id,
                    received = %reply.id,
                    "Reply for another call on scoped subscription ignored"
                );
            },
            Err(e) => {
                registry.fail(&id, e);
            },
        })
    }

    /// Wait for the result slot; at the deadline, race to expire.
    ///
    /// Whoever settled the entry first wrote the slot, so the slot is read
    /// in both branches.
    async fn await_resolution(&self, pending: &mut PendingCall) -> Resolution {
        let deadline = pending.deadline();
        let id = pending.id().clone();

        let outcome = match timeout_at(deadline, pending.outcome()).await {
            Ok(outcome) => outcome,
            Err(_elapsed) => {
                if !self.registry.expire(&id) {
                    tracing::debug!(correlation_id = %id, "Deadline lost race to reply");
                }
                pending.outcome().await
            },
        };
        outcome.unwrap_or(Resolution::Expired)
    }
}

impl std::fmt::Debug for RequestBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestBridge")
            .field("config", &self.config)
            .field("in_flight", &self.in_flight())
            .finish_non_exhaustive()
    }
}

/// Builder for [`RequestBridge`].
pub struct RequestBridgeBuilder {
    gateway: Arc<dyn BrokerGateway>,
    config: BridgeConfig,
    entropy: Option<Arc<dyn EntropySource>>,
    registry: Option<Arc<ReplyRegistry>>,
}

impl RequestBridgeBuilder {
    /// Replace the whole configuration.
    #[must_use]
    pub fn config(mut self, config: BridgeConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the per-call timeout.
    ///
    /// Default: 1 second
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the correlation id length in bytes (minimum 32).
    ///
    /// Default: 64
    #[must_use]
    pub fn id_bytes(mut self, id_bytes: usize) -> Self {
        self.config.id_bytes = id_bytes;
        self
    }

    /// Set the prefix for destinations derived from request paths.
    #[must_use]
    pub fn topic_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.topic_prefix = prefix.into();
        self
    }

    /// Use a specific entropy source instead of the OS generator.
    #[must_use]
    pub fn entropy(mut self, source: Arc<dyn EntropySource>) -> Self {
        self.entropy = Some(source);
        self
    }

    /// Share an existing registry.
    #[must_use]
    pub fn registry(mut self, registry: Arc<ReplyRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Build the bridge, drawing one identifier to prove the entropy source works.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::IdentifierGeneration`] if the id length is too
    /// short or the entropy source fails.
    pub fn build(self) -> Result<RequestBridge, BridgeError> {
        let ids = match self.entropy {
            Some(source) => CorrelationIdGenerator::with_source(self.config.id_bytes, source)?,
            None => CorrelationIdGenerator::new(self.config.id_bytes)?,
        };
        ids.generate()?;

        tracing::info!(
            timeout_ms = self.config.timeout.as_millis(),
            id_bytes = self.config.id_bytes,
            topic_prefix = %self.config.topic_prefix,
            "RequestBridge created"
        );

        Ok(RequestBridge {
            gateway: self.gateway,
            registry: self.registry.unwrap_or_default(),
            ids,
            config: self.config,
        })
    }
}
