//! In-memory broker gateway for testing the bridge.
//!
//! [`InMemoryGateway`] routes replies by correlation id to the matching
//! scoped subscription, records every published message, and keeps an
//! ordered log of gateway operations so tests can assert on ordering and
//! on subscription cleanup.
//!
//! # Example
//!
//! ```
//! use reqbridge_testing::{InMemoryGateway, ScriptedReply};
//! use std::time::Duration;
//!
//! let gateway = InMemoryGateway::new();
//! gateway.respond_with(|message| {
//!     Some(ScriptedReply::after(Duration::from_millis(50), message.id().as_str().as_bytes().to_vec()))
//! });
//! assert_eq!(gateway.open_subscriptions(), 0);
//! ```

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on poisoned test locks

use reqbridge_core::{
    BrokerGateway, CorrelationId, DeliveryGate, GatewayError, GatewayFuture, InboundReply,
    OutboundMessage, ReplyHandler, Subscription,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

/// A gateway operation, in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    /// A scoped subscription became active
    Subscribed(CorrelationId),
    /// A message tagged with this id was accepted
    Published(CorrelationId),
    /// A scoped subscription was closed
    Closed(CorrelationId),
}

/// Reply produced by a responder for a published message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptedReply {
    /// Reply payload
    pub payload: Vec<u8>,
    /// Delay before delivery; `None` delivers before `publish` returns
    pub delay: Option<Duration>,
    /// Number of times the reply is delivered (at-least-once redelivery)
    pub copies: usize,
}

impl ScriptedReply {
    /// Deliver `payload` synchronously inside `publish`.
    #[must_use]
    pub const fn immediate(payload: Vec<u8>) -> Self {
        Self {
            payload,
            delay: None,
            copies: 1,
        }
    }

    /// Deliver `payload` after `delay`.
    #[must_use]
    pub const fn after(delay: Duration, payload: Vec<u8>) -> Self {
        Self {
            payload,
            delay: Some(delay),
            copies: 1,
        }
    }

    /// Deliver the reply `copies` times.
    #[must_use]
    pub const fn duplicated(mut self, copies: usize) -> Self {
        self.copies = copies;
        self
    }
}

type Responder = Arc<dyn Fn(&OutboundMessage) -> Option<ScriptedReply> + Send + Sync>;

#[derive(Default)]
struct Inner {
    subscriptions: Mutex<HashMap<CorrelationId, Arc<DeliveryGate>>>,
    published: Mutex<Vec<OutboundMessage>>,
    events: Mutex<Vec<GatewayEvent>>,
    responder: Mutex<Option<Responder>>,
    fail_next_publish: AtomicBool,
    fail_next_subscribe: AtomicBool,
}

impl Inner {
    fn record(&self, event: GatewayEvent) {
        self.events.lock().unwrap().push(event);
    }

    fn deliver(&self, id: &CorrelationId, payload: Vec<u8>) -> bool {
        let gate = self.subscriptions.lock().unwrap().get(id).cloned();
        gate.is_some_and(|gate| {
            gate.deliver(Ok(InboundReply {
                id: id.clone(),
                payload,
            }))
        })
    }
}

/// In-memory [`BrokerGateway`] for fast, deterministic tests.
#[derive(Clone, Default)]
pub struct InMemoryGateway {
    inner: Arc<Inner>,
}

impl InMemoryGateway {
    /// Create a gateway with no responder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a responder invoked for every published message.
    pub fn respond_with<F>(&self, responder: F)
    where
        F: Fn(&OutboundMessage) -> Option<ScriptedReply> + Send + Sync + 'static,
    {
        *self.inner.responder.lock().unwrap() = Some(Arc::new(responder));
    }

    /// Make the next `publish` fail.
    pub fn fail_next_publish(&self) {
        self.inner.fail_next_publish.store(true, Ordering::SeqCst);
    }

    /// Make the next `subscribe_scoped` fail.
    pub fn fail_next_subscribe(&self) {
        self.inner.fail_next_subscribe.store(true, Ordering::SeqCst);
    }

    /// Deliver a reply to the subscription scoped to `id`.
    ///
    /// Returns `false` if no open subscription exists for `id`.
    pub fn deliver(&self, id: &CorrelationId, payload: impl Into<Vec<u8>>) -> bool {
        self.inner.deliver(id, payload.into())
    }

    /// Push an arbitrary delivery into the subscription scoped to `to`.
    pub fn deliver_raw(&self, to: &CorrelationId, delivery: Result<InboundReply, GatewayError>) -> bool {
        let gate = self.inner.subscriptions.lock().unwrap().get(to).cloned();
        gate.is_some_and(|gate| gate.deliver(delivery))
    }

    /// Number of scoped subscriptions currently open.
    #[must_use]
    pub fn open_subscriptions(&self) -> usize {
        self.inner.subscriptions.lock().unwrap().len()
    }

    /// Ids with an open subscription.
    #[must_use]
    pub fn subscribed_ids(&self) -> Vec<CorrelationId> {
        self.inner.subscriptions.lock().unwrap().keys().cloned().collect()
    }

    /// Messages accepted so far.
    #[must_use]
    pub fn published(&self) -> Vec<OutboundMessage> {
        self.inner.published.lock().unwrap().clone()
    }

    /// Ordered log of gateway operations.
    #[must_use]
    pub fn events(&self) -> Vec<GatewayEvent> {
        self.inner.events.lock().unwrap().clone()
    }

    /// Wait until a subscription is open, then return its id.
    pub async fn next_subscribed_id(&self) -> CorrelationId {
        loop {
            if let Some(id) = self.subscribed_ids().into_iter().next() {
                return id;
            }
            tokio::task::yield_now().await;
        }
    }

    fn schedule(&self, id: CorrelationId, reply: ScriptedReply) {
        match reply.delay {
            None => {
                for _ in 0..reply.copies {
                    self.inner.deliver(&id, reply.payload.clone());
                }
            },
            Some(delay) => {
                let inner = Arc::downgrade(&self.inner);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Some(inner) = inner.upgrade() {
                        for _ in 0..reply.copies {
                            inner.deliver(&id, reply.payload.clone());
                        }
                    }
                });
            },
        }
    }
}

impl BrokerGateway for InMemoryGateway {
    fn publish<'a>(&'a self, message: &'a OutboundMessage) -> GatewayFuture<'a, ()> {
        Box::pin(async move {
            if self.inner.fail_next_publish.swap(false, Ordering::SeqCst) {
                return Err(GatewayError::PublishFailed {
                    destination: message.destination().to_string(),
                    reason: "injected publish failure".to_string(),
                });
            }

            self.inner.published.lock().unwrap().push(message.clone());
            self.inner.record(GatewayEvent::Published(message.id().clone()));

            let responder = self.inner.responder.lock().unwrap().clone();
            if let Some(reply) = responder.and_then(|respond| respond(message)) {
                self.schedule(message.id().clone(), reply);
            }
            Ok(())
        })
    }

    fn subscribe_scoped<'a>(
        &'a self,
        id: &'a CorrelationId,
        on_reply: ReplyHandler,
    ) -> GatewayFuture<'a, Subscription> {
        Box::pin(async move {
            if self.inner.fail_next_subscribe.swap(false, Ordering::SeqCst) {
                return Err(GatewayError::SubscribeFailed {
                    id: id.clone(),
                    reason: "injected subscribe failure".to_string(),
                });
            }

            let gate = DeliveryGate::new(on_reply);
            self.inner
                .subscriptions
                .lock()
                .unwrap()
                .insert(id.clone(), Arc::clone(&gate));
            self.inner.record(GatewayEvent::Subscribed(id.clone()));

            let inner: Weak<Inner> = Arc::downgrade(&self.inner);
            let scoped = id.clone();
            let release = Box::new(move || {
                if let Some(inner) = inner.upgrade() {
                    inner.subscriptions.lock().unwrap().remove(&scoped);
                    inner.record(GatewayEvent::Closed(scoped));
                }
            });

            Ok(Subscription::new(id.clone(), gate, release))
        })
    }

    fn reply_address(&self, id: &CorrelationId) -> String {
        format!("replies.{id}")
    }
}

impl std::fmt::Debug for InMemoryGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryGateway")
            .field("open_subscriptions", &self.open_subscriptions())
            .field("published", &self.inner.published.lock().unwrap().len())
            .finish_non_exhaustive()
    }
}
