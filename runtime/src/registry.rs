//! Reply registry: the process-wide table of in-flight calls.
//!
//! Each call registers its [`CorrelationId`] before anything is published.
//! Whichever path settles the call first (reply, deadline, broker failure)
//! removes the entry and writes the call's single result slot in the same
//! step; every later attempt finds nothing and returns `false`.
//!
//! ```text
//! register(id) ──► [id → slot] ──┬── resolve(id, payload) ─► Reply
//!                                ├── expire(id) ───────────► Expired
//!                                ├── fail(id, err) ────────► Failed
//!                                └── cancel(id) ───────────► (slot dropped)
//! ```
//!
//! The lock is held only for the map operation, never across an await and
//! never while the result is being sent.

use crate::metrics::BridgeMetrics;
use chrono::{DateTime, Utc};
use reqbridge_core::{CorrelationId, GatewayError};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// Errors from registry operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// An entry already exists for this id.
    #[error("Correlation id '{0}' is already registered")]
    DuplicateId(CorrelationId),
}

/// Terminal result written into a call's slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// A reply arrived first
    Reply(Vec<u8>),
    /// The deadline elapsed first (or the caller went away)
    Expired,
    /// The subscription reported an unrecoverable broker error
    Failed(GatewayError),
}

struct Entry {
    slot: oneshot::Sender<Resolution>,
}

/// One in-flight call, owned by the bridge invocation that registered it.
#[derive(Debug)]
pub struct PendingCall {
    id: CorrelationId,
    created_at: DateTime<Utc>,
    deadline: Instant,
    outcome: oneshot::Receiver<Resolution>,
}

impl PendingCall {
    /// Correlation id of the call.
    #[must_use]
    pub const fn id(&self) -> &CorrelationId {
        &self.id
    }

    /// Wall-clock time the call was registered.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Instant after which the call should be expired.
    #[must_use]
    pub const fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Wait for the result slot to be written.
    ///
    /// Returns `None` if the entry was cancelled without a result.
    pub async fn outcome(&mut self) -> Option<Resolution> {
        (&mut self.outcome).await.ok()
    }

    /// Take the result if it has already been written.
    pub fn try_outcome(&mut self) -> Option<Resolution> {
        self.outcome.try_recv().ok()
    }
}

/// Table of in-flight calls keyed by correlation id.
#[derive(Default)]
pub struct ReplyRegistry {
    entries: Mutex<HashMap<CorrelationId, Entry>>,
}

impl ReplyRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<CorrelationId, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new pending call.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateId`] if `id` is already in flight.
    pub fn register(&self, id: CorrelationId, deadline: Instant) -> Result<PendingCall, RegistryError> {
        let (slot, outcome) = oneshot::channel();

        let in_flight = {
            let mut entries = self.entries();
            if entries.contains_key(&id) {
                return Err(RegistryError::DuplicateId(id));
            }
            entries.insert(id.clone(), Entry { slot });
            entries.len()
        };
        BridgeMetrics::set_in_flight(in_flight);

        Ok(PendingCall {
            id,
            created_at: Utc::now(),
            deadline,
            outcome,
        })
    }

    /// Settle the call with a reply payload.
    ///
    /// Returns `false` for unknown, late or duplicate replies.
    pub fn resolve(&self, id: &CorrelationId, payload: Vec<u8>) -> bool {
        self.settle(id, Resolution::Reply(payload))
    }

    /// Settle the call as expired.
    ///
    /// Returns `false` if the call was already settled.
    pub fn expire(&self, id: &CorrelationId) -> bool {
        self.settle(id, Resolution::Expired)
    }

    /// Settle the call with a broker error.
    ///
    /// Returns `false` if the call was already settled.
    pub fn fail(&self, id: &CorrelationId, error: GatewayError) -> bool {
        self.settle(id, Resolution::Failed(error))
    }

    /// Remove an entry without writing a result.
    ///
    /// Used when publishing failed before any reply could exist.
    pub fn cancel(&self, id: &CorrelationId) {
        if self.take(id).is_some() {
            tracing::debug!(correlation_id = %id, "Pending call cancelled");
        }
    }

    /// Whether `id` is still awaiting resolution.
    #[must_use]
    pub fn contains(&self, id: &CorrelationId) -> bool {
        self.entries().contains_key(id)
    }

    /// Number of calls in flight.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// Whether no calls are in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    fn take(&self, id: &CorrelationId) -> Option<Entry> {
        let (entry, in_flight) = {
            let mut entries = self.entries();
            (entries.remove(id), entries.len())
        };
        if entry.is_some() {
            BridgeMetrics::set_in_flight(in_flight);
        }
        entry
    }

    fn settle(&self, id: &CorrelationId, resolution: Resolution) -> bool {
        let Some(entry) = self.take(id) else {
            return false;
        };
        // The receiver is gone if the caller was dropped; the call is still settled.
        let _ = entry.slot.send(resolution);
        true
    }
}

impl std::fmt::Debug for ReplyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplyRegistry")
            .field("in_flight", &self.len())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn id(value: &str) -> CorrelationId {
        CorrelationId::new(value)
    }

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(1)
    }

    #[tokio::test]
    async fn resolve_writes_reply_and_removes_entry() {
        let registry = ReplyRegistry::new();
        let mut pending = registry.register(id("a"), deadline()).unwrap();

        assert!(registry.contains(&id("a")));
        assert!(registry.resolve(&id("a"), b"ok".to_vec()));
        assert!(!registry.contains(&id("a")));
        assert_eq!(pending.outcome().await, Some(Resolution::Reply(b"ok".to_vec())));
    }

    #[test]
    fn outcome_stays_pending_until_the_slot_is_written() {
        let registry = ReplyRegistry::new();
        let mut pending = registry.register(id("a"), deadline()).unwrap();
        let mut outcome = tokio_test::task::spawn(pending.outcome());

        tokio_test::assert_pending!(outcome.poll());
        assert!(registry.resolve(&id("a"), b"ok".to_vec()));
        assert!(outcome.is_woken());
        assert_eq!(
            tokio_test::assert_ready!(outcome.poll()),
            Some(Resolution::Reply(b"ok".to_vec()))
        );
    }

    #[test]
    fn duplicate_register_is_rejected() {
        let registry = ReplyRegistry::new();
        let _pending = registry.register(id("a"), deadline()).unwrap();

        let err = registry.register(id("a"), deadline()).unwrap_err();
        assert_eq!(err, RegistryError::DuplicateId(id("a")));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn resolve_after_expire_is_a_noop() {
        let registry = ReplyRegistry::new();
        let mut pending = registry.register(id("a"), deadline()).unwrap();

        assert!(registry.expire(&id("a")));
        assert!(!registry.resolve(&id("a"), b"late".to_vec()));
        assert_eq!(pending.try_outcome(), Some(Resolution::Expired));
    }

    #[test]
    fn duplicate_reply_is_a_noop() {
        let registry = ReplyRegistry::new();
        let mut pending = registry.register(id("a"), deadline()).unwrap();

        assert!(registry.resolve(&id("a"), b"first".to_vec()));
        assert!(!registry.resolve(&id("a"), b"second".to_vec()));
        assert_eq!(pending.try_outcome(), Some(Resolution::Reply(b"first".to_vec())));
    }

    #[test]
    fn unknown_reply_is_a_noop() {
        let registry = ReplyRegistry::new();
        assert!(!registry.resolve(&id("ghost"), b"x".to_vec()));
        assert!(!registry.expire(&id("ghost")));
    }

    #[tokio::test]
    async fn cancel_drops_slot_without_result() {
        let registry = ReplyRegistry::new();
        let mut pending = registry.register(id("a"), deadline()).unwrap();

        registry.cancel(&id("a"));
        assert!(registry.is_empty());
        assert!(!registry.expire(&id("a")));
        assert_eq!(pending.outcome().await, None);
    }

    #[test]
    fn fail_carries_gateway_error() {
        let registry = ReplyRegistry::new();
        let mut pending = registry.register(id("a"), deadline()).unwrap();
        let error = GatewayError::Transport("broker gone".to_string());

        assert!(registry.fail(&id("a"), error.clone()));
        assert_eq!(pending.try_outcome(), Some(Resolution::Failed(error)));
    }

    #[test]
    fn replies_only_reach_their_own_call() {
        let registry = ReplyRegistry::new();
        let mut a = registry.register(id("a"), deadline()).unwrap();
        let mut b = registry.register(id("b"), deadline()).unwrap();

        assert!(registry.resolve(&id("a"), b"for-a".to_vec()));
        assert_eq!(a.try_outcome(), Some(Resolution::Reply(b"for-a".to_vec())));
        assert_eq!(b.try_outcome(), None);
        assert!(registry.contains(&id("b")));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_resolve_and_expire_have_one_winner() {
        let registry = Arc::new(ReplyRegistry::new());

        for round in 0..500 {
            let call_id = id(&format!("call-{round}"));
            let mut pending = registry.register(call_id.clone(), deadline()).unwrap();

            let resolver = {
                let registry = Arc::clone(&registry);
                let call_id = call_id.clone();
                tokio::spawn(async move { registry.resolve(&call_id, b"reply".to_vec()) })
            };
            let expirer = {
                let registry = Arc::clone(&registry);
                let call_id = call_id.clone();
                tokio::spawn(async move { registry.expire(&call_id) })
            };

            let resolved = resolver.await.unwrap();
            let expired = expirer.await.unwrap();
            assert!(resolved ^ expired, "exactly one winner expected");

            let outcome = pending.outcome().await.unwrap();
            if resolved {
                assert_eq!(outcome, Resolution::Reply(b"reply".to_vec()));
            } else {
                assert_eq!(outcome, Resolution::Expired);
            }
        }
        assert!(registry.is_empty());
    }
}
