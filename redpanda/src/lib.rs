//! Redpanda broker gateway for the request bridge.
//!
//! [`RedpandaGateway`] implements [`BrokerGateway`] over rdkafka, so it works
//! with Redpanda, Apache Kafka, or any other Kafka-compatible broker.
//!
//! # Architecture
//!
//! ```text
//!   RequestBridge
//!     │  1. subscribe_scoped(id)
//!     ▼
//! ┌───────────────────────┐   per-call StreamConsumer, manual assignment
//! │   RedpandaGateway     │◄─────────────── reply topic ◄──┐
//! │                       │                                │
//! │  shared FutureProducer│── 2. publish ──► request topic ─┤
//! └───────────────────────┘                                │
//!                                                 responder service
//! ```
//!
//! One producer is created per gateway and shared by all calls. Every call
//! gets its own consumer, assigned to its reply partitions before the request
//! is produced, and torn down when the call's subscription closes.
//!
//! # Reply Addressing
//!
//! - [`ReplyAddressing::TopicPerCall`] (default): replies go to
//!   `<prefix><correlation id>`. The topic is created on subscribe and
//!   deleted on close.
//! - [`ReplyAddressing::Shared`]: replies go to one topic, keyed by
//!   correlation id. Each call reads every partition from the high
//!   watermark observed at subscribe time and keeps only its own records.
//!
//! # Wire Format
//!
//! Requests are produced with the correlation id as key and two headers,
//! `correlation-id` and `reply-to`. The payload is the JSON
//! [`RequestEnvelope`](reqbridge_core::RequestEnvelope).
//!
//! # Example
//!
//! ```no_run
//! use reqbridge_redpanda::{RedpandaGateway, ReplyAddressing};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let gateway = RedpandaGateway::builder()
//!     .brokers("localhost:9092")
//!     .producer_acks("all")
//!     .reply_addressing(ReplyAddressing::Shared { topic: "bridge-replies".into() })
//!     .build()?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod addressing;
mod listener;

pub use addressing::{DEFAULT_REPLY_PREFIX, MAX_TOPIC_NAME_LEN, ReplyAddressing};

use listener::ListenerConfig;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::error::RDKafkaErrorCode;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use reqbridge_core::correlation::{MIN_ID_BYTES, encoded_id_len};
use reqbridge_core::message::{CORRELATION_ID_HEADER, REPLY_TO_HEADER};
use reqbridge_core::{
    BrokerGateway, CorrelationId, DeliveryGate, GatewayError, GatewayFuture, OutboundMessage,
    ReplyHandler, Subscription,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Redpanda-backed [`BrokerGateway`].
///
/// # Example
///
/// ```no_run
/// use reqbridge_redpanda::RedpandaGateway;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let gateway = RedpandaGateway::new("localhost:9092")?;
/// # Ok(())
/// # }
/// ```
pub struct RedpandaGateway {
    /// Shared producer for request messages
    producer: FutureProducer,
    /// Creates and deletes per-call reply topics
    admin: Arc<AdminClient<DefaultClientContext>>,
    /// Producer send timeout
    timeout: Duration,
    addressing: ReplyAddressing,
    reply_replication: i32,
    listener: ListenerConfig,
    open: Arc<AtomicUsize>,
}

impl RedpandaGateway {
    /// Create a gateway with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::ConnectionFailed`] if the clients cannot be created.
    pub fn new(brokers: &str) -> Result<Self, GatewayError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a new builder for configuring the gateway.
    #[must_use]
    pub fn builder() -> RedpandaGatewayBuilder {
        RedpandaGatewayBuilder::default()
    }

    /// Broker addresses.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.listener.brokers
    }

    /// Active reply addressing mode.
    #[must_use]
    pub const fn reply_addressing(&self) -> &ReplyAddressing {
        &self.addressing
    }

    /// Scoped subscriptions currently open.
    #[must_use]
    pub fn open_subscriptions(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    async fn create_reply_topic(&self, id: &CorrelationId, topic: &str) -> Result<(), GatewayError> {
        let new_topic = NewTopic::new(topic, 1, TopicReplication::Fixed(self.reply_replication));
        let options = AdminOptions::new().operation_timeout(Some(self.listener.metadata_timeout));

        let results = self
            .admin
            .create_topics(&[new_topic], &options)
            .await
            .map_err(|e| GatewayError::SubscribeFailed {
                id: id.clone(),
                reason: format!("Failed to create reply topic: {e}"),
            })?;

        for result in results {
            match result {
                Ok(_) | Err((_, RDKafkaErrorCode::TopicAlreadyExists)) => {},
                Err((name, code)) => {
                    return Err(GatewayError::SubscribeFailed {
                        id: id.clone(),
                        reason: format!("Failed to create reply topic {name}: {code}"),
                    });
                },
            }
        }
        Ok(())
    }
}

type TopicCleanupFn = Box<dyn FnOnce() + Send + Sync>;

/// Deletes a per-call reply topic on drop until ownership moves to the
/// subscription's release hook.
struct ReplyTopicCleanup(Option<TopicCleanupFn>);

impl ReplyTopicCleanup {
    fn new(delete: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self(Some(Box::new(delete)))
    }

    const fn disarmed() -> Self {
        Self(None)
    }

    fn hand_over(mut self) -> Option<TopicCleanupFn> {
        self.0.take()
    }
}

impl Drop for ReplyTopicCleanup {
    fn drop(&mut self) {
        if let Some(delete) = self.0.take() {
            tracing::debug!("Subscribe abandoned, removing reply topic");
            delete();
        }
    }
}

/// Delete a per-call reply topic in the background.
fn delete_reply_topic(admin: Arc<AdminClient<DefaultClientContext>>, topic: String) {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        tracing::warn!(topic = %topic, "No runtime to delete reply topic");
        return;
    };
    runtime.spawn(async move {
        match admin.delete_topics(&[topic.as_str()], &AdminOptions::new()).await {
            Ok(_) => tracing::trace!(topic = %topic, "Reply topic deleted"),
            Err(e) => tracing::warn!(topic = %topic, error = %e, "Failed to delete reply topic"),
        }
    });
}

#[allow(clippy::cast_precision_loss)]
fn record_open(count: usize) {
    metrics::gauge!("bridge_open_subscriptions").set(count as f64);
}

impl BrokerGateway for RedpandaGateway {
    fn publish<'a>(&'a self, message: &'a OutboundMessage) -> GatewayFuture<'a, ()> {
        Box::pin(async move {
            let headers = OwnedHeaders::new()
                .insert(Header {
                    key: CORRELATION_ID_HEADER,
                    value: Some(message.id().as_str()),
                })
                .insert(Header {
                    key: REPLY_TO_HEADER,
                    value: Some(message.metadata().reply_to.as_str()),
                });

            let record = FutureRecord::to(message.destination())
                .payload(message.payload())
                .key(message.id().as_str())
                .headers(headers);

            match self.producer.send(record, Timeout::After(self.timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = message.destination(),
                        partition,
                        offset,
                        correlation_id = %message.id(),
                        "Request published"
                    );
                    Ok(())
                },
                Err((kafka_error, _)) => {
                    tracing::error!(
                        topic = message.destination(),
                        error = %kafka_error,
                        "Failed to publish request"
                    );
                    Err(GatewayError::PublishFailed {
                        destination: message.destination().to_string(),
                        reason: kafka_error.to_string(),
                    })
                },
            }
        })
    }

    fn subscribe_scoped<'a>(
        &'a self,
        id: &'a CorrelationId,
        on_reply: ReplyHandler,
    ) -> GatewayFuture<'a, Subscription> {
        Box::pin(async move {
            let topic = self.addressing.reply_topic(id);
            let shared = self.addressing.is_shared();

            // Armed before creation so a future dropped mid-subscribe still
            // removes the topic.
            let cleanup = if shared {
                ReplyTopicCleanup::disarmed()
            } else {
                let admin = Arc::clone(&self.admin);
                let doomed = topic.clone();
                ReplyTopicCleanup::new(move || delete_reply_topic(admin, doomed))
            };

            if !shared {
                self.create_reply_topic(id, &topic).await?;
            }

            let consumer = listener::assign(&self.listener, id, topic.clone(), shared).await?;

            let gate = DeliveryGate::new(on_reply);
            let task = tokio::spawn(listener::forward(consumer, id.clone(), shared, Arc::clone(&gate)));
            let abort = task.abort_handle();

            record_open(self.open.fetch_add(1, Ordering::SeqCst) + 1);
            tracing::debug!(correlation_id = %id, topic = %topic, shared, "Reply consumer assigned");

            let open = Arc::clone(&self.open);
            let delete_topic = cleanup.hand_over();
            let release = Box::new(move || {
                abort.abort();
                record_open(open.fetch_sub(1, Ordering::SeqCst).saturating_sub(1));
                if let Some(delete_topic) = delete_topic {
                    delete_topic();
                }
            });

            Ok(Subscription::new(id.clone(), gate, release))
        })
    }

    fn reply_address(&self, id: &CorrelationId) -> String {
        self.addressing.reply_topic(id)
    }
}

impl std::fmt::Debug for RedpandaGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedpandaGateway")
            .field("brokers", &self.listener.brokers)
            .field("addressing", &self.addressing)
            .field("timeout", &self.timeout)
            .field("open_subscriptions", &self.open_subscriptions())
            .finish_non_exhaustive()
    }
}

/// Builder for configuring a [`RedpandaGateway`].
///
/// # Example
///
/// ```no_run
/// use reqbridge_redpanda::{RedpandaGateway, ReplyAddressing};
/// use std::time::Duration;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let gateway = RedpandaGateway::builder()
///     .brokers("localhost:9092,localhost:9093")
///     .compression("lz4")
///     .timeout(Duration::from_secs(10))
///     .reply_addressing(ReplyAddressing::TopicPerCall { prefix: "replies.".into() })
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct RedpandaGatewayBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    client_id: Option<String>,
    reply_addressing: Option<ReplyAddressing>,
    reply_replication: Option<i32>,
    metadata_timeout: Option<Duration>,
}

impl RedpandaGatewayBuilder {
    /// Set the broker addresses (comma-separated).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the producer acknowledgment mode: `"0"`, `"1"` or `"all"`.
    ///
    /// Default: `"all"`
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the compression codec: `"none"`, `"gzip"`, `"snappy"`, `"lz4"`, `"zstd"`.
    ///
    /// Default: `"none"`
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Set the producer send timeout.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the client id; it also prefixes per-call consumer group ids.
    ///
    /// Default: `"reqbridge"`
    #[must_use]
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Set how replies are addressed.
    ///
    /// Default: [`ReplyAddressing::TopicPerCall`] with prefix `"replies."`
    #[must_use]
    pub fn reply_addressing(mut self, addressing: ReplyAddressing) -> Self {
        self.reply_addressing = Some(addressing);
        self
    }

    /// Set the replication factor for per-call reply topics.
    ///
    /// Default: 1
    #[must_use]
    pub const fn reply_replication(mut self, replication: i32) -> Self {
        self.reply_replication = Some(replication);
        self
    }

    /// Set the timeout for metadata, watermark and admin requests made
    /// while subscribing.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub const fn metadata_timeout(mut self, timeout: Duration) -> Self {
        self.metadata_timeout = Some(timeout);
        self
    }

    /// Build the [`RedpandaGateway`].
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::ConnectionFailed`] if brokers are not set, the
    /// reply addressing cannot produce valid topic names, or a client cannot
    /// be created.
    pub fn build(self) -> Result<RedpandaGateway, GatewayError> {
        let brokers = self
            .brokers
            .ok_or_else(|| GatewayError::ConnectionFailed("Brokers not configured".to_string()))?;
        let acks = self.producer_acks.unwrap_or_else(|| "all".to_string());
        let compression = self.compression.unwrap_or_else(|| "none".to_string());
        let timeout = self.timeout.unwrap_or(Duration::from_secs(5));
        let client_id = self.client_id.unwrap_or_else(|| "reqbridge".to_string());
        let addressing = self.reply_addressing.unwrap_or_default();

        let shortest = addressing.reply_topic_len(encoded_id_len(MIN_ID_BYTES));
        if shortest > MAX_TOPIC_NAME_LEN {
            return Err(GatewayError::ConnectionFailed(format!(
                "Reply topic names would be at least {shortest} characters, above the limit of {MAX_TOPIC_NAME_LEN}"
            )));
        }

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("client.id", &client_id)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .set("acks", &acks)
            .set("compression.type", &compression)
            .create()
            .map_err(|e| GatewayError::ConnectionFailed(format!("Failed to create producer: {e}")))?;

        let admin: AdminClient<DefaultClientContext> = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("client.id", format!("{client_id}-admin"))
            .create()
            .map_err(|e| {
                GatewayError::ConnectionFailed(format!("Failed to create admin client: {e}"))
            })?;

        tracing::info!(
            brokers = %brokers,
            acks = %acks,
            compression = %compression,
            timeout_ms = timeout.as_millis(),
            addressing = ?addressing,
            "RedpandaGateway created successfully"
        );

        Ok(RedpandaGateway {
            producer,
            admin: Arc::new(admin),
            timeout,
            addressing,
            reply_replication: self.reply_replication.unwrap_or(1),
            listener: ListenerConfig {
                group_prefix: format!("{client_id}-reply-"),
                brokers,
                metadata_timeout: self.metadata_timeout.unwrap_or(Duration::from_secs(5)),
            },
            open: Arc::new(AtomicUsize::new(0)),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn redpanda_gateway_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<RedpandaGateway>();
        assert_sync::<RedpandaGateway>();
    }

    #[test]
    fn build_requires_brokers() {
        let err = RedpandaGateway::builder().build().unwrap_err();
        assert!(matches!(err, GatewayError::ConnectionFailed(_)));
    }

    #[test]
    fn build_does_not_need_a_reachable_broker() {
        let gateway = RedpandaGateway::builder()
            .brokers("localhost:1")
            .client_id("unit")
            .build()
            .unwrap();

        assert_eq!(gateway.brokers(), "localhost:1");
        assert_eq!(gateway.open_subscriptions(), 0);
        assert_eq!(gateway.listener.group_prefix, "unit-reply-");
    }

    fn counting_cleanup() -> (ReplyTopicCleanup, Arc<AtomicUsize>) {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let cleanup = ReplyTopicCleanup::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (cleanup, runs)
    }

    #[test]
    fn abandoned_subscribe_deletes_the_reply_topic() {
        let (cleanup, runs) = counting_cleanup();

        drop(cleanup);

        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handed_over_cleanup_runs_only_on_release() {
        let (cleanup, runs) = counting_cleanup();

        let release = cleanup.hand_over().unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        release();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn shared_topics_are_never_deleted() {
        assert!(ReplyTopicCleanup::disarmed().hand_over().is_none());
    }

    #[test]
    fn build_rejects_reply_topics_kafka_cannot_name() {
        let prefix = "x".repeat(MAX_TOPIC_NAME_LEN - 10);

        for addressing in [
            ReplyAddressing::TopicPerCall { prefix },
            ReplyAddressing::Shared {
                topic: "y".repeat(MAX_TOPIC_NAME_LEN + 1),
            },
        ] {
            let err = RedpandaGateway::builder()
                .brokers("localhost:1")
                .reply_addressing(addressing)
                .build()
                .unwrap_err();
            assert!(matches!(err, GatewayError::ConnectionFailed(_)));
        }
    }

    #[test]
    fn reply_address_follows_addressing_mode() {
        let id = CorrelationId::new("abc123");

        let per_call = RedpandaGateway::new("localhost:1").unwrap();
        assert_eq!(per_call.reply_address(&id), "replies.abc123");

        let shared = RedpandaGateway::builder()
            .brokers("localhost:1")
            .reply_addressing(ReplyAddressing::Shared {
                topic: "bridge-replies".to_string(),
            })
            .build()
            .unwrap();
        assert_eq!(shared.reply_address(&id), "bridge-replies");
    }
}
