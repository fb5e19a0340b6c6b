//! Per-call reply consumer.
//!
//! Each scoped subscription owns one `StreamConsumer` with a manual partition
//! assignment. Offsets are fixed at assignment time, before the request is
//! published, so a reply produced at any later point is read.

use crate::addressing::{record_id, route};
use futures::StreamExt;
use rdkafka::TopicPartitionList;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::Message;
use rdkafka::{ClientConfig, Offset};
use reqbridge_core::{CorrelationId, DeliveryGate, GatewayError, InboundReply};
use std::sync::Arc;
use std::time::Duration;

/// Settings shared by every reply consumer.
#[derive(Debug, Clone)]
pub(crate) struct ListenerConfig {
    pub brokers: String,
    pub group_prefix: String,
    pub metadata_timeout: Duration,
}

/// Create a consumer for `id` and assign it to the reply topic.
///
/// Blocking metadata calls run on the blocking pool.
pub(crate) async fn assign(
    config: &ListenerConfig,
    id: &CorrelationId,
    topic: String,
    shared: bool,
) -> Result<StreamConsumer, GatewayError> {
    let subscribe_failed = |reason: String| GatewayError::SubscribeFailed {
        id: id.clone(),
        reason,
    };

    let consumer: StreamConsumer = ClientConfig::new()
        .set("bootstrap.servers", &config.brokers)
        .set("group.id", format!("{}{id}", config.group_prefix))
        .set("enable.auto.commit", "false")
        .set("auto.offset.reset", "earliest")
        .set("enable.partition.eof", "false")
        .create()
        .map_err(|e| subscribe_failed(format!("Failed to create consumer: {e}")))?;

    let timeout = config.metadata_timeout;
    let consumer = tokio::task::spawn_blocking(move || -> Result<StreamConsumer, KafkaError> {
        let mut assignment = TopicPartitionList::new();
        if shared {
            let metadata = consumer.fetch_metadata(Some(topic.as_str()), timeout)?;
            let partitions: Vec<i32> = metadata
                .topics()
                .iter()
                .filter(|t| t.name() == topic)
                .flat_map(|t| t.partitions().iter().map(|p| p.id()))
                .collect();
            if partitions.is_empty() {
                return Err(KafkaError::MetadataFetch(RDKafkaErrorCode::UnknownTopic));
            }
            for partition in partitions {
                let (_low, high) = consumer.fetch_watermarks(&topic, partition, timeout)?;
                assignment.add_partition_offset(&topic, partition, Offset::Offset(high))?;
            }
        } else {
            assignment.add_partition_offset(&topic, 0, Offset::Beginning)?;
        }
        consumer.assign(&assignment)?;
        Ok(consumer)
    })
    .await
    .map_err(|e| subscribe_failed(format!("Assignment task failed: {e}")))?
    .map_err(|e| subscribe_failed(format!("Failed to assign reply partitions: {e}")))?;

    Ok(consumer)
}

/// Forward reply records to `gate` until it closes or the consumer dies.
pub(crate) async fn forward(
    consumer: StreamConsumer,
    id: CorrelationId,
    shared: bool,
    gate: Arc<DeliveryGate>,
) {
    let mut stream = consumer.stream();

    while let Some(result) = stream.next().await {
        let delivery = match result {
            Ok(message) => {
                let Some(reply_id) = route(&id, record_id(&message), shared) else {
                    tracing::trace!(
                        topic = message.topic(),
                        partition = message.partition(),
                        offset = message.offset(),
                        "Skipping reply for another call"
                    );
                    continue;
                };
                tracing::trace!(
                    topic = message.topic(),
                    partition = message.partition(),
                    offset = message.offset(),
                    "Reply record received"
                );
                Ok(InboundReply {
                    id: reply_id,
                    payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
                })
            },
            Err(e) if is_fatal(&e) => {
                tracing::error!(correlation_id = %id, error = %e, "Reply consumer failed");
                Err(GatewayError::Transport(e.to_string()))
            },
            Err(e) => {
                tracing::warn!(correlation_id = %id, error = %e, "Transient reply consumer error");
                continue;
            },
        };

        if !gate.deliver(delivery) {
            break;
        }
    }

    tracing::debug!(correlation_id = %id, "Reply consumer exiting");
}

fn is_fatal(error: &KafkaError) -> bool {
    matches!(
        error.rdkafka_error_code(),
        Some(RDKafkaErrorCode::Fatal | RDKafkaErrorCode::Authentication)
    )
}
