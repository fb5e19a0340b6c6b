//! Where replies are sent and how a reply record is matched to its call.

use rdkafka::message::{Headers, Message};
use reqbridge_core::CorrelationId;
use reqbridge_core::message::CORRELATION_ID_HEADER;

/// Default prefix for per-call reply topics.
pub const DEFAULT_REPLY_PREFIX: &str = "replies.";

/// Longest topic name Kafka accepts.
pub const MAX_TOPIC_NAME_LEN: usize = 249;

/// How replies reach the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyAddressing {
    /// One reply topic per call, named `<prefix><id>`.
    ///
    /// The topic is created when the call subscribes and deleted when the
    /// subscription closes.
    TopicPerCall {
        /// Topic name prefix
        prefix: String,
    },
    /// One shared reply topic; replies are keyed by correlation id.
    Shared {
        /// Shared reply topic
        topic: String,
    },
}

impl Default for ReplyAddressing {
    fn default() -> Self {
        Self::TopicPerCall {
            prefix: DEFAULT_REPLY_PREFIX.to_string(),
        }
    }
}

impl ReplyAddressing {
    /// Topic replies for `id` must be produced to.
    #[must_use]
    pub fn reply_topic(&self, id: &CorrelationId) -> String {
        match self {
            Self::TopicPerCall { prefix } => format!("{prefix}{id}"),
            Self::Shared { topic } => topic.clone(),
        }
    }

    /// Length of the reply topic name for an id of `id_len` characters.
    #[must_use]
    pub fn reply_topic_len(&self, id_len: usize) -> usize {
        match self {
            Self::TopicPerCall { prefix } => prefix.len() + id_len,
            Self::Shared { topic } => topic.len(),
        }
    }

    /// Whether several calls read the same topic.
    #[must_use]
    pub const fn is_shared(&self) -> bool {
        matches!(self, Self::Shared { .. })
    }
}

/// Correlation id carried by a reply record: the message key, else the
/// `correlation-id` header.
pub(crate) fn record_id<M: Message>(message: &M) -> Option<CorrelationId> {
    if let Some(key) = message.key() {
        return std::str::from_utf8(key).ok().map(CorrelationId::new);
    }

    let headers = message.headers()?;
    headers
        .iter()
        .find(|header| header.key == CORRELATION_ID_HEADER)
        .and_then(|header| header.value)
        .and_then(|value| std::str::from_utf8(value).ok())
        .map(CorrelationId::new)
}

/// Decide which id a record is delivered under, or skip it.
///
/// Per-call topics belong to one call, so unkeyed records are attributed to
/// it. On a shared topic only records keyed to `scoped` are delivered.
pub(crate) fn route(
    scoped: &CorrelationId,
    carried: Option<CorrelationId>,
    shared: bool,
) -> Option<CorrelationId> {
    match (carried, shared) {
        (Some(id), true) if id == *scoped => Some(id),
        (_, true) => None,
        (Some(id), false) => Some(id),
        (None, false) => Some(scoped.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdkafka::message::{Header, OwnedHeaders, OwnedMessage, Timestamp};

    fn record(key: Option<&str>, headers: Option<OwnedHeaders>) -> OwnedMessage {
        OwnedMessage::new(
            Some(b"{}".to_vec()),
            key.map(|k| k.as_bytes().to_vec()),
            "replies".to_string(),
            Timestamp::NotAvailable,
            0,
            0,
            headers,
        )
    }

    #[test]
    fn per_call_topic_is_prefixed_id() {
        let addressing = ReplyAddressing::default();
        let id = CorrelationId::new("abc123");

        assert_eq!(addressing.reply_topic(&id), "replies.abc123");
        assert!(!addressing.is_shared());
    }

    #[test]
    fn shared_topic_ignores_id() {
        let addressing = ReplyAddressing::Shared {
            topic: "bridge-replies".to_string(),
        };

        assert_eq!(addressing.reply_topic(&CorrelationId::new("a")), "bridge-replies");
        assert!(addressing.is_shared());
    }

    #[test]
    fn reply_topic_len_counts_prefix_only_per_call() {
        let per_call = ReplyAddressing::default();
        let shared = ReplyAddressing::Shared {
            topic: "bridge-replies".to_string(),
        };

        assert_eq!(per_call.reply_topic_len(86), DEFAULT_REPLY_PREFIX.len() + 86);
        assert_eq!(
            per_call.reply_topic_len(6),
            per_call.reply_topic(&CorrelationId::new("abc123")).len()
        );
        assert_eq!(shared.reply_topic_len(400), "bridge-replies".len());
    }

    #[test]
    fn key_wins_over_header() {
        let headers = OwnedHeaders::new().insert(Header {
            key: CORRELATION_ID_HEADER,
            value: Some("from-header"),
        });

        let id = record_id(&record(Some("from-key"), Some(headers)));
        assert_eq!(id, Some(CorrelationId::new("from-key")));
    }

    #[test]
    fn header_used_without_key() {
        let headers = OwnedHeaders::new().insert(Header {
            key: CORRELATION_ID_HEADER,
            value: Some("from-header"),
        });

        let id = record_id(&record(None, Some(headers)));
        assert_eq!(id, Some(CorrelationId::new("from-header")));
        assert_eq!(record_id(&record(None, None)), None);
    }

    #[test]
    fn shared_topic_delivers_only_own_records() {
        let mine = CorrelationId::new("mine");

        assert_eq!(route(&mine, Some(mine.clone()), true), Some(mine.clone()));
        assert_eq!(route(&mine, Some(CorrelationId::new("theirs")), true), None);
        assert_eq!(route(&mine, None, true), None);
    }

    #[test]
    fn per_call_topic_attributes_unkeyed_records() {
        let mine = CorrelationId::new("mine");

        assert_eq!(route(&mine, None, false), Some(mine.clone()));
        assert_eq!(
            route(&mine, Some(CorrelationId::new("other")), false),
            Some(CorrelationId::new("other"))
        );
    }
}
