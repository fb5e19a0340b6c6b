//! Environment configuration for the bridge server.

use reqbridge_core::correlation::{DEFAULT_ID_BYTES, MIN_ID_BYTES, encoded_id_len};
use reqbridge_redpanda::{DEFAULT_REPLY_PREFIX, MAX_TOPIC_NAME_LEN, ReplyAddressing};
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Shared reply topic used when `BRIDGE_REPLY_MODE=shared` and no topic is given.
pub const DEFAULT_SHARED_REPLY_TOPIC: &str = "bridge-replies";

/// Configuration errors, one per offending variable.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable was set to a value that cannot be used
    #[error("invalid {var}={value:?}: {reason}")]
    Invalid {
        /// Variable name
        var: &'static str,
        /// Raw value
        value: String,
        /// What was wrong with it
        reason: String,
    },
}

impl ConfigError {
    fn invalid(var: &'static str, value: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            var,
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// Server settings read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Comma-separated broker endpoints
    pub brokers: String,
    /// HTTP listen address
    pub listen_addr: SocketAddr,
    /// Per-call reply timeout
    pub timeout: Duration,
    /// Correlation id length in bytes
    pub id_bytes: usize,
    /// How replies are addressed
    pub reply_addressing: ReplyAddressing,
    /// Prefix for request destinations
    pub topic_prefix: String,
    /// Producer `acks` setting
    pub producer_acks: String,
    /// Publish retries applied at the gateway
    pub publish_retries: usize,
    /// Prometheus listener, disabled when unset
    pub metrics_addr: Option<SocketAddr>,
}

impl ServerConfig {
    /// Read the configuration from process environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for the first variable holding an unusable value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Read the configuration through `lookup`.
    ///
    /// Unset and empty variables fall back to their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for the first variable holding an unusable value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).filter(|value| !value.trim().is_empty());

        let brokers = get("KAFKA_HOSTS_PORTS").unwrap_or_else(|| "localhost:9092".to_string());
        let listen_addr = parse_or("BRIDGE_LISTEN_ADDR", get("BRIDGE_LISTEN_ADDR"), || {
            SocketAddr::from(([0, 0, 0, 0], 3333))
        })?;

        let timeout_ms: u64 = parse_or("BRIDGE_TIMEOUT_MS", get("BRIDGE_TIMEOUT_MS"), || 1000)?;
        if timeout_ms == 0 {
            return Err(ConfigError::invalid(
                "BRIDGE_TIMEOUT_MS",
                "0",
                "timeout must be positive",
            ));
        }

        let id_bytes: usize =
            parse_or("BRIDGE_ID_BYTES", get("BRIDGE_ID_BYTES"), || DEFAULT_ID_BYTES)?;
        if id_bytes < MIN_ID_BYTES {
            return Err(ConfigError::invalid(
                "BRIDGE_ID_BYTES",
                &id_bytes.to_string(),
                format!("at least {MIN_ID_BYTES} bytes are required"),
            ));
        }

        let reply_topic = get("BRIDGE_REPLY_TOPIC");
        let reply_addressing = match get("BRIDGE_REPLY_MODE").as_deref() {
            None | Some("topic-per-call") => ReplyAddressing::TopicPerCall {
                prefix: reply_topic.unwrap_or_else(|| DEFAULT_REPLY_PREFIX.to_string()),
            },
            Some("shared") => ReplyAddressing::Shared {
                topic: reply_topic.unwrap_or_else(|| DEFAULT_SHARED_REPLY_TOPIC.to_string()),
            },
            Some(other) => {
                return Err(ConfigError::invalid(
                    "BRIDGE_REPLY_MODE",
                    other,
                    "expected `topic-per-call` or `shared`",
                ));
            },
        };

        check_reply_topic_len(&reply_addressing, id_bytes)?;

        let producer_acks = get("BRIDGE_PRODUCER_ACKS").unwrap_or_else(|| "all".to_string());
        if !matches!(producer_acks.as_str(), "all" | "-1" | "0" | "1") {
            return Err(ConfigError::invalid(
                "BRIDGE_PRODUCER_ACKS",
                &producer_acks,
                "expected `all`, `-1`, `0` or `1`",
            ));
        }

        let metrics_addr = get("BRIDGE_METRICS_ADDR")
            .map(|raw| parse("BRIDGE_METRICS_ADDR", &raw))
            .transpose()?;

        Ok(Self {
            brokers,
            listen_addr,
            timeout: Duration::from_millis(timeout_ms),
            id_bytes,
            reply_addressing,
            topic_prefix: get("BRIDGE_TOPIC_PREFIX").unwrap_or_default(),
            producer_acks,
            publish_retries: parse_or("BRIDGE_PUBLISH_RETRIES", get("BRIDGE_PUBLISH_RETRIES"), || 0)?,
            metrics_addr,
        })
    }
}

/// Reply topics are named from the id, so both must fit Kafka's limit.
fn check_reply_topic_len(addressing: &ReplyAddressing, id_bytes: usize) -> Result<(), ConfigError> {
    let shortest = addressing.reply_topic_len(encoded_id_len(MIN_ID_BYTES));
    if shortest > MAX_TOPIC_NAME_LEN {
        let topic = match addressing {
            ReplyAddressing::TopicPerCall { prefix } => prefix,
            ReplyAddressing::Shared { topic } => topic,
        };
        return Err(ConfigError::invalid(
            "BRIDGE_REPLY_TOPIC",
            topic,
            format!("reply topic names would exceed {MAX_TOPIC_NAME_LEN} characters"),
        ));
    }

    let len = addressing.reply_topic_len(encoded_id_len(id_bytes));
    if len > MAX_TOPIC_NAME_LEN {
        return Err(ConfigError::invalid(
            "BRIDGE_ID_BYTES",
            &id_bytes.to_string(),
            format!("reply topic names would be {len} characters, above {MAX_TOPIC_NAME_LEN}"),
        ));
    }
    Ok(())
}

fn parse<T>(var: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::invalid(var, raw, e.to_string()))
}

fn parse_or<T>(
    var: &'static str,
    raw: Option<String>,
    default: impl FnOnce() -> T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.map_or_else(|| Ok(default()), |raw| parse(var, &raw))
}
