//! Bridge configuration.

use reqbridge_core::correlation::DEFAULT_ID_BYTES;
use std::time::Duration;

/// Default per-call timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Configuration for a [`RequestBridge`](crate::RequestBridge).
///
/// # Example
///
/// ```
/// use reqbridge_runtime::BridgeConfig;
/// use std::time::Duration;
///
/// let config = BridgeConfig::default()
///     .with_timeout(Duration::from_millis(250))
///     .with_topic_prefix("requests.");
/// assert_eq!(config.id_bytes, 64);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Time a call waits for its reply before expiring
    pub timeout: Duration,
    /// Random bytes per correlation id
    pub id_bytes: usize,
    /// Prefix prepended to destinations derived from request paths
    pub topic_prefix: String,
}

impl BridgeConfig {
    /// Set the per-call timeout
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the correlation id length in bytes
    #[must_use]
    pub const fn with_id_bytes(mut self, id_bytes: usize) -> Self {
        self.id_bytes = id_bytes;
        self
    }

    /// Set the destination topic prefix
    #[must_use]
    pub fn with_topic_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.topic_prefix = prefix.into();
        self
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            id_bytes: DEFAULT_ID_BYTES,
            topic_prefix: String::new(),
        }
    }
}
