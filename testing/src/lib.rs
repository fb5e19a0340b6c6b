//! # Reqbridge Testing
//!
//! Testing utilities for the request bridge.
//!
//! This crate provides:
//! - [`InMemoryGateway`]: a broker gateway that routes replies by correlation id
//! - Deterministic and failing [`EntropySource`](reqbridge_core::EntropySource) mocks
//! - Test payload helpers
//!
//! ## Example
//!
//! ```ignore
//! use reqbridge_testing::{InMemoryGateway, ScriptedReply, helpers};
//!
//! #[tokio::test]
//! async fn replies_are_returned() {
//!     let gateway = InMemoryGateway::new();
//!     gateway.respond_with(|m| Some(ScriptedReply::immediate(helpers::reply_for(m, "ok"))));
//!
//!     let bridge = RequestBridge::new(Arc::new(gateway.clone())).unwrap();
//!     let reply = bridge.call(BridgeRequest::new("GET", "/ping", Vec::new())).await.unwrap();
//! }
//! ```

pub mod gateway_mocks;

/// Mock entropy sources.
pub mod mocks {
    use reqbridge_core::{EntropySource, IdError};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fills every buffer with the same byte.
    ///
    /// Every identifier drawn from it is identical, which forces registry
    /// collisions.
    ///
    /// # Example
    ///
    /// ```
    /// use reqbridge_core::CorrelationIdGenerator;
    /// use reqbridge_testing::mocks::FixedEntropy;
    /// use std::sync::Arc;
    ///
    /// let ids = CorrelationIdGenerator::with_source(32, Arc::new(FixedEntropy(7))).unwrap();
    /// assert_eq!(ids.generate().unwrap(), ids.generate().unwrap());
    /// ```
    #[derive(Debug, Clone, Copy)]
    pub struct FixedEntropy(pub u8);

    impl EntropySource for FixedEntropy {
        fn fill(&self, buf: &mut [u8]) -> Result<(), IdError> {
            buf.fill(self.0);
            Ok(())
        }
    }

    /// Always fails.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct FailingEntropy;

    impl EntropySource for FailingEntropy {
        fn fill(&self, _buf: &mut [u8]) -> Result<(), IdError> {
            Err(IdError::Entropy("entropy source exhausted".to_string()))
        }
    }

    /// Succeeds for the first `healthy` fills, then fails forever.
    ///
    /// Successful fills are distinct, so identifiers never collide.
    #[derive(Debug, Default)]
    pub struct ExhaustingEntropy {
        healthy: usize,
        used: AtomicUsize,
    }

    impl ExhaustingEntropy {
        /// Allow `healthy` successful fills.
        #[must_use]
        pub const fn new(healthy: usize) -> Self {
            Self {
                healthy,
                used: AtomicUsize::new(0),
            }
        }
    }

    impl EntropySource for ExhaustingEntropy {
        #[allow(clippy::cast_possible_truncation)]
        fn fill(&self, buf: &mut [u8]) -> Result<(), IdError> {
            let n = self.used.fetch_add(1, Ordering::SeqCst);
            if n >= self.healthy {
                return Err(IdError::Entropy("entropy source exhausted".to_string()));
            }
            for (i, byte) in buf.iter_mut().enumerate() {
                *byte = (n as u8).wrapping_add(i as u8);
            }
            Ok(())
        }
    }
}

/// Test payload helpers.
pub mod helpers {
    use reqbridge_core::OutboundMessage;

    /// JSON reply carrying the request's correlation id and `value`.
    ///
    /// Shaped like a typical service reply: `{"id": "...", "value": "..."}`.
    #[must_use]
    pub fn reply_for(message: &OutboundMessage, value: &str) -> Vec<u8> {
        serde_json::json!({ "id": message.id(), "value": value })
            .to_string()
            .into_bytes()
    }

    /// Install a compact tracing subscriber that writes through the test harness.
    ///
    /// Safe to call from many tests; only the first call installs.
    pub fn init_test_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "reqbridge=debug".into()),
            )
            .with_test_writer()
            .try_init();
    }
}

pub use gateway_mocks::{GatewayEvent, InMemoryGateway, ScriptedReply};
pub use mocks::{ExhaustingEntropy, FailingEntropy, FixedEntropy};
