//! Correlation identifiers and their generator.
//!
//! Every bridged call is tagged with a [`CorrelationId`] drawn from the operating
//! system's secure random source. The identifier doubles as a broker addressing
//! token (topic suffix or message key), so it is encoded as unpadded base64url:
//! only `[A-Za-z0-9_-]`, which Kafka topic names and HTTP headers accept as-is.
//!
//! # Example
//!
//! ```
//! use reqbridge_core::correlation::CorrelationIdGenerator;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let ids = CorrelationIdGenerator::new(32)?;
//! let id = ids.generate()?;
//! assert_eq!(id.as_str().len(), 43);
//! # Ok(())
//! # }
//! ```

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Smallest accepted identifier length in bytes (256 bits of entropy).
pub const MIN_ID_BYTES: usize = 32;

/// Default identifier length in bytes.
pub const DEFAULT_ID_BYTES: usize = 64;

/// Length in characters of an identifier drawn from `byte_len` random bytes.
///
/// Unpadded base64 spends four characters per three bytes, rounded up.
#[must_use]
pub const fn encoded_id_len(byte_len: usize) -> usize {
    (byte_len * 4).div_ceil(3)
}

/// Errors raised while producing correlation identifiers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdError {
    /// The secure random source could not fill the buffer.
    #[error("Entropy source failed: {0}")]
    Entropy(String),

    /// Requested identifier length is below [`MIN_ID_BYTES`].
    #[error("Correlation id length {requested} is below the minimum of {minimum} bytes")]
    TooShort {
        /// Requested length in bytes
        requested: usize,
        /// Minimum accepted length in bytes
        minimum: usize,
    },
}

/// Opaque token linking an outbound request to its reply.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Wrap an identifier observed on the wire (message key, reply envelope).
    ///
    /// Identifiers for new calls must come from [`CorrelationIdGenerator`].
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the identifier, returning the inner string.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CorrelationId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Source of random bytes for identifiers.
///
/// Production uses [`OsEntropy`]. The seam exists so tests can simulate an
/// exhausted or broken source; there is no fallback to a weaker generator.
pub trait EntropySource: Send + Sync {
    /// Fill `buf` entirely with random bytes.
    ///
    /// # Errors
    ///
    /// Returns [`IdError::Entropy`] if the source cannot produce bytes.
    fn fill(&self, buf: &mut [u8]) -> Result<(), IdError>;
}

/// Operating system CSPRNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsEntropy;

impl EntropySource for OsEntropy {
    fn fill(&self, buf: &mut [u8]) -> Result<(), IdError> {
        rand::rngs::OsRng
            .try_fill_bytes(buf)
            .map_err(|e| IdError::Entropy(e.to_string()))
    }
}

/// Produces unguessable, URL-safe [`CorrelationId`]s.
#[derive(Clone)]
pub struct CorrelationIdGenerator {
    byte_len: usize,
    source: Arc<dyn EntropySource>,
}

impl CorrelationIdGenerator {
    /// Create a generator backed by the OS random source.
    ///
    /// # Errors
    ///
    /// Returns [`IdError::TooShort`] if `byte_len` is below [`MIN_ID_BYTES`].
    pub fn new(byte_len: usize) -> Result<Self, IdError> {
        Self::with_source(byte_len, Arc::new(OsEntropy))
    }

    /// Create a generator with an explicit entropy source.
    ///
    /// # Errors
    ///
    /// Returns [`IdError::TooShort`] if `byte_len` is below [`MIN_ID_BYTES`].
    pub fn with_source(byte_len: usize, source: Arc<dyn EntropySource>) -> Result<Self, IdError> {
        if byte_len < MIN_ID_BYTES {
            return Err(IdError::TooShort {
                requested: byte_len,
                minimum: MIN_ID_BYTES,
            });
        }
        Ok(Self { byte_len, source })
    }

    /// Number of random bytes behind each identifier.
    #[must_use]
    pub const fn byte_len(&self) -> usize {
        self.byte_len
    }

    /// Length in characters of every identifier this generator draws.
    #[must_use]
    pub const fn id_len(&self) -> usize {
        encoded_id_len(self.byte_len)
    }

    /// Draw a fresh identifier.
    ///
    /// # Errors
    ///
    /// Returns [`IdError::Entropy`] if the random source fails.
    pub fn generate(&self) -> Result<CorrelationId, IdError> {
        let mut bytes = vec![0u8; self.byte_len];
        self.source.fill(&mut bytes)?;
        Ok(CorrelationId(URL_SAFE_NO_PAD.encode(bytes)))
    }
}

impl fmt::Debug for CorrelationIdGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CorrelationIdGenerator")
            .field("byte_len", &self.byte_len)
            .finish_non_exhaustive()
    }
}
