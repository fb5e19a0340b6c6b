//! Request, response and broker message shapes.
//!
//! ```text
//! BridgeRequest ──► RequestEnvelope (JSON) ──► OutboundMessage ──► broker
//!                                                                    │
//! BridgeResponse ◄── reply payload ◄────────── InboundReply ◄────────┘
//! ```

use crate::correlation::CorrelationId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Header name carrying the correlation id on broker messages.
pub const CORRELATION_ID_HEADER: &str = "correlation-id";

/// Header name carrying the reply address on broker messages.
pub const REPLY_TO_HEADER: &str = "reply-to";

/// An already-parsed inbound call, as handed over by the transport.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BridgeRequest {
    /// HTTP method (e.g. `POST`)
    pub method: String,
    /// Request path (e.g. `/orders/create`)
    pub path: String,
    /// Request headers, multi-valued headers joined with `", "`
    pub headers: BTreeMap<String, String>,
    /// Raw request body
    pub body: Vec<u8>,
}

impl BridgeRequest {
    /// Create a request with no headers.
    #[must_use]
    pub fn new(method: impl Into<String>, path: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    /// Add a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Parse the body as JSON. An empty body is `null`.
    ///
    /// # Errors
    ///
    /// Returns the parser error when a non-empty body is not valid JSON.
    pub fn json_body(&self) -> Result<serde_json::Value, serde_json::Error> {
        if self.body.iter().all(u8::is_ascii_whitespace) {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_slice(&self.body)
    }
}

/// Outcome handed back to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeResponse {
    /// HTTP-equivalent status code
    pub status: u16,
    /// Response body
    pub body: Vec<u8>,
}

impl BridgeResponse {
    /// A 200 response carrying the reply payload.
    #[must_use]
    pub const fn ok(body: Vec<u8>) -> Self {
        Self { status: 200, body }
    }
}

/// JSON document published for each call.
///
/// Responders read `id` and answer on `reply_to`, keyed by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Correlation id of the call
    pub id: CorrelationId,
    /// Request body
    pub body: serde_json::Value,
    /// Request headers
    pub headers: BTreeMap<String, String>,
    /// HTTP method
    pub method: String,
    /// Request path
    pub path: String,
    /// Broker address replies must be sent to
    pub reply_to: String,
}

/// Metadata carried alongside an outbound payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageMetadata {
    /// Original request headers
    pub headers: BTreeMap<String, String>,
    /// Original HTTP method
    pub method: String,
    /// Original request path
    pub path: String,
    /// Where replies are expected
    pub reply_to: String,
}

/// A request message ready for the broker. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    id: CorrelationId,
    destination: String,
    payload: Vec<u8>,
    metadata: MessageMetadata,
}

impl OutboundMessage {
    /// Build the message for `request`, tagged with `id`.
    ///
    /// `body` is the request body already parsed with [`BridgeRequest::json_body`].
    ///
    /// # Errors
    ///
    /// Returns the serializer error if the envelope cannot be encoded.
    pub fn new(
        id: CorrelationId,
        request: &BridgeRequest,
        body: serde_json::Value,
        destination: String,
        reply_to: String,
    ) -> Result<Self, serde_json::Error> {
        let envelope = RequestEnvelope {
            id: id.clone(),
            body,
            headers: request.headers.clone(),
            method: request.method.clone(),
            path: request.path.clone(),
            reply_to: reply_to.clone(),
        };
        let payload = serde_json::to_vec(&envelope)?;

        Ok(Self {
            id,
            destination,
            payload,
            metadata: MessageMetadata {
                headers: envelope.headers,
                method: envelope.method,
                path: envelope.path,
                reply_to,
            },
        })
    }

    /// Correlation id the message is tagged with.
    #[must_use]
    pub const fn id(&self) -> &CorrelationId {
        &self.id
    }

    /// Broker destination (topic).
    #[must_use]
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Encoded [`RequestEnvelope`].
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Request metadata.
    #[must_use]
    pub const fn metadata(&self) -> &MessageMetadata {
        &self.metadata
    }
}

/// A reply observed on a scoped subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundReply {
    /// Correlation id the reply was addressed to
    pub id: CorrelationId,
    /// Reply payload, returned verbatim to the caller
    pub payload: Vec<u8>,
}

/// Derive a broker topic name from a request path.
///
/// Segments are joined with `.`, characters outside `[A-Za-z0-9._-]` become
/// `_`, and the root path maps to `root`.
///
/// ```
/// use reqbridge_core::message::destination_for;
///
/// assert_eq!(destination_for("requests.", "/orders/create"), "requests.orders.create");
/// assert_eq!(destination_for("", "/"), "root");
/// ```
#[must_use]
pub fn destination_for(prefix: &str, path: &str) -> String {
    let joined = path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            segment
                .chars()
                .map(|c| {
                    if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                        c
                    } else {
                        '_'
                    }
                })
                .collect::<String>()
        })
        .collect::<Vec<_>>()
        .join(".");

    if joined.is_empty() {
        format!("{prefix}root")
    } else {
        format!("{prefix}{joined}")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn empty_body_is_null() {
        let request = BridgeRequest::new("GET", "/status", Vec::new());
        assert_eq!(request.json_body().unwrap(), serde_json::Value::Null);
    }

    #[test]
    fn malformed_body_is_rejected() {
        let request = BridgeRequest::new("POST", "/orders", b"{not json".to_vec());
        assert!(request.json_body().is_err());
    }

    #[test]
    fn envelope_carries_request_fields() {
        let request = BridgeRequest::new("POST", "/orders/create", br#""hello""#.to_vec())
            .with_header("content-type", "application/json");
        let message = OutboundMessage::new(
            CorrelationId::new("abc123"),
            &request,
            request.json_body().unwrap(),
            destination_for("", &request.path),
            "replies.abc123".to_string(),
        )
        .unwrap();

        let envelope: RequestEnvelope = serde_json::from_slice(message.payload()).unwrap();
        assert_eq!(envelope.id, CorrelationId::new("abc123"));
        assert_eq!(envelope.body, serde_json::json!("hello"));
        assert_eq!(envelope.method, "POST");
        assert_eq!(envelope.path, "/orders/create");
        assert_eq!(envelope.reply_to, "replies.abc123");
        assert_eq!(
            envelope.headers.get("content-type").map(String::as_str),
            Some("application/json")
        );
        assert_eq!(message.destination(), "orders.create");
        assert_eq!(message.metadata().reply_to, "replies.abc123");
    }

    #[test]
    fn destination_sanitizes_path() {
        assert_eq!(destination_for("", "/a b/c?d"), "a_b.c_d");
        assert_eq!(destination_for("in.", "//users//42/"), "in.users.42");
        assert_eq!(destination_for("in.", ""), "in.root");
    }
}
