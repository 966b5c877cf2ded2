//! The wire-independent message envelope
//!
//! The Envelope is the canonical representation of a message on both the
//! publish and the delivery path. It is protocol-agnostic and uses `Bytes`
//! for zero-copy payload handling: cloning an envelope only bumps the
//! payload refcount, which matters because the client clones once per
//! delivery to keep a copy available for dead-letter forwarding.
//!
//! Envelopes are immutable by convention once handed to a driver. All
//! construction happens through [`Envelope::new`] and the `with_*` builder
//! methods.

use crate::metadata_keys;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// The canonical message envelope
///
/// # Example
///
/// ```
/// use bytes::Bytes;
/// use suoja_core::Envelope;
///
/// let envelope = Envelope::new("orders.created", Bytes::from(r#"{"id": 1}"#))
///     .with_correlation_id("req-42");
/// assert_eq!(envelope.topic, "orders.created");
/// assert_eq!(envelope.correlation_id(), Some("req-42"));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Unique message identifier (ULID: time-sortable prefix + random
    /// suffix; no ordering guarantee is promised)
    pub id: String,

    /// Destination topic, in its final (namespaced) form
    pub topic: String,

    /// Opaque payload. The client serializes caller data once and measures
    /// this buffer for size validation; drivers put it on the wire as-is.
    pub payload: Bytes,

    /// Unix timestamp in nanoseconds, stamped at construction
    pub timestamp: i64,

    /// Client-level context propagated with the message. Includes the
    /// correlation id under [`metadata_keys::CORRELATION_ID`].
    #[serde(default)]
    pub metadata: HashMap<String, Value>,

    /// Optional driver-level attributes (e.g. Kafka headers, GCP message
    /// attributes). Drivers that have no attribute concept ignore these.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<HashMap<String, String>>,
}

impl Envelope {
    /// Create a new envelope with a generated id and current timestamp
    pub fn new(topic: impl Into<String>, payload: Bytes) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            topic: topic.into(),
            payload,
            timestamp: chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0),
            metadata: HashMap::new(),
            attributes: None,
        }
    }

    /// Add a metadata entry
    pub fn with_metadata_entry(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Merge a map of metadata entries (later entries win on key collision)
    pub fn with_metadata(mut self, entries: HashMap<String, Value>) -> Self {
        self.metadata.extend(entries);
        self
    }

    /// Add a driver-level attribute, allocating the attribute map if needed
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Replace the attribute map wholesale
    pub fn with_attributes(mut self, attributes: HashMap<String, String>) -> Self {
        self.attributes = Some(attributes);
        self
    }

    /// Set the correlation id metadata entry
    pub fn with_correlation_id(self, correlation_id: impl Into<String>) -> Self {
        self.with_metadata_entry(metadata_keys::CORRELATION_ID, correlation_id.into())
    }

    /// Get the correlation id, if present
    pub fn correlation_id(&self) -> Option<&str> {
        self.metadata
            .get(metadata_keys::CORRELATION_ID)
            .and_then(Value::as_str)
    }

    /// Check whether this envelope was forwarded to a dead-letter topic
    pub fn is_dead_letter(&self) -> bool {
        self.metadata
            .get(metadata_keys::DEAD_LETTER)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Get the payload as a string slice (if valid UTF-8)
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }

    /// Get the payload length in bytes
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }
}
