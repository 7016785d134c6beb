//! Versioned event envelope shared by every service on the bus.
//!
//! Every business payload travels inside an [`EventEnvelope`]. The envelope
//! identifies the semantic shape (`event_name` + `event_version`), carries the
//! identifiers needed for deduplication and causal tracing, and the
//! `partition_key`/`sequence` pair that gives downstream consumers a total
//! order per partition.
//!
//! Wire field names are camelCase to stay compatible with the platform event
//! contracts consumed by the other services.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Failure to convert between raw bus bytes and a typed envelope.
///
/// `Malformed` is deliberately distinct from business-level rejection: a
/// consumer that receives a well-formed envelope for an event shape it does
/// not handle should skip the message (see [`EventEnvelope::is`]), not raise
/// an error.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Inbound bytes did not decode into an envelope
    #[error("malformed envelope: {0}")]
    Malformed(#[source] serde_json::Error),

    /// Outbound envelope could not be serialized
    #[error("failed to serialize envelope: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// Generic event envelope.
///
/// # Type Parameter
///
/// * `P` - The event-specific payload type
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope<P> {
    /// Semantic event name, e.g. "OrderCompleted"
    pub event_name: String,

    /// Version of the event shape; consumers match name + version exactly
    pub event_version: u32,

    /// Unique event identifier (idempotency key). Optional on the wire.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub event_id: Option<Uuid>,

    /// Links related events in a business transaction
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub correlation_id: Option<Uuid>,

    /// The event that caused this one
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub causation_id: Option<Uuid>,

    /// Logical name of the producing service
    pub producer: String,

    /// Groups events that must be observed downstream in order
    #[serde(default)]
    pub partition_key: String,

    /// Per-partition sequence number, assigned by the producer's allocator
    #[serde(default)]
    pub sequence: u64,

    /// UTC timestamp when the event was generated
    pub occurred_at: DateTime<Utc>,

    /// Reference to the payload's schema document
    #[serde(default)]
    pub schema: String,

    /// Event-specific payload
    pub payload: P,
}

impl<P> EventEnvelope<P> {
    /// Create a new envelope with a fresh event id and `occurred_at = now`.
    ///
    /// `partition_key`, `sequence`, correlation and causation are left at
    /// their defaults; callers set them via the builder methods.
    pub fn new(event_name: &str, event_version: u32, producer: &str, payload: P) -> Self {
        Self {
            event_name: event_name.to_string(),
            event_version,
            event_id: Some(Uuid::new_v4()),
            correlation_id: None,
            causation_id: None,
            producer: producer.to_string(),
            partition_key: String::new(),
            sequence: 0,
            occurred_at: Utc::now(),
            schema: String::new(),
            payload,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: Option<Uuid>) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    pub fn with_causation_id(mut self, causation_id: Option<Uuid>) -> Self {
        self.causation_id = causation_id;
        self
    }

    pub fn with_partition_key(mut self, partition_key: String) -> Self {
        self.partition_key = partition_key;
        self
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn with_schema(mut self, schema: &str) -> Self {
        self.schema = schema.to_string();
        self
    }

    /// True when the envelope carries the expected event shape.
    pub fn is(&self, event_name: &str, event_version: u32) -> bool {
        self.event_name == event_name && self.event_version == event_version
    }

    /// Serialize the envelope for publication.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError>
    where
        P: Serialize,
    {
        serde_json::to_vec(self).map_err(CodecError::Serialize)
    }

    /// Deserialize an envelope from raw bus bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError>
    where
        P: DeserializeOwned,
    {
        serde_json::from_slice(bytes).map_err(CodecError::Malformed)
    }
}
