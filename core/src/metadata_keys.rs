//! Reserved metadata key constants for SUOJA envelopes
//!
//! These keys are used by convention to carry client-level context through
//! the generic envelope metadata without coupling drivers to the client.

/// Correlation identifier propagated across a logical operation
pub const CORRELATION_ID: &str = "correlation_id";

/// Marker set to `true` on envelopes forwarded to a dead-letter topic
pub const DEAD_LETTER: &str = "suoja.dlq";

/// Original topic of a dead-lettered message (pre-namespace form)
pub const ORIGINAL_TOPIC: &str = "suoja.original_topic";
