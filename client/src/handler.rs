//! Handler wrapping and dead-letter forwarding
//!
//! Wraps user consumer callbacks with timing, error capture, metrics and
//! optional dead-letter forwarding. A handler failure must never corrupt
//! the driver's delivery loop: it is recorded, optionally forwarded to the
//! dead-letter topic, and only rethrown when the client was explicitly
//! configured to do so (most backends would otherwise nack and redeliver
//! the message forever).
//!
//! Dead-letter forwarding goes straight through the driver's send step,
//! bypassing rate limiting and backpressure: re-entering those gates from
//! inside the delivery loop could deadlock against the publishers that
//! filled them. A forward failure is logged and counted, never propagated.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use suoja_core::{
    metadata_keys, DynHandler, Envelope, HandlerError, MessageHandler, MetricsSink, PubSubDriver,
};

/// JSON document published to the dead-letter topic
///
/// Public and deserializable so DLQ consumers can parse forwarded traffic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    /// Topic the message was originally delivered on (pre-namespace form)
    pub original_topic: String,
    /// Id of the failed message
    pub original_message_id: String,
    /// Original payload: parsed JSON when it parses, else a lossy UTF-8
    /// string of the raw bytes
    pub original_data: Value,
    /// Original envelope timestamp (unix nanos)
    pub original_timestamp: i64,
    /// What went wrong
    pub error: DeadLetterErrorDetail,
    /// When the handler failed (unix nanos)
    pub failed_at: i64,
    /// Metadata of the original envelope
    pub metadata: HashMap<String, Value>,
    /// Always `true`; lets consumers distinguish DLQ records structurally
    pub is_dlq: bool,
}

/// Error details carried in a [`DeadLetterRecord`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterErrorDetail {
    /// Human-readable message (the error's `Display`)
    pub message: String,
    /// `Debug` rendering, carrying the error type/variant and nested causes
    pub detail: String,
}

/// Decorates a user handler with timing, error capture, metrics and DLQ
/// forwarding
pub(crate) struct WrappedHandler {
    /// Topic as the caller supplied it, for logs and metric tags
    topic: String,
    inner: DynHandler,
    driver: Arc<dyn PubSubDriver>,
    /// Dead-letter topic in its namespaced form; `None` disables forwarding
    dead_letter_topic: Option<String>,
    throw_on_handler_error: bool,
    metrics: Arc<dyn MetricsSink>,
    /// Forward attempts that themselves failed
    dlq_failures: AtomicU64,
}

impl WrappedHandler {
    pub(crate) fn new(
        topic: String,
        inner: DynHandler,
        driver: Arc<dyn PubSubDriver>,
        dead_letter_topic: Option<String>,
        throw_on_handler_error: bool,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            topic,
            inner,
            driver,
            dead_letter_topic,
            throw_on_handler_error,
            metrics,
            dlq_failures: AtomicU64::new(0),
        }
    }

    /// Count of dead-letter forwards that themselves failed
    #[cfg_attr(not(test), allow(dead_code))]
    pub(crate) fn dlq_failures(&self) -> u64 {
        self.dlq_failures.load(Ordering::Relaxed)
    }

    async fn forward_to_dead_letter(&self, dlq_topic: &str, envelope: &Envelope, error: &HandlerError) {
        let record = DeadLetterRecord {
            original_topic: self.topic.clone(),
            original_message_id: envelope.id.clone(),
            original_data: decode_payload(&envelope.payload),
            original_timestamp: envelope.timestamp,
            error: DeadLetterErrorDetail {
                message: error.to_string(),
                detail: format!("{error:?}"),
            },
            failed_at: chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0),
            metadata: envelope.metadata.clone(),
            is_dlq: true,
        };

        let payload = match serde_json::to_vec(&record) {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                self.dlq_failures.fetch_add(1, Ordering::Relaxed);
                self.metrics
                    .increment_counter("dlq.forward_failed", &[("topic", self.topic.as_str())]);
                tracing::error!(
                    topic = %self.topic,
                    message_id = %envelope.id,
                    error = %e,
                    "failed to encode dead-letter record"
                );
                return;
            }
        };

        let mut dlq_envelope = Envelope::new(dlq_topic, payload)
            .with_metadata_entry(metadata_keys::DEAD_LETTER, true)
            .with_metadata_entry(metadata_keys::ORIGINAL_TOPIC, self.topic.clone());
        if let Some(correlation_id) = envelope.correlation_id() {
            dlq_envelope = dlq_envelope.with_correlation_id(correlation_id);
        }

        match self.driver.publish(dlq_topic, &dlq_envelope).await {
            Ok(()) => {
                self.metrics
                    .increment_counter("dlq.forwarded", &[("topic", self.topic.as_str())]);
                tracing::debug!(
                    topic = %self.topic,
                    dlq_topic = %dlq_topic,
                    message_id = %envelope.id,
                    "message forwarded to dead-letter topic"
                );
            }
            Err(e) => {
                self.dlq_failures.fetch_add(1, Ordering::Relaxed);
                self.metrics
                    .increment_counter("dlq.forward_failed", &[("topic", self.topic.as_str())]);
                tracing::error!(
                    topic = %self.topic,
                    dlq_topic = %dlq_topic,
                    message_id = %envelope.id,
                    error = %e,
                    "dead-letter forward failed"
                );
            }
        }
    }
}

#[async_trait]
impl MessageHandler for WrappedHandler {
    async fn handle(&self, envelope: Envelope) -> Result<(), HandlerError> {
        let started = Instant::now();
        // Cheap: the payload is refcounted, and the copy keeps the original
        // available for dead-letter forwarding
        let result = self.inner.handle(envelope.clone()).await;
        let duration = started.elapsed();

        self.metrics.record_histogram(
            "handler.duration_ms",
            duration.as_secs_f64() * 1000.0,
            &[("topic", self.topic.as_str())],
        );

        match result {
            Ok(()) => {
                self.metrics
                    .increment_counter("handler.success", &[("topic", self.topic.as_str())]);
                Ok(())
            }
            Err(error) => {
                let kind = error_kind(&error);
                self.metrics.increment_counter(
                    "handler.failure",
                    &[("topic", self.topic.as_str()), ("error_kind", kind.as_str())],
                );
                tracing::warn!(
                    topic = %self.topic,
                    message_id = %envelope.id,
                    correlation_id = envelope.correlation_id().unwrap_or(""),
                    duration_ms = duration.as_millis() as u64,
                    error = %error,
                    "handler failed"
                );

                if let Some(dlq_topic) = self.dead_letter_topic.clone() {
                    self.forward_to_dead_letter(&dlq_topic, &envelope, &error).await;
                }

                if self.throw_on_handler_error {
                    Err(error)
                } else {
                    Ok(())
                }
            }
        }
    }
}

/// Short tag value identifying the error kind for metrics
///
/// Takes the leading identifier of the `Debug` rendering, which for enum
/// errors is the variant name and for structs the type name. Falls back
/// to "error" when the rendering starts with punctuation (e.g. quoted
/// string errors).
fn error_kind(error: &HandlerError) -> String {
    let debug = format!("{error:?}");
    let kind: String = debug
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    if kind.is_empty() {
        "error".to_string()
    } else {
        kind
    }
}

/// Best-effort decode of a payload for embedding in a DLQ record
fn decode_payload(payload: &Bytes) -> Value {
    serde_json::from_slice(payload)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(payload).into_owned()))
}
