//! The SUOJA client - composition root
//!
//! Exposes `publish`/`subscribe`/`unsubscribe` as the public contract and
//! composes namespacing, envelope construction, admission control, rate
//! limiting, retry and metrics around a pluggable backend driver. The
//! driver never sees any of this: it only moves envelopes.
//!
//! # Publish pipeline
//!
//! ```text
//! publish(topic, data)
//!   ├─► apply namespace
//!   ├─► serialize + validate size      (MessageTooLarge)
//!   ├─► rate limiter check             (RateLimitExceeded)
//!   ├─► backpressure acquire           (BackpressureTimeout)
//!   ├─► build envelope
//!   ├─► driver send, optionally retried (Driver / MaxRetriesExceeded)
//!   └─► metrics + sampled log
//! ```
//!
//! The backpressure slot is held by a guard, so a failure at any later
//! step still releases it.

use crate::backpressure::{BackpressureController, BackpressureStats};
use crate::config::{ClientOptions, PublishOptions};
use crate::error::ClientError;
use crate::handler::WrappedHandler;
use crate::ratelimit::RateLimiter;
use crate::retry;
use crate::sampler::LogSampler;
use bytes::Bytes;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use suoja_core::{
    DynHandler, Envelope, MessageHandler, MetricsSink, MetricsTimer, NoOpMetrics, PubSubDriver,
};

/// Prefix a topic with the configured namespace
///
/// Pure function, no side effects. Everything downstream of the public
/// API - rate keys, registry keys, driver calls - operates on the
/// namespaced form; logs and metric tags keep the caller's original topic.
pub(crate) fn apply_namespace(namespace: Option<&str>, topic: &str) -> String {
    match namespace {
        Some(ns) if !ns.is_empty() => format!("{ns}:{topic}"),
        _ => topic.to_string(),
    }
}

/// Production-safe pub/sub client over a pluggable backend driver
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use suoja_client::{ClientOptions, PubSubClient, RateLimitOptions};
/// use std::time::Duration;
///
/// let driver = Arc::new(RedisDriver::new("redis://localhost")?);
/// let client = PubSubClient::new(
///     driver,
///     ClientOptions::default()
///         .with_namespace("payments")
///         .with_dead_letter_topic("dead-letters")
///         .with_rate_limit(RateLimitOptions::new(500, Duration::from_secs(1))),
/// );
///
/// client.connect().await?;
/// client.publish("invoice.created", &invoice).await?;
/// ```
pub struct PubSubClient {
    driver: Arc<dyn PubSubDriver>,
    options: ClientOptions,
    metrics: Arc<dyn MetricsSink>,
    backpressure: Option<BackpressureController>,
    rate_limiter: Option<RateLimiter>,
    /// Handlers per namespaced topic; a reservation here is the
    /// "registering" state between the cap check and driver success
    handler_counts: RwLock<HashMap<String, usize>>,
    log_sampler: LogSampler,
}

impl PubSubClient {
    /// Create a client with a no-op metrics sink
    pub fn new(driver: Arc<dyn PubSubDriver>, options: ClientOptions) -> Self {
        Self::with_metrics(driver, options, Arc::new(NoOpMetrics))
    }

    /// Create a client reporting into the given metrics sink
    pub fn with_metrics(
        driver: Arc<dyn PubSubDriver>,
        options: ClientOptions,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let backpressure = options
            .backpressure
            .clone()
            .map(|o| BackpressureController::new(o, Arc::clone(&metrics)));
        let rate_limiter = options
            .rate_limit
            .clone()
            .map(|o| RateLimiter::new(o, Arc::clone(&metrics)));
        let log_sampler = LogSampler::new(options.log_sampling_rate);

        Self {
            driver,
            options,
            metrics,
            backpressure,
            rate_limiter,
            handler_counts: RwLock::new(HashMap::new()),
            log_sampler,
        }
    }

    /// Serialize and publish `data` to `topic`
    ///
    /// Returns the generated message id. All publish-path failures
    /// propagate: publishing must fail loudly.
    pub async fn publish<T: Serialize>(&self, topic: &str, data: &T) -> Result<String, ClientError> {
        self.publish_with(topic, data, PublishOptions::default())
            .await
    }

    /// Publish with per-call metadata, attributes or correlation id
    pub async fn publish_with<T: Serialize>(
        &self,
        topic: &str,
        data: &T,
        publish_options: PublishOptions,
    ) -> Result<String, ClientError> {
        let namespaced = self.apply_namespace(topic);

        let payload = serde_json::to_vec(data)
            .map_err(|e| ClientError::Serialization(e.to_string()))?;

        // Size check runs before any admission or backend step: an
        // oversized message is never partially sent
        if let Err(e) = self.validate_size(payload.len()) {
            self.metrics.increment_counter(
                "publish.rejected",
                &[("topic", topic), ("reason", "size")],
            );
            return Err(e);
        }

        if let Some(limiter) = &self.rate_limiter {
            if let Err(e) = limiter.check_limit(&namespaced) {
                self.metrics.increment_counter(
                    "publish.rejected",
                    &[("topic", topic), ("reason", "rate_limit")],
                );
                // The limiter keys on the namespaced form; report the
                // topic the caller actually used
                return Err(restore_caller_topic(e, topic));
            }
        }

        let _slot = match &self.backpressure {
            Some(gate) => Some(gate.acquire().await.inspect_err(|_| {
                self.metrics.increment_counter(
                    "publish.rejected",
                    &[("topic", topic), ("reason", "backpressure")],
                );
            })?),
            None => None,
        };

        let envelope = self.build_envelope(&namespaced, Bytes::from(payload), publish_options);

        let timer =
            MetricsTimer::start(Arc::clone(&self.metrics), "publish.duration_ms").with_tag("topic", topic);
        let send_result = match &self.options.retry {
            Some(policy) => retry::execute_with_retry(
                || self.driver.publish(&namespaced, &envelope),
                policy,
            )
            .await
            .map_err(ClientError::from),
            None => self
                .driver
                .publish(&namespaced, &envelope)
                .await
                .map_err(ClientError::from),
        };
        timer.stop();

        match send_result {
            Ok(()) => {
                self.metrics
                    .increment_counter("publish.success", &[("topic", topic)]);
                if self.log_sampler.should_log() {
                    tracing::debug!(
                        topic = %topic,
                        message_id = %envelope.id,
                        bytes = envelope.payload_len(),
                        driver = self.driver.name(),
                        "message published"
                    );
                }
                Ok(envelope.id)
            }
            Err(e) => {
                self.metrics
                    .increment_counter("publish.error", &[("topic", topic)]);
                tracing::warn!(
                    topic = %topic,
                    message_id = %envelope.id,
                    error = %e,
                    "publish failed"
                );
                Err(e)
            }
        }
        // _slot drops here on every path, releasing the backpressure slot
    }

    /// Register a handler for the topic
    ///
    /// The handler is wrapped with timing, error capture, metrics and
    /// dead-letter forwarding before registration; the wrapped handler is
    /// what the driver's delivery loop invokes. Fails with
    /// [`ClientError::HandlerLimitExceeded`] when the per-topic ceiling is
    /// reached - a hard cap, not a queue.
    pub async fn subscribe<H>(&self, topic: &str, handler: H) -> Result<(), ClientError>
    where
        H: MessageHandler + 'static,
    {
        let namespaced = self.apply_namespace(topic);

        // Reserve a registry slot before the driver call so concurrent
        // subscribes cannot overshoot the cap; rolled back on failure
        {
            let mut counts = self.handler_counts.write();
            let current = counts.get(&namespaced).copied().unwrap_or(0);
            if current >= self.options.max_handlers_per_topic {
                return Err(ClientError::HandlerLimitExceeded {
                    topic: topic.to_string(),
                    limit: self.options.max_handlers_per_topic,
                });
            }
            counts.insert(namespaced.clone(), current + 1);
        }

        let dead_letter_topic = self
            .options
            .dead_letter_topic
            .as_deref()
            .map(|t| self.apply_namespace(t));
        let wrapped: DynHandler = Arc::new(WrappedHandler::new(
            topic.to_string(),
            Arc::new(handler),
            Arc::clone(&self.driver),
            dead_letter_topic,
            self.options.throw_on_handler_error,
            Arc::clone(&self.metrics),
        ));

        if let Err(e) = self.driver.subscribe(&namespaced, wrapped).await {
            let mut counts = self.handler_counts.write();
            if let Some(count) = counts.get_mut(&namespaced) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    counts.remove(&namespaced);
                }
            }
            return Err(e.into());
        }

        self.metrics
            .increment_counter("subscribe.registered", &[("topic", topic)]);
        tracing::info!(
            topic = %topic,
            driver = self.driver.name(),
            "handler registered"
        );
        Ok(())
    }

    /// Remove all handlers for the topic (pass-through to the driver)
    pub async fn unsubscribe(&self, topic: &str) -> Result<(), ClientError> {
        let namespaced = self.apply_namespace(topic);
        self.driver.unsubscribe(&namespaced).await?;
        self.handler_counts.write().remove(&namespaced);
        tracing::info!(topic = %topic, "unsubscribed");
        Ok(())
    }

    /// Establish the driver's backend connection
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.driver.connect().await?;
        tracing::info!(driver = self.driver.name(), "driver connected");
        Ok(())
    }

    /// Tear down the driver's backend connection
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        self.driver.disconnect().await?;
        tracing::info!(driver = self.driver.name(), "driver disconnected");
        Ok(())
    }

    /// Whether the driver currently holds a usable connection
    pub fn is_connected(&self) -> bool {
        self.driver.is_connected()
    }

    /// Topics with at least one registered handler (driver's view)
    pub fn subscribed_topics(&self) -> Vec<String> {
        self.driver.subscribed_topics()
    }

    /// Handlers currently tracked for the topic
    pub fn handler_count(&self, topic: &str) -> usize {
        let namespaced = self.apply_namespace(topic);
        self.handler_counts
            .read()
            .get(&namespaced)
            .copied()
            .unwrap_or(0)
    }

    /// Snapshot of the backpressure gate, when enabled
    pub fn backpressure_stats(&self) -> Option<BackpressureStats> {
        self.backpressure.as_ref().map(|gate| gate.stats())
    }

    /// The rate limiter, when enabled (for cleanup/reset administration)
    pub fn rate_limiter(&self) -> Option<&RateLimiter> {
        self.rate_limiter.as_ref()
    }

    /// The options this client was built with
    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    fn apply_namespace(&self, topic: &str) -> String {
        apply_namespace(self.options.namespace.as_deref(), topic)
    }

    fn validate_size(&self, size: usize) -> Result<(), ClientError> {
        match self.options.max_message_size {
            Some(limit) if size > limit => Err(ClientError::MessageTooLarge { size, limit }),
            _ => Ok(()),
        }
    }

    fn build_envelope(
        &self,
        namespaced_topic: &str,
        payload: Bytes,
        publish_options: PublishOptions,
    ) -> Envelope {
        let mut envelope =
            Envelope::new(namespaced_topic, payload).with_metadata(publish_options.metadata);
        if let Some(attributes) = publish_options.attributes {
            envelope = envelope.with_attributes(attributes);
        }

        if let Some(correlation_id) = publish_options.correlation_id {
            envelope = envelope.with_correlation_id(correlation_id);
        } else if envelope.correlation_id().is_none() && self.options.enable_correlation_id {
            envelope = envelope.with_correlation_id(uuid::Uuid::new_v4().to_string());
        }
        envelope
    }
}

/// Swap the namespaced topic in a rate-limit error for the caller's form
fn restore_caller_topic(error: ClientError, topic: &str) -> ClientError {
    match error {
        ClientError::RateLimitExceeded {
            current,
            max,
            retry_after,
            ..
        } => ClientError::RateLimitExceeded {
            topic: topic.to_string(),
            current,
            max,
            retry_after,
        },
        other => other,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::{BackpressureOptions, RateLimitOptions};
    use crate::retry::RetryPolicy;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::time::Duration;
    use suoja_core::{DriverError, HandlerError};

    /// In-memory driver that records calls and can be told to fail
    #[derive(Default)]
    struct MemoryDriver {
        connected: AtomicBool,
        published: Mutex<Vec<(String, Envelope)>>,
        subscriptions: Mutex<HashMap<String, Vec<DynHandler>>>,
        publish_failures_remaining: AtomicU32,
        fail_subscribe: AtomicBool,
    }

    impl MemoryDriver {
        fn failing_publishes(failures: u32) -> Self {
            let driver = Self::default();
            driver
                .publish_failures_remaining
                .store(failures, Ordering::SeqCst);
            driver
        }

        fn published(&self) -> Vec<(String, Envelope)> {
            self.published.lock().clone()
        }
    }

    #[async_trait]
    impl PubSubDriver for MemoryDriver {
        fn name(&self) -> &'static str {
            "memory"
        }

        async fn connect(&self) -> Result<(), DriverError> {
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), DriverError> {
            self.connected.store(false, Ordering::SeqCst);
            Ok(())
        }

        async fn publish(&self, topic: &str, envelope: &Envelope) -> Result<(), DriverError> {
            let remaining = self.publish_failures_remaining.load(Ordering::SeqCst);
            if remaining > 0 {
                self.publish_failures_remaining
                    .store(remaining - 1, Ordering::SeqCst);
                return Err(DriverError::Timeout("simulated broker timeout".into()));
            }
            self.published
                .lock()
                .push((topic.to_string(), envelope.clone()));
            Ok(())
        }

        async fn subscribe(&self, topic: &str, handler: DynHandler) -> Result<(), DriverError> {
            if self.fail_subscribe.load(Ordering::SeqCst) {
                return Err(DriverError::Subscribe("simulated rebalance".into()));
            }
            self.subscriptions
                .lock()
                .entry(topic.to_string())
                .or_default()
                .push(handler);
            Ok(())
        }

        async fn unsubscribe(&self, topic: &str) -> Result<(), DriverError> {
            self.subscriptions.lock().remove(topic);
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        fn subscribed_topics(&self) -> Vec<String> {
            self.subscriptions.lock().keys().cloned().collect()
        }
    }

    #[derive(Serialize)]
    struct Order {
        order_id: u32,
    }

    #[tokio::test]
    async fn test_publish_namespaces_and_builds_envelope() {
        let driver = Arc::new(MemoryDriver::default());
        let client = PubSubClient::new(
            driver.clone(),
            ClientOptions::default().with_namespace("payments"),
        );

        let message_id = client
            .publish("orders", &Order { order_id: 7 })
            .await
            .unwrap();

        let published = driver.published();
        assert_eq!(published.len(), 1);
        let (topic, envelope) = &published[0];
        assert_eq!(topic, "payments:orders");
        assert_eq!(envelope.topic, "payments:orders");
        assert_eq!(envelope.id, message_id);
        assert_eq!(envelope.payload_str(), Some(r#"{"order_id":7}"#));
        // Correlation id generated by default, formatted as a UUID
        let correlation_id = envelope.correlation_id().unwrap();
        assert_eq!(correlation_id.len(), 36);
    }

    #[tokio::test]
    async fn test_publish_without_namespace_keeps_topic() {
        let driver = Arc::new(MemoryDriver::default());
        let client = PubSubClient::new(driver.clone(), ClientOptions::default());

        client.publish("orders", &Order { order_id: 1 }).await.unwrap();
        assert_eq!(driver.published()[0].0, "orders");
    }

    #[tokio::test]
    async fn test_caller_correlation_id_wins() {
        let driver = Arc::new(MemoryDriver::default());
        let client = PubSubClient::new(driver.clone(), ClientOptions::default());

        client
            .publish_with(
                "orders",
                &Order { order_id: 1 },
                PublishOptions::default().with_correlation_id("req-1"),
            )
            .await
            .unwrap();

        assert_eq!(driver.published()[0].1.correlation_id(), Some("req-1"));
    }

    #[tokio::test]
    async fn test_correlation_id_disabled() {
        let driver = Arc::new(MemoryDriver::default());
        let client = PubSubClient::new(
            driver.clone(),
            ClientOptions::default().without_correlation_id(),
        );

        client.publish("orders", &Order { order_id: 1 }).await.unwrap();
        assert_eq!(driver.published()[0].1.correlation_id(), None);
    }

    #[tokio::test]
    async fn test_oversized_message_never_reaches_driver() {
        let driver = Arc::new(MemoryDriver::default());
        let client = PubSubClient::new(
            driver.clone(),
            ClientOptions::default().with_max_message_size(8),
        );

        let result = client.publish("orders", &"a very long payload").await;

        match result {
            Err(ClientError::MessageTooLarge { size, limit }) => {
                assert!(size > 8);
                assert_eq!(limit, 8);
            }
            other => panic!("expected MessageTooLarge, got {other:?}"),
        }
        assert!(driver.published().is_empty());
    }

    #[tokio::test]
    async fn test_rate_limit_error_reports_caller_topic() {
        let driver = Arc::new(MemoryDriver::default());
        let client = PubSubClient::new(
            driver,
            ClientOptions::default()
                .with_namespace("ns")
                .with_rate_limit(RateLimitOptions::new(1, Duration::from_secs(5))),
        );

        client.publish("orders", &Order { order_id: 1 }).await.unwrap();
        match client.publish("orders", &Order { order_id: 2 }).await {
            Err(ClientError::RateLimitExceeded { topic, .. }) => assert_eq!(topic, "orders"),
            other => panic!("expected RateLimitExceeded, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_retry_recovers_transient_publish_failure() {
        let driver = Arc::new(MemoryDriver::failing_publishes(2));
        let client = PubSubClient::new(
            driver.clone(),
            ClientOptions::default().with_retry(
                RetryPolicy::default()
                    .with_max_retries(3)
                    .with_retry_delay(Duration::from_millis(1)),
            ),
        );

        client.publish("orders", &Order { order_id: 1 }).await.unwrap();
        assert_eq!(driver.published().len(), 1);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_surfaces_max_retries_error() {
        let driver = Arc::new(MemoryDriver::failing_publishes(10));
        let client = PubSubClient::new(
            driver,
            ClientOptions::default().with_retry(
                RetryPolicy::default()
                    .with_max_retries(2)
                    .with_retry_delay(Duration::from_millis(1)),
            ),
        );

        match client.publish("orders", &Order { order_id: 1 }).await {
            Err(ClientError::MaxRetriesExceeded { attempts, source }) => {
                assert_eq!(attempts, 3);
                assert!(matches!(source, DriverError::Timeout(_)));
            }
            other => panic!("expected MaxRetriesExceeded, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_backpressure_slot_released_on_driver_failure() {
        let driver = Arc::new(MemoryDriver::failing_publishes(u32::MAX));
        let client = PubSubClient::new(
            driver,
            ClientOptions::default()
                .with_backpressure(BackpressureOptions::new(2)),
        );

        assert!(client.publish("orders", &Order { order_id: 1 }).await.is_err());
        let stats = client.backpressure_stats().unwrap();
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.peak_in_flight, 1);
    }

    #[tokio::test]
    async fn test_subscribe_enforces_handler_cap() {
        let driver = Arc::new(MemoryDriver::default());
        let client = PubSubClient::new(
            driver,
            ClientOptions::default().with_max_handlers_per_topic(2),
        );

        let handler = |_: Envelope| async move { Ok::<(), HandlerError>(()) };
        client.subscribe("orders", handler).await.unwrap();
        client.subscribe("orders", handler).await.unwrap();

        match client.subscribe("orders", handler).await {
            Err(ClientError::HandlerLimitExceeded { topic, limit }) => {
                assert_eq!(topic, "orders");
                assert_eq!(limit, 2);
            }
            other => panic!("expected HandlerLimitExceeded, got {other:?}"),
        }
        assert_eq!(client.handler_count("orders"), 2);
    }

    #[tokio::test]
    async fn test_subscribe_rolls_back_reservation_on_driver_failure() {
        let driver = Arc::new(MemoryDriver::default());
        driver.fail_subscribe.store(true, Ordering::SeqCst);
        let client = PubSubClient::new(driver.clone(), ClientOptions::default());

        let handler = |_: Envelope| async move { Ok::<(), HandlerError>(()) };
        assert!(client.subscribe("orders", handler).await.is_err());
        // Count only moves past "registering" when the driver succeeded
        assert_eq!(client.handler_count("orders"), 0);

        driver.fail_subscribe.store(false, Ordering::SeqCst);
        client.subscribe("orders", handler).await.unwrap();
        assert_eq!(client.handler_count("orders"), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_clears_registry() {
        let driver = Arc::new(MemoryDriver::default());
        let client = PubSubClient::new(
            driver.clone(),
            ClientOptions::default().with_namespace("ns"),
        );

        let handler = |_: Envelope| async move { Ok::<(), HandlerError>(()) };
        client.subscribe("orders", handler).await.unwrap();
        assert_eq!(client.subscribed_topics(), vec!["ns:orders".to_string()]);

        client.unsubscribe("orders").await.unwrap();
        assert_eq!(client.handler_count("orders"), 0);
        assert!(client.subscribed_topics().is_empty());
    }

    #[tokio::test]
    async fn test_connection_passthroughs() {
        let driver = Arc::new(MemoryDriver::default());
        let client = PubSubClient::new(driver, ClientOptions::default());

        assert!(!client.is_connected());
        client.connect().await.unwrap();
        assert!(client.is_connected());
        client.disconnect().await.unwrap();
        assert!(!client.is_connected());
    }

    #[test]
    fn test_apply_namespace() {
        assert_eq!(apply_namespace(Some("ns"), "topic"), "ns:topic");
        assert_eq!(apply_namespace(None, "topic"), "topic");
        assert_eq!(apply_namespace(Some(""), "topic"), "topic");
    }
}
