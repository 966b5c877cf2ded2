//! Driver contract implemented by backend transports
//!
//! The [`PubSubDriver`] trait defines the interface between the SUOJA
//! client and a concrete messaging backend (Redis, Kafka, cloud pub/sub,
//! or an in-memory driver for tests). The client layers admission control,
//! retry, rate limiting and dead-letter routing on top; drivers only move
//! envelopes and manage their own connection state.

use crate::envelope::Envelope;
use crate::error::{DriverError, HandlerError};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

/// Consumer callback invoked for each inbound envelope
///
/// Implemented automatically for `Fn(Envelope) -> Future<Output =
/// Result<(), HandlerError>>` closures, so plain async closures can be
/// passed to `subscribe` without a wrapper type.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle one inbound envelope
    async fn handle(&self, envelope: Envelope) -> Result<(), HandlerError>;
}

#[async_trait]
impl<F, Fut> MessageHandler for F
where
    F: Fn(Envelope) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    async fn handle(&self, envelope: Envelope) -> Result<(), HandlerError> {
        (self)(envelope).await
    }
}

/// Shared handler reference handed to drivers at subscription time
pub type DynHandler = Arc<dyn MessageHandler>;

/// Driver trait - moves envelopes to and from a concrete backend
///
/// # Implementation Requirements
///
/// - Drivers must be `Send + Sync` for use across async tasks
/// - `publish` must not return `Ok` unless the backend accepted the
///   envelope (the client's retry layer relies on this)
/// - The handler passed to `subscribe` never panics and, unless the
///   client was configured otherwise, never returns an error; drivers may
///   still treat a returned error as a nack if their backend supports it
/// - `is_connected` and `subscribed_topics` are synchronous reads of
///   driver-local state and must be cheap
///
/// # Example
///
/// ```ignore
/// use suoja_core::{DriverError, DynHandler, Envelope, PubSubDriver};
/// use async_trait::async_trait;
///
/// struct RedisDriver { /* connection pool, channels */ }
///
/// #[async_trait]
/// impl PubSubDriver for RedisDriver {
///     fn name(&self) -> &'static str {
///         "redis"
///     }
///
///     async fn publish(&self, topic: &str, envelope: &Envelope) -> Result<(), DriverError> {
///         let body = serde_json::to_vec(envelope)
///             .map_err(|e| DriverError::Publish(e.to_string()))?;
///         // PUBLISH topic body ...
///         Ok(())
///     }
///     // ...
/// }
/// ```
#[async_trait]
pub trait PubSubDriver: Send + Sync {
    /// Returns the driver's name for identification and logging
    ///
    /// Short and descriptive: "redis", "kafka", "memory".
    fn name(&self) -> &'static str;

    /// Establish the backend connection
    async fn connect(&self) -> Result<(), DriverError>;

    /// Tear down the backend connection, releasing resources
    async fn disconnect(&self) -> Result<(), DriverError>;

    /// Send one envelope to the given (already namespaced) topic
    async fn publish(&self, topic: &str, envelope: &Envelope) -> Result<(), DriverError>;

    /// Register a handler for the given topic
    ///
    /// The driver invokes `handler.handle(envelope)` once per inbound
    /// message, from its own delivery loop.
    async fn subscribe(&self, topic: &str, handler: DynHandler) -> Result<(), DriverError>;

    /// Remove all handlers for the given topic
    async fn unsubscribe(&self, topic: &str) -> Result<(), DriverError>;

    /// Whether the driver currently holds a usable backend connection
    fn is_connected(&self) -> bool;

    /// Topics with at least one registered handler
    fn subscribed_topics(&self) -> Vec<String>;
}
