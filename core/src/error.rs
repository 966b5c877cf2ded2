//! Error types for SUOJA drivers

use thiserror::Error;

/// Boxed error returned by consumer message handlers.
///
/// Handlers are user code and may fail with any error type; the client
/// records the failure and (optionally) forwards the message to the
/// dead-letter topic without caring about the concrete type.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Error type for driver operations
///
/// This is the standard error type returned by all backend drivers
/// (Redis, Kafka, cloud pub/sub, in-memory test drivers). It provides
/// structured error categories that help with debugging and with the
/// client's retry classification.
///
/// # Example
///
/// ```
/// use suoja_core::DriverError;
///
/// fn send_to_backend() -> Result<(), DriverError> {
///     // Simulate a broker that refused the message
///     Err(DriverError::Publish("broker unavailable".to_string()))
/// }
///
/// match send_to_backend() {
///     Ok(_) => println!("sent"),
///     Err(DriverError::Publish(msg)) => println!("publish failed: {}", msg),
///     Err(e) => println!("other error: {}", e),
/// }
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    /// Network connection failed
    ///
    /// Examples: DNS lookup failed, connection refused, TLS handshake error.
    #[error("connection error: {0}")]
    Connection(String),

    /// Publish failed
    ///
    /// Returned when the backend rejected or failed to accept an outbound
    /// envelope. Examples: broker timeout, topic does not exist, quota
    /// exceeded.
    #[error("publish failed: {0}")]
    Publish(String),

    /// Subscribe failed
    ///
    /// Returned when handler registration with the backend failed.
    /// Examples: invalid topic name, consumer group rebalance error.
    #[error("subscribe failed: {0}")]
    Subscribe(String),

    /// Unsubscribe failed
    #[error("unsubscribe failed: {0}")]
    Unsubscribe(String),

    /// Operation timed out inside the driver
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// Driver is not connected
    ///
    /// Returned when an operation is attempted before `connect` succeeded
    /// or after `disconnect`.
    #[error("driver not connected")]
    NotConnected,
}
