//! Error types for the SUOJA client

use std::time::Duration;
use suoja_core::DriverError;
use thiserror::Error;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Main error type for the SUOJA client
///
/// Publish-path failures propagate to the caller; handler-path failures
/// are isolated inside the wrapped handler and never surface here unless
/// `throw_on_handler_error` is set. Every variant carries enough context
/// for the caller to implement its own backoff or alerting without
/// re-deriving client state.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Payload exceeds the configured size limit; nothing was sent
    #[error("message of {size} bytes exceeds the {limit} byte limit")]
    MessageTooLarge {
        /// Serialized payload size
        size: usize,
        /// Configured limit
        limit: usize,
    },

    /// Topic is over its window budget; retry after `retry_after`
    #[error(
        "rate limit exceeded for topic '{topic}': {current}/{max} in window, retry in {retry_after:?}"
    )]
    RateLimitExceeded {
        /// Topic that was throttled
        topic: String,
        /// Requests currently counted in the window
        current: u32,
        /// Window budget
        max: u32,
        /// Time until the window frees a slot
        retry_after: Duration,
    },

    /// Capacity did not free up within the configured wait deadline
    #[error(
        "backpressure timeout after {waited:?}: {in_flight}/{max_in_flight} operations in flight"
    )]
    BackpressureTimeout {
        /// Operations in flight when the wait gave up
        in_flight: u64,
        /// Configured ceiling
        max_in_flight: u64,
        /// How long the caller waited
        waited: Duration,
    },

    /// All retry attempts failed; wraps the last underlying error
    #[error("operation failed after {attempts} attempts: {source}")]
    MaxRetriesExceeded {
        /// Total attempts made (initial try + retries)
        attempts: u32,
        /// The last failure
        #[source]
        source: DriverError,
    },

    /// Too many handlers registered on one topic (hard cap, not a queue)
    #[error("handler limit reached for topic '{topic}': {limit} handlers already registered")]
    HandlerLimitExceeded {
        /// Topic at capacity
        topic: String,
        /// Configured per-topic ceiling
        limit: usize,
    },

    /// Payload could not be serialized
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Backend driver failure
    #[error(transparent)]
    Driver(#[from] DriverError),
}
