//! Construction-time configuration for the SUOJA client
//!
//! All options are consumed once at client construction and are read-only
//! afterwards. Components that are `None` are simply disabled: no
//! backpressure gate, no rate limiter, no retry - the client degrades to
//! namespacing, validation and metrics around the bare driver.

use crate::retry::RetryPolicy;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

/// Options for the global in-flight gate
#[derive(Debug, Clone)]
pub struct BackpressureOptions {
    /// Ceiling on concurrent in-flight operations
    pub max_inflight: u64,
    /// Give up waiting for a slot after this long; `None` waits forever
    pub wait_timeout: Option<Duration>,
    /// Sleep between capacity re-checks while waiting
    pub poll_interval: Duration,
}

impl BackpressureOptions {
    /// Create options with the given in-flight ceiling
    pub fn new(max_inflight: u64) -> Self {
        Self {
            max_inflight,
            wait_timeout: None,
            poll_interval: Duration::from_millis(10),
        }
    }

    /// Bound the wait for a free slot
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = Some(timeout);
        self
    }

    /// Set the poll interval used while waiting
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

impl Default for BackpressureOptions {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Options for the per-topic rate limiter
#[derive(Debug, Clone)]
pub struct RateLimitOptions {
    /// Requests allowed per topic per window
    pub max_requests: u32,
    /// Window length
    pub window: Duration,
    /// Sliding window (trailing interval) vs fixed window (period resets).
    /// Fixed mode can admit up to 2×max across a window boundary.
    pub sliding: bool,
}

impl RateLimitOptions {
    /// Create sliding-window options
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            sliding: true,
        }
    }

    /// Switch to fixed-window counting
    pub fn fixed_window(mut self) -> Self {
        self.sliding = false;
        self
    }
}

/// Client-wide options, fixed at construction
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Prefix applied to every topic (`namespace:topic`)
    pub namespace: Option<String>,
    /// Reject payloads larger than this many serialized bytes
    pub max_message_size: Option<usize>,
    /// Topic (pre-namespace) that failed deliveries are forwarded to
    pub dead_letter_topic: Option<String>,
    /// Rethrow handler errors into the driver's delivery loop. Off by
    /// default: most backends would otherwise nack and redeliver forever.
    pub throw_on_handler_error: bool,
    /// Generate a correlation id when the caller supplies none
    pub enable_correlation_id: bool,
    /// Fraction of successful publishes that emit a debug log, in [0, 1]
    pub log_sampling_rate: f64,
    /// Hard cap on handlers per namespaced topic
    pub max_handlers_per_topic: usize,
    /// Global in-flight gate; `None` disables it
    pub backpressure: Option<BackpressureOptions>,
    /// Per-topic rate limiter; `None` disables it
    pub rate_limit: Option<RateLimitOptions>,
    /// Retry policy for the driver send step; `None` means one attempt
    pub retry: Option<RetryPolicy>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            namespace: None,
            max_message_size: None,
            dead_letter_topic: None,
            throw_on_handler_error: false,
            enable_correlation_id: true,
            log_sampling_rate: 1.0,
            max_handlers_per_topic: 100,
            backpressure: None,
            rate_limit: None,
            retry: None,
        }
    }
}

impl ClientOptions {
    /// Set the topic namespace prefix
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Reject payloads above `bytes` serialized bytes
    pub fn with_max_message_size(mut self, bytes: usize) -> Self {
        self.max_message_size = Some(bytes);
        self
    }

    /// Forward failed deliveries to this topic
    pub fn with_dead_letter_topic(mut self, topic: impl Into<String>) -> Self {
        self.dead_letter_topic = Some(topic.into());
        self
    }

    /// Rethrow handler errors into the driver's delivery loop
    pub fn throw_on_handler_error(mut self) -> Self {
        self.throw_on_handler_error = true;
        self
    }

    /// Don't generate correlation ids for messages that lack one
    pub fn without_correlation_id(mut self) -> Self {
        self.enable_correlation_id = false;
        self
    }

    /// Sample successful-publish debug logs at the given rate in [0, 1]
    ///
    /// Values outside [0, 1] are rejected at client construction.
    pub fn with_log_sampling_rate(mut self, rate: f64) -> Self {
        self.log_sampling_rate = rate;
        self
    }

    /// Set the per-topic handler ceiling
    pub fn with_max_handlers_per_topic(mut self, max: usize) -> Self {
        self.max_handlers_per_topic = max;
        self
    }

    /// Enable the global in-flight gate
    pub fn with_backpressure(mut self, options: BackpressureOptions) -> Self {
        self.backpressure = Some(options);
        self
    }

    /// Enable the per-topic rate limiter
    pub fn with_rate_limit(mut self, options: RateLimitOptions) -> Self {
        self.rate_limit = Some(options);
        self
    }

    /// Retry the driver send step under this policy
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }
}

/// Per-call publish options
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    /// Correlation id to propagate; generated when `None` and enabled
    pub correlation_id: Option<String>,
    /// Metadata merged into the envelope
    pub metadata: HashMap<String, Value>,
    /// Driver-level attributes attached to the envelope
    pub attributes: Option<HashMap<String, String>>,
}

impl PublishOptions {
    /// Propagate an existing correlation id
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Add a metadata entry
    pub fn with_metadata_entry(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Add a driver-level attribute
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }
}
