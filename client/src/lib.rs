//! SUOJA - production-resilience layer for pub/sub backends
//!
//! Turns a bare "send message / register handler" backend into a
//! production-safe messaging client, without the backend driver knowing
//! any of it:
//!
//! ```text
//! publish ──► namespace ──► size check ──► rate limit ──► backpressure
//!                                                             │
//!                  driver.publish ◄── envelope + retry ◄──────┘
//!
//! driver delivery loop ──► wrapped handler ──► user handler
//!                              │ on failure: log + metrics + DLQ forward
//! ```
//!
//! Components (all optional except the orchestrator):
//!
//! - [`PubSubClient`] - composition root exposing publish/subscribe
//! - [`BackpressureController`] - global in-flight gate with bounded wait
//! - [`RateLimiter`] - per-topic sliding/fixed window admission
//! - [`RetryPolicy`] / [`execute_with_retry`] - exponential backoff for
//!   any fallible async operation
//! - handler wrapping with dead-letter forwarding ([`DeadLetterRecord`])
//!
//! Drivers implement [`PubSubDriver`] from `suoja-core`; an in-memory
//! driver for tests lives in this crate's test suite.

#![deny(unsafe_code)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]

pub mod backpressure;
pub mod client;
pub mod config;
pub mod error;
pub mod handler;
pub mod ratelimit;
pub mod retry;
mod sampler;

pub use backpressure::{BackpressureController, BackpressureStats, InflightGuard};
pub use client::PubSubClient;
pub use config::{BackpressureOptions, ClientOptions, PublishOptions, RateLimitOptions};
pub use error::{ClientError, Result};
pub use handler::{DeadLetterErrorDetail, DeadLetterRecord};
pub use ratelimit::RateLimiter;
pub use retry::{execute_with_retry, is_retryable, RetryError, RetryPolicy};

// Re-export the driver contract so applications only need one import
pub use suoja_core::{
    metadata_keys, DriverError, DynHandler, Envelope, HandlerError, MessageHandler, MetricsSink,
    MetricsTimer, NoOpMetrics, PubSubDriver,
};
