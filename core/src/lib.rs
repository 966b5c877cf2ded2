//! suoja-core - Contract types for the SUOJA pub/sub client
//!
//! This crate provides the foundational types shared between the SUOJA
//! client and backend driver crates:
//!
//! - [`Envelope`] - the wire-independent message envelope (zero-copy payload)
//! - [`PubSubDriver`] trait - async interface implemented by backends
//! - [`MessageHandler`] trait - consumer callback contract
//! - [`DriverError`] / [`HandlerError`] - error types for driver and handler code
//! - [`MetricsSink`] - producer-side metrics interface with a no-op default
//! - [`metadata_keys`] - reserved metadata key constants
//!
//! # Why this crate exists
//!
//! Concrete drivers (Redis, Kafka, cloud pub/sub) need to implement
//! [`PubSubDriver`] and exchange [`Envelope`]s. Without `suoja-core` they
//! would depend on `suoja-client`, but applications typically want the
//! client to depend on a chosen driver, creating a cycle. Extracting the
//! contract here breaks it:
//!
//! ```text
//! suoja-core ◄── suoja-client
//!     ▲
//!     └────────── suoja-redis / suoja-kafka / your driver
//! ```

#![deny(unsafe_code)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]
#![warn(missing_docs)]

mod driver;
mod error;
/// The wire-independent message envelope
pub mod envelope;
/// Reserved metadata key constants for SUOJA envelopes
pub mod metadata_keys;
/// Metrics sink interface with a no-op default
pub mod metrics;

pub use driver::{DynHandler, MessageHandler, PubSubDriver};
pub use envelope::Envelope;
pub use error::{DriverError, HandlerError};
pub use metrics::{MetricsSink, MetricsTimer, NoOpMetrics};
