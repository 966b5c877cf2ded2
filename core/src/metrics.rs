//! Metrics sink interface
//!
//! All SUOJA components report through a [`MetricsSink`] injected at
//! construction time. There is no global registry: each client instance
//! owns its sink reference, and [`NoOpMetrics`] is the default when the
//! caller supplies none. Adapters for Prometheus, StatsD etc. live with
//! the application, not here.

use std::sync::Arc;
use std::time::Instant;

/// Producer-side metrics interface
///
/// Implementations must be cheap: both methods sit on the publish and
/// delivery hot paths.
pub trait MetricsSink: Send + Sync {
    /// Increment a counter by one
    fn increment_counter(&self, name: &str, tags: &[(&str, &str)]);

    /// Record one observation into a histogram
    fn record_histogram(&self, name: &str, value: f64, tags: &[(&str, &str)]);
}

/// Sink that discards everything - the default when none is supplied
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpMetrics;

impl MetricsSink for NoOpMetrics {
    fn increment_counter(&self, _name: &str, _tags: &[(&str, &str)]) {}

    fn record_histogram(&self, _name: &str, _value: f64, _tags: &[(&str, &str)]) {}
}

/// Drop-guard timer that records elapsed milliseconds into a histogram
///
/// Started at the top of an operation; records on [`stop`](Self::stop) or,
/// if the operation exits early, on drop. Records exactly once.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use suoja_core::{MetricsSink, MetricsTimer, NoOpMetrics};
///
/// let sink: Arc<dyn MetricsSink> = Arc::new(NoOpMetrics);
/// let timer = MetricsTimer::start(Arc::clone(&sink), "handler.duration_ms")
///     .with_tag("topic", "orders");
/// // ... do work ...
/// timer.stop();
/// ```
pub struct MetricsTimer {
    sink: Arc<dyn MetricsSink>,
    name: String,
    tags: Vec<(String, String)>,
    started: Instant,
    recorded: bool,
}

impl MetricsTimer {
    /// Start a timer that will record into the named histogram
    pub fn start(sink: Arc<dyn MetricsSink>, name: impl Into<String>) -> Self {
        Self {
            sink,
            name: name.into(),
            tags: Vec::new(),
            started: Instant::now(),
            recorded: false,
        }
    }

    /// Attach a tag to the recorded observation
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push((key.into(), value.into()));
        self
    }

    /// Elapsed time since the timer started
    pub fn elapsed(&self) -> std::time::Duration {
        self.started.elapsed()
    }

    /// Stop the timer and record the observation now
    pub fn stop(mut self) {
        self.record();
    }

    fn record(&mut self) {
        if self.recorded {
            return;
        }
        self.recorded = true;
        let tags: Vec<(&str, &str)> = self
            .tags
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        self.sink.record_histogram(
            &self.name,
            self.started.elapsed().as_secs_f64() * 1000.0,
            &tags,
        );
    }
}

impl Drop for MetricsTimer {
    fn drop(&mut self) {
        self.record();
    }
}
