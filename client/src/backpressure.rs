//! Global in-flight admission gate
//!
//! Caps the total number of concurrent operations across all topics to
//! protect the process and the downstream backend from overload.
//!
//! This is an at-most-N gate, not a queue: waiters sleep-and-recheck for
//! a free slot and no FIFO ordering is guaranteed between them. Admission
//! itself is a single atomic compare-and-swap (increment only while below
//! the ceiling), so the in-flight count can never overshoot no matter how
//! many callers race. The polling wait adds up to one `poll_interval` of
//! latency per admission; a notify-on-release design would remove that at
//! the cost of timing-sensitive behavior changes.

use crate::config::BackpressureOptions;
use crate::error::ClientError;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use suoja_core::MetricsSink;

/// Warn when utilization crosses this fraction of the ceiling
const WARN_UTILIZATION: f64 = 0.95;
/// Minimum gap between two high-utilization warnings
const WARN_INTERVAL: Duration = Duration::from_secs(60);

/// Caps concurrent in-flight operations
pub struct BackpressureController {
    max_inflight: u64,
    poll_interval: Duration,
    wait_timeout: Option<Duration>,
    /// Operations currently admitted but not yet released
    inflight: AtomicU64,
    /// Highest in-flight count ever observed
    peak_inflight: AtomicU64,
    /// Number of acquisitions that had to wait for capacity
    total_waits: AtomicU64,
    /// Elapsed nanos (since `start`) of the last utilization warning;
    /// zero means never warned
    last_warn_nanos: AtomicU64,
    start: Instant,
    metrics: Arc<dyn MetricsSink>,
}

/// Admission slot; releasing happens on drop, on every exit path
pub struct InflightGuard<'a> {
    controller: &'a BackpressureController,
}

impl std::fmt::Debug for InflightGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InflightGuard").finish_non_exhaustive()
    }
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        self.controller.release();
    }
}

/// Read-only snapshot of the gate's counters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackpressureStats {
    /// Operations currently in flight
    pub in_flight: u64,
    /// Highest in-flight count ever observed
    pub peak_in_flight: u64,
    /// Configured ceiling
    pub max_in_flight: u64,
    /// Acquisitions that had to wait for capacity
    pub total_waits: u64,
    /// `in_flight / max_in_flight`
    pub utilization: f64,
    /// Free slots right now
    pub available: u64,
}

impl BackpressureController {
    /// Create a gate from its options
    pub fn new(options: BackpressureOptions, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            max_inflight: options.max_inflight.max(1),
            poll_interval: options.poll_interval,
            wait_timeout: options.wait_timeout,
            inflight: AtomicU64::new(0),
            peak_inflight: AtomicU64::new(0),
            total_waits: AtomicU64::new(0),
            last_warn_nanos: AtomicU64::new(0),
            start: Instant::now(),
            metrics,
        }
    }

    /// Try to take a slot without waiting
    ///
    /// The increment-if-below-ceiling is one atomic operation, so the
    /// in-flight count never exceeds `max_inflight` under concurrency.
    pub fn try_acquire(&self) -> Option<InflightGuard<'_>> {
        let previous = self
            .inflight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                if current < self.max_inflight {
                    Some(current + 1)
                } else {
                    None
                }
            })
            .ok()?;

        let current = previous + 1;
        self.peak_inflight.fetch_max(current, Ordering::AcqRel);
        self.maybe_warn(current);
        Some(InflightGuard { controller: self })
    }

    /// Take a slot, waiting for capacity if necessary
    ///
    /// Fast path returns immediately. Otherwise sleeps `poll_interval`
    /// between re-checks and fails with
    /// [`ClientError::BackpressureTimeout`] once the configured
    /// `wait_timeout` has elapsed.
    pub async fn acquire(&self) -> Result<InflightGuard<'_>, ClientError> {
        if let Some(guard) = self.try_acquire() {
            return Ok(guard);
        }

        self.total_waits.fetch_add(1, Ordering::Relaxed);
        self.metrics.increment_counter("backpressure.waits", &[]);
        let waiting_since = Instant::now();

        loop {
            if let Some(timeout) = self.wait_timeout {
                let waited = waiting_since.elapsed();
                if waited >= timeout {
                    let in_flight = self.inflight.load(Ordering::Acquire);
                    tracing::warn!(
                        in_flight,
                        max_in_flight = self.max_inflight,
                        waited_ms = waited.as_millis() as u64,
                        "backpressure wait timed out"
                    );
                    return Err(ClientError::BackpressureTimeout {
                        in_flight,
                        max_in_flight: self.max_inflight,
                        waited,
                    });
                }
            }

            tokio::time::sleep(self.poll_interval).await;

            if let Some(guard) = self.try_acquire() {
                return Ok(guard);
            }
        }
    }

    /// Run `operation` inside an admission slot
    ///
    /// The slot is released when the operation completes, whether it
    /// succeeded or failed.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> Result<T, ClientError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let _guard = self.acquire().await?;
        operation().await
    }

    /// Read-only snapshot of the gate's counters
    pub fn stats(&self) -> BackpressureStats {
        let in_flight = self.inflight.load(Ordering::Acquire);
        BackpressureStats {
            in_flight,
            peak_in_flight: self.peak_inflight.load(Ordering::Acquire),
            max_in_flight: self.max_inflight,
            total_waits: self.total_waits.load(Ordering::Relaxed),
            utilization: in_flight as f64 / self.max_inflight as f64,
            available: self.max_inflight.saturating_sub(in_flight),
        }
    }

    /// Release one slot; called from guard drop
    ///
    /// Releasing below zero is a logic error: it is logged and clamped,
    /// never panicked on.
    fn release(&self) {
        let result = self
            .inflight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current.checked_sub(1)
            });
        if result.is_err() {
            tracing::error!("in-flight counter released below zero, clamping");
        }
    }

    /// Warn (throttled) when the gate is nearly saturated
    fn maybe_warn(&self, current: u64) {
        let utilization = current as f64 / self.max_inflight as f64;
        if utilization < WARN_UTILIZATION {
            return;
        }

        let now_nanos = self.start.elapsed().as_nanos() as u64;
        let last = self.last_warn_nanos.load(Ordering::Relaxed);
        if last != 0 && now_nanos.saturating_sub(last) < WARN_INTERVAL.as_nanos() as u64 {
            return;
        }

        // One winner per interval; losers skip the warning
        if self
            .last_warn_nanos
            .compare_exchange(last, now_nanos, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            tracing::warn!(
                in_flight = current,
                max_in_flight = self.max_inflight,
                utilization = format!("{:.0}%", utilization * 100.0),
                "backpressure gate nearing capacity"
            );
        }
    }
}
