//! Per-topic rate limiter
//!
//! Caps throughput per topic within a sliding or fixed time window. Each
//! topic owns an independent window behind its own mutex, so unrelated
//! topics never contend; the topic map itself is only read-locked on the
//! hot path, with a double-checked write path for first-seen topics.
//!
//! Sliding mode filters expired timestamps on every check, so cost is
//! proportional to recent request volume for that topic - fine for
//! per-topic streams, but extremely hot topics should pair this with the
//! periodic [`cleanup`](RateLimiter::cleanup) sweep. Fixed mode is O(1)
//! but can admit up to 2×max across a window boundary; that is a known
//! trade-off of the algorithm, not a bug.

use crate::config::RateLimitOptions;
use crate::error::ClientError;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use suoja_core::MetricsSink;

/// Per-topic admission gate bounding requests per time window
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    sliding: bool,
    topics: RwLock<HashMap<String, Arc<Mutex<TopicWindow>>>>,
    metrics: Arc<dyn MetricsSink>,
}

/// One topic's window state; the whole check-and-record sequence runs
/// under this mutex so concurrent checks cannot interleave
struct TopicWindow {
    state: WindowState,
    last_seen: Instant,
}

enum WindowState {
    /// Timestamps of admitted requests within the trailing window, oldest
    /// first
    Sliding(VecDeque<Instant>),
    /// Counter that resets at period boundaries
    Fixed { count: u32, window_start: Instant },
}

impl RateLimiter {
    /// Create a limiter from its options
    pub fn new(options: RateLimitOptions, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            max_requests: options.max_requests,
            window: options.window,
            sliding: options.sliding,
            topics: RwLock::new(HashMap::new()),
            metrics,
        }
    }

    /// Admit or reject one request for the topic
    ///
    /// On rejection the error carries the current window occupancy and the
    /// time until a slot frees up.
    pub fn check_limit(&self, topic: &str) -> Result<(), ClientError> {
        let window = self.window_for(topic);
        let mut guard = window.lock();
        let now = Instant::now();
        guard.last_seen = now;

        let rejection = match &mut guard.state {
            WindowState::Sliding(timestamps) => {
                // Evict entries older than the trailing window
                if let Some(cutoff) = now.checked_sub(self.window) {
                    while timestamps.front().is_some_and(|t| *t <= cutoff) {
                        timestamps.pop_front();
                    }
                }

                if timestamps.len() as u32 >= self.max_requests {
                    // Window frees up when the oldest survivor ages out
                    let oldest = timestamps.front().copied().unwrap_or(now);
                    let reset_at = oldest + self.window;
                    Some((
                        timestamps.len() as u32,
                        reset_at.saturating_duration_since(now),
                    ))
                } else {
                    timestamps.push_back(now);
                    None
                }
            }
            WindowState::Fixed { count, window_start } => {
                if now.duration_since(*window_start) >= self.window {
                    *count = 0;
                    *window_start = now;
                }

                if *count >= self.max_requests {
                    let reset_at = *window_start + self.window;
                    Some((*count, reset_at.saturating_duration_since(now)))
                } else {
                    *count += 1;
                    None
                }
            }
        };
        drop(guard);

        match rejection {
            None => Ok(()),
            Some((current, retry_after)) => {
                self.metrics
                    .increment_counter("ratelimit.rejected", &[("topic", topic)]);
                tracing::debug!(
                    topic = %topic,
                    current,
                    max = self.max_requests,
                    retry_after_ms = retry_after.as_millis() as u64,
                    "rate limited"
                );
                Err(ClientError::RateLimitExceeded {
                    topic: topic.to_string(),
                    current,
                    max: self.max_requests,
                    retry_after,
                })
            }
        }
    }

    /// Remove per-topic state untouched for longer than the threshold
    ///
    /// Bounds memory under topic churn. Returns the number of topics
    /// removed.
    pub fn cleanup(&self, inactive_threshold: Duration) -> usize {
        let mut topics = self.topics.write();
        let before = topics.len();
        topics.retain(|_, window| window.lock().last_seen.elapsed() <= inactive_threshold);
        let removed = before - topics.len();
        if removed > 0 {
            tracing::debug!(removed, remaining = topics.len(), "evicted idle rate windows");
        }
        removed
    }

    /// Clear one topic's window (administrative/test use)
    pub fn reset(&self, topic: &str) {
        self.topics.write().remove(topic);
    }

    /// Clear all windows (administrative/test use)
    pub fn reset_all(&self) {
        self.topics.write().clear();
    }

    /// Number of topics currently tracked
    pub fn topic_count(&self) -> usize {
        self.topics.read().len()
    }

    /// Get or create the topic's window
    fn window_for(&self, topic: &str) -> Arc<Mutex<TopicWindow>> {
        // Fast path: topic already tracked (read lock)
        {
            let topics = self.topics.read();
            if let Some(window) = topics.get(topic) {
                return Arc::clone(window);
            }
        }

        // Slow path: first request for this topic (write lock, double-check)
        let mut topics = self.topics.write();
        if let Some(window) = topics.get(topic) {
            return Arc::clone(window);
        }

        let state = if self.sliding {
            WindowState::Sliding(VecDeque::new())
        } else {
            WindowState::Fixed {
                count: 0,
                window_start: Instant::now(),
            }
        };
        let window = Arc::new(Mutex::new(TopicWindow {
            state,
            last_seen: Instant::now(),
        }));
        topics.insert(topic.to_string(), Arc::clone(&window));
        window
    }
}
