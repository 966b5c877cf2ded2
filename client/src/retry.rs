//! Retry executor with exponential backoff
//!
//! Runs any fallible async operation with bounded retries. Failures are
//! classified as retryable or not before every wait: a custom classifier
//! has exclusive authority when supplied, otherwise pattern lists are
//! matched by substring against the error's rendered text (message,
//! type/variant name via `Debug`, and the `source()` chain).
//!
//! Delays follow `min(retry_delay × multiplier^i, max_retry_delay)` with
//! `i` zero-based from the first retry. There is deliberately no jitter:
//! callers that need it can fold it into the policy's base delay.

use crate::error::ClientError;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use suoja_core::DriverError;
use thiserror::Error;

/// Custom retryability predicate; `true` means retry
pub type RetryClassifier = Arc<dyn Fn(&(dyn std::error::Error + 'static)) -> bool + Send + Sync>;

/// Configuration for retry behavior
///
/// Stateless: a policy can be shared between calls and clients.
#[derive(Clone)]
pub struct RetryPolicy {
    /// Maximum number of retries after the initial attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub retry_delay: Duration,
    /// Multiplier applied per retry (2.0 = doubling)
    pub backoff_multiplier: f64,
    /// Ceiling for any single computed delay
    pub max_retry_delay: Duration,
    /// Whitelist: when non-empty, only matching errors are retried
    pub retryable_patterns: Vec<String>,
    /// Blacklist: matching errors are never retried (takes precedence)
    pub non_retryable_patterns: Vec<String>,
    /// Custom predicate with exclusive authority over classification
    pub classifier: Option<RetryClassifier>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            max_retry_delay: Duration::from_secs(30),
            retryable_patterns: Vec::new(),
            non_retryable_patterns: Vec::new(),
            classifier: None,
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("retry_delay", &self.retry_delay)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("max_retry_delay", &self.max_retry_delay)
            .field("retryable_patterns", &self.retryable_patterns)
            .field("non_retryable_patterns", &self.non_retryable_patterns)
            .field("classifier", &self.classifier.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

impl RetryPolicy {
    /// Set the maximum number of retries
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the delay before the first retry
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Set the per-retry multiplier
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Set the ceiling for computed delays
    pub fn with_max_retry_delay(mut self, max: Duration) -> Self {
        self.max_retry_delay = max;
        self
    }

    /// Add a pattern to the retryable whitelist
    pub fn retryable_on(mut self, pattern: impl Into<String>) -> Self {
        self.retryable_patterns.push(pattern.into());
        self
    }

    /// Add a pattern to the non-retryable blacklist
    pub fn non_retryable_on(mut self, pattern: impl Into<String>) -> Self {
        self.non_retryable_patterns.push(pattern.into());
        self
    }

    /// Install a custom classifier (exclusive authority)
    pub fn with_classifier(
        mut self,
        classifier: impl Fn(&(dyn std::error::Error + 'static)) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.classifier = Some(Arc::new(classifier));
        self
    }

    /// Delay before retry number `retry_index` (zero-based)
    ///
    /// `min(retry_delay × multiplier^retry_index, max_retry_delay)`,
    /// computed in microseconds so sub-millisecond base delays stay exact.
    pub fn delay_for_attempt(&self, retry_index: u32) -> Duration {
        let base_us = self.retry_delay.as_micros() as f64
            * self.backoff_multiplier.powi(retry_index as i32);
        let capped_us = base_us.min(self.max_retry_delay.as_micros() as f64);
        Duration::from_micros(capped_us as u64)
    }
}

/// Outcome of a retried operation that never succeeded
#[derive(Debug, Error)]
pub enum RetryError<E>
where
    E: std::error::Error + 'static,
{
    /// All attempts failed with retryable errors; wraps the last one
    #[error("operation failed after {attempts} attempts: {source}")]
    Exhausted {
        /// Total attempts made (initial try + retries)
        attempts: u32,
        /// The last failure
        source: E,
    },
    /// The operation failed with a non-retryable error on some attempt
    #[error(transparent)]
    NonRetryable(E),
}

impl From<RetryError<DriverError>> for ClientError {
    fn from(err: RetryError<DriverError>) -> Self {
        match err {
            RetryError::Exhausted { attempts, source } => {
                ClientError::MaxRetriesExceeded { attempts, source }
            }
            RetryError::NonRetryable(source) => ClientError::Driver(source),
        }
    }
}

/// Classify an error as retryable under the given policy
///
/// Order of authority: custom classifier (exclusive) → non-retryable
/// blacklist → retryable whitelist (must match when non-empty) → default
/// retryable. Pattern matching is substring containment, which can
/// over-match (pattern "Timeout" also matches "ConnectionTimeoutWrapper");
/// this permissive behavior is intentional.
pub fn is_retryable(policy: &RetryPolicy, error: &(dyn std::error::Error + 'static)) -> bool {
    if let Some(classifier) = &policy.classifier {
        return classifier(error);
    }

    let haystack = error_haystack(error);

    if policy
        .non_retryable_patterns
        .iter()
        .any(|pattern| haystack.contains(pattern.as_str()))
    {
        return false;
    }

    if !policy.retryable_patterns.is_empty() {
        return policy
            .retryable_patterns
            .iter()
            .any(|pattern| haystack.contains(pattern.as_str()));
    }

    true
}

/// Text the patterns are matched against: message, `Debug` rendering
/// (carries the type/variant name), and the chain of causes.
fn error_haystack(error: &(dyn std::error::Error + 'static)) -> String {
    use std::fmt::Write;

    let mut text = format!("{error} {error:?}");
    let mut source = error.source();
    while let Some(cause) = source {
        let _ = write!(text, " {cause}");
        source = cause.source();
    }
    text
}

/// Run `operation` with up to `max_retries + 1` attempts
///
/// Non-retryable failures abort immediately with the original error;
/// retryable failures on the final attempt produce
/// [`RetryError::Exhausted`] wrapping the last failure - never silently
/// swallowed. Every retry and the final exhaustion are logged.
pub async fn execute_with_retry<T, E, F, Fut>(
    mut operation: F,
    policy: &RetryPolicy,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::error::Error + 'static,
{
    let total_attempts = policy.max_retries + 1;
    let mut attempt: u32 = 0;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                attempt += 1;

                if !is_retryable(policy, &error) {
                    tracing::warn!(
                        attempt,
                        error = %error,
                        "non-retryable error, aborting"
                    );
                    return Err(RetryError::NonRetryable(error));
                }

                if attempt >= total_attempts {
                    tracing::error!(
                        attempts = attempt,
                        error = %error,
                        "retries exhausted"
                    );
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        source: error,
                    });
                }

                let delay = policy.delay_for_attempt(attempt - 1);
                tracing::warn!(
                    attempt,
                    max_attempts = total_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_retries(max_retries)
            .with_retry_delay(Duration::from_millis(1))
            .with_max_retry_delay(Duration::from_millis(5))
    }

    #[test]
    fn test_backoff_law() {
        let policy = RetryPolicy::default()
            .with_retry_delay(Duration::from_millis(100))
            .with_backoff_multiplier(2.0)
            .with_max_retry_delay(Duration::from_millis(500));

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
        // Capped from here on; stays constant
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_millis(500));
    }

    #[test]
    fn test_default_is_retryable() {
        let policy = RetryPolicy::default();
        let error = DriverError::Publish("broker timeout".into());
        assert!(is_retryable(&policy, &error));
    }

    #[test]
    fn test_blacklist_wins_over_whitelist() {
        let policy = RetryPolicy::default()
            .retryable_on("publish")
            .non_retryable_on("publish failed");
        let error = DriverError::Publish("whatever".into());
        assert!(!is_retryable(&policy, &error));
    }

    #[test]
    fn test_whitelist_must_match() {
        let policy = RetryPolicy::default().retryable_on("timed out");

        let timeout = DriverError::Timeout("broker".into());
        assert!(is_retryable(&policy, &timeout));

        let other = DriverError::Connection("refused".into());
        assert!(!is_retryable(&policy, &other));
    }

    #[test]
    fn test_patterns_match_variant_name() {
        // `Debug` rendering carries the enum variant, so patterns can
        // target the error kind rather than the message text
        let policy = RetryPolicy::default().non_retryable_on("NotConnected");
        assert!(!is_retryable(&policy, &DriverError::NotConnected));
        assert!(is_retryable(&policy, &DriverError::Timeout("x".into())));
    }

    #[test]
    fn test_substring_matching_over_matches() {
        // Documented permissive behavior: "Timeout" also matches messages
        // merely containing the word
        let policy = RetryPolicy::default().non_retryable_on("Timeout");
        let error = DriverError::Publish("ConnectionTimeoutWrapper tripped".into());
        assert!(!is_retryable(&policy, &error));
    }

    #[test]
    fn test_classifier_has_exclusive_authority() {
        // Blacklist says no, classifier says yes - classifier wins
        let policy = RetryPolicy::default()
            .non_retryable_on("publish")
            .with_classifier(|_| true);
        assert!(is_retryable(
            &policy,
            &DriverError::Publish("publish refused".into())
        ));

        let never = RetryPolicy::default().with_classifier(|_| false);
        assert!(!is_retryable(&never, &DriverError::Timeout("x".into())));
    }

    #[tokio::test]
    async fn test_succeeds_first_try() {
        let calls = AtomicU32::new(0);
        let result = execute_with_retry(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, DriverError>(42) }
            },
            &fast_policy(3),
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = execute_with_retry(
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(DriverError::Timeout("transient".into()))
                    } else {
                        Ok("done")
                    }
                }
            },
            &fast_policy(3),
        )
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_attempt_count() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = execute_with_retry(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(DriverError::Timeout("always".into())) }
            },
            &fast_policy(2),
        )
        .await;

        // max_retries = 2 means exactly 3 invocations
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result.unwrap_err() {
            RetryError::Exhausted { attempts, source } => {
                assert_eq!(attempts, 3);
                assert_eq!(source, DriverError::Timeout("always".into()));
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_non_retryable_short_circuits() {
        let calls = AtomicU32::new(0);
        let policy = fast_policy(5).non_retryable_on("not connected");
        let result: Result<(), _> = execute_with_retry(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(DriverError::NotConnected) }
            },
            &policy,
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            result.unwrap_err(),
            RetryError::NonRetryable(DriverError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_zero_retries_is_single_attempt() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = execute_with_retry(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(DriverError::Timeout("x".into())) }
            },
            &fast_policy(0),
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            result.unwrap_err(),
            RetryError::Exhausted { attempts: 1, .. }
        ));
    }

    #[test]
    fn test_retry_error_converts_to_client_error() {
        let exhausted: ClientError = RetryError::Exhausted {
            attempts: 4,
            source: DriverError::Publish("gone".into()),
        }
        .into();
        assert!(matches!(
            exhausted,
            ClientError::MaxRetriesExceeded { attempts: 4, .. }
        ));

        let fatal: ClientError = RetryError::NonRetryable(DriverError::NotConnected).into();
        assert!(matches!(
            fatal,
            ClientError::Driver(DriverError::NotConnected)
        ));
    }
}
