//! Probabilistic log sampler
//!
//! Per-publish logging can dominate CPU at high throughput, so successful
//! publishes log through this sampler. Lock-free xorshift64 PRNG - no
//! allocations, no locks on the hot path.

use std::sync::atomic::{AtomicU64, Ordering};

/// Passes a configurable fraction of log events
pub(crate) struct LogSampler {
    /// Keep threshold (0 = none, u64::MAX = all)
    threshold: u64,
    /// PRNG state
    state: AtomicU64,
}

impl LogSampler {
    /// Create a sampler with the given keep rate (0.0 to 1.0)
    ///
    /// # Panics
    /// Panics if rate is not in [0.0, 1.0]
    pub(crate) fn new(rate: f64) -> Self {
        assert!(
            (0.0..=1.0).contains(&rate),
            "log sampling rate must be between 0.0 and 1.0"
        );

        let threshold = if rate >= 1.0 {
            u64::MAX
        } else if rate <= 0.0 {
            0
        } else {
            (rate * u64::MAX as f64) as u64
        };

        // Seed from system time; fixed fallback if the clock is misconfigured
        let seed = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0xDEAD_BEEF);

        Self {
            threshold,
            state: AtomicU64::new(seed | 1), // non-zero for xorshift
        }
    }

    /// Create a sampler with an explicit seed (deterministic tests)
    #[cfg(test)]
    pub(crate) fn with_seed(rate: f64, seed: u64) -> Self {
        let sampler = Self::new(rate);
        sampler.state.store(seed | 1, Ordering::Relaxed);
        sampler
    }

    /// Whether this event should be logged
    pub(crate) fn should_log(&self) -> bool {
        if self.threshold == u64::MAX {
            return true;
        }
        if self.threshold == 0 {
            return false;
        }
        self.next_random() <= self.threshold
    }

    /// Next random u64 (xorshift64, lock-free CAS loop)
    fn next_random(&self) -> u64 {
        loop {
            let old = self.state.load(Ordering::Acquire);
            let mut x = old;
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            if self
                .state
                .compare_exchange_weak(old, x, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return x;
            }
        }
    }
}
