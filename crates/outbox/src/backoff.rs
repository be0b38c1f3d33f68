//! Exponential retry backoff with a cap and jitter.
//!
//! `delay(n) = min(2^n s, cap) + jitter`, jitter drawn uniformly from
//! `[jitter_min, jitter_max)`.

use std::ops::Range;
use std::time::Duration;

use rand::Rng;

/// Upper bound on the exponential part of the delay.
pub const DEFAULT_CAP: Duration = Duration::from_secs(300);

/// Jitter window, in milliseconds.
pub const DEFAULT_JITTER_MS: Range<u64> = 100..500;

#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    cap: Duration,
    jitter_ms: Range<u64>,
}

impl BackoffPolicy {
    pub fn new(cap: Duration, jitter_ms: Range<u64>) -> Self {
        Self { cap, jitter_ms }
    }

    /// The deterministic part of the delay for `attempt`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        // Clamp the shift; 2^32 s is far past any cap.
        let secs = 1u64 << attempt.min(32);
        Duration::from_secs(secs).min(self.cap)
    }

    /// Full delay for `attempt`, jitter drawn from `rng`.
    pub fn delay_with<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let jitter = if self.jitter_ms.is_empty() {
            0
        } else {
            rng.gen_range(self.jitter_ms.clone())
        };
        self.base_delay(attempt) + Duration::from_millis(jitter)
    }

    /// Full delay for `attempt` using the thread-local RNG.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with(attempt, &mut rand::thread_rng())
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_CAP, DEFAULT_JITTER_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_base_delay_doubles_until_cap() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.base_delay(0), Duration::from_secs(1));
        assert_eq!(policy.base_delay(1), Duration::from_secs(2));
        assert_eq!(policy.base_delay(4), Duration::from_secs(16));
        assert_eq!(policy.base_delay(8), Duration::from_secs(256));
        assert_eq!(policy.base_delay(9), DEFAULT_CAP);
        assert_eq!(policy.base_delay(u32::MAX), DEFAULT_CAP);
    }

    #[test]
    fn test_jitter_stays_in_window() {
        let policy = BackoffPolicy::default();
        let mut rng = StdRng::seed_from_u64(7);
        for attempt in 0..20 {
            let delay = policy.delay_with(attempt, &mut rng);
            let base = policy.base_delay(attempt);
            assert!(delay >= base + Duration::from_millis(100));
            assert!(delay < base + Duration::from_millis(500));
        }
    }

    #[test]
    fn test_base_delay_is_monotonic() {
        let policy = BackoffPolicy::default();
        for n in 0..40 {
            assert!(policy.base_delay(n) <= policy.base_delay(n + 1));
        }
    }

    #[test]
    fn test_first_retry_is_two_seconds_plus_jitter() {
        // The reconciler passes the post-increment attempt count.
        let policy = BackoffPolicy::default();
        let delay = policy.delay(1);
        assert!(delay >= Duration::from_millis(2100));
        assert!(delay < Duration::from_millis(2500));
    }

    #[test]
    fn test_empty_jitter_window_is_exact() {
        let policy = BackoffPolicy::new(Duration::from_secs(10), 0..0);
        assert_eq!(policy.delay(3), Duration::from_secs(8));
        assert_eq!(policy.delay(5), Duration::from_secs(10));
    }
}
