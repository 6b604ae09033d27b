//! Retry delays for transient upload failures.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff with a cap and downward jitter.
///
/// Attempt `n` (1-based) has a nominal delay of `min(base * 2^(n-1), cap)`.
/// The applied delay is drawn uniformly from
/// `[nominal * (1 - jitter), nominal]`, so it never exceeds the cap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub base: Duration,
    /// Upper bound for any delay.
    pub cap: Duration,
    /// Fraction of the nominal delay that may be shaved off, in `[0, 1]`.
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(2),
            cap: Duration::from_secs(300),
            jitter: 0.5,
        }
    }
}

impl BackoffPolicy {
    /// Create a policy; `jitter` is clamped to `[0, 1]`.
    #[must_use]
    pub fn new(base: Duration, cap: Duration, jitter: f64) -> Self {
        Self {
            base,
            cap,
            jitter: if jitter.is_finite() {
                jitter.clamp(0.0, 1.0)
            } else {
                0.0
            },
        }
    }

    /// Delay for `attempt` before jitter.
    #[must_use]
    pub fn nominal(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base
            .checked_mul(1_u32 << exponent)
            .map_or(self.cap, |delay| delay.min(self.cap))
    }

    /// Jittered delay for `attempt` using the thread-local RNG.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with(attempt, &mut rand::thread_rng())
    }

    /// Jittered delay for `attempt` using the given RNG.
    pub fn delay_with<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let nominal = self.nominal(attempt);
        if self.jitter <= 0.0 || nominal.is_zero() {
            return nominal;
        }
        let factor = rng.gen_range((1.0 - self.jitter)..=1.0);
        nominal.mul_f64(factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_default_policy() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.base, Duration::from_secs(2));
        assert_eq!(policy.cap, Duration::from_secs(300));
        assert!((policy.jitter - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_nominal_doubles() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.nominal(1), Duration::from_secs(2));
        assert_eq!(policy.nominal(2), Duration::from_secs(4));
        assert_eq!(policy.nominal(3), Duration::from_secs(8));
        assert_eq!(policy.nominal(8), Duration::from_secs(256));
    }

    #[test]
    fn test_nominal_is_capped() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.nominal(9), Duration::from_secs(300));
        assert_eq!(policy.nominal(1_000), Duration::from_secs(300));
        assert_eq!(policy.nominal(u32::MAX), Duration::from_secs(300));
    }

    #[test]
    fn test_attempt_zero_uses_base() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.nominal(0), policy.base);
    }

    #[test]
    fn test_jittered_delay_stays_in_range() {
        let policy = BackoffPolicy::default();
        let mut rng = StdRng::seed_from_u64(7);

        for attempt in 1..=12 {
            let nominal = policy.nominal(attempt);
            for _ in 0..50 {
                let delay = policy.delay_with(attempt, &mut rng);
                assert!(delay <= nominal);
                assert!(delay >= nominal.mul_f64(0.5));
            }
        }
    }

    #[test]
    fn test_zero_jitter_is_deterministic() {
        let policy = BackoffPolicy::new(Duration::from_millis(100), Duration::from_secs(1), 0.0);
        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(3), Duration::from_millis(400));
        assert_eq!(policy.delay(5), Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_is_clamped() {
        let policy = BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(10), 3.0);
        assert!((policy.jitter - 1.0).abs() < f64::EPSILON);

        let policy = BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(10), f64::NAN);
        assert!(policy.jitter.abs() < f64::EPSILON);
    }
}
