use std::time::Duration;

use relay_core::jitter_unit;

/// Smallest delay ever slept between submission attempts.
pub const MIN_BACKOFF: Duration = Duration::from_millis(500);
/// Symmetric jitter ratio applied to the bounded backoff.
pub const BACKOFF_JITTER_RATIO: f64 = 0.2;
/// Smallest delay ever slept between polls.
pub const MIN_POLL_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub multiplier: f64,
    pub max: Duration,
}

impl BackoffPolicy {
    /// Deterministic bound for `attempt` (1-based): `min(base * multiplier^(attempt-1), max)`.
    pub fn bounded(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let scaled = self.base.as_secs_f64() * self.multiplier.max(1.0).powi(exponent);
        let capped = scaled.min(self.max.as_secs_f64());
        Duration::try_from_secs_f64(capped).unwrap_or(self.max)
    }

    /// Jittered delay using a caller-supplied sample in `[0, 1)`.
    pub fn delay_with_sample(&self, attempt: u32, sample: f64) -> Duration {
        let bounded = self.bounded(attempt).as_secs_f64();
        let factor = 1.0 + (2.0 * sample.clamp(0.0, 1.0) - 1.0) * BACKOFF_JITTER_RATIO;
        let jittered = (bounded * factor).min(self.max.as_secs_f64());
        Duration::try_from_secs_f64(jittered)
            .unwrap_or(MIN_BACKOFF)
            .max(MIN_BACKOFF)
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with_sample(attempt, jitter_unit())
    }
}

/// Delay between polls: `max(0.1s, interval + uniform(-spread, +spread))`.
pub fn poll_delay_with_sample(interval: Duration, spread_secs: f64, sample: f64) -> Duration {
    let offset = (2.0 * sample.clamp(0.0, 1.0) - 1.0) * spread_secs;
    let seconds = interval.as_secs_f64() + offset;
    Duration::try_from_secs_f64(seconds)
        .unwrap_or(MIN_POLL_DELAY)
        .max(MIN_POLL_DELAY)
}

pub fn poll_delay(interval: Duration, spread_secs: f64) -> Duration {
    poll_delay_with_sample(interval, spread_secs, jitter_unit())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{poll_delay, poll_delay_with_sample, BackoffPolicy, MIN_BACKOFF, MIN_POLL_DELAY};

    fn policy() -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_secs(2),
            multiplier: 2.0,
            max: Duration::from_secs(8),
        }
    }

    #[test]
    fn unit_bounded_backoff_grows_then_caps() {
        let policy = policy();
        assert_eq!(policy.bounded(1), Duration::from_secs(2));
        assert_eq!(policy.bounded(2), Duration::from_secs(4));
        assert_eq!(policy.bounded(3), Duration::from_secs(8));
        assert_eq!(policy.bounded(9), Duration::from_secs(8));
    }

    #[test]
    fn functional_same_jitter_sample_yields_non_decreasing_delays() {
        let policy = policy();
        for sample in [0.0, 0.25, 0.5, 0.99] {
            let mut previous = Duration::ZERO;
            for attempt in 1..8 {
                let delay = policy.delay_with_sample(attempt, sample);
                assert!(delay >= previous, "attempt {attempt} sample {sample}");
                assert!(delay <= policy.max);
                previous = delay;
            }
        }
    }

    #[test]
    fn unit_jitter_stays_within_twenty_percent() {
        let policy = policy();
        let low = policy.delay_with_sample(2, 0.0).as_secs_f64();
        assert!((low - 3.2).abs() < 1e-6, "low {low}");
        assert_eq!(policy.delay_with_sample(2, 0.5), Duration::from_secs(4));
        for _ in 0..64 {
            let delay = policy.delay(1).as_secs_f64();
            assert!((1.59..=2.41).contains(&delay), "delay {delay}");
        }
    }

    #[test]
    fn regression_tiny_base_backoff_is_floored() {
        let policy = BackoffPolicy {
            base: Duration::from_millis(10),
            multiplier: 1.0,
            max: Duration::from_millis(10),
        };
        assert_eq!(policy.delay_with_sample(1, 0.0), MIN_BACKOFF);
    }

    #[test]
    fn unit_poll_delay_is_floored_and_jittered() {
        assert_eq!(
            poll_delay_with_sample(Duration::from_millis(10), 0.002, 0.0),
            MIN_POLL_DELAY
        );
        assert_eq!(
            poll_delay_with_sample(Duration::from_secs(2), 0.4, 0.5),
            Duration::from_secs(2)
        );
        let sampled = poll_delay(Duration::from_secs(2), 0.4).as_secs_f64();
        assert!((1.59..=2.41).contains(&sampled));
    }
}
