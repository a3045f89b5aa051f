//! Per-(persona, identity) token buckets.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use relay_agent::Persona;
use serde::Serialize;

/// Refill rate substituted for a zero rate when computing `retry_after`.
const MIN_REFILL_PER_SEC: f64 = 0.0001;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub retry_after_secs: f64,
    pub violation_count: u32,
}

impl RateLimitDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            retry_after_secs: 0.0,
            violation_count: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimiterSnapshot {
    pub tracked: usize,
    pub default_capacity: u32,
    pub default_refill_per_min: u32,
    pub commander_capacity: u32,
    pub commander_refill_per_min: u32,
}

#[derive(Debug, Clone, Copy)]
struct RateBucket {
    tokens: f64,
    last_refill: Instant,
    violations: u32,
}

#[derive(Debug, Clone, Copy)]
struct RateTier {
    capacity: u32,
    refill_per_min: u32,
}

impl RateTier {
    fn refill_per_sec(self) -> f64 {
        f64::from(self.refill_per_min) / 60.0
    }
}

#[derive(Debug)]
/// Public struct `RateLimiter` used across relay components.
pub struct RateLimiter {
    default_tier: RateTier,
    commander_tier: RateTier,
    buckets: Mutex<HashMap<String, RateBucket>>,
}

impl RateLimiter {
    pub fn new(
        default_capacity: u32,
        default_refill_per_min: u32,
        commander_capacity: u32,
        commander_refill_per_min: u32,
    ) -> Self {
        Self {
            default_tier: RateTier {
                capacity: default_capacity,
                refill_per_min: default_refill_per_min,
            },
            commander_tier: RateTier {
                capacity: commander_capacity,
                refill_per_min: commander_refill_per_min,
            },
            buckets: Mutex::new(HashMap::new()),
        }
    }

    fn tier(&self, persona: &Persona) -> RateTier {
        if persona.is_privileged() {
            self.commander_tier
        } else {
            self.default_tier
        }
    }

    /// Refills the caller's bucket up to `now` and tries to take one token.
    pub fn check(&self, persona: &Persona, identity: &str, now: Instant) -> RateLimitDecision {
        let tier = self.tier(persona);
        let capacity = f64::from(tier.capacity);
        let refill_per_sec = tier.refill_per_sec();
        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        let bucket = buckets
            .entry(format!("{persona}:{identity}"))
            .or_insert(RateBucket {
                tokens: capacity,
                last_refill: now,
                violations: 0,
            });

        let elapsed = now
            .checked_duration_since(bucket.last_refill)
            .unwrap_or_default()
            .as_secs_f64();
        bucket.tokens = capacity.min(bucket.tokens + elapsed * refill_per_sec);
        if now > bucket.last_refill {
            bucket.last_refill = now;
        }

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            bucket.violations = 0;
            return RateLimitDecision::allow();
        }

        bucket.violations = bucket.violations.saturating_add(1);
        let effective_rate = if refill_per_sec > 0.0 {
            refill_per_sec
        } else {
            MIN_REFILL_PER_SEC
        };
        RateLimitDecision {
            allowed: false,
            retry_after_secs: (1.0 - bucket.tokens) / effective_rate,
            violation_count: bucket.violations,
        }
    }

    pub fn snapshot(&self) -> RateLimiterSnapshot {
        let tracked = self
            .buckets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        RateLimiterSnapshot {
            tracked,
            default_capacity: self.default_tier.capacity,
            default_refill_per_min: self.default_tier.refill_per_min,
            commander_capacity: self.commander_tier.capacity,
            commander_refill_per_min: self.commander_tier.refill_per_min,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use relay_agent::Persona;

    use super::RateLimiter;

    fn limiter() -> RateLimiter {
        RateLimiter::new(2, 6, 4, 12)
    }

    #[test]
    fn unit_exhausted_bucket_denies_with_positive_retry_after() {
        let limiter = limiter();
        let now = Instant::now();
        assert!(limiter.check(&Persona::Operator, "user-a", now).allowed);
        assert!(limiter.check(&Persona::Operator, "user-a", now).allowed);

        let denied = limiter.check(&Persona::Operator, "user-a", now);
        assert!(!denied.allowed);
        assert!((denied.retry_after_secs - 10.0).abs() < 1e-9);
        assert_eq!(denied.violation_count, 1);

        let denied_again = limiter.check(&Persona::Operator, "user-a", now);
        assert_eq!(denied_again.violation_count, 2);
    }

    #[test]
    fn functional_waiting_retry_after_restores_a_token() {
        let limiter = limiter();
        let start = Instant::now();
        limiter.check(&Persona::OnCall, "user-b", start);
        limiter.check(&Persona::OnCall, "user-b", start);
        let denied = limiter.check(&Persona::OnCall, "user-b", start);
        assert!(!denied.allowed);

        let later = start + Duration::from_secs_f64(denied.retry_after_secs + 0.001);
        let allowed = limiter.check(&Persona::OnCall, "user-b", later);
        assert!(allowed.allowed);
        assert_eq!(allowed.violation_count, 0);
    }

    #[test]
    fn unit_commander_tier_has_larger_bucket() {
        let limiter = limiter();
        let now = Instant::now();
        for _ in 0..4 {
            assert!(limiter.check(&Persona::IncidentCommander, "cmdr", now).allowed);
        }
        let denied = limiter.check(&Persona::IncidentCommander, "cmdr", now);
        assert!(!denied.allowed);
        assert!((denied.retry_after_secs - 5.0).abs() < 1e-9);
    }

    #[test]
    fn unit_buckets_are_keyed_by_persona_and_identity() {
        let limiter = limiter();
        let now = Instant::now();
        limiter.check(&Persona::Operator, "shared", now);
        limiter.check(&Persona::Operator, "shared", now);
        assert!(!limiter.check(&Persona::Operator, "shared", now).allowed);
        assert!(limiter.check(&Persona::Operator, "other", now).allowed);
        assert!(limiter.check(&Persona::OnCall, "shared", now).allowed);
        assert_eq!(limiter.snapshot().tracked, 3);
    }

    #[test]
    fn regression_zero_refill_rate_uses_floor_instead_of_dividing_by_zero() {
        let limiter = RateLimiter::new(1, 0, 1, 0);
        let now = Instant::now();
        assert!(limiter.check(&Persona::Operator, "u", now).allowed);
        let denied = limiter.check(&Persona::Operator, "u", now);
        assert!(!denied.allowed);
        assert!(denied.retry_after_secs.is_finite());
        assert!((denied.retry_after_secs - 10_000.0).abs() < 1e-6);
    }

    #[test]
    fn unit_snapshot_reports_configured_tiers() {
        let snapshot = limiter().snapshot();
        assert_eq!(snapshot.tracked, 0);
        assert_eq!(snapshot.default_capacity, 2);
        assert_eq!(snapshot.default_refill_per_min, 6);
        assert_eq!(snapshot.commander_capacity, 4);
        assert_eq!(snapshot.commander_refill_per_min, 12);
    }
}
