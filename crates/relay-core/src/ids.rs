use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static CORRELATION_COUNTER: AtomicU64 = AtomicU64::new(1);
static MESSAGE_COUNTER: AtomicU64 = AtomicU64::new(1);
static JITTER_COUNTER: AtomicU64 = AtomicU64::new(1);

fn unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

/// Returns a correlation id that is never reused within the process.
pub fn new_correlation_id() -> String {
    let count = CORRELATION_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("corr-{}-{}-{count}", unix_millis(), std::process::id())
}

/// Returns a message id for one backend submission attempt.
pub fn new_message_id() -> String {
    let count = MESSAGE_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("msg-{}-{}-{count}", unix_millis(), std::process::id())
}

/// Samples a pseudo-random value in `[0, 1)` for backoff and poll jitter.
pub fn jitter_unit() -> f64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    let seed = JITTER_COUNTER
        .fetch_add(1, Ordering::Relaxed)
        .wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ u64::from(nanos);
    // splitmix64 finalizer
    let mut mixed = seed.wrapping_add(0x9E37_79B9_7F4A_7C15);
    mixed = (mixed ^ (mixed >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    mixed = (mixed ^ (mixed >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    mixed ^= mixed >> 31;
    (mixed >> 11) as f64 / (1_u64 << 53) as f64
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::{jitter_unit, new_correlation_id, new_message_id};

    #[test]
    fn unit_correlation_ids_are_unique() {
        let ids = (0..256).map(|_| new_correlation_id()).collect::<HashSet<_>>();
        assert_eq!(ids.len(), 256);
        assert!(ids.iter().all(|id| id.starts_with("corr-")));
    }

    #[test]
    fn unit_message_ids_are_unique_and_distinct_from_correlation_ids() {
        let first = new_message_id();
        let second = new_message_id();
        assert_ne!(first, second);
        assert!(first.starts_with("msg-"));
    }

    #[test]
    fn unit_jitter_unit_stays_in_half_open_range() {
        for _ in 0..1_000 {
            let value = jitter_unit();
            assert!((0.0..1.0).contains(&value), "out of range: {value}");
        }
    }
}
