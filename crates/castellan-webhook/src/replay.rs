//! Approximate replay prevention.
//!
//! A bounded in-process map of recently accepted `(signature,
//! timestamp)` pairs. When the map exceeds its capacity it is cleared
//! wholesale rather than maintaining a precise sliding window — the
//! guarantee is intentionally approximate, and correct only for a
//! single instance. Multi-instance deployments must route replay
//! state through the distributed state store instead.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

/// Entries kept before the wholesale clear.
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Bounded set of recently seen replay keys.
#[derive(Debug)]
pub struct ReplayCache {
    seen: Mutex<HashMap<String, DateTime<Utc>>>,
    capacity: usize,
    ttl: Duration,
}

impl ReplayCache {
    #[must_use]
    pub fn new(ttl_seconds: i64) -> Self {
        Self::with_capacity(ttl_seconds, DEFAULT_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(ttl_seconds: i64, capacity: usize) -> Self {
        Self {
            seen: Mutex::new(HashMap::new()),
            capacity,
            ttl: Duration::seconds(ttl_seconds),
        }
    }

    /// Record a key; returns `false` when it was already seen inside
    /// the active window (a replay).
    pub fn check_and_record(&self, key: &str) -> bool {
        let now = Utc::now();
        let mut seen = self.seen.lock().expect("replay cache lock poisoned");

        if seen.len() >= self.capacity {
            tracing::debug!(entries = seen.len(), "Replay cache at capacity, clearing");
            seen.clear();
        }

        if let Some(recorded_at) = seen.get(key) {
            if now - *recorded_at <= self.ttl {
                return false;
            }
        }
        seen.insert(key.to_string(), now);
        true
    }

    /// Derive the replay key for an accepted signature.
    #[must_use]
    pub fn replay_key(signature: &str, timestamp: Option<i64>) -> String {
        match timestamp {
            Some(ts) => format!("{signature}:{ts}"),
            // No provider timestamp: bucket by arrival time.
            None => format!("{signature}:{}", Utc::now().timestamp()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sight_accepted_second_rejected() {
        let cache = ReplayCache::new(300);
        assert!(cache.check_and_record("sig:1700000000"));
        assert!(!cache.check_and_record("sig:1700000000"));
    }

    #[test]
    fn test_distinct_keys_do_not_collide() {
        let cache = ReplayCache::new(300);
        assert!(cache.check_and_record("sig-a:1"));
        assert!(cache.check_and_record("sig-b:1"));
        assert!(cache.check_and_record("sig-a:2"));
    }

    #[test]
    fn test_expired_entry_accepted_again() {
        let cache = ReplayCache::new(0);
        assert!(cache.check_and_record("sig:1"));
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert!(cache.check_and_record("sig:1"));
    }

    #[test]
    fn test_capacity_clear_is_wholesale() {
        let cache = ReplayCache::with_capacity(300, 2);
        assert!(cache.check_and_record("a"));
        assert!(cache.check_and_record("b"));
        // Third insert trips the capacity clear, forgetting a and b.
        assert!(cache.check_and_record("c"));
        assert!(cache.check_and_record("a"));
    }

    #[test]
    fn test_replay_key_shape() {
        assert_eq!(ReplayCache::replay_key("abc", Some(17)), "abc:17");
        assert!(ReplayCache::replay_key("abc", None).starts_with("abc:"));
    }
}
