//! Assertion ID replay tracking for unsolicited responses.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Assertion IDs already accepted, kept until the assertion itself expires.
#[derive(Debug, Default)]
pub struct AssertionReplayCache {
    seen: DashMap<String, DateTime<Utc>>,
}

impl AssertionReplayCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `id` unless a live record exists. Returns `false` on replay.
    pub fn check_and_insert(&self, id: &str, expires_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match self.seen.entry(id.to_string()) {
            Entry::Occupied(mut entry) => {
                if now < *entry.get() {
                    return false;
                }
                entry.insert(expires_at);
                true
            }
            Entry::Vacant(entry) => {
                entry.insert(expires_at);
                true
            }
        }
    }

    /// Forget IDs whose assertions can no longer validate.
    pub fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.seen.len();
        self.seen.retain(|_, expires_at| now < *expires_at);
        before.saturating_sub(self.seen.len())
    }

    /// Number of tracked IDs.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Whether nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn second_sighting_is_a_replay() {
        let cache = AssertionReplayCache::new();
        let now = Utc::now();
        let expires = now + Duration::minutes(5);

        assert!(cache.check_and_insert("_a", expires, now));
        assert!(!cache.check_and_insert("_a", expires, now));
        assert!(cache.check_and_insert("_b", expires, now));
    }

    #[test]
    fn expired_records_are_evicted() {
        let cache = AssertionReplayCache::new();
        let now = Utc::now();
        cache.check_and_insert("_a", now + Duration::seconds(1), now);
        cache.check_and_insert("_b", now + Duration::hours(1), now);

        assert_eq!(cache.evict_expired(now + Duration::seconds(2)), 1);
        assert_eq!(cache.len(), 1);
    }
}
