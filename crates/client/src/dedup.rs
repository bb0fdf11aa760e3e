//! Bounded seen-key cache for duplicate-prone channels.
//!
//! The same logical event can arrive more than once (multiple subscribers, a
//! resumed connection), so each inbound item is reduced to a stable key and
//! dropped if the key was already seen. The cache is bounded: crossing the
//! cap resets it wholesale, which bounds memory for long-lived sessions
//! without any TTL bookkeeping. Both the event stream and the chat channel
//! get a fresh cache per connection, so a new session always starts clean.

use std::collections::HashSet;

use tracing::debug;

/// Default cap on remembered keys.
pub const DEDUP_CAP: usize = 200;

#[derive(Debug)]
pub struct DedupCache {
    seen: HashSet<String>,
    cap: usize,
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new(DEDUP_CAP)
    }
}

impl DedupCache {
    pub fn new(cap: usize) -> Self {
        Self {
            seen: HashSet::new(),
            cap,
        }
    }

    /// Record a key. Returns `true` if this is the first sighting, `false`
    /// for a duplicate that should be dropped silently.
    pub fn insert(&mut self, key: &str) -> bool {
        if self.seen.contains(key) {
            return false;
        }
        if self.seen.len() >= self.cap {
            debug!(cap = self.cap, "dedup cache full, resetting");
            self.seen.clear();
        }
        self.seen.insert(key.to_string());
        true
    }

    pub fn clear(&mut self) {
        self.seen.clear();
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sighting_true_duplicate_false() {
        let mut cache = DedupCache::default();
        assert!(cache.insert("a"));
        assert!(!cache.insert("a"));
        assert!(cache.insert("b"));
    }

    #[test]
    fn clear_forgets_everything() {
        let mut cache = DedupCache::default();
        assert!(cache.insert("a"));
        cache.clear();
        assert!(cache.insert("a"));
    }

    #[test]
    fn cap_crossing_resets_the_set() {
        let mut cache = DedupCache::new(3);
        assert!(cache.insert("a"));
        assert!(cache.insert("b"));
        assert!(cache.insert("c"));
        assert_eq!(cache.len(), 3);
        // Fourth distinct key crosses the cap: set resets, then admits it.
        assert!(cache.insert("d"));
        assert_eq!(cache.len(), 1);
        // "a" was forgotten by the reset.
        assert!(cache.insert("a"));
    }

    #[test]
    fn many_events_few_keys_produce_one_effect_per_key() {
        // 250 events over 40 unique keys: exactly 40 first sightings, and
        // the set never exceeds its bound.
        let mut cache = DedupCache::default();
        let mut effects = 0;
        for i in 0..250 {
            if cache.insert(&format!("key-{}", i % 40)) {
                effects += 1;
            }
            assert!(cache.len() <= DEDUP_CAP);
        }
        assert_eq!(effects, 40);
    }
}
