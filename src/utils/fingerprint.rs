use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Short-lived cache of recently seen webhook fingerprints. Entries expire
/// after `ttl` and the cache is capacity-bounded with oldest-first eviction.
/// Process-local: does not survive restarts and does not coordinate across
/// instances.
pub struct FingerprintCache {
    entries: DashMap<String, Instant>,
    ttl: Duration,
    capacity: usize,
}

impl FingerprintCache {
    pub const DEFAULT_TTL: Duration = Duration::from_secs(60);
    pub const DEFAULT_CAPACITY: usize = 1000;

    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            capacity,
        }
    }

    /// Records `key` and reports whether it was fresh. Returns `false` when
    /// the key was already seen within the TTL window.
    pub fn check_and_insert(&self, key: &str) -> bool {
        self.purge_expired();

        if let Some(seen) = self.entries.get(key) {
            if seen.elapsed() < self.ttl {
                return false;
            }
        }

        if self.entries.len() >= self.capacity {
            self.evict_oldest();
        }

        self.entries.insert(key.to_string(), Instant::now());
        true
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn purge_expired(&self) {
        let ttl = self.ttl;
        self.entries.retain(|_, seen| seen.elapsed() < ttl);
    }

    fn evict_oldest(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| *entry.value())
            .map(|entry| entry.key().clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }
}

impl Default for FingerprintCache {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TTL, Self::DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_key_within_ttl_is_rejected() {
        let cache = FingerprintCache::default();
        assert!(cache.check_and_insert("deal-1|updated"));
        assert!(!cache.check_and_insert("deal-1|updated"));
        assert!(cache.check_and_insert("deal-2|updated"));
    }

    #[test]
    fn expired_key_is_accepted_again() {
        let cache = FingerprintCache::new(Duration::from_millis(0), 10);
        assert!(cache.check_and_insert("deal-1"));
        // TTL of zero expires immediately
        assert!(cache.check_and_insert("deal-1"));
    }

    #[test]
    fn capacity_evicts_oldest_entry() {
        let cache = FingerprintCache::new(Duration::from_secs(60), 2);
        assert!(cache.check_and_insert("a"));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.check_and_insert("b"));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.check_and_insert("c"));
        assert!(cache.len() <= 2);
        // "a" was oldest and must have been evicted
        assert!(cache.check_and_insert("a"));
    }

    #[test]
    fn clear_resets_the_cache() {
        let cache = FingerprintCache::default();
        assert!(cache.check_and_insert("a"));
        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.check_and_insert("a"));
    }
}
