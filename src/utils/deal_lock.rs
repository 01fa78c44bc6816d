use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Per-deal mutual exclusion for webhook processing. Best-effort: a stale
/// entry expires after `ttl` even if the holder never released it, and the
/// table is process-local. Correctness against duplicate sessions is owned
/// by the payment-state analyzer, not this table.
pub struct DealLocks {
    locks: DashMap<i64, Instant>,
    ttl: Duration,
}

impl DealLocks {
    pub const DEFAULT_TTL: Duration = Duration::from_secs(30);

    pub fn new(ttl: Duration) -> Self {
        Self {
            locks: DashMap::new(),
            ttl,
        }
    }

    /// Attempts to take the lock for `deal_id`. Returns `None` when another
    /// task currently holds a non-expired lock.
    pub fn acquire(self: &Arc<Self>, deal_id: i64) -> Option<DealLockGuard> {
        let acquired_at = Instant::now();
        match self.locks.entry(deal_id) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().elapsed() < self.ttl {
                    return None;
                }
                occupied.insert(acquired_at);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(acquired_at);
            }
        }
        Some(DealLockGuard {
            locks: Arc::clone(self),
            deal_id,
            acquired_at,
        })
    }

    pub fn clear(&self) {
        self.locks.clear();
    }

    pub fn is_held(&self, deal_id: i64) -> bool {
        self.locks
            .get(&deal_id)
            .map(|held| held.elapsed() < self.ttl)
            .unwrap_or(false)
    }
}

impl Default for DealLocks {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TTL)
    }
}

/// Releases the lock on drop, including on panic and error paths. Release
/// only removes the entry this guard inserted: a guard outliving its TTL
/// must not free a lock that was since stolen by another task.
pub struct DealLockGuard {
    locks: Arc<DealLocks>,
    deal_id: i64,
    acquired_at: Instant,
}

impl Drop for DealLockGuard {
    fn drop(&mut self) {
        self.locks
            .locks
            .remove_if(&self.deal_id, |_, held| *held == self.acquired_at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_while_held() {
        let locks = Arc::new(DealLocks::default());
        let guard = locks.acquire(42);
        assert!(guard.is_some());
        assert!(locks.acquire(42).is_none());
        assert!(locks.acquire(43).is_some());
    }

    #[test]
    fn dropping_the_guard_releases_the_lock() {
        let locks = Arc::new(DealLocks::default());
        {
            let _guard = locks.acquire(42).unwrap();
            assert!(locks.is_held(42));
        }
        assert!(!locks.is_held(42));
        assert!(locks.acquire(42).is_some());
    }

    #[test]
    fn expired_lock_can_be_stolen() {
        let locks = Arc::new(DealLocks::new(Duration::from_millis(0)));
        let _guard = locks.acquire(42).unwrap();
        // TTL of zero means the previous holder is immediately considered stale
        assert!(locks.acquire(42).is_some());
    }

    #[test]
    fn stale_guard_does_not_release_a_stolen_lock() {
        let locks = Arc::new(DealLocks::new(Duration::from_millis(10)));
        let stale = locks.acquire(42).unwrap();
        std::thread::sleep(Duration::from_millis(15));

        let fresh = locks.acquire(42).unwrap();
        drop(stale);
        assert!(locks.is_held(42));
        assert!(locks.acquire(42).is_none());

        drop(fresh);
        assert!(!locks.is_held(42));
        assert!(locks.acquire(42).is_some());
    }
}
