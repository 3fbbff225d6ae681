use crate::key::TxnId;
use crate::manager::LockManager;
use crate::mode::LockMode;
use std::fmt::Debug;
use std::hash::Hash;

/// Releases one reentrant unit on drop, including during unwinding.
#[must_use = "dropping the guard releases the lock immediately"]
pub struct LockGuard<'a, K>
where
    K: Eq + Hash + Clone + Debug,
{
    manager: &'a LockManager<K>,
    txn: TxnId,
    key: K,
    mode: LockMode,
    released: bool,
}

impl<'a, K> LockGuard<'a, K>
where
    K: Eq + Hash + Clone + Debug,
{
    pub(crate) fn new(manager: &'a LockManager<K>, txn: TxnId, key: K, mode: LockMode) -> Self {
        Self {
            manager,
            txn,
            key,
            mode,
            released: false,
        }
    }

    pub fn txn(&self) -> TxnId {
        self.txn
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    /// Mode that was requested when the guard was taken.
    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// Release now instead of at end of scope.
    pub fn unlock(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.manager.unlock(self.txn, &self.key);
        }
    }
}

impl<K> Drop for LockGuard<'_, K>
where
    K: Eq + Hash + Clone + Debug,
{
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use crate::key::ResourceKey;
    use crate::manager::LockManager;
    use crate::mode::LockMode::*;

    #[test]
    fn guard_releases_on_drop() {
        let m = LockManager::new();
        let key = ResourceKey::collection(1);
        {
            let guard = m.lock_guard_blocking(1, &key, Exclusive).unwrap();
            assert_eq!(guard.key(), &key);
            assert_eq!(m.holds(1, &key), Some(Exclusive));
            assert!(!m.try_lock(2, &key, IntentShared));
        }
        assert!(m.is_empty());
        assert!(m.try_lock(2, &key, IntentShared));
    }

    #[test]
    fn explicit_unlock_releases_once() {
        let m = LockManager::new();
        let key = ResourceKey::collection(2);
        assert!(m.try_lock(1, &key, Shared));
        let guard = m.lock_guard_blocking(1, &key, Shared).unwrap();
        assert_eq!(m.snapshot(&key).unwrap().queue[0].count, 2);
        guard.unlock();
        assert_eq!(m.snapshot(&key).unwrap().queue[0].count, 1);
    }

    #[test]
    fn guard_releases_during_unwind() {
        let m = LockManager::new();
        let key = ResourceKey::collection(3);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = m.lock_guard_blocking(7, &key, Exclusive).unwrap();
            panic!("mutation failed");
        }));
        assert!(result.is_err());
        assert!(m.is_empty());
    }
}
