use std::sync::atomic::{AtomicU64, Ordering};

// Per-manager counters; relaxed ordering, they are only read for reporting.
#[derive(Default)]
pub(crate) struct Counters {
    granted: AtomicU64,
    granted_after_wait: AtomicU64,
    reentrant: AtomicU64,
    conversions: AtomicU64,
    released: AtomicU64,
    cancelled: AtomicU64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Counter {
    Granted,
    GrantedAfterWait,
    Reentrant,
    Conversion,
    Released,
    Cancelled,
}

impl Counters {
    pub(crate) fn add(&self, counter: Counter) {
        self.add_many(counter, 1);
    }

    pub(crate) fn add_many(&self, counter: Counter, n: u64) {
        if n == 0 {
            return;
        }
        let slot = match counter {
            Counter::Granted => &self.granted,
            Counter::GrantedAfterWait => &self.granted_after_wait,
            Counter::Reentrant => &self.reentrant,
            Counter::Conversion => &self.conversions,
            Counter::Released => &self.released,
            Counter::Cancelled => &self.cancelled,
        };
        slot.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, records: usize) -> LockStats {
        LockStats {
            granted: self.granted.load(Ordering::Relaxed),
            granted_after_wait: self.granted_after_wait.load(Ordering::Relaxed),
            reentrant: self.reentrant.load(Ordering::Relaxed),
            conversions: self.conversions.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            records,
        }
    }
}

/// Point-in-time counters of a [`crate::LockManager`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LockStats {
    /// New entries granted without waiting.
    pub granted: u64,
    /// New entries and conversions granted by a release or cancellation scan.
    pub granted_after_wait: u64,
    /// Same-mode (or weaker) reacquisitions.
    pub reentrant: u64,
    /// Conversions applied in place without waiting.
    pub conversions: u64,
    /// Entries fully released.
    pub released: u64,
    /// Waits abandoned because the caller's context fired.
    pub cancelled: u64,
    /// Resource keys currently in the lock table.
    pub records: usize,
}
