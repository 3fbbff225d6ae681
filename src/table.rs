//! Lock table and per-resource records.
//!
//! Everything here runs under the manager's table mutex; nothing in this module
//! blocks or awaits.

use crate::key::TxnId;
use crate::mode::{self, LockMode};
use futures::channel::oneshot;
use std::collections::HashMap;
use std::hash::Hash;

/// A blocked `lock` call parked on an entry.
///
/// Further calls by the same txn wait on `followers`; dropping the `Pending`
/// (granted, withdrawn or torn down) closes those channels and wakes them.
pub(crate) struct Pending {
    pub(crate) ticket: u64,
    pub(crate) target: LockMode,
    pub(crate) notify: oneshot::Sender<()>,
    pub(crate) followers: Vec<oneshot::Sender<()>>,
}

impl Pending {
    pub(crate) fn new(ticket: u64, target: LockMode, notify: oneshot::Sender<()>) -> Self {
        Self {
            ticket,
            target,
            notify,
            followers: Vec::new(),
        }
    }

    /// Register another call that waits for this one to resolve.
    pub(crate) fn follow(&mut self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.followers.push(tx);
        rx
    }
}

/// One entry per (txn, key).
///
/// `granted == false` means a new request still waiting; `mode` is then the
/// requested mode and `count` is zero. A granted entry with `pending` set is a
/// conversion waiting in place; its current grant stays in effect.
pub(crate) struct LockRequest {
    pub(crate) txn: TxnId,
    pub(crate) mode: LockMode,
    pub(crate) count: u32,
    pub(crate) granted: bool,
    pub(crate) pending: Option<Pending>,
}

impl LockRequest {
    pub(crate) fn granted(txn: TxnId, mode: LockMode) -> Self {
        Self {
            txn,
            mode,
            count: 1,
            granted: true,
            pending: None,
        }
    }

    pub(crate) fn waiting(txn: TxnId, pending: Pending) -> Self {
        Self {
            txn,
            mode: pending.target,
            count: 0,
            granted: false,
            pending: Some(pending),
        }
    }

    pub(crate) fn is_waiting(&self) -> bool {
        self.pending.is_some()
    }
}

#[derive(Default)]
pub(crate) struct LockRecord {
    /// Arrival order.
    pub(crate) queue: Vec<LockRequest>,
    /// Join of all granted modes, `None` when nothing is granted.
    pub(crate) group_mode: Option<LockMode>,
}

impl LockRecord {
    pub(crate) fn position(&self, txn: TxnId) -> Option<usize> {
        self.queue.iter().position(|r| r.txn == txn)
    }

    pub(crate) fn has_waiters(&self) -> bool {
        self.queue.iter().any(LockRequest::is_waiting)
    }

    pub(crate) fn recompute_group_mode(&mut self) {
        self.group_mode = mode::group_mode(
            self.queue
                .iter()
                .filter(|r| r.granted)
                .map(|r| r.mode),
        );
    }

    /// A brand-new request is admitted only when it fits the group mode and
    /// nobody is queued ahead of it.
    pub(crate) fn admits_new(&self, requested: LockMode) -> bool {
        if self.has_waiters() {
            return false;
        }
        self.group_mode
            .map_or(true, |group| requested.compatible_with(group))
    }

    /// Checks `requested` against every granted entry except the one at `skip`.
    pub(crate) fn compatible_with_others(&self, skip: usize, requested: LockMode) -> bool {
        self.queue
            .iter()
            .enumerate()
            .filter(|(i, r)| *i != skip && r.granted)
            .all(|(_, r)| requested.compatible_with(r.mode))
    }

    /// Grant parked requests head to tail, stopping at the first one that does
    /// not fit. Returns how many were granted.
    pub(crate) fn grant_waiters(&mut self) -> usize {
        let mut granted = 0;
        for idx in 0..self.queue.len() {
            let target = match &self.queue[idx].pending {
                Some(p) => p.target,
                None => continue,
            };
            if !self.compatible_with_others(idx, target) {
                break;
            }
            let entry = &mut self.queue[idx];
            if entry.granted {
                entry.count += 1;
            } else {
                entry.granted = true;
                entry.count = 1;
            }
            entry.mode = target;
            if let Some(p) = entry.pending.take() {
                // A dropped receiver is cleaned up by the waiter's own guard.
                let _ = p.notify.send(());
            }
            self.recompute_group_mode();
            granted += 1;
        }
        granted
    }

    /// Drop one reentrant unit of a granted entry. Returns true when the entry
    /// left the queue.
    pub(crate) fn release_unit(&mut self, idx: usize) -> bool {
        let entry = &mut self.queue[idx];
        entry.count = entry.count.saturating_sub(1);
        if entry.count > 0 {
            return false;
        }
        self.queue.remove(idx);
        self.recompute_group_mode();
        true
    }
}

/// `ResourceKey -> LockRecord`. Records exist only while their queue is
/// non-empty.
pub(crate) struct LockTable<K> {
    records: HashMap<K, LockRecord>,
}

impl<K> LockTable<K>
where
    K: Eq + Hash + Clone,
{
    pub(crate) fn new() -> Self {
        Self {
            records: HashMap::new(),
        }
    }

    pub(crate) fn lookup_or_create(&mut self, key: &K) -> &mut LockRecord {
        self.records.entry(key.clone()).or_default()
    }

    pub(crate) fn get(&self, key: &K) -> Option<&LockRecord> {
        self.records.get(key)
    }

    pub(crate) fn get_mut(&mut self, key: &K) -> Option<&mut LockRecord> {
        self.records.get_mut(key)
    }

    pub(crate) fn remove_if_empty(&mut self, key: &K) {
        if self.records.get(key).is_some_and(|r| r.queue.is_empty()) {
            self.records.remove(key);
        }
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (&K, &mut LockRecord)> {
        self.records.iter_mut()
    }

    pub(crate) fn retain_non_empty(&mut self) {
        self.records.retain(|_, r| !r.queue.is_empty());
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::LockMode::*;

    fn parked(record: &mut LockRecord, txn: TxnId, target: LockMode) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        record
            .queue
            .push(LockRequest::waiting(txn, Pending::new(txn, target, tx)));
        rx
    }

    #[test]
    fn grant_scan_stops_at_first_blocked_waiter() {
        let mut record = LockRecord::default();
        record.queue.push(LockRequest::granted(1, Shared));
        record.recompute_group_mode();
        let mut rx_x = parked(&mut record, 2, Exclusive);
        let mut rx_s = parked(&mut record, 3, Shared);

        // S for txn 3 would fit next to txn 1 but must not pass the X waiter.
        assert_eq!(record.grant_waiters(), 0);
        assert!(!record.admits_new(IntentShared));

        assert!(record.release_unit(0));
        assert_eq!(record.grant_waiters(), 1);
        assert_eq!(record.group_mode, Some(Exclusive));
        assert_eq!(rx_x.try_recv(), Ok(Some(())));
        assert_eq!(rx_s.try_recv(), Ok(None));
    }

    #[test]
    fn followers_wake_when_the_parked_request_resolves() {
        let mut record = LockRecord::default();
        record.queue.push(LockRequest::granted(1, Exclusive));
        record.recompute_group_mode();
        let _rx = parked(&mut record, 2, Shared);
        let mut follower = record.queue[1]
            .pending
            .as_mut()
            .map(Pending::follow)
            .expect("entry is parked");
        assert_eq!(follower.try_recv(), Ok(None));

        assert!(record.release_unit(0));
        assert_eq!(record.grant_waiters(), 1);
        // Closed, not sent: the follower only learns that it may retry.
        assert!(follower.try_recv().is_err());
    }

    #[test]
    fn conversion_checks_other_entries_only() {
        let mut record = LockRecord::default();
        record.queue.push(LockRequest::granted(1, Shared));
        record.recompute_group_mode();
        assert!(record.compatible_with_others(0, Exclusive));

        record.queue.push(LockRequest::granted(2, IntentShared));
        record.recompute_group_mode();
        assert!(!record.compatible_with_others(0, Exclusive));
        assert!(record.compatible_with_others(0, SharedIntentExclusive));
    }

    #[test]
    fn table_drops_empty_records() {
        let mut table: LockTable<u64> = LockTable::new();
        table.lookup_or_create(&9).queue.push(LockRequest::granted(1, Shared));
        table.remove_if_empty(&9);
        assert_eq!(table.len(), 1);

        assert!(table.get_mut(&9).map(|r| r.release_unit(0)).unwrap_or(false));
        table.remove_if_empty(&9);
        assert_eq!(table.len(), 0);
        assert!(table.get(&9).is_none());
    }
}
