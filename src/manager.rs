use crate::config::LockManagerConfig;
use crate::context::{CancelReason, Context};
use crate::error::{LockError, Result};
use crate::guard::LockGuard;
use crate::key::{ResourceKey, TxnId};
use crate::mode::LockMode;
use crate::stats::{Counter, Counters, LockStats};
use crate::table::{LockRecord, LockRequest, LockTable, Pending};
use futures::channel::oneshot;
use futures::executor::block_on;
use futures::future::{self, Either};
use log::{debug, trace, warn};
use parking_lot::Mutex;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Multi-granularity lock manager.
///
/// Every key is locked independently; see [`crate::hierarchy`] for taking
/// intent locks on ancestors. All structural changes go through one table
/// mutex, which is never held across an await point.
pub struct LockManager<K = ResourceKey> {
    table: Mutex<LockTable<K>>,
    next_ticket: AtomicU64,
    counters: Counters,
    config: LockManagerConfig,
}

/// Per-entry view returned by [`LockManager::snapshot`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntrySnapshot {
    pub txn: TxnId,
    pub mode: LockMode,
    pub count: u32,
    pub granted: bool,
    /// Target mode of a blocked acquisition or conversion.
    pub pending: Option<LockMode>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordSnapshot {
    pub group_mode: Option<LockMode>,
    pub queue: Vec<EntrySnapshot>,
}

impl RecordSnapshot {
    pub fn granted(&self) -> impl Iterator<Item = &EntrySnapshot> {
        self.queue.iter().filter(|e| e.granted)
    }

    pub fn entry(&self, txn: TxnId) -> Option<&EntrySnapshot> {
        self.queue.iter().find(|e| e.txn == txn)
    }
}

/// Outcome of the non-blocking part of `lock`.
enum Admission {
    Granted,
    Wait(Waiter),
    /// The txn already has a call parked on this key; retry once it resolves.
    Follow(oneshot::Receiver<()>),
}

struct Waiter {
    ticket: u64,
    rx: oneshot::Receiver<()>,
    /// Mode held before a conversion was parked; `None` for new requests.
    prior: Option<LockMode>,
}

impl<K> Default for LockManager<K>
where
    K: Eq + Hash + Clone + Debug,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> LockManager<K>
where
    K: Eq + Hash + Clone + Debug,
{
    pub fn new() -> Self {
        Self::with_config(LockManagerConfig::default())
    }

    pub fn with_config(config: LockManagerConfig) -> Self {
        Self {
            table: Mutex::new(LockTable::new()),
            next_ticket: AtomicU64::new(1),
            counters: Counters::default(),
            config,
        }
    }

    pub fn config(&self) -> &LockManagerConfig {
        &self.config
    }

    /// Acquire `mode` on `key` for `txn`, waiting until it can be granted or
    /// `ctx` fires.
    ///
    /// Repeat calls by a transaction that already holds the key are reentrant:
    /// a covered mode only bumps the count, a stronger one converts the entry in
    /// place and keeps its queue position. A blocked conversion leaves the
    /// existing grant untouched. Dropping the returned future abandons the wait
    /// the same way a fired context does.
    ///
    /// A call made while the same txn already waits on `key` waits for that
    /// request to resolve and then tries again against the updated entry.
    pub async fn lock(&self, ctx: &Context, txn: TxnId, key: &K, mode: LockMode) -> Result<()> {
        let started = Instant::now();
        let waiter = loop {
            match self.admit(ctx, txn, key, mode, started)? {
                Admission::Granted => return Ok(()),
                Admission::Wait(waiter) => break waiter,
                Admission::Follow(rx) => {
                    let done = ctx.done();
                    futures::pin_mut!(done);
                    if let Either::Right((reason, _)) = future::select(rx, done).await {
                        return Err(LockError::from_reason(reason, started.elapsed()));
                    }
                }
            }
        };

        let mut guard = AbandonOnDrop {
            manager: self,
            key,
            txn,
            ticket: waiter.ticket,
            prior: waiter.prior,
            armed: true,
        };

        let done = ctx.done();
        futures::pin_mut!(done);
        match future::select(waiter.rx, done).await {
            Either::Left((Ok(()), _)) => {
                guard.armed = false;
                self.log_wait(txn, key, mode, started);
                Ok(())
            }
            // Sender dropped without a grant: the entry was torn down under us.
            Either::Left((Err(_), _)) => {
                guard.armed = false;
                if self.abandon(key, txn, waiter.ticket, waiter.prior, false) {
                    return Ok(());
                }
                Err(LockError::from_reason(CancelReason::Cancelled, started.elapsed()))
            }
            Either::Right((reason, _)) => {
                guard.armed = false;
                if self.abandon(key, txn, waiter.ticket, waiter.prior, false) {
                    // A release granted us before the cancellation was seen.
                    self.log_wait(txn, key, mode, started);
                    return Ok(());
                }
                Err(LockError::from_reason(reason, started.elapsed()))
            }
        }
    }

    /// Release one reentrant unit held by `txn` on `key`.
    ///
    /// Unknown keys, unknown transactions and entries that are still waiting
    /// are ignored. When the entry goes away the parked requests are granted in
    /// arrival order before this returns.
    pub fn unlock(&self, txn: TxnId, key: &K) {
        let mut table = self.table.lock();
        let Some(record) = table.get_mut(key) else {
            return;
        };
        let Some(idx) = record.position(txn) else {
            return;
        };
        if !record.queue[idx].granted {
            return;
        }
        if record.release_unit(idx) {
            self.counters.add(Counter::Released);
            let woken = record.grant_waiters();
            self.counters.add_many(Counter::GrantedAfterWait, woken as u64);
            trace!(
                "txn {} released {:?}, woke {} waiter(s), group mode now {:?}",
                txn,
                key,
                woken,
                record.group_mode
            );
        }
        table.remove_if_empty(key);
    }

    /// Fully release everything `txn` holds, on every key. Returns how many
    /// keys were released.
    pub fn unlock_all(&self, txn: TxnId) -> usize {
        let mut table = self.table.lock();
        let mut released = 0;
        let mut woken = 0;
        for (_, record) in table.iter_mut() {
            let Some(idx) = record.position(txn) else {
                continue;
            };
            if !record.queue[idx].granted {
                continue;
            }
            // Any conversion parked by this txn is dropped with the entry; its
            // waiter observes a closed channel.
            record.queue.remove(idx);
            record.recompute_group_mode();
            woken += record.grant_waiters();
            released += 1;
        }
        table.retain_non_empty();
        self.counters.add_many(Counter::Released, released as u64);
        self.counters.add_many(Counter::GrantedAfterWait, woken as u64);
        if released > 0 {
            debug!("txn {} released {} key(s)", txn, released);
        }
        released
    }

    /// Grant `mode` only if that is possible without waiting.
    pub fn try_lock(&self, txn: TxnId, key: &K, mode: LockMode) -> bool {
        let ctx = Context::cancelled();
        match self.admit(&ctx, txn, key, mode, Instant::now()) {
            Ok(Admission::Granted) => true,
            Ok(Admission::Wait(waiter)) => {
                self.abandon(key, txn, waiter.ticket, waiter.prior, true);
                false
            }
            Ok(Admission::Follow(_)) | Err(_) => false,
        }
    }

    /// Blocking wrapper around [`Self::lock`] bounded by the configured wait
    /// timeout.
    pub fn lock_blocking(&self, txn: TxnId, key: &K, mode: LockMode) -> Result<()> {
        let ctx = self.default_context();
        block_on(self.lock(&ctx, txn, key, mode))
    }

    /// Acquire and return a guard that unlocks on drop.
    pub async fn lock_guard(
        &self,
        ctx: &Context,
        txn: TxnId,
        key: &K,
        mode: LockMode,
    ) -> Result<LockGuard<'_, K>> {
        self.lock(ctx, txn, key, mode).await?;
        Ok(LockGuard::new(self, txn, key.clone(), mode))
    }

    /// Blocking wrapper around [`Self::lock_guard`].
    pub fn lock_guard_blocking(
        &self,
        txn: TxnId,
        key: &K,
        mode: LockMode,
    ) -> Result<LockGuard<'_, K>> {
        let ctx = self.default_context();
        block_on(self.lock_guard(&ctx, txn, key, mode))
    }

    pub fn snapshot(&self, key: &K) -> Option<RecordSnapshot> {
        let table = self.table.lock();
        table.get(key).map(|record| RecordSnapshot {
            group_mode: record.group_mode,
            queue: record
                .queue
                .iter()
                .map(|r| EntrySnapshot {
                    txn: r.txn,
                    mode: r.mode,
                    count: r.count,
                    granted: r.granted,
                    pending: r.pending.as_ref().map(|p| p.target),
                })
                .collect(),
        })
    }

    /// Number of entries (granted or waiting) queued on `key`.
    pub fn queue_len(&self, key: &K) -> usize {
        self.table.lock().get(key).map_or(0, |r| r.queue.len())
    }

    pub fn group_mode(&self, key: &K) -> Option<LockMode> {
        self.table.lock().get(key).and_then(|r| r.group_mode)
    }

    /// Mode currently granted to `txn` on `key`.
    pub fn holds(&self, txn: TxnId, key: &K) -> Option<LockMode> {
        let table = self.table.lock();
        let record = table.get(key)?;
        let idx = record.position(txn)?;
        let entry = &record.queue[idx];
        entry.granted.then_some(entry.mode)
    }

    /// Number of keys with at least one queued entry.
    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> LockStats {
        let records = self.len();
        self.counters.snapshot(records)
    }

    fn default_context(&self) -> Context {
        match self.config.wait_timeout {
            Some(timeout) => Context::with_timeout(timeout),
            None => Context::background(),
        }
    }

    fn log_wait(&self, txn: TxnId, key: &K, mode: LockMode, started: Instant) {
        let waited = started.elapsed();
        if waited >= self.config.slow_wait {
            warn!("txn {} waited {:?} for {} on {:?}", txn, waited, mode, key);
        } else {
            debug!("txn {} granted {} on {:?} after {:?}", txn, mode, key, waited);
        }
    }

    fn next_ticket(&self) -> u64 {
        self.next_ticket.fetch_add(1, Ordering::Relaxed)
    }

    /// Grant immediately, or park the request and hand back its wake channel.
    fn admit(
        &self,
        ctx: &Context,
        txn: TxnId,
        key: &K,
        mode: LockMode,
        started: Instant,
    ) -> Result<Admission> {
        let mut table = self.table.lock();
        let record = table.lookup_or_create(key);

        let admission = match record.position(txn) {
            Some(idx) => self.admit_existing(ctx, record, idx, txn, key, mode, started),
            None => self.admit_new(ctx, record, txn, key, mode, started),
        };
        // A refused brand-new request may have left the record empty.
        table.remove_if_empty(key);
        admission
    }

    #[allow(clippy::too_many_arguments)]
    fn admit_existing(
        &self,
        ctx: &Context,
        record: &mut LockRecord,
        idx: usize,
        txn: TxnId,
        key: &K,
        mode: LockMode,
        started: Instant,
    ) -> Result<Admission> {
        if let Some(pending) = record.queue[idx].pending.as_mut() {
            if let Some(reason) = ctx.err() {
                return Err(LockError::from_reason(reason, started.elapsed()));
            }
            debug!(
                "txn {} already waits for {} on {:?}, queuing {} behind it",
                txn, pending.target, key, mode
            );
            return Ok(Admission::Follow(pending.follow()));
        }
        let entry = &record.queue[idx];
        let held = entry.mode;
        let target = held.join(mode);

        if target == held {
            record.queue[idx].count += 1;
            self.counters.add(Counter::Reentrant);
            return Ok(Admission::Granted);
        }

        if record.compatible_with_others(idx, target) {
            let entry = &mut record.queue[idx];
            entry.mode = target;
            entry.count += 1;
            record.recompute_group_mode();
            self.counters.add(Counter::Conversion);
            debug!("txn {} converted {} -> {} on {:?}", txn, held, target, key);
            return Ok(Admission::Granted);
        }

        if let Some(reason) = ctx.err() {
            return Err(LockError::from_reason(reason, started.elapsed()));
        }
        let (notify, rx) = oneshot::channel();
        let ticket = self.next_ticket();
        record.queue[idx].pending = Some(Pending::new(ticket, target, notify));
        debug!(
            "txn {} waits to convert {} -> {} on {:?} (group mode {:?})",
            txn, held, target, key, record.group_mode
        );
        Ok(Admission::Wait(Waiter {
            ticket,
            rx,
            prior: Some(held),
        }))
    }

    fn admit_new(
        &self,
        ctx: &Context,
        record: &mut LockRecord,
        txn: TxnId,
        key: &K,
        mode: LockMode,
        started: Instant,
    ) -> Result<Admission> {
        if record.admits_new(mode) {
            record.queue.push(LockRequest::granted(txn, mode));
            record.group_mode = Some(record.group_mode.map_or(mode, |g| g.join(mode)));
            self.counters.add(Counter::Granted);
            return Ok(Admission::Granted);
        }

        if let Some(reason) = ctx.err() {
            return Err(LockError::from_reason(reason, started.elapsed()));
        }
        let (notify, rx) = oneshot::channel();
        let ticket = self.next_ticket();
        record
            .queue
            .push(LockRequest::waiting(txn, Pending::new(ticket, mode, notify)));
        debug!(
            "txn {} queued for {} on {:?} behind {} entr(ies), group mode {:?}",
            txn,
            mode,
            key,
            record.queue.len() - 1,
            record.group_mode
        );
        Ok(Admission::Wait(Waiter {
            ticket,
            rx,
            prior: None,
        }))
    }

    /// Withdraw a parked request. Returns true when it had already been granted
    /// and the grant stands; with `undo_grant` such a grant is rolled back
    /// instead, for callers that are no longer around to use it.
    fn abandon(
        &self,
        key: &K,
        txn: TxnId,
        ticket: u64,
        prior: Option<LockMode>,
        undo_grant: bool,
    ) -> bool {
        let mut table = self.table.lock();
        let Some(record) = table.get_mut(key) else {
            return false;
        };
        let Some(idx) = record.position(txn) else {
            return false;
        };

        let still_parked = record.queue[idx]
            .pending
            .as_ref()
            .is_some_and(|p| p.ticket == ticket);

        if still_parked {
            let entry = &mut record.queue[idx];
            entry.pending = None;
            if !entry.granted {
                record.queue.remove(idx);
            }
            self.counters.add(Counter::Cancelled);
            // The withdrawn request may have been the one holding the line.
            let woken = record.grant_waiters();
            self.counters.add_many(Counter::GrantedAfterWait, woken as u64);
            debug!("txn {} abandoned its wait on {:?}", txn, key);
            table.remove_if_empty(key);
            return false;
        }

        if !record.queue[idx].granted {
            return false;
        }
        if !undo_grant {
            return true;
        }

        match prior {
            None => {
                if record.release_unit(idx) {
                    self.counters.add(Counter::Released);
                }
            }
            Some(prior) => {
                let entry = &mut record.queue[idx];
                entry.mode = prior;
                entry.count = entry.count.saturating_sub(1);
                record.recompute_group_mode();
            }
        }
        let woken = record.grant_waiters();
        self.counters.add_many(Counter::GrantedAfterWait, woken as u64);
        debug!("txn {} rolled back an unobserved grant on {:?}", txn, key);
        table.remove_if_empty(key);
        false
    }
}

/// Cleans up a parked request when the `lock` future is dropped mid-wait.
struct AbandonOnDrop<'a, K>
where
    K: Eq + Hash + Clone + Debug,
{
    manager: &'a LockManager<K>,
    key: &'a K,
    txn: TxnId,
    ticket: u64,
    prior: Option<LockMode>,
    armed: bool,
}

impl<K> Drop for AbandonOnDrop<'_, K>
where
    K: Eq + Hash + Clone + Debug,
{
    fn drop(&mut self) {
        if self.armed {
            self.manager
                .abandon(self.key, self.txn, self.ticket, self.prior, true);
        }
    }
}
