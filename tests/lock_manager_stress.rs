//! Contention tests: many transactions hammering a handful of keys with random
//! modes, deadlines and conversions. Every snapshot taken along the way must be
//! internally consistent and the table must drain completely at the end.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use futures::executor::block_on;
use rand::Rng;
use satori_lockmgr::{Context, LockManager, LockMode, RecordSnapshot, ResourceKey};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn assert_consistent(snap: &RecordSnapshot) {
    let mut seen = HashSet::new();
    for entry in &snap.queue {
        assert!(seen.insert(entry.txn), "txn {} queued twice", entry.txn);
        if !entry.granted {
            assert_eq!(entry.count, 0);
            assert!(entry.pending.is_some(), "ungranted entry without a waiter");
        } else {
            assert!(entry.count > 0);
        }
    }

    let granted: Vec<_> = snap.granted().collect();
    for (i, a) in granted.iter().enumerate() {
        for b in &granted[i + 1..] {
            assert!(
                a.mode.compatible_with(b.mode),
                "txn {} ({}) granted next to txn {} ({})",
                a.txn,
                a.mode,
                b.txn,
                b.mode
            );
        }
    }

    let expected = granted
        .iter()
        .fold(None, |acc: Option<LockMode>, e| Some(acc.map_or(e.mode, |g| g.join(e.mode))));
    assert_eq!(snap.group_mode, expected);
}

#[test]
fn random_workload_keeps_records_consistent() -> Result<()> {
    init_logging();
    let m = Arc::new(LockManager::new());
    let keys: Vec<ResourceKey> = (0..3).map(|s| ResourceKey::shard(9, s)).collect();

    let mut handles = Vec::new();
    for t in 0..8u64 {
        let m = m.clone();
        let keys = keys.clone();
        handles.push(thread::spawn(move || {
            let mut rng = rand::thread_rng();
            let txn = 100 + t;
            let mut granted = 0usize;
            for _ in 0..150 {
                let key = keys[rng.gen_range(0..keys.len())];
                let mode = LockMode::ALL[rng.gen_range(0..LockMode::ALL.len())];
                let ctx = Context::with_timeout(Duration::from_millis(rng.gen_range(1..15)));
                if block_on(m.lock(&ctx, txn, &key, mode)).is_err() {
                    continue;
                }
                granted += 1;
                if let Some(snap) = m.snapshot(&key) {
                    assert_consistent(&snap);
                }

                // Sometimes convert while still holding the key.
                if rng.gen_bool(0.3) {
                    let stronger = LockMode::ALL[rng.gen_range(0..LockMode::ALL.len())];
                    let ctx = Context::with_timeout(Duration::from_millis(5));
                    if block_on(m.lock(&ctx, txn, &key, stronger)).is_ok() {
                        m.unlock(txn, &key);
                    }
                }
                if rng.gen_bool(0.5) {
                    thread::sleep(Duration::from_micros(rng.gen_range(0..300)));
                }
                m.unlock(txn, &key);
            }
            m.unlock_all(txn);
            granted
        }));
    }

    let mut total = 0;
    for h in handles {
        total += h.join().expect("worker thread");
    }
    assert!(total > 0, "no lock was ever granted");
    assert!(m.is_empty(), "records left behind: {}", m.len());

    let stats = m.stats();
    assert_eq!(stats.records, 0);
    assert!(stats.granted + stats.granted_after_wait + stats.conversions >= total as u64);
    Ok(())
}

#[test]
fn exclusive_holders_never_overlap() -> Result<()> {
    init_logging();
    let m = Arc::new(LockManager::new());
    let key = ResourceKey::collection(77);
    let occupied = Arc::new(AtomicBool::new(false));
    let readers_inside = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for t in 0..6u64 {
        let m = m.clone();
        let occupied = occupied.clone();
        let readers_inside = readers_inside.clone();
        handles.push(thread::spawn(move || -> anyhow::Result<()> {
            let mut rng = rand::thread_rng();
            for _ in 0..50 {
                let write = rng.gen_bool(0.4);
                let mode = if write { LockMode::Exclusive } else { LockMode::Shared };
                let guard = block_on(m.lock_guard(
                    &Context::with_timeout(Duration::from_secs(10)),
                    t,
                    &key,
                    mode,
                ))?;
                if write {
                    assert!(!occupied.swap(true, Ordering::SeqCst), "two writers inside");
                    assert_eq!(readers_inside.load(Ordering::SeqCst), 0, "writer next to reader");
                    thread::sleep(Duration::from_micros(200));
                    occupied.store(false, Ordering::SeqCst);
                } else {
                    readers_inside.fetch_add(1, Ordering::SeqCst);
                    assert!(!occupied.load(Ordering::SeqCst), "reader next to writer");
                    thread::sleep(Duration::from_micros(100));
                    readers_inside.fetch_sub(1, Ordering::SeqCst);
                }
                drop(guard);
            }
            Ok(())
        }));
    }

    for h in handles {
        h.join().expect("worker thread")?;
    }
    assert!(m.is_empty());
    Ok(())
}
