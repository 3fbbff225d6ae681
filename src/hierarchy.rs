//! Intent locking along a resource path.
//!
//! The manager itself never looks at ancestors. Callers that mutate a shard
//! take an intent lock on its collection first so that a collection-level `S`
//! or `X` excludes them; these helpers do that in root-to-leaf order.

use crate::context::Context;
use crate::error::Result;
use crate::guard::LockGuard;
use crate::key::{ResourceKey, TxnId};
use crate::manager::LockManager;
use crate::mode::LockMode;
use std::fmt::Debug;
use std::hash::Hash;

/// Guards for every key of a path; released leaf first.
#[must_use = "dropping the guard releases the whole path"]
pub struct PathGuard<'a, K>
where
    K: Eq + Hash + Clone + Debug,
{
    guards: Vec<LockGuard<'a, K>>,
}

impl<K> PathGuard<'_, K>
where
    K: Eq + Hash + Clone + Debug,
{
    pub fn len(&self) -> usize {
        self.guards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }

    /// (key, mode) pairs root first.
    pub fn held(&self) -> impl Iterator<Item = (&K, LockMode)> {
        self.guards.iter().map(|g| (g.key(), g.mode()))
    }
}

impl<K> Drop for PathGuard<'_, K>
where
    K: Eq + Hash + Clone + Debug,
{
    fn drop(&mut self) {
        while let Some(guard) = self.guards.pop() {
            drop(guard);
        }
    }
}

/// Lock `path[..n-1]` with the intent mode implied by `mode`, then the leaf with
/// `mode`. On failure whatever was taken is released and the error returned.
pub async fn lock_path<'a, K>(
    manager: &'a LockManager<K>,
    ctx: &Context,
    txn: TxnId,
    path: &[K],
    mode: LockMode,
) -> Result<PathGuard<'a, K>>
where
    K: Eq + Hash + Clone + Debug,
{
    let mut acquired = PathGuard {
        guards: Vec::with_capacity(path.len()),
    };
    let Some((leaf, ancestors)) = path.split_last() else {
        return Ok(acquired);
    };
    let intent = mode.parent_intent();
    for key in ancestors {
        acquired
            .guards
            .push(manager.lock_guard(ctx, txn, key, intent).await?);
    }
    acquired
        .guards
        .push(manager.lock_guard(ctx, txn, leaf, mode).await?);
    Ok(acquired)
}

/// [`lock_path`] over a collection or shard key and its parents.
pub async fn lock_resource<'a>(
    manager: &'a LockManager<ResourceKey>,
    ctx: &Context,
    txn: TxnId,
    key: &ResourceKey,
    mode: LockMode,
) -> Result<PathGuard<'a, ResourceKey>> {
    lock_path(manager, ctx, txn, &key.path(), mode).await
}
