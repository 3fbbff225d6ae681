//! An in-process, multi-granularity lock manager for collection and shard metadata.
//!
//! `satori-lockmgr` serializes schema and shard mutations that run concurrently inside one
//! database process. Callers are transactions identified by an opaque id; they lock opaque
//! resource keys in one of five modes (`IS`, `IX`, `S`, `SIX`, `X`) and release them again.
//! Lock state lives only in memory; there is no persistence and no cross-node locking.
//!
//! # Quickstart
//! ```no_run
//! use satori_lockmgr::{Context, LockManager, LockMode, ResourceKey};
//! use futures::executor::block_on;
//!
//! fn main() -> anyhow::Result<()> {
//!     let locks = LockManager::new();
//!     let shard = ResourceKey::shard(42, 0);
//!
//!     // Give up after 200ms instead of waiting behind a long-running writer.
//!     let ctx = Context::with_timeout(std::time::Duration::from_millis(200));
//!     block_on(locks.lock(&ctx, 1, &shard, LockMode::Exclusive))?;
//!     // ... mutate the shard ...
//!     locks.unlock(1, &shard);
//!     Ok(())
//! }
//! ```
//!
//! ## Scoped acquisition
//! ```no_run
//! # use satori_lockmgr::{hierarchy, Context, LockManager, LockMode, ResourceKey};
//! # use futures::executor::block_on;
//! # fn main() -> anyhow::Result<()> {
//! let locks = LockManager::new();
//! let ctx = Context::background();
//! // IX on collection 42, then X on shard 42/3; both released when `guard` drops.
//! let guard = block_on(hierarchy::lock_resource(
//!     &locks,
//!     &ctx,
//!     7,
//!     &ResourceKey::shard(42, 3),
//!     LockMode::Exclusive,
//! ))?;
//! drop(guard);
//! # Ok(()) }
//! ```
//!
//! # Semantics
//! - Reentrant: locking a key twice in a covered mode bumps a count; `unlock` must be called as
//!   many times.
//! - Conversion: asking for a stronger mode converts the existing entry in place; it keeps its
//!   queue position and its current grant while it waits.
//! - Fairness: waiters on a key are granted strictly in arrival order.
//! - Cancellation: `lock` returns [`LockError::Cancelled`] or [`LockError::DeadlineExceeded`]
//!   once its [`Context`] fires, leaving the queue as if the request had never been made.
//!   Dropping the `lock` future has the same effect.
//! - `unlock` never fails and never blocks; releasing something not held is a no-op.
//!
//! # Configuration
//! - `SATORI_LOCK_WAIT_TIMEOUT_MS`: deadline used by the `*_blocking` helpers (unset or `0`
//!   waits indefinitely).
//! - `SATORI_LOCK_SLOW_WAIT_MS`: waits longer than this are logged at `warn`.

pub mod config;
pub mod context;
pub mod error;
pub mod guard;
pub mod hierarchy;
pub mod key;
pub mod manager;
pub mod mode;
pub mod stats;
mod table;

pub use config::LockManagerConfig;
pub use context::{CancelReason, Context};
pub use error::LockError;
pub use guard::LockGuard;
pub use key::{ResourceKey, TxnId};
pub use manager::{EntrySnapshot, LockManager, RecordSnapshot};
pub use mode::LockMode;
pub use stats::LockStats;
