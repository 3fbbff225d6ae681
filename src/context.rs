//! Cancellation contexts for blocking lock calls.
//!
//! A [`Context`] fires at most once, either through [`Context::cancel`] or when
//! its deadline passes. Clones share the same signal.

use crossbeam_channel::RecvTimeoutError;
use futures::channel::oneshot;
use futures::future::{self, FutureExt, Shared};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CancelReason {
    Cancelled,
    DeadlineExceeded,
}

#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

struct Inner {
    done: Shared<oneshot::Receiver<CancelReason>>,
    state: Mutex<State>,
    deadline: Option<Instant>,
}

struct State {
    trigger: Option<oneshot::Sender<CancelReason>>,
    reason: Option<CancelReason>,
    // Dropped on fire so the deadline watchdog exits early.
    stop_watchdog: Option<crossbeam_channel::Sender<()>>,
}

impl Inner {
    fn fire(&self, reason: CancelReason) {
        let mut state = self.state.lock();
        if state.reason.is_some() {
            return;
        }
        state.reason = Some(reason);
        state.stop_watchdog = None;
        if let Some(tx) = state.trigger.take() {
            let _ = tx.send(reason);
        }
    }
}

impl Context {
    fn build(deadline: Option<Instant>, stop_watchdog: Option<crossbeam_channel::Sender<()>>) -> Self {
        let (tx, rx) = oneshot::channel();
        Self {
            inner: Arc::new(Inner {
                done: rx.shared(),
                state: Mutex::new(State {
                    trigger: Some(tx),
                    reason: None,
                    stop_watchdog,
                }),
                deadline,
            }),
        }
    }

    /// A context that only fires through an explicit [`Context::cancel`].
    pub fn background() -> Self {
        Self::build(None, None)
    }

    /// Alias of [`Context::background`] that reads better at call sites which
    /// intend to cancel.
    pub fn with_cancel() -> Self {
        Self::background()
    }

    /// A context that has already fired.
    pub fn cancelled() -> Self {
        let ctx = Self::background();
        ctx.cancel();
        ctx
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        if deadline <= Instant::now() {
            let ctx = Self::build(Some(deadline), None);
            ctx.inner.fire(CancelReason::DeadlineExceeded);
            return ctx;
        }

        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let ctx = Self::build(Some(deadline), Some(stop_tx));
        let weak: Weak<Inner> = Arc::downgrade(&ctx.inner);
        thread::Builder::new()
            .name("lock-ctx-deadline".to_string())
            .spawn(move || {
                let timeout = deadline.saturating_duration_since(Instant::now());
                // Disconnected means the context fired or was dropped first.
                if let Err(RecvTimeoutError::Timeout) = stop_rx.recv_timeout(timeout) {
                    if let Some(inner) = weak.upgrade() {
                        inner.fire(CancelReason::DeadlineExceeded);
                    }
                }
            })
            .expect("failed to spawn lock deadline thread");
        ctx
    }

    /// Fire the context. Idempotent; later calls keep the first reason.
    pub fn cancel(&self) {
        self.inner.fire(CancelReason::Cancelled);
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// The reason this context fired, if it has.
    pub fn err(&self) -> Option<CancelReason> {
        self.inner.state.lock().reason
    }

    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Resolves with the firing reason; stays pending forever for a context
    /// that never fires.
    pub fn done(&self) -> impl Future<Output = CancelReason> + Send + 'static {
        let done = self.inner.done.clone();
        async move {
            match done.await {
                Ok(reason) => reason,
                Err(_) => future::pending().await,
            }
        }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("deadline", &self.inner.deadline)
            .field("err", &self.err())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{CancelReason, Context};
    use futures::executor::block_on;
    use std::time::{Duration, Instant};

    #[test]
    fn background_never_fires() {
        let ctx = Context::background();
        assert!(!ctx.is_done());
        assert_eq!(ctx.err(), None);
        assert!(ctx.deadline().is_none());
    }

    #[test]
    fn cancel_is_shared_between_clones() {
        let ctx = Context::with_cancel();
        let clone = ctx.clone();
        clone.cancel();
        assert_eq!(ctx.err(), Some(CancelReason::Cancelled));
        assert_eq!(block_on(ctx.done()), CancelReason::Cancelled);
    }

    #[test]
    fn first_reason_wins() {
        let ctx = Context::with_timeout(Duration::from_millis(20));
        ctx.cancel();
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(ctx.err(), Some(CancelReason::Cancelled));
    }

    #[test]
    fn deadline_fires_on_its_own() {
        let start = Instant::now();
        let ctx = Context::with_timeout(Duration::from_millis(30));
        assert_eq!(block_on(ctx.done()), CancelReason::DeadlineExceeded);
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert_eq!(ctx.err(), Some(CancelReason::DeadlineExceeded));
    }

    #[test]
    fn past_deadline_is_already_done() {
        let ctx = Context::with_deadline(Instant::now() - Duration::from_millis(1));
        assert_eq!(ctx.err(), Some(CancelReason::DeadlineExceeded));
    }

    #[test]
    fn pre_cancelled_context() {
        let ctx = Context::cancelled();
        assert!(ctx.is_done());
        assert_eq!(block_on(ctx.done()), CancelReason::Cancelled);
    }
}
