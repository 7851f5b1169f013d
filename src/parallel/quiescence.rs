//! Fork/done accounting for a dynamically growing set of tasks
//!
//! A [`QuiescenceGroup`] tracks how many tasks are outstanding. A parent
//! calls [`fork`](QuiescenceGroup::fork) for its children *before* handing
//! them off and before reporting its own [`done`](QuiescenceGroup::done).
//! Under that discipline the count cannot reach zero while any task, or a
//! child it is about to create, is still outstanding.
//!
//! The count and the closed flag share one atomic word. The `done` call
//! that moves the count from one to zero also sets the closed flag in the
//! same step, so exactly one caller observes the zero-crossing and runs the
//! finalize callback. A closed group rejects further forks.
//!
//! ```text
//!   fork(1)  root           1
//!   fork(3)  children       4
//!   done()   root           3
//!   done()   child          2
//!   done()   child          1
//!   done()   child          0  -> finalize runs once
//! ```

use crate::error::{GroupError, TaskError, TaskFailure};
use crate::parallel::panic_message;
use parking_lot::{Condvar, Mutex};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Set once the count has crossed zero
const CLOSED: usize = 1 << (usize::BITS - 1);

/// Low bits hold the pending count
const COUNT_MASK: usize = !CLOSED;

type FinalizeFn = Box<dyn FnOnce() + Send + 'static>;

/// Lifecycle of a group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupPhase {
    /// Tasks outstanding, or nothing forked yet
    Active,
    /// Count reached zero, finalize is running
    Quiescent,
    /// Finalize has completed
    Finalized,
}

#[derive(Default)]
struct FinalizeState {
    callback: Option<FinalizeFn>,
    registered: bool,
    finalized: bool,
}

struct GroupInner {
    /// Pending count plus the `CLOSED` bit
    word: AtomicUsize,

    /// Total units ever forked
    forked: AtomicU64,

    state: Mutex<FinalizeState>,
    finalized: Condvar,

    failures: Mutex<Vec<TaskFailure>>,
}

/// Race-free completion detector shared by every task of one traversal
///
/// Cloning is cheap; all clones refer to the same group.
#[derive(Clone)]
pub struct QuiescenceGroup {
    inner: Arc<GroupInner>,
}

impl QuiescenceGroup {
    /// Create a group with no pending tasks
    pub fn new() -> Self {
        Self {
            inner: Arc::new(GroupInner {
                word: AtomicUsize::new(0),
                forked: AtomicU64::new(0),
                state: Mutex::new(FinalizeState::default()),
                finalized: Condvar::new(),
                failures: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Register `n` new tasks
    ///
    /// Must be called before the tasks are submitted. Fails only if the
    /// group has already crossed zero.
    pub fn fork(&self, n: usize) -> Result<(), GroupError> {
        if n == 0 {
            return Ok(());
        }

        let prev = self
            .inner
            .word
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |w| {
                if w & CLOSED != 0 {
                    None
                } else {
                    Some(w + n)
                }
            })
            .map_err(|_| GroupError::Quiescent)?;

        self.inner.forked.fetch_add(n as u64, Ordering::Relaxed);
        trace!(pending = (prev & COUNT_MASK) + n, "fork");
        Ok(())
    }

    /// Report that one forked task has finished
    ///
    /// Returns `Ok(true)` for the single call that brought the count to zero
    /// and ran the finalize callback.
    pub fn done(&self) -> Result<bool, GroupError> {
        let prev = self
            .inner
            .word
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |w| {
                match w & COUNT_MASK {
                    0 => None,
                    1 => Some(CLOSED),
                    _ => Some(w - 1),
                }
            })
            .map_err(|_| GroupError::Unbalanced)?;

        if prev & COUNT_MASK == 1 {
            self.finalize();
            return Ok(true);
        }

        trace!(pending = (prev & COUNT_MASK) - 1, "done");
        Ok(false)
    }

    /// Register the finalize callback
    ///
    /// If the group is already quiescent the callback runs immediately on
    /// the calling thread.
    pub fn on_quiescent<F>(&self, callback: F) -> Result<(), GroupError>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.inner.state.lock();
        if state.registered {
            return Err(GroupError::CallbackAlreadySet);
        }
        state.registered = true;

        if self.is_quiescent() {
            drop(state);
            self.run_callback(Box::new(callback));
        } else {
            state.callback = Some(Box::new(callback));
        }
        Ok(())
    }

    /// Block until the finalize callback has completed
    pub fn wait(&self) {
        let mut state = self.inner.state.lock();
        while !state.finalized {
            self.inner.finalized.wait(&mut state);
        }
    }

    /// Block until finalized or the timeout elapses
    ///
    /// Returns `true` if the group finalized.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        while !state.finalized {
            if self
                .inner
                .finalized
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return state.finalized;
            }
        }
        true
    }

    /// Current pending count
    pub fn pending(&self) -> usize {
        self.inner.word.load(Ordering::Acquire) & COUNT_MASK
    }

    /// Total units forked over the group's lifetime
    pub fn forked(&self) -> u64 {
        self.inner.forked.load(Ordering::Relaxed)
    }

    /// True once the count has crossed zero
    pub fn is_quiescent(&self) -> bool {
        self.inner.word.load(Ordering::Acquire) & CLOSED != 0
    }

    /// True once the finalize callback has completed
    pub fn is_finalized(&self) -> bool {
        self.inner.state.lock().finalized
    }

    pub fn phase(&self) -> GroupPhase {
        if self.is_finalized() {
            GroupPhase::Finalized
        } else if self.is_quiescent() {
            GroupPhase::Quiescent
        } else {
            GroupPhase::Active
        }
    }

    /// Record a task failure against this traversal
    pub fn record_failure(&self, failure: TaskFailure) {
        warn!(task = %failure.task, error = %failure.error, "Task failed");
        self.inner.failures.lock().push(failure);
    }

    pub fn failure_count(&self) -> usize {
        self.inner.failures.lock().len()
    }

    /// Take every recorded failure, leaving the list empty
    pub fn take_failures(&self) -> Vec<TaskFailure> {
        std::mem::take(&mut *self.inner.failures.lock())
    }

    /// Zero-crossing: run the callback and wake waiters
    fn finalize(&self) {
        let callback = self.inner.state.lock().callback.take();
        debug!(forked = self.forked(), "Group quiescent");

        if let Some(callback) = callback {
            self.run_callback(callback);
        }

        let mut state = self.inner.state.lock();
        state.finalized = true;
        self.inner.finalized.notify_all();
    }

    fn run_callback(&self, callback: FinalizeFn) {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(callback)) {
            self.record_failure(TaskFailure::new(
                "finalize",
                TaskError::Panicked {
                    message: panic_message(payload.as_ref()),
                },
            ));
        }
    }
}

impl Default for QuiescenceGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for QuiescenceGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuiescenceGroup")
            .field("pending", &self.pending())
            .field("phase", &self.phase())
            .finish()
    }
}
