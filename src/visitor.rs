//! Runtime side of the generated parallel visitor
//!
//! Generated `ParallelVisitor` code drives a tree walk through this type:
//! every node visit may hand work to [`add_task`](ParallelVisitor::add_task),
//! and the caller that started the walk reports
//! [`task_end`](ParallelVisitor::task_end) once it has submitted everything
//! it owns. The walk terminates on its own when the last task finishes;
//! [`await_termination`](ParallelVisitor::await_termination) blocks until
//! then instead of polling.
//!
//! ```no_run
//! use treegen::visitor::ParallelVisitor;
//!
//! let visitor = ParallelVisitor::with_lanes(4)?;
//! for i in 0..10 {
//!     visitor.add_task(move |_scope| {
//!         println!("visiting {}", i);
//!         Ok(())
//!     })?;
//! }
//! visitor.task_end()?;
//! visitor.await_termination()?;
//! let report = visitor.shutdown()?;
//! assert!(report.is_success());
//! # Ok::<(), treegen::GenError>(())
//! ```

use crate::error::{GenError, GroupError, PoolError, TaskResult};
use crate::parallel::pool::default_lanes;
use crate::parallel::{
    CancellationToken, ForkPolicy, PoolConfig, TaskScope, Traversal, TraversalReport, TreeNode,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Pool plus completion tracking for one visit of one tree
pub struct ParallelVisitor {
    traversal: Traversal,
    added: AtomicU64,
}

impl ParallelVisitor {
    /// One lane per hardware thread
    pub fn new() -> Result<Self, PoolError> {
        Self::with_lanes(default_lanes())
    }

    pub fn with_lanes(lanes: usize) -> Result<Self, PoolError> {
        Self::with_cancel(lanes, CancellationToken::new())
    }

    pub fn with_cancel(lanes: usize, cancel: CancellationToken) -> Result<Self, PoolError> {
        let config = PoolConfig::with_lanes(lanes).named("visit");
        Ok(Self {
            traversal: Traversal::with_cancel(&config, cancel)?,
            added: AtomicU64::new(0),
        })
    }

    /// Submit one unit of work
    ///
    /// The work receives a [`TaskScope`] it can use to add further tasks;
    /// those belong to the same visit.
    pub fn add_task<F>(&self, work: F) -> Result<(), PoolError>
    where
        F: FnOnce(&TaskScope) -> TaskResult + Send + 'static,
    {
        let n = self.added.fetch_add(1, Ordering::Relaxed);
        self.traversal
            .scope()
            .spawn_root(format!("task-{}", n), work)
    }

    /// The caller is done adding tasks
    ///
    /// After this, the visit terminates as soon as the last outstanding task
    /// finishes. Calling it again has no effect.
    pub fn task_end(&self) -> Result<(), GroupError> {
        self.traversal.release()
    }

    /// True once every task has finished
    pub fn is_terminated(&self) -> bool {
        self.traversal.group().is_finalized()
    }

    /// Block until every task has finished
    ///
    /// Implies [`task_end`](Self::task_end). If releasing the caller's unit
    /// fails the visit can never terminate, so the error is returned
    /// instead of blocking.
    pub fn await_termination(&self) -> Result<(), GroupError> {
        self.task_end()?;
        self.traversal.group().wait();
        Ok(())
    }

    /// Like [`await_termination`](Self::await_termination) with a limit
    ///
    /// Returns `Ok(false)` if the visit was still running at the deadline.
    pub fn await_termination_timeout(&self, timeout: Duration) -> Result<bool, GroupError> {
        self.task_end()?;
        Ok(self.traversal.group().wait_timeout(timeout))
    }

    /// Visit every node below `root`, forking per `policy`
    pub fn visit_tree<N, V, P>(&self, root: Arc<N>, visit: V, policy: P) -> Result<(), PoolError>
    where
        N: TreeNode,
        V: Fn(&N) -> TaskResult + Send + Sync + 'static,
        P: ForkPolicy + 'static,
    {
        self.traversal.walk_tree(root, visit, policy)
    }

    pub fn lanes(&self) -> usize {
        self.traversal.lanes()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.traversal.cancel_token()
    }

    /// Wait for termination and release the lanes
    pub fn shutdown(self) -> Result<TraversalReport, GenError> {
        self.traversal.wait()
    }
}
