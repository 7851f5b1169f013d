//! Traversal driver - ties partitioning, the pool, the group and
//! cancellation together
//!
//! A [`Traversal`] owns one [`QuiescenceGroup`] and one [`WorkerPool`].
//! On creation it forks one unit for the driver itself, so the group cannot
//! reach zero while roots are still being submitted. [`Traversal::wait`]
//! releases that unit, blocks on the group's zero-crossing, then joins the
//! lanes.
//!
//! Two shapes of work are supported:
//!
//! - flat ([`Traversal::run_chunked`]): partition once, one root task per
//!   chunk, no further forking;
//! - recursive ([`Traversal::walk_tree`]): each node visit either forks one
//!   task per child or recurses inline, as decided by a [`ForkPolicy`].
//!
//! Every fork goes through [`TaskScope::spawn`], which registers the child
//! with the group before submitting it and undoes the registration if the
//! pool rejects it.

use crate::error::{GenError, GroupError, PoolError, TaskError, TaskFailure, TaskResult};
use crate::parallel::cancel::CancellationToken;
use crate::parallel::panic_message;
use crate::parallel::partition::partition;
use crate::parallel::pool::{CapacityHint, PoolConfig, PoolHandle, WorkItem, WorkerPool};
use crate::parallel::quiescence::QuiescenceGroup;
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

type FinalizeFn = Box<dyn FnOnce() + Send + 'static>;

/// Decides whether a child node gets its own task or is visited inline
pub trait ForkPolicy: Send + Sync {
    fn should_fork(&self, hint: CapacityHint) -> bool;
}

/// Fork a task for every child
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysFork;

impl ForkPolicy for AlwaysFork {
    fn should_fork(&self, _hint: CapacityHint) -> bool {
        true
    }
}

/// Visit everything inline on the root task
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverFork;

impl ForkPolicy for NeverFork {
    fn should_fork(&self, _hint: CapacityHint) -> bool {
        false
    }
}

/// Fork only while some lane would otherwise sit idle
#[derive(Debug, Clone, Copy, Default)]
pub struct ForkWhenIdle;

impl ForkPolicy for ForkWhenIdle {
    fn should_fork(&self, hint: CapacityHint) -> bool {
        hint.idle_lanes() > 0
    }
}

/// A node of a tree walked by [`Traversal::walk_tree`]
pub trait TreeNode: Send + Sync + Sized + 'static {
    fn children(&self) -> &[Arc<Self>];

    /// Label used in failure reports
    fn label(&self) -> String {
        "node".to_string()
    }
}

/// Handle given to every task for forking children
#[derive(Clone)]
pub struct TaskScope {
    pool: PoolHandle,
    cancel: CancellationToken,
}

impl TaskScope {
    /// Register a child with the group, then submit it
    ///
    /// If the pool rejects the child its registration is undone, so the
    /// group's count stays balanced.
    pub fn spawn<F>(&self, label: impl Into<String>, job: F) -> Result<(), PoolError>
    where
        F: FnOnce(&TaskScope) -> TaskResult + Send + 'static,
    {
        let group = self.pool.group();
        group.fork(1).map_err(|_| PoolError::Closed)?;

        let scope = self.clone();
        let item = WorkItem::new(label, move || job(&scope));

        if let Err(e) = self.pool.submit(item) {
            if let Err(undo) = group.done() {
                warn!(error = %undo, "Failed to undo fork for rejected item");
            }
            return Err(e);
        }
        Ok(())
    }

    /// Like [`spawn`](Self::spawn) but refused once cancellation is requested
    pub fn spawn_root<F>(&self, label: impl Into<String>, job: F) -> Result<(), PoolError>
    where
        F: FnOnce(&TaskScope) -> TaskResult + Send + 'static,
    {
        if self.cancel.is_cancelled() {
            return Err(PoolError::Cancelled);
        }
        self.spawn(label, job)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn capacity_hint(&self) -> CapacityHint {
        self.pool.capacity_hint()
    }

    /// Record a failure without ending the current task
    pub fn record_failure(&self, task: impl Into<String>, error: TaskError) {
        self.pool.group().record_failure(TaskFailure::new(task, error));
    }

    pub fn group(&self) -> &QuiescenceGroup {
        self.pool.group()
    }
}

/// Outcome of a finished traversal
#[derive(Debug)]
pub struct TraversalReport {
    /// Tasks run by the pool
    pub tasks: u64,

    /// Tasks that completed without error
    pub completed: u64,

    /// Highest number of simultaneously busy lanes
    pub peak_active: usize,

    /// Configured lanes
    pub lanes: usize,

    /// Time from creation to quiescence
    pub duration: Duration,

    /// Every failure recorded during the traversal
    pub failures: Vec<TaskFailure>,
}

impl TraversalReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// One traversal: a group, a pool, and the driver's own unit
pub struct Traversal {
    group: QuiescenceGroup,
    pool: WorkerPool,
    cancel: CancellationToken,
    hook: Mutex<Option<FinalizeFn>>,
    released: AtomicBool,
    started: Instant,
}

impl Traversal {
    pub fn new(config: &PoolConfig) -> Result<Self, PoolError> {
        Self::with_cancel(config, CancellationToken::new())
    }

    pub fn with_cancel(config: &PoolConfig, cancel: CancellationToken) -> Result<Self, PoolError> {
        let group = QuiescenceGroup::new();
        // the driver's own unit; released by `release` / `wait`
        group.fork(1).map_err(|_| PoolError::Closed)?;

        let pool = WorkerPool::new(config, group.clone())?;

        Ok(Self {
            group,
            pool,
            cancel,
            hook: Mutex::new(None),
            released: AtomicBool::new(false),
            started: Instant::now(),
        })
    }

    /// A scope for submitting root tasks
    pub fn scope(&self) -> TaskScope {
        TaskScope {
            pool: self.pool.handle(),
            cancel: self.cancel.clone(),
        }
    }

    pub fn group(&self) -> &QuiescenceGroup {
        &self.group
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn lanes(&self) -> usize {
        self.pool.lanes()
    }

    /// Register work to run once at quiescence, before the pool drains
    ///
    /// Must be called before [`release`](Self::release).
    pub fn on_quiescent<F>(&self, callback: F) -> Result<(), GroupError>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.released.load(Ordering::SeqCst) {
            return Err(GroupError::CallbackAlreadySet);
        }
        let mut hook = self.hook.lock();
        if hook.is_some() {
            return Err(GroupError::CallbackAlreadySet);
        }
        *hook = Some(Box::new(callback));
        Ok(())
    }

    /// Partition `items` and submit one root task per chunk
    ///
    /// Returns the number of chunks submitted. Stops at the first rejected
    /// submission (cancellation or a closed pool); chunks already submitted
    /// still run.
    pub fn run_chunked<T, F>(&self, items: Vec<T>, lanes: usize, job: F) -> Result<usize, PoolError>
    where
        T: Send + 'static,
        F: Fn(usize, Vec<T>, &TaskScope) -> TaskResult + Send + Sync + 'static,
    {
        let chunks = partition(items, lanes);
        let job = Arc::new(job);
        let scope = self.scope();
        let total = chunks.len();

        for (index, chunk) in chunks.into_iter().enumerate() {
            let job = Arc::clone(&job);
            scope.spawn_root(format!("chunk-{}", index), move |s| (*job)(index, chunk, s))?;
        }

        debug!(chunks = total, "Chunks submitted");
        Ok(total)
    }

    /// Visit every node of the tree rooted at `root`
    ///
    /// Visit failures are recorded per node; the walk continues below a
    /// failed node.
    pub fn walk_tree<N, V, P>(&self, root: Arc<N>, visit: V, policy: P) -> Result<(), PoolError>
    where
        N: TreeNode,
        V: Fn(&N) -> TaskResult + Send + Sync + 'static,
        P: ForkPolicy + 'static,
    {
        let walker = Arc::new(TreeWalker { visit, policy });
        let label = root.label();
        self.scope().spawn_root(label, move |scope| {
            walker.visit_subtree(scope, &root);
            Ok(())
        })
    }

    /// Release the driver's own unit
    ///
    /// Installs the finalize callback (user hook, then pool shutdown) and
    /// reports `done` for the driver. Idempotent.
    pub fn release(&self) -> Result<(), GroupError> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let hook = self.hook.lock().take();
        let pool = self.pool.handle();
        let group = self.group.clone();

        self.group.on_quiescent(move || {
            if let Some(hook) = hook {
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(hook)) {
                    group.record_failure(TaskFailure::new(
                        "finalize",
                        TaskError::Panicked {
                            message: panic_message(payload.as_ref()),
                        },
                    ));
                }
            }
            pool.shutdown();
        })?;

        self.group.done()?;
        Ok(())
    }

    /// Release the driver unit, wait for quiescence and join the lanes
    pub fn wait(self) -> Result<TraversalReport, GenError> {
        self.release()?;
        self.group.wait();
        let duration = self.started.elapsed();
        self.pool.join()?;

        let stats = self.pool.stats();
        let report = TraversalReport {
            tasks: stats.submitted(),
            completed: stats.completed(),
            peak_active: stats.peak_active(),
            lanes: self.pool.lanes(),
            duration,
            failures: self.group.take_failures(),
        };

        info!(
            tasks = report.tasks,
            failures = report.failures.len(),
            peak_active = report.peak_active,
            duration_ms = duration.as_millis() as u64,
            "Traversal complete"
        );
        Ok(report)
    }
}

impl Drop for Traversal {
    fn drop(&mut self) {
        // lets the group finalize so the pool can drain on drop
        let _ = self.release();
    }
}

struct TreeWalker<V, P> {
    visit: V,
    policy: P,
}

impl<V, P> TreeWalker<V, P>
where
    P: ForkPolicy + 'static,
{
    fn visit_subtree<N>(self: &Arc<Self>, scope: &TaskScope, node: &Arc<N>)
    where
        N: TreeNode,
        V: Fn(&N) -> TaskResult + Send + Sync + 'static,
    {
        if let Err(e) = (self.visit)(node.as_ref()) {
            scope.record_failure(node.label(), e);
        }

        for child in node.children() {
            if self.policy.should_fork(scope.capacity_hint()) {
                let walker = Arc::clone(self);
                let forked = Arc::clone(child);
                let spawned = scope.spawn(child.label(), move |s| {
                    walker.visit_subtree(s, &forked);
                    Ok(())
                });
                if spawned.is_ok() {
                    continue;
                }
            }
            self.visit_subtree(scope, child);
        }
    }
}
