//! Fixed-size worker pool
//!
//! Each lane is an OS thread that pulls [`WorkItem`]s from a shared FIFO
//! queue, runs one to completion, reports `done` to the pool's
//! [`QuiescenceGroup`] and loops. Submitting never blocks: items queue up
//! when every lane is busy.
//!
//! Lifecycle: `Created -> Accepting -> Draining -> Closed`. After
//! [`shutdown`](PoolHandle::shutdown) new submissions are rejected, lanes
//! finish whatever is queued and exit; [`join`](WorkerPool::join) waits for
//! them and marks the pool closed.
//!
//! A task that returns an error or panics is recorded as a failure on the
//! group. The lane survives and still reports `done`.

use crate::error::{PoolError, TaskError, TaskFailure, TaskResult};
use crate::parallel::panic_message;
use crate::parallel::quiescence::QuiescenceGroup;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, trace};

/// Maximum lanes a pool may be configured with
pub const MAX_LANES: usize = 512;

type Job = Box<dyn FnOnce() -> TaskResult + Send + 'static>;

/// A unit of work: a closure plus whatever data it owns
pub struct WorkItem {
    label: String,
    job: Job,
}

impl WorkItem {
    pub fn new<F>(label: impl Into<String>, job: F) -> Self
    where
        F: FnOnce() -> TaskResult + Send + 'static,
    {
        Self {
            label: label.into(),
            job: Box::new(job),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl std::fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkItem").field("label", &self.label).finish()
    }
}

/// Pool configuration, immutable once the pool is created
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of concurrent lanes
    pub lanes: usize,

    /// Thread name prefix
    pub name: String,
}

impl PoolConfig {
    pub fn with_lanes(lanes: usize) -> Self {
        Self {
            lanes,
            ..Self::default()
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Lane count clamped to `[1, MAX_LANES]`
    pub fn effective_lanes(&self) -> usize {
        self.lanes.clamp(1, MAX_LANES)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            lanes: default_lanes(),
            name: "lane".into(),
        }
    }
}

/// Host hardware concurrency
pub fn default_lanes() -> usize {
    num_cpus::get().max(1)
}

/// Pool lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Created,
    Accepting,
    Draining,
    Closed,
}

impl PoolState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => PoolState::Created,
            1 => PoolState::Accepting,
            2 => PoolState::Draining,
            _ => PoolState::Closed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            PoolState::Created => 0,
            PoolState::Accepting => 1,
            PoolState::Draining => 2,
            PoolState::Closed => 3,
        }
    }
}

/// Statistics for the pool
#[derive(Debug, Default)]
pub struct PoolStats {
    /// Items accepted by `submit`
    pub submitted: AtomicU64,

    /// Items that ran to completion without error
    pub completed: AtomicU64,

    /// Items that returned an error or panicked
    pub failed: AtomicU64,

    /// Lanes currently running an item
    pub active: AtomicUsize,

    /// Highest number of simultaneously active lanes
    pub peak_active: AtomicUsize,
}

impl PoolStats {
    fn begin_task(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_active.fetch_max(now, Ordering::Relaxed);
    }

    fn end_task(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn active_lanes(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn peak_active(&self) -> usize {
        self.peak_active.load(Ordering::Relaxed)
    }
}

/// Snapshot of pool load, given to fork policies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityHint {
    /// Configured lanes
    pub lanes: usize,

    /// Lanes currently running an item
    pub active: usize,

    /// Items waiting in the queue
    pub queued: usize,
}

impl CapacityHint {
    /// Lanes neither running nor about to pick up a queued item
    pub fn idle_lanes(&self) -> usize {
        self.lanes.saturating_sub(self.active + self.queued)
    }
}

struct PoolShared {
    /// `None` once the pool is draining
    sender: RwLock<Option<Sender<WorkItem>>>,
    receiver: Receiver<WorkItem>,
    state: AtomicU8,
    stats: PoolStats,
    group: QuiescenceGroup,
    lanes: usize,
}

impl PoolShared {
    fn set_state(&self, state: PoolState) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
    }
}

/// Cloneable handle for submitting work and shutting the pool down
///
/// Tasks and finalize callbacks hold handles; only the owning
/// [`WorkerPool`] can join the lanes.
#[derive(Clone)]
pub struct PoolHandle {
    shared: Arc<PoolShared>,
}

impl PoolHandle {
    /// Queue an item for execution
    ///
    /// The caller must already have forked one unit on the group for this
    /// item. On rejection the item is dropped and the caller is responsible
    /// for the matching `done`.
    pub fn submit(&self, item: WorkItem) -> Result<(), PoolError> {
        let guard = self.shared.sender.read();
        let sender = guard.as_ref().ok_or(PoolError::Closed)?;

        trace!(task = %item.label, "Submit");
        sender.send(item).map_err(|_| PoolError::Closed)?;
        self.shared.stats.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Stop accepting work; lanes exit once the queue drains
    ///
    /// Safe to call from inside a task or a finalize callback.
    pub fn shutdown(&self) {
        let mut guard = self.shared.sender.write();
        if guard.take().is_some() {
            self.shared.set_state(PoolState::Draining);
            debug!(queued = self.shared.receiver.len(), "Pool draining");
        }
    }

    /// Block until the pool's group has finalized
    pub fn await_quiescence(&self) {
        self.shared.group.wait();
    }

    pub fn group(&self) -> &QuiescenceGroup {
        &self.shared.group
    }

    pub fn state(&self) -> PoolState {
        PoolState::from_u8(self.shared.state.load(Ordering::SeqCst))
    }

    pub fn stats(&self) -> &PoolStats {
        &self.shared.stats
    }

    pub fn lanes(&self) -> usize {
        self.shared.lanes
    }

    /// Items waiting in the queue
    pub fn queued(&self) -> usize {
        self.shared.receiver.len()
    }

    pub fn capacity_hint(&self) -> CapacityHint {
        CapacityHint {
            lanes: self.shared.lanes,
            active: self.shared.stats.active_lanes(),
            queued: self.queued(),
        }
    }
}

/// A single lane thread
struct Lane {
    id: usize,
    handle: Option<JoinHandle<()>>,
}

/// Owner of the lane threads
pub struct WorkerPool {
    handle: PoolHandle,
    lanes: Mutex<Vec<Lane>>,
}

impl WorkerPool {
    /// Spawn the lanes and start accepting work
    ///
    /// Every item run by this pool reports `done` to `group`.
    pub fn new(config: &PoolConfig, group: QuiescenceGroup) -> Result<Self, PoolError> {
        let lane_count = config.effective_lanes();
        let (sender, receiver) = unbounded();

        let shared = Arc::new(PoolShared {
            sender: RwLock::new(Some(sender)),
            receiver,
            state: AtomicU8::new(PoolState::Created.as_u8()),
            stats: PoolStats::default(),
            group,
            lanes: lane_count,
        });

        let pool = Self {
            handle: PoolHandle {
                shared: Arc::clone(&shared),
            },
            lanes: Mutex::new(Vec::with_capacity(lane_count)),
        };

        for id in 0..lane_count {
            let lane_shared = Arc::clone(&shared);
            let spawned = thread::Builder::new()
                .name(format!("{}-{}", config.name, id))
                .spawn(move || lane_loop(id, lane_shared));

            match spawned {
                Ok(handle) => pool.lanes.lock().push(Lane {
                    id,
                    handle: Some(handle),
                }),
                Err(e) => {
                    error!(lane = id, error = %e, "Failed to spawn lane");
                    pool.handle.shutdown();
                    let _ = pool.join();
                    return Err(PoolError::SpawnFailed {
                        lane: id,
                        reason: e.to_string(),
                    });
                }
            }
        }

        shared.set_state(PoolState::Accepting);
        info!(lanes = lane_count, name = %config.name, "Pool started");
        Ok(pool)
    }

    /// A cloneable handle to this pool
    pub fn handle(&self) -> PoolHandle {
        self.handle.clone()
    }

    pub fn submit(&self, item: WorkItem) -> Result<(), PoolError> {
        self.handle.submit(item)
    }

    pub fn shutdown(&self) {
        self.handle.shutdown();
    }

    pub fn await_quiescence(&self) {
        self.handle.await_quiescence();
    }

    pub fn state(&self) -> PoolState {
        self.handle.state()
    }

    pub fn stats(&self) -> &PoolStats {
        self.handle.stats()
    }

    pub fn lanes(&self) -> usize {
        self.handle.lanes()
    }

    /// Wait for every lane to exit and mark the pool closed
    ///
    /// Call after [`shutdown`](Self::shutdown); otherwise lanes keep waiting
    /// for work. Must not be called from a lane.
    pub fn join(&self) -> Result<(), PoolError> {
        let lanes = std::mem::take(&mut *self.lanes.lock());
        let mut result = Ok(());

        for mut lane in lanes {
            if let Some(handle) = lane.handle.take() {
                if handle.join().is_err() {
                    error!(lane = lane.id, "Lane panicked");
                    result = Err(PoolError::LanePanicked { lane: lane.id });
                }
            }
        }

        self.handle.shared.set_state(PoolState::Closed);
        result
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.handle.shutdown();
        let _ = self.join();
    }
}

/// Main lane loop
fn lane_loop(id: usize, shared: Arc<PoolShared>) {
    debug!(lane = id, "Lane starting");
    let mut ran = 0u64;

    // recv fails once the sender is dropped and the queue is empty
    while let Ok(item) = shared.receiver.recv() {
        let WorkItem { label, job } = item;
        shared.stats.begin_task();

        match panic::catch_unwind(AssertUnwindSafe(job)) {
            Ok(Ok(())) => {
                shared.stats.completed.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(e)) => {
                shared.stats.failed.fetch_add(1, Ordering::Relaxed);
                shared.group.record_failure(TaskFailure::new(label, e));
            }
            Err(payload) => {
                shared.stats.failed.fetch_add(1, Ordering::Relaxed);
                shared.group.record_failure(TaskFailure::new(
                    label,
                    TaskError::Panicked {
                        message: panic_message(payload.as_ref()),
                    },
                ));
            }
        }

        shared.stats.end_task();
        ran += 1;

        // last act: may run the finalize callback on this lane
        if let Err(e) = shared.group.done() {
            error!(lane = id, error = %e, "Unbalanced done");
        }
    }

    debug!(lane = id, ran = ran, "Lane stopping");
}
