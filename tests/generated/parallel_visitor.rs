// Generated by treegen. Do not edit.

use super::nodes::*;
use std::sync::Arc;
use treegen::error::{GenError, GroupError, PoolError, TaskError, TaskResult};
use treegen::parallel::TaskScope;
use treegen::visitor::ParallelVisitor as Runtime;

/// Node types ParallelVisitor can descend into
pub trait ParallelAccept: Send + Sync + 'static {
    fn accept(self: Arc<Self>, v: &ParallelVisitor) -> Result<(), PoolError>;
}

/// Visits node fields concurrently on a fixed set of lanes
#[derive(Clone)]
pub struct ParallelVisitor {
    runtime: Arc<Runtime>,
}

impl ParallelVisitor {
    /// One lane per hardware thread
    pub fn new() -> Result<Self, PoolError> {
        Ok(Self { runtime: Arc::new(Runtime::new()?) })
    }

    pub fn with_lanes(lanes: usize) -> Result<Self, PoolError> {
        Ok(Self { runtime: Arc::new(Runtime::with_lanes(lanes)?) })
    }

    pub fn add_task<F>(&self, work: F) -> Result<(), PoolError>
    where
        F: FnOnce(&TaskScope) -> TaskResult + Send + 'static,
    {
        self.runtime.add_task(work)
    }

    pub fn task_end(&self) -> Result<(), GroupError> {
        self.runtime.task_end()
    }

    pub fn is_terminated(&self) -> bool {
        self.runtime.is_terminated()
    }

    pub fn await_termination(&self) -> Result<(), GroupError> {
        self.runtime.await_termination()
    }

    /// Wait for the last task, then release the lanes
    pub fn shutdown(self) -> Result<(), GenError> {
        match Arc::try_unwrap(self.runtime) {
            Ok(runtime) => runtime.shutdown().map(|_| ()),
            Err(shared) => Ok(shared.await_termination()?),
        }
    }

    /// Visit `root` and everything below it, then wait for the last task
    pub fn visit_all<N: ParallelAccept>(&self, root: Arc<N>) -> Result<(), GenError> {
        root.accept(self)?;
        self.await_termination()?;
        Ok(())
    }

    fn descend<T: ParallelAccept>(&self, child: &Arc<T>) -> TaskResult {
        Arc::clone(child)
            .accept(self)
            .map_err(|e| TaskError::Visit { reason: e.to_string() })
    }
}

impl ParallelVisitor {
    /// Leaf Leaf
    pub fn visit_pair(&self, n: &Arc<Pair>) -> Result<(), PoolError> {
        let (v, node) = (self.clone(), Arc::clone(n));
        self.add_task(move |_| v.descend(&node.f0))?;
        let (v, node) = (self.clone(), Arc::clone(n));
        self.add_task(move |_| v.descend(&node.f1))?;
        Ok(())
    }
}

impl ParallelAccept for Pair {
    fn accept(self: Arc<Self>, v: &ParallelVisitor) -> Result<(), PoolError> {
        v.visit_pair(&self)
    }
}

impl ParallelVisitor {
    pub fn visit_leaf(&self, _n: &Arc<Leaf>) -> Result<(), PoolError> {
        Ok(())
    }
}

impl ParallelAccept for Leaf {
    fn accept(self: Arc<Self>, v: &ParallelVisitor) -> Result<(), PoolError> {
        v.visit_leaf(&self)
    }
}

