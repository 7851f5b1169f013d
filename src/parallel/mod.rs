//! Fork/join parallel execution core
//!
//! # Architecture
//!
//! ```text
//!   items ──► partition ──► chunk 0 ... chunk k-1
//!                              │ fork(1) + submit, one root task per chunk
//!                              ▼
//!                  ┌──────────────────────────┐
//!                  │   WorkerPool (FIFO queue)│
//!                  │  lane 0  lane 1 .. lane N│◄── tasks may fork children
//!                  └────────────┬─────────────┘
//!                               │ write_block        done() after each item
//!                               ▼                          │
//!                  ┌──────────────────────────┐            ▼
//!                  │   BlockWriter thread     │   QuiescenceGroup
//!                  │  one block per message   │   zero-crossing ──► finalize:
//!                  └──────────────────────────┘     close writer, drain pool
//! ```

pub mod cancel;
pub mod driver;
pub mod partition;
pub mod pool;
pub mod quiescence;
pub mod serializer;

pub use cancel::CancellationToken;
pub use driver::{
    AlwaysFork, ForkPolicy, ForkWhenIdle, NeverFork, TaskScope, Traversal, TraversalReport,
    TreeNode,
};
pub use partition::{chunk_bounds, partition, partition_slice};
pub use pool::{CapacityHint, PoolConfig, PoolHandle, PoolState, PoolStats, WorkItem, WorkerPool};
pub use quiescence::{GroupPhase, QuiescenceGroup};
pub use serializer::{BlockSink, BlockWriter, LockedSink, OutputBlock, WriterHandle, WriterStats};

use std::any::Any;

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message() {
        let payload = std::panic::catch_unwind(|| panic!("static text")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "static text");

        let payload = std::panic::catch_unwind(|| panic!("formatted {}", 7)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "formatted 7");
    }
}
