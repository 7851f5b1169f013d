//! treegen - Syntax Tree and Visitor Generator
//!
//! Turns a list of class descriptors into node structs and visitor sources.
//! The interesting part is the execution core underneath: descriptors are
//! rendered concurrently and the run ends by itself once every task,
//! including tasks spawned by other tasks, has finished.
//!
//! # Features
//!
//! - **Balanced Partitioning**: The descriptor list is split into at most
//!   one chunk per lane, order-preserving, sizes differing by at most one.
//!
//! - **Self-Terminating Traversals**: A quiescence group counts outstanding
//!   tasks in one atomic word. The task that brings it to zero runs the
//!   finalize step exactly once; nobody polls.
//!
//! - **Block-Atomic Output**: One writer thread owns each output file, so
//!   concurrently rendered blocks never interleave.
//!
//! - **Failure Isolation**: A failing or panicking task is recorded and its
//!   siblings keep going. Failed runs leave no output file behind.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                  descriptors.json                             │
//! └─────────────────────────────┬─────────────────────────────────┘
//!                               │ load + validate
//!                               ▼
//!        ┌──────────────── generate_all ────────────────┐
//!        │  one traversal per flavor, run concurrently  │
//!        └──────┬──────────────────┬──────────────┬─────┘
//!               ▼                  ▼              ▼
//!   ┌───────────────────┐
//!   │  Traversal        │  partition ─► chunk tasks ─► WorkerPool lanes
//!   │  QuiescenceGroup  │                               │ render
//!   │  WorkerPool       │                               ▼
//!   │  BlockWriter      │◄──────────── OutputBlock ─────┘
//!   └─────────┬─────────┘
//!             │ finalize: epilogue, close writer, drain pool
//!             ▼
//!     .nodes.rs.partial ──rename──► nodes.rs
//! ```
//!
//! # Example
//!
//! ```bash
//! # All default flavors into src/syntax
//! treegen grammar.json -o src/syntax
//!
//! # Only the parallel visitor, 8 lanes
//! treegen grammar.json -f parallel-visitor -l 8 --visitor-name ThreadedVisitor
//! ```

pub mod config;
pub mod descriptor;
pub mod error;
pub mod generate;
pub mod parallel;
pub mod progress;
pub mod render;
pub mod visitor;

pub use config::{CliArgs, GenerateConfig};
pub use descriptor::{load_descriptors, ClassDescriptor, FieldDescriptor};
pub use error::{AggregateError, GenError, Result, TaskError, TaskFailure, TaskResult};
pub use generate::{generate_all, generate_file, render_sequential, GenerateOptions, GenerateReport};
pub use render::{Flavor, Render};
pub use visitor::ParallelVisitor;
