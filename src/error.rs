//! Error types for treegen
//!
//! This module defines the error hierarchy that covers:
//! - Configuration and CLI errors
//! - Descriptor loading and validation errors
//! - Worker pool and quiescence accounting errors
//! - Output writer errors
//! - Per-task failures, aggregated at the end of a traversal
//!
//! Task failures never abort a traversal. They are recorded against the
//! traversal's group and reported together once the group is quiescent.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for treegen
#[derive(Error, Debug)]
pub enum GenError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Descriptor input errors
    #[error("Descriptor error: {0}")]
    Descriptor(#[from] DescriptorError),

    /// Worker pool errors
    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    /// Quiescence accounting errors
    #[error("Group error: {0}")]
    Group(#[from] GroupError),

    /// Output writer errors
    #[error("Writer error: {0}")]
    Writer(#[from] WriterError),

    /// Target file exists and overwriting is disabled
    #[error("'{path}' already exists, won't overwrite")]
    FileExists { path: PathBuf },

    /// Two renderers in one run would write the same file
    #[error("'{path}' is claimed by more than one output flavor")]
    DuplicateTarget { path: PathBuf },

    /// One or more tasks failed
    #[error(transparent)]
    Tasks(#[from] AggregateError),

    /// I/O errors (file operations, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Interrupted by signal
    #[error("Operation interrupted by signal")]
    Interrupted,
}

/// Configuration and CLI errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Invalid lane count
    #[error("Invalid lane count {count}: must be between 1 and {max}")]
    InvalidLaneCount { count: usize, max: usize },

    /// Output directory problem
    #[error("Invalid output directory '{path}': {reason}")]
    InvalidOutputDir { path: PathBuf, reason: String },

    /// A generated type name is not a valid identifier
    #[error("Invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: String },
}

/// Descriptor loading and validation errors
#[derive(Error, Debug)]
pub enum DescriptorError {
    /// Could not read the descriptor file
    #[error("Failed to read '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Malformed JSON
    #[error("Failed to parse '{path}': {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// A class or field name is not a valid identifier
    #[error("Invalid identifier '{ident}' in class '{class}'")]
    InvalidIdentifier { class: String, ident: String },

    /// Two descriptors share a class name
    #[error("Duplicate class name '{0}'")]
    DuplicateClass(String),
}

/// Worker pool errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// The pool is draining or closed
    #[error("Pool is closed: submission rejected")]
    Closed,

    /// The traversal was cancelled before this root task started
    #[error("Traversal cancelled: root submission rejected")]
    Cancelled,

    /// A lane thread could not be spawned
    #[error("Failed to spawn lane {lane}: {reason}")]
    SpawnFailed { lane: usize, reason: String },

    /// A lane thread panicked outside of task execution
    #[error("Lane {lane} panicked")]
    LanePanicked { lane: usize },
}

/// Quiescence accounting errors
///
/// These report misuse of a group. Correct fork/done discipline never
/// produces them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GroupError {
    /// Fork on a group that already reached zero
    #[error("Group is already quiescent")]
    Quiescent,

    /// Done without a matching fork
    #[error("Done reported with no pending task")]
    Unbalanced,

    /// A finalize callback is already registered
    #[error("Finalize callback already registered")]
    CallbackAlreadySet,
}

/// Output writer errors
#[derive(Error, Debug)]
pub enum WriterError {
    /// Writer channel closed unexpectedly
    #[error("Block writer channel closed unexpectedly")]
    ChannelClosed,

    /// Destination write failed
    #[error("Write failed: {0}")]
    Io(#[from] std::io::Error),

    /// Writer thread panicked
    #[error("Block writer thread panicked")]
    Panicked,
}

/// Failure of a single task
#[derive(Error, Debug)]
pub enum TaskError {
    /// Rendering a descriptor failed
    #[error("Failed to render '{descriptor}': {reason}")]
    Render { descriptor: String, reason: String },

    /// Writing a rendered block failed
    #[error("Failed to write block: {0}")]
    Write(#[from] WriterError),

    /// Visiting a tree node failed
    #[error("Visit failed: {reason}")]
    Visit { reason: String },

    /// The task panicked
    #[error("Task panicked: {message}")]
    Panicked { message: String },

    /// The task stopped early because the traversal was cancelled
    #[error("Cancelled")]
    Cancelled,
}

impl TaskError {
    /// Check if this failure only reflects a cancellation request
    pub fn is_cancellation(&self) -> bool {
        matches!(self, TaskError::Cancelled)
    }
}

/// A failed task together with its label
#[derive(Debug)]
pub struct TaskFailure {
    /// Label of the task (chunk index, node kind, etc.)
    pub task: String,

    /// What went wrong
    pub error: TaskError,
}

impl TaskFailure {
    pub fn new(task: impl Into<String>, error: TaskError) -> Self {
        Self {
            task: task.into(),
            error,
        }
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.task, self.error)
    }
}

/// Every failure collected during one traversal
#[derive(Debug)]
pub struct AggregateError {
    failures: Vec<TaskFailure>,
}

impl AggregateError {
    pub fn new(failures: Vec<TaskFailure>) -> Self {
        Self { failures }
    }

    pub fn failures(&self) -> &[TaskFailure] {
        &self.failures
    }

    pub fn into_failures(self) -> Vec<TaskFailure> {
        self.failures
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// True if every failure is a cancellation
    pub fn is_cancelled(&self) -> bool {
        !self.failures.is_empty() && self.failures.iter().all(|f| f.error.is_cancellation())
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} task(s) failed", self.failures.len())?;
        for failure in &self.failures {
            write!(f, "\n  - {}", failure)?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}

/// Result type alias for GenError
pub type Result<T> = std::result::Result<T, GenError>;

/// Result type alias for a single task
pub type TaskResult = std::result::Result<(), TaskError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_lists_every_failure() {
        let err = AggregateError::new(vec![
            TaskFailure::new(
                "chunk-0",
                TaskError::Render {
                    descriptor: "Goal".into(),
                    reason: "boom".into(),
                },
            ),
            TaskFailure::new("chunk-3", TaskError::Cancelled),
        ]);

        let text = err.to_string();
        assert!(text.starts_with("2 task(s) failed"));
        assert!(text.contains("chunk-0: Failed to render 'Goal': boom"));
        assert!(text.contains("chunk-3: Cancelled"));
        assert!(!err.is_cancelled());
    }

    #[test]
    fn test_cancel_only_aggregate() {
        let err = AggregateError::new(vec![TaskFailure::new("chunk-1", TaskError::Cancelled)]);
        assert!(err.is_cancelled());
        assert!(!AggregateError::new(Vec::new()).is_cancelled());
    }

    #[test]
    fn test_error_conversion() {
        let gen_err: GenError = PoolError::Closed.into();
        assert!(matches!(gen_err, GenError::Pool(PoolError::Closed)));

        let gen_err: GenError = AggregateError::new(Vec::new()).into();
        assert!(matches!(gen_err, GenError::Tasks(_)));
    }
}
