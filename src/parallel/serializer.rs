//! Block-atomic output for concurrent producers
//!
//! Two sinks are provided:
//!
//! - [`BlockWriter`]: a dedicated writer thread fed by a bounded channel.
//!   Each block travels as one message and is written with one
//!   `write_all`, so blocks never interleave. Producers never touch the
//!   destination. Used for generated files.
//! - [`LockedSink`]: the destination behind a mutex, held for exactly one
//!   block. Used where a writer thread would be overkill.
//!
//! Neither orders blocks coming from different tasks.

use crate::error::WriterError;
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use std::fmt;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::debug;

/// Default writer channel capacity (in blocks)
pub const DEFAULT_CHANNEL_SIZE: usize = 256;

/// One fully composed, immutable unit of output
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OutputBlock {
    text: String,
}

impl OutputBlock {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.text.as_bytes()
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn into_string(self) -> String {
        self.text
    }
}

impl From<String> for OutputBlock {
    fn from(text: String) -> Self {
        Self { text }
    }
}

impl From<&str> for OutputBlock {
    fn from(text: &str) -> Self {
        Self {
            text: text.to_string(),
        }
    }
}

impl fmt::Display for OutputBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Anything that accepts whole blocks from many threads
pub trait BlockSink: Send + Sync {
    /// Write one block contiguously
    fn write_block(&self, block: OutputBlock) -> Result<(), WriterError>;
}

/// Statistics about written output
#[derive(Debug, Default)]
pub struct WriterStats {
    /// Blocks written to the destination
    pub blocks_written: AtomicU64,

    /// Bytes written to the destination
    pub bytes_written: AtomicU64,
}

impl WriterStats {
    fn record(&self, bytes: usize) {
        self.blocks_written.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn blocks_written(&self) -> u64 {
        self.blocks_written.load(Ordering::Relaxed)
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }
}

/// Message types sent to the writer thread
#[derive(Debug)]
enum WriterMessage {
    /// Append a block
    Block(OutputBlock),

    /// Flush and stop
    Close,
}

/// Handle for sending blocks to the writer thread
#[derive(Clone)]
pub struct WriterHandle {
    sender: Sender<WriterMessage>,
    stats: Arc<WriterStats>,
    closed: Arc<AtomicBool>,
}

impl WriterHandle {
    /// Stop accepting blocks; the writer flushes and exits
    ///
    /// Only call once every producer is done, i.e. from the group's
    /// finalize callback or after the group is quiescent.
    pub fn close(&self) -> Result<(), WriterError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.sender
            .send(WriterMessage::Close)
            .map_err(|_| WriterError::ChannelClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> &WriterStats {
        &self.stats
    }
}

impl BlockSink for WriterHandle {
    fn write_block(&self, block: OutputBlock) -> Result<(), WriterError> {
        if self.is_closed() {
            return Err(WriterError::ChannelClosed);
        }
        self.sender
            .send(WriterMessage::Block(block))
            .map_err(|_| WriterError::ChannelClosed)
    }
}

/// Writer that owns the destination on its own thread
pub struct BlockWriter<W: Write + Send + 'static> {
    handle: Option<JoinHandle<Result<W, WriterError>>>,
    writer_handle: WriterHandle,
}

impl<W: Write + Send + 'static> BlockWriter<W> {
    /// Spawn the writer thread
    ///
    /// `channel_size` bounds how many blocks may be in flight; producers
    /// block while it is full.
    pub fn new(dest: W, channel_size: usize) -> Result<Self, WriterError> {
        let (sender, receiver) = bounded(channel_size.max(1));
        let stats = Arc::new(WriterStats::default());

        let writer_handle = WriterHandle {
            sender,
            stats: Arc::clone(&stats),
            closed: Arc::new(AtomicBool::new(false)),
        };

        let handle = thread::Builder::new()
            .name("block-writer".into())
            .spawn(move || writer_thread(dest, receiver, stats))?;

        Ok(Self {
            handle: Some(handle),
            writer_handle,
        })
    }

    /// Get a handle for sending blocks to the writer
    pub fn handle(&self) -> WriterHandle {
        self.writer_handle.clone()
    }

    pub fn stats(&self) -> &WriterStats {
        self.writer_handle.stats()
    }

    /// Close, wait for the writer to drain, and return the destination
    pub fn finish(mut self) -> Result<W, WriterError> {
        let _ = self.writer_handle.close();

        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| WriterError::Panicked)?,
            None => Err(WriterError::ChannelClosed),
        }
    }
}

impl<W: Write + Send + 'static> Drop for BlockWriter<W> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.writer_handle.close();
            let _ = handle.join();
        }
    }
}

/// Internal writer thread function
fn writer_thread<W: Write>(
    mut dest: W,
    receiver: Receiver<WriterMessage>,
    stats: Arc<WriterStats>,
) -> Result<W, WriterError> {
    debug!("Block writer started");

    while let Ok(msg) = receiver.recv() {
        match msg {
            WriterMessage::Block(block) => {
                dest.write_all(block.as_bytes())?;
                stats.record(block.len());
            }
            WriterMessage::Close => break,
        }
    }

    dest.flush()?;
    debug!(
        blocks = stats.blocks_written(),
        bytes = stats.bytes_written(),
        "Block writer finished"
    );
    Ok(dest)
}

/// Destination guarded by a mutex held for one block at a time
pub struct LockedSink<W: Write + Send> {
    dest: Mutex<W>,
    stats: WriterStats,
}

impl<W: Write + Send> LockedSink<W> {
    pub fn new(dest: W) -> Self {
        Self {
            dest: Mutex::new(dest),
            stats: WriterStats::default(),
        }
    }

    pub fn stats(&self) -> &WriterStats {
        &self.stats
    }

    /// Flush and release the destination
    pub fn into_inner(self) -> Result<W, WriterError> {
        let mut dest = self.dest.into_inner();
        dest.flush()?;
        Ok(dest)
    }
}

impl<W: Write + Send> BlockSink for LockedSink<W> {
    fn write_block(&self, block: OutputBlock) -> Result<(), WriterError> {
        let mut dest = self.dest.lock();
        dest.write_all(block.as_bytes())?;
        self.stats.record(block.len());
        Ok(())
    }
}
