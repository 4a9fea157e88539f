//! Stream abstraction layer for tunnel relays
//!
//! This crate defines the byte-stream contract that the relay and session
//! layers use to move data, regardless of whether the bytes travel over a raw
//! TCP socket or a WebSocket connection.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │            Relay / session layer (portlink-relay)        │
//! └─────────────────────────────────────────────────────────┘
//!                           │
//!                           │ NetworkStream
//!                           ↓
//! ┌─────────────────────────────────────────────────────────┐
//! │  GuardedStream<T>            ExclusiveStream<T>          │
//! │  (lifecycle only)            (+ single reader/writer)    │
//! └─────────────────────────────────────────────────────────┘
//!                           │
//!                           │ Transport
//!                           ↓
//! ┌────────────────────────────┬────────────────────────────┐
//! │ portlink-transport-tcp     │ portlink-transport-        │
//! │                            │ websocket                  │
//! └────────────────────────────┴────────────────────────────┘
//! ```
//!
//! Transports only move bytes and classify their errors. The guards own the
//! stream lifecycle: once a stream is closed, every further read or write
//! fails with [`StreamError::Closed`] without touching the transport.

pub mod exclusive;
pub mod guard;
pub mod stats;

pub use exclusive::ExclusiveStream;
pub use guard::{GuardedStream, Lifecycle, Transition};
pub use stats::{NetworkStatistics, StatisticsSnapshot};

use async_trait::async_trait;
use std::fmt::Debug;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// WebSocket close code for a normal closure
pub const CLOSE_NORMAL: u16 = 1000;

/// WebSocket close code for a connection that dropped without a close frame
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Stream-level errors
#[derive(Debug, Error)]
pub enum StreamError {
    /// Either end closed the stream, or it was already closed
    #[error("Stream closed")]
    Closed,

    #[error("Connection closed by client")]
    ClosedByClient,

    #[error("Connection closed by remote (code {code}): {reason}")]
    ClosedByRemote { code: u16, reason: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl StreamError {
    /// Whether this error means the stream has ended, as opposed to failed.
    ///
    /// Relays treat these as a normal end of a direction.
    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            StreamError::Closed | StreamError::ClosedByClient | StreamError::ClosedByRemote { .. }
        )
    }
}

/// Result type for stream operations
pub type StreamResult<T> = Result<T, StreamError>;

/// Transport-specific I/O injected into a guard.
///
/// Implementations only move bytes and classify errors; they do not track
/// whether the stream is closed. Methods take `&self` so that one read and
/// one write can be in flight at the same time.
#[async_trait]
pub trait Transport: Send + Sync + Debug {
    /// Read up to `buf.len()` bytes. `Ok(0)` for a non-empty buffer is end of stream.
    async fn read(&self, buf: &mut [u8]) -> StreamResult<usize>;

    /// Write all of `buf`
    async fn write(&self, buf: &[u8]) -> StreamResult<()>;

    /// Close the transport in an orderly way
    async fn close(&self) -> StreamResult<()>;

    /// Interrupt any pending operation after its caller stopped waiting.
    ///
    /// Called when a read, write or close is cancelled mid-flight.
    fn abort(&self) {}

    /// Byte counters for this transport
    fn statistics(&self) -> &NetworkStatistics;
}

/// A closeable byte stream
///
/// This is the surface the relay and session layers use. Reads and writes
/// may run concurrently with each other; see [`ExclusiveStream`] for the
/// variant that also serializes reads against reads and writes against writes.
#[async_trait]
pub trait NetworkStream: Send + Sync + Debug {
    /// Read into `buf`. Returns `Ok(0)` once the stream has ended gracefully.
    async fn read(&self, buf: &mut [u8], cancel: &CancellationToken) -> StreamResult<usize>;

    /// Write all of `buf`
    async fn write(&self, buf: &[u8], cancel: &CancellationToken) -> StreamResult<()>;

    /// Close the stream. Closing a closed stream succeeds and does nothing.
    async fn close(&self, cancel: &CancellationToken) -> StreamResult<()>;

    fn is_closed(&self) -> bool;

    fn statistics(&self) -> &NetworkStatistics;
}
