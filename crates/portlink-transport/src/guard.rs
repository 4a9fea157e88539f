//! Stream lifecycle guard
//!
//! [`GuardedStream`] wraps a [`Transport`] and turns "use after close" into a
//! defined [`StreamError::Closed`] instead of touching a dead transport.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::{NetworkStatistics, NetworkStream, StreamError, StreamResult, Transport};

/// State change implied by the outcome of a transport operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Remain,
    Close,
}

impl Transition {
    /// A zero-byte read into a non-empty buffer is end of stream. A zero-length
    /// buffer is a probe and cannot signal end of stream by itself.
    pub fn after_read(result: &StreamResult<usize>, requested: usize) -> Self {
        match result {
            Ok(0) if requested > 0 => Transition::Close,
            Ok(_) => Transition::Remain,
            Err(e) => Self::after_error(e),
        }
    }

    pub fn after_write(result: &StreamResult<()>) -> Self {
        match result {
            Ok(()) => Transition::Remain,
            Err(e) => Self::after_error(e),
        }
    }

    fn after_error(error: &StreamError) -> Self {
        if error.is_closed() {
            Transition::Close
        } else {
            Transition::Remain
        }
    }
}

/// Open/closed state shared by both guards
#[derive(Debug, Default)]
pub struct Lifecycle {
    closed: AtomicBool,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn ensure_open(&self) -> StreamResult<()> {
        if self.is_closed() {
            Err(StreamError::Closed)
        } else {
            Ok(())
        }
    }

    pub fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn apply(&self, transition: Transition) {
        if transition == Transition::Close {
            self.mark_closed();
        }
    }
}

/// Settle the result of a transport close: a closed-class error means the
/// remote got there first, which is what the caller wanted anyway.
pub(crate) fn settle_close(result: StreamResult<()>) -> StreamResult<()> {
    match result {
        Err(e) if e.is_closed() => {
            trace!("Transport already closed: {}", e);
            Ok(())
        }
        other => other,
    }
}

/// A stream that refuses to be used after it has been closed
///
/// Reads and writes are not serialized against each other; transports used
/// with this guard must tolerate concurrent calls.
#[derive(Debug)]
pub struct GuardedStream<T> {
    transport: T,
    lifecycle: Lifecycle,
}

impl<T: Transport> GuardedStream<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            lifecycle: Lifecycle::new(),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}

#[async_trait]
impl<T: Transport> NetworkStream for GuardedStream<T> {
    async fn read(&self, buf: &mut [u8], cancel: &CancellationToken) -> StreamResult<usize> {
        self.lifecycle.ensure_open()?;

        let requested = buf.len();
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.transport.abort();
                Err(StreamError::Cancelled)
            }
            result = self.transport.read(buf) => result,
        };

        self.lifecycle.apply(Transition::after_read(&result, requested));
        result
    }

    async fn write(&self, buf: &[u8], cancel: &CancellationToken) -> StreamResult<()> {
        self.lifecycle.ensure_open()?;

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.transport.abort();
                Err(StreamError::Cancelled)
            }
            result = self.transport.write(buf) => result,
        };

        self.lifecycle.apply(Transition::after_write(&result));
        result
    }

    async fn close(&self, cancel: &CancellationToken) -> StreamResult<()> {
        if self.lifecycle.is_closed() {
            return Ok(());
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.transport.abort();
                Err(StreamError::Cancelled)
            }
            result = self.transport.close() => result,
        };

        self.lifecycle.mark_closed();
        settle_close(result)
    }

    fn is_closed(&self) -> bool {
        self.lifecycle.is_closed()
    }

    fn statistics(&self) -> &NetworkStatistics {
        self.transport.statistics()
    }
}
