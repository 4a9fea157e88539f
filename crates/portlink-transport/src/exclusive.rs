//! Single-reader/single-writer stream guard
//!
//! [`ExclusiveStream`] extends the lifecycle guard with two independent
//! permits: one serializes reads, the other serializes writes and close. A
//! read and a write may still overlap, since they use independent channels of
//! the underlying transport.
//!
//! Closing raises a one-shot forced-close signal before it waits for the
//! permits, so a read or write stalled on the transport is interrupted rather
//! than waited out.

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::guard::{settle_close, Lifecycle, Transition};
use crate::{NetworkStatistics, NetworkStream, StreamError, StreamResult, Transport};

#[derive(Debug)]
pub struct ExclusiveStream<T> {
    transport: T,
    lifecycle: Lifecycle,
    read_permit: Mutex<()>,
    write_permit: Mutex<()>,
    force_close: CancellationToken,
}

impl<T: Transport> ExclusiveStream<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            lifecycle: Lifecycle::new(),
            read_permit: Mutex::new(()),
            write_permit: Mutex::new(()),
            force_close: CancellationToken::new(),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Whether `close` has started. Never reset.
    pub fn is_closing(&self) -> bool {
        self.force_close.is_cancelled()
    }
}

#[async_trait]
impl<T: Transport> NetworkStream for ExclusiveStream<T> {
    async fn read(&self, buf: &mut [u8], cancel: &CancellationToken) -> StreamResult<usize> {
        let _permit = tokio::select! {
            permit = self.read_permit.lock() => permit,
            _ = cancel.cancelled() => return Err(StreamError::Cancelled),
        };
        self.lifecycle.ensure_open()?;

        let requested = buf.len();
        let result = tokio::select! {
            biased;
            _ = self.force_close.cancelled() => {
                // Leave the lifecycle to `close`, which still has to close the transport
                trace!("Read interrupted by close");
                return Err(StreamError::Closed);
            }
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
        let _permit = tokio::select! {
            permit = self.write_permit.lock() => permit,
            _ = cancel.cancelled() => return Err(StreamError::Cancelled),
        };
        self.lifecycle.ensure_open()?;

        let result = tokio::select! {
            biased;
            _ = self.force_close.cancelled() => {
                // Leave the lifecycle to `close`, which still has to close the transport
                trace!("Write interrupted by close");
                return Err(StreamError::Closed);
            }
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

        self.force_close.cancel();

        // Write permit first: it also guards close, so concurrent closes queue here.
        let _write_permit = self.write_permit.lock().await;
        let _read_permit = self.read_permit.lock().await;

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
