//! Unidirectional and bidirectional byte relays

use portlink_transport::{NetworkStream, StreamError, StreamResult};
use std::io;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::RelayConfig;

/// Pump bytes from `source` into `sink` until the source ends.
///
/// When the source reaches end of stream, or fails with a closed-class error,
/// the sink is closed and the relay finishes successfully. Any other error is
/// returned as is, and the sink is left open for the caller to deal with.
///
/// Returns the number of bytes relayed.
pub async fn relay<S, D>(
    source: &S,
    sink: &D,
    buffer_size: usize,
    cancel: &CancellationToken,
) -> StreamResult<u64>
where
    S: NetworkStream + ?Sized,
    D: NetworkStream + ?Sized,
{
    if buffer_size == 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "relay buffer size must be non-zero",
        )
        .into());
    }

    let mut buffer = vec![0u8; buffer_size];
    let mut total = 0u64;

    loop {
        if cancel.is_cancelled() {
            return Err(StreamError::Cancelled);
        }

        let n = match source.read(&mut buffer, cancel).await {
            Ok(0) => {
                debug!(bytes = total, "Source reached end of stream, closing sink");
                sink.close(cancel).await?;
                return Ok(total);
            }
            Ok(n) => n,
            Err(e) if e.is_closed() => {
                debug!(bytes = total, "Source closed ({}), closing sink", e);
                sink.close(cancel).await?;
                return Ok(total);
            }
            Err(e) => return Err(e),
        };

        sink.write(&buffer[..n], cancel).await?;
        total += n as u64;
    }
}

/// Relay between two streams in both directions until both directions end.
///
/// Each direction runs as its own cancelable unit. If one direction fails,
/// the other is cancelled, both streams are closed, and the first real
/// failure is returned.
///
/// Returns `(a_to_b, b_to_a)` byte counts.
pub async fn relay_bidirectional<A, B>(
    a: &A,
    b: &B,
    config: &RelayConfig,
    cancel: &CancellationToken,
) -> StreamResult<(u64, u64)>
where
    A: NetworkStream + ?Sized,
    B: NetworkStream + ?Sized,
{
    let a_to_b_cancel = cancel.child_token();
    let b_to_a_cancel = cancel.child_token();

    let a_to_b = async {
        let result = relay(a, b, config.buffer_size, &a_to_b_cancel).await;
        if result.is_err() {
            b_to_a_cancel.cancel();
        }
        result
    };

    let b_to_a = async {
        let result = relay(b, a, config.buffer_size, &b_to_a_cancel).await;
        if result.is_err() {
            a_to_b_cancel.cancel();
        }
        result
    };

    let (a_to_b, b_to_a) = tokio::join!(a_to_b, b_to_a);

    match (a_to_b, b_to_a) {
        (Ok(sent), Ok(received)) => {
            debug!(
                bytes_a_to_b = sent,
                bytes_b_to_a = received,
                "Relay completed"
            );
            Ok((sent, received))
        }
        (first, second) => {
            let error = pick_error(first.err(), second.err());
            debug!("Relay failed: {}", error);

            // Best effort: the caller's token may be the reason we are here
            let teardown = CancellationToken::new();
            let _ = a.close(&teardown).await;
            let _ = b.close(&teardown).await;

            Err(error)
        }
    }
}

/// Prefer the error that caused the teardown over the cancellation it triggered.
fn pick_error(first: Option<StreamError>, second: Option<StreamError>) -> StreamError {
    match (first, second) {
        (Some(StreamError::Cancelled), Some(other)) => other,
        (Some(error), _) => error,
        (None, Some(error)) => error,
        (None, None) => StreamError::Cancelled,
    }
}
