//! WebSocket transport implementation using tokio-tungstenite
//!
//! This crate exposes an open WebSocket connection as a byte stream, for the
//! tunnel side of a relay. The connection must already be established and
//! secured; this crate does not perform the handshake.
//!
//! # Message boundaries
//!
//! Each write is sent as one binary message. A read returns bytes from at
//! most one message: a message larger than the caller's buffer is handed out
//! over several reads, and a read never mixes bytes from two messages.
//!
//! # Closing
//!
//! The stream tells apart who ended the connection and how:
//!
//! - a normal close frame from the remote is a graceful end of stream
//!   (`read` returns `0`)
//! - any other close code, or a connection that drops without a close frame,
//!   is reported as [`StreamError::ClosedByRemote`](portlink_transport::StreamError::ClosedByRemote)
//! - after the local side starts closing, the transport refuses further I/O
//!   with [`StreamError::ClosedByClient`](portlink_transport::StreamError::ClosedByClient)

pub mod stream;

pub use stream::{WebSocketStream, WebSocketTransport};
