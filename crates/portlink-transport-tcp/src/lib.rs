//! Raw TCP socket transport
//!
//! [`SocketStream`] exposes a connected TCP socket through the
//! [`NetworkStream`](portlink_transport::NetworkStream) contract. It is the
//! local side of a tunnel: the connection accepted from a client application
//! before its bytes are relayed into the tunnel.

pub mod stream;

pub use stream::{SocketStream, SocketTransport};
