//! Byte relays and local port allocation for tunnels
//!
//! A tunnel pairs a local stream (usually a TCP connection accepted from a
//! client application) with a remote one (usually a WebSocket connection to
//! the tunnel endpoint) and runs one [`relay`] per direction until either side
//! ends.
//!
//! ```ignore
//! use portlink_relay::{relay_bidirectional, PortFinder, RelayConfig};
//!
//! let mut finder = PortFinder::new();
//! finder.add_seed(b"my-project/us-central1-a/my-vm");
//! let (port, preferred) = finder.find_port()?;
//!
//! let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
//! let (socket, _) = listener.accept().await?;
//! let local = SocketTransport::new(socket)?.into_stream();
//!
//! relay_bidirectional(&local, &remote, &RelayConfig::default(), &cancel).await?;
//! ```

pub mod config;
pub mod port_finder;
pub mod relay;

pub use config::{PortFinderConfig, RelayConfig};
pub use port_finder::{
    find_free_local_port, PortFinder, PortFinderError, PortTable, SystemPortTable,
};
pub use relay::{relay, relay_bidirectional};
