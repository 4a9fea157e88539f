//! portlink - client-side tunnel relay layer
//!
//! This crate re-exports the portlink crates, providing a single entry point
//! for applications that forward local TCP connections through an already
//! established tunnel connection.
//!
//! # Quick Start
//!
//! ```ignore
//! use portlink::{
//!     relay_bidirectional, CancellationToken, PortFinder, RelayConfig, SocketTransport,
//!     WebSocketTransport,
//! };
//!
//! # async fn example(tunnel: TunnelConnection) -> Result<(), Box<dyn std::error::Error>> {
//! // Same target, same local port across runs
//! let mut finder = PortFinder::new();
//! finder.add_seed(b"my-project");
//! finder.add_seed(b"us-central1-a");
//! finder.add_seed(b"my-vm");
//! finder.add_seed(&3389u16.to_le_bytes());
//! let (port, _) = finder.find_port()?;
//!
//! let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
//! let (socket, _) = listener.accept().await?;
//!
//! let local = SocketTransport::new(socket)?.into_stream();
//! let remote = WebSocketTransport::new(tunnel).into_stream();
//!
//! let cancel = CancellationToken::new();
//! let (sent, received) =
//!     relay_bidirectional(&local, &remote, &RelayConfig::default(), &cancel).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - **`portlink-transport`**: stream contract, errors, statistics, and the
//!   guards that turn a raw transport into a stream
//! - **`portlink-transport-tcp`**: TCP socket transport
//! - **`portlink-transport-websocket`**: WebSocket transport with message
//!   reassembly and close-code handling
//! - **`portlink-relay`**: byte relays and local port allocation

// Re-export the stream contract
pub use portlink_transport::{
    ExclusiveStream, GuardedStream, NetworkStatistics, NetworkStream, StatisticsSnapshot,
    StreamError, StreamResult, Transport, CLOSE_ABNORMAL, CLOSE_NORMAL,
};

// Re-export transports
pub use portlink_transport_tcp::{SocketStream, SocketTransport};
pub use portlink_transport_websocket::{WebSocketStream, WebSocketTransport};

// Re-export relay and port allocation
pub use portlink_relay::{
    find_free_local_port, relay, relay_bidirectional, PortFinder, PortFinderConfig,
    PortFinderError, PortTable, RelayConfig, SystemPortTable,
};

pub use tokio_util::sync::CancellationToken;
