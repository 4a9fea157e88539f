//! TCP socket transport implementation

use async_trait::async_trait;
use portlink_transport::{GuardedStream, NetworkStatistics, StreamError, StreamResult, Transport};
use socket2::SockRef;
use std::io;
use std::net::{Shutdown, SocketAddr};
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::{debug, trace};

/// A socket transport wrapped in the lifecycle guard
pub type SocketStream = GuardedStream<SocketTransport>;

/// Transport over a connected TCP socket
///
/// Reads and writes go through readiness on a shared `&TcpStream`, so one
/// read and one write can be in flight at the same time.
#[derive(Debug)]
pub struct SocketTransport {
    socket: TcpStream,
    peer_addr: SocketAddr,
    stats: NetworkStatistics,
}

impl SocketTransport {
    /// Wrap an already connected socket
    pub fn new(socket: TcpStream) -> io::Result<Self> {
        let peer_addr = socket.peer_addr()?;
        socket.set_nodelay(true)?;

        Ok(Self {
            socket,
            peer_addr,
            stats: NetworkStatistics::new(),
        })
    }

    pub async fn connect<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let socket = TcpStream::connect(addr).await?;
        Self::new(socket)
    }

    pub fn into_stream(self) -> SocketStream {
        GuardedStream::new(self)
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    fn shutdown(&self, how: Shutdown) -> io::Result<()> {
        match SockRef::from(&self.socket).shutdown(how) {
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }
}

/// Aborted and reset connections are the remote ending the stream; anything
/// else is a genuine transport failure.
fn classify(error: io::Error) -> StreamError {
    match error.kind() {
        io::ErrorKind::ConnectionAborted | io::ErrorKind::ConnectionReset => {
            trace!("Socket closed by peer: {}", error);
            StreamError::Closed
        }
        _ => StreamError::Io(error),
    }
}

#[async_trait]
impl Transport for SocketTransport {
    async fn read(&self, buf: &mut [u8]) -> StreamResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        loop {
            self.socket.readable().await.map_err(classify)?;

            match self.socket.try_read(buf) {
                Ok(n) => {
                    self.stats.on_received(n);
                    trace!(peer = %self.peer_addr, bytes = n, "Socket read");
                    return Ok(n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(classify(e)),
            }
        }
    }

    async fn write(&self, buf: &[u8]) -> StreamResult<()> {
        let mut written = 0;

        while written < buf.len() {
            self.socket.writable().await.map_err(classify)?;

            match self.socket.try_write(&buf[written..]) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                Ok(n) => {
                    self.stats.on_transmitted(n);
                    written += n;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(classify(e)),
            }
        }

        trace!(peer = %self.peer_addr, bytes = written, "Socket write");
        Ok(())
    }

    async fn close(&self) -> StreamResult<()> {
        debug!(peer = %self.peer_addr, "Closing socket");
        self.shutdown(Shutdown::Both).map_err(classify)
    }

    fn abort(&self) {
        // Sockets have no native cancellation, so shut the socket down to
        // release anything still waiting on it.
        if let Err(e) = self.shutdown(Shutdown::Both) {
            debug!(peer = %self.peer_addr, "Failed to shut down socket: {}", e);
        }
    }

    fn statistics(&self) -> &NetworkStatistics {
        &self.stats
    }
}
