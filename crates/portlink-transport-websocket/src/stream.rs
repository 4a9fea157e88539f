//! WebSocket stream implementation

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use portlink_transport::{
    ExclusiveStream, NetworkStatistics, StreamError, StreamResult, Transport, CLOSE_ABNORMAL,
    CLOSE_NORMAL,
};
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, trace};

type WsConnection<S> = tokio_tungstenite::WebSocketStream<S>;

/// A WebSocket transport wrapped in the single-reader/single-writer guard
pub type WebSocketStream<S> = ExclusiveStream<WebSocketTransport<S>>;

/// Close status received from the remote end
#[derive(Debug, Clone, PartialEq, Eq)]
struct RemoteClose {
    code: u16,
    reason: String,
}

impl RemoteClose {
    fn from_frame(frame: Option<CloseFrame<'_>>) -> Self {
        match frame {
            Some(frame) => Self {
                code: u16::from(frame.code),
                reason: frame.reason.into_owned(),
            },
            // A close frame without a status carries no complaint
            None => Self {
                code: CLOSE_NORMAL,
                reason: String::new(),
            },
        }
    }

    fn is_normal(&self) -> bool {
        self.code == CLOSE_NORMAL
    }

    fn to_error(&self) -> StreamError {
        if self.is_normal() {
            StreamError::Closed
        } else {
            StreamError::ClosedByRemote {
                code: self.code,
                reason: self.reason.clone(),
            }
        }
    }
}

/// Outcome of a single receive
#[derive(Debug)]
enum Received {
    Data { count: usize, end_of_message: bool },
    Close(RemoteClose),
}

/// Read half plus the unread remainder of the current message
struct MessageSource<S> {
    messages: SplitStream<WsConnection<S>>,
    pending: Bytes,
}

impl<S> MessageSource<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Copy as much of the current message as fits into `buf`, waiting for
    /// the next data message if the current one is exhausted.
    async fn receive(&mut self, buf: &mut [u8]) -> Result<Received, WsError> {
        while self.pending.is_empty() {
            match self.messages.next().await {
                Some(Ok(Message::Binary(data))) => self.pending = Bytes::from(data),
                Some(Ok(Message::Text(text))) => self.pending = Bytes::from(text.into_bytes()),
                Some(Ok(Message::Close(frame))) => {
                    return Ok(Received::Close(RemoteClose::from_frame(frame)));
                }
                // Pings are answered by tungstenite itself
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Err(e)) => return Err(e),
                None => return Err(WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake)),
            }
        }

        let count = buf.len().min(self.pending.len());
        let chunk = self.pending.split_to(count);
        buf[..count].copy_from_slice(&chunk);

        Ok(Received::Data {
            count,
            end_of_message: self.pending.is_empty(),
        })
    }
}

/// The connection went away underneath us without a proper close.
fn is_connection_aborted(error: &WsError) -> bool {
    match error {
        WsError::Io(e) => matches!(
            e.kind(),
            io::ErrorKind::ConnectionAborted
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::BrokenPipe
                | io::ErrorKind::UnexpectedEof
        ),
        WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => true,
        _ => false,
    }
}

/// The close handshake already ran, so the connection refuses more traffic.
fn is_already_closed(error: &WsError) -> bool {
    matches!(
        error,
        WsError::ConnectionClosed
            | WsError::AlreadyClosed
            | WsError::Protocol(ProtocolError::SendAfterClosing)
            | WsError::Protocol(ProtocolError::ReceivedAfterClosing)
    )
}

/// Transport over an open WebSocket connection
pub struct WebSocketTransport<S> {
    source: Mutex<MessageSource<S>>,
    sink: Mutex<SplitSink<WsConnection<S>, Message>>,
    close_initiated: AtomicBool,
    remote_close: OnceLock<RemoteClose>,
    stats: NetworkStatistics,
}

impl<S> fmt::Debug for WebSocketTransport<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("close_initiated", &self.close_initiated())
            .field("remote_close", &self.remote_close.get())
            .field("stats", &self.stats)
            .finish()
    }
}

impl<S> WebSocketTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Wrap an open WebSocket connection
    pub fn new(connection: WsConnection<S>) -> Self {
        let (sink, messages) = connection.split();

        Self {
            source: Mutex::new(MessageSource {
                messages,
                pending: Bytes::new(),
            }),
            sink: Mutex::new(sink),
            close_initiated: AtomicBool::new(false),
            remote_close: OnceLock::new(),
            stats: NetworkStatistics::new(),
        }
    }

    pub fn into_stream(self) -> WebSocketStream<S> {
        ExclusiveStream::new(self)
    }
}

impl<S> WebSocketTransport<S> {
    /// Whether the local side has started closing the connection
    pub fn close_initiated(&self) -> bool {
        self.close_initiated.load(Ordering::SeqCst)
    }

    /// Close code sent by the remote end, if it closed the connection
    pub fn remote_close_code(&self) -> Option<u16> {
        self.remote_close.get().map(|close| close.code)
    }

    fn verify_not_closed(&self) -> StreamResult<()> {
        if self.close_initiated() {
            // Do not even try, it cannot succeed
            return Err(StreamError::ClosedByClient);
        }
        match self.remote_close.get() {
            Some(close) => Err(close.to_error()),
            None => Ok(()),
        }
    }

    fn record_remote_close(&self, close: RemoteClose) -> RemoteClose {
        let _ = self.remote_close.set(close);
        self.remote_close.get().cloned().unwrap_or_else(|| RemoteClose {
            code: CLOSE_ABNORMAL,
            reason: String::new(),
        })
    }

    fn classify(&self, error: WsError) -> StreamError {
        if self.close_initiated() {
            return StreamError::ClosedByClient;
        }

        if is_connection_aborted(&error) {
            debug!("WebSocket connection aborted: {}", error);
            return self
                .record_remote_close(RemoteClose {
                    code: CLOSE_ABNORMAL,
                    reason: error.to_string(),
                })
                .to_error();
        }

        if is_already_closed(&error) {
            return match self.remote_close.get() {
                Some(close) => close.to_error(),
                None => StreamError::Closed,
            };
        }

        match error {
            WsError::Io(e) => StreamError::Io(e),
            other => StreamError::Protocol(other.to_string()),
        }
    }
}

#[async_trait]
impl<S> Transport for WebSocketTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn read(&self, buf: &mut [u8]) -> StreamResult<usize> {
        self.verify_not_closed()?;

        let mut source = self.source.lock().await;
        let mut received = 0;

        loop {
            trace!(capacity = buf.len() - received, "WebSocket receive");

            match source.receive(&mut buf[received..]).await {
                Ok(Received::Data {
                    count,
                    end_of_message,
                }) => {
                    received += count;
                    if received == buf.len() || end_of_message {
                        break;
                    }
                }
                Ok(Received::Close(close)) => {
                    // A close frame is only ever picked up at a message
                    // boundary, so nothing of this read has been handed out.
                    debug_assert_eq!(received, 0);

                    if self.close_initiated() {
                        return Err(StreamError::ClosedByClient);
                    }

                    let close = self.record_remote_close(close);
                    debug!(code = close.code, reason = %close.reason, "WebSocket closed by remote");

                    // A normal close is a plain end of stream; anything else
                    // carries details the caller needs to see.
                    return if close.is_normal() {
                        Ok(0)
                    } else {
                        Err(close.to_error())
                    };
                }
                Err(e) => return Err(self.classify(e)),
            }
        }

        self.stats.on_received(received);
        Ok(received)
    }

    async fn write(&self, buf: &[u8]) -> StreamResult<()> {
        self.verify_not_closed()?;

        let mut sink = self.sink.lock().await;
        trace!(bytes = buf.len(), "WebSocket send");

        match sink.send(Message::Binary(buf.to_vec())).await {
            Ok(()) => {
                self.stats.on_transmitted(buf.len());
                Ok(())
            }
            Err(e) => Err(self.classify(e)),
        }
    }

    async fn close(&self) -> StreamResult<()> {
        if self.remote_close.get().is_some() {
            // Remote closed first; the close handshake is already done
            return Ok(());
        }

        // Set before the handshake so that anything racing with us blames
        // the client, not the remote.
        self.close_initiated.store(true, Ordering::SeqCst);

        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "".into(),
        };

        let mut sink = self.sink.lock().await;
        match sink.send(Message::Close(Some(frame))).await {
            Ok(()) => {
                debug!("WebSocket close sent");
                Ok(())
            }
            Err(e) if is_already_closed(&e) || is_connection_aborted(&e) => {
                debug!("WebSocket already closed by remote: {}", e);
                Ok(())
            }
            Err(WsError::Io(e)) => Err(StreamError::Io(e)),
            Err(e) => Err(StreamError::Protocol(e.to_string())),
        }
    }

    fn statistics(&self) -> &NetworkStatistics {
        &self.stats
    }
}
