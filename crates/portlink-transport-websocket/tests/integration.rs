//! Integration tests for the WebSocket transport
//!
//! Each test runs a real tungstenite server over an in-memory duplex pipe.

use futures_util::{SinkExt, StreamExt};
use portlink_transport::{NetworkStream, StreamError, Transport};
use portlink_transport_websocket::{WebSocketStream, WebSocketTransport};
use std::time::Duration;
use tokio::io::DuplexStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Role};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

type Server = tokio_tungstenite::WebSocketStream<DuplexStream>;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Creates a server endpoint and a client stream connected to it
async fn connected_pair() -> (Server, WebSocketStream<DuplexStream>) {
    init_tracing();

    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let server = tokio_tungstenite::WebSocketStream::from_raw_socket(server_io, Role::Server, None)
        .await;
    let client = tokio_tungstenite::WebSocketStream::from_raw_socket(client_io, Role::Client, None)
        .await;

    (server, WebSocketTransport::new(client).into_stream())
}

fn fill_buffer(size: usize) -> Vec<u8> {
    (0..size).map(|i| i as u8).collect()
}

async fn read(stream: &WebSocketStream<DuplexStream>, buf: &mut [u8]) -> Result<usize, StreamError> {
    timeout(
        Duration::from_secs(5),
        stream.read(buf, &CancellationToken::new()),
    )
    .await
    .expect("read timed out")
}

async fn close_server(server: &mut Server, code: CloseCode, reason: &str) {
    server
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.to_string().into(),
        })))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_read_when_frame_size_equals_read_size() {
    let (mut server, stream) = connected_pair().await;

    let frame = fill_buffer(8);
    server.send(Message::Binary(frame.clone())).await.unwrap();

    let mut buf = [0u8; 8];
    assert_eq!(read(&stream, &mut buf).await.unwrap(), 8);
    assert_eq!(&buf[..], &frame[..]);
}

#[tokio::test]
async fn test_read_reassembles_large_message_over_several_reads() {
    let (mut server, stream) = connected_pair().await;

    let message = fill_buffer(10);
    server.send(Message::Binary(message.clone())).await.unwrap();
    server.send(Message::Binary(vec![0xAA; 3])).await.unwrap();

    let mut buf = [0u8; 4];
    let mut reassembled = Vec::new();
    let mut sizes = Vec::new();
    for _ in 0..3 {
        let n = read(&stream, &mut buf).await.unwrap();
        sizes.push(n);
        reassembled.extend_from_slice(&buf[..n]);
    }
    assert_eq!(sizes, vec![4, 4, 2]);
    assert_eq!(reassembled, message);

    // The next message starts a fresh read
    let n = read(&stream, &mut buf).await.unwrap();
    assert_eq!(&buf[..n], &[0xAA; 3]);
}

#[tokio::test]
async fn test_read_never_mixes_messages() {
    let (mut server, stream) = connected_pair().await;

    let frame = fill_buffer(4);
    server.send(Message::Binary(frame.clone())).await.unwrap();
    server.send(Message::Binary(frame.clone())).await.unwrap();

    // A buffer that could hold both messages still gets one at a time
    let mut buf = [0u8; 8];
    assert_eq!(read(&stream, &mut buf).await.unwrap(), 4);
    assert_eq!(read(&stream, &mut buf).await.unwrap(), 4);

    assert_eq!(stream.statistics().bytes_received(), 8);
}

#[tokio::test]
async fn test_read_when_server_closes_normally() {
    let (mut server, stream) = connected_pair().await;

    close_server(&mut server, CloseCode::Normal, "").await;

    let mut buf = [0u8; 32];
    assert_eq!(read(&stream, &mut buf).await.unwrap(), 0);
    assert!(stream.is_closed());
    assert_eq!(stream.transport().remote_close_code(), Some(1000));

    assert!(matches!(
        read(&stream, &mut buf).await,
        Err(StreamError::Closed)
    ));

    // Remote already closed: closing is a no-op
    stream.close(&CancellationToken::new()).await.unwrap();
}

#[tokio::test]
async fn test_read_when_server_closes_with_error() {
    let (mut server, stream) = connected_pair().await;

    close_server(&mut server, CloseCode::Error, "internal error").await;

    let mut buf = [0u8; 32];
    match read(&stream, &mut buf).await {
        Err(StreamError::ClosedByRemote { code, reason }) => {
            assert_eq!(code, 1011);
            assert_eq!(reason, "internal error");
        }
        other => panic!("expected ClosedByRemote, got {:?}", other),
    }

    assert!(stream.is_closed());
    assert!(matches!(
        read(&stream, &mut buf).await,
        Err(StreamError::Closed)
    ));
}

#[tokio::test]
async fn test_read_when_connection_dropped() {
    let (server, stream) = connected_pair().await;

    drop(server);

    let mut buf = [0u8; 32];
    match read(&stream, &mut buf).await {
        Err(StreamError::ClosedByRemote { code, .. }) => assert_eq!(code, 1006),
        other => panic!("expected abnormal close, got {:?}", other),
    }
    assert!(stream.is_closed());
}

#[tokio::test]
async fn test_write_sends_one_binary_message() {
    let (mut server, stream) = connected_pair().await;

    stream
        .write(b"hello tunnel", &CancellationToken::new())
        .await
        .unwrap();

    let message = timeout(Duration::from_secs(5), server.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(message, Message::Binary(b"hello tunnel".to_vec()));
    assert_eq!(stream.statistics().bytes_transmitted(), 12);
}

#[tokio::test]
async fn test_write_when_connection_dropped() {
    let (server, stream) = connected_pair().await;

    drop(server);

    match stream.write(b"data", &CancellationToken::new()).await {
        Err(StreamError::ClosedByRemote { code, .. }) => assert_eq!(code, 1006),
        other => panic!("expected abnormal close, got {:?}", other),
    }
    assert!(stream.is_closed());
}

#[tokio::test]
async fn test_close_sends_normal_close_frame() {
    let (mut server, stream) = connected_pair().await;

    stream.close(&CancellationToken::new()).await.unwrap();
    assert!(stream.is_closed());
    assert!(stream.transport().close_initiated());

    let message = timeout(Duration::from_secs(5), server.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    match message {
        Message::Close(Some(frame)) => assert_eq!(frame.code, CloseCode::Normal),
        other => panic!("expected close frame, got {:?}", other),
    }
}

#[tokio::test]
async fn test_io_after_client_close() {
    let (_server, stream) = connected_pair().await;
    let cancel = CancellationToken::new();

    stream.close(&cancel).await.unwrap();

    let mut buf = [0u8; 8];
    assert!(matches!(
        stream.read(&mut buf, &cancel).await,
        Err(StreamError::Closed)
    ));
    assert!(matches!(
        stream.write(b"x", &cancel).await,
        Err(StreamError::Closed)
    ));

    // Underneath the guard, the transport itself refuses without trying
    assert!(matches!(
        stream.transport().read(&mut buf).await,
        Err(StreamError::ClosedByClient)
    ));
    assert!(matches!(
        stream.transport().write(b"x").await,
        Err(StreamError::ClosedByClient)
    ));

    stream.close(&cancel).await.unwrap();
}

#[tokio::test]
async fn test_close_when_connection_already_dropped() {
    let (server, stream) = connected_pair().await;

    drop(server);

    stream.close(&CancellationToken::new()).await.unwrap();
    assert!(stream.is_closed());
}

#[tokio::test]
async fn test_close_interrupts_pending_read() {
    let (mut server, stream) = connected_pair().await;
    let stream = std::sync::Arc::new(stream);

    let reader = {
        let stream = stream.clone();
        tokio::spawn(async move {
            let mut buf = [0u8; 8];
            stream.read(&mut buf, &CancellationToken::new()).await
        })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    timeout(
        Duration::from_secs(5),
        stream.close(&CancellationToken::new()),
    )
    .await
    .expect("close waited for the pending read")
    .unwrap();

    assert!(matches!(reader.await.unwrap(), Err(StreamError::Closed)));
    assert!(stream.is_closed());
    assert!(stream.transport().close_initiated());

    // The interrupted read must not keep the close frame from going out
    let message = timeout(Duration::from_secs(5), server.next())
        .await
        .expect("no close frame reached the server")
        .expect("connection ended without a close frame")
        .unwrap();
    match message {
        Message::Close(Some(frame)) => assert_eq!(frame.code, CloseCode::Normal),
        other => panic!("expected a close frame, got {:?}", other),
    }
}
