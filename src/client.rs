//! A thin, synchronous-style request/response client.
//!
//! This is a convenience for tools, tests, and simple integrations — it is
//! not used by the server pipeline itself. Requests are strictly
//! request-then-response: the client does not pipeline, and concurrent
//! callers are serialized by an internal mutex rather than multiplexed or
//! correlated by `messageId`.

use std::sync::atomic::{AtomicU32, Ordering};

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::Mutex;

use crate::error::ConnectionError;
use crate::frame::{BodyType, Decoder, Frame};

/// Builder for [`Client`], mirroring the server's builder for the handful of
/// protocol defaults a caller might want to override.
#[derive(Debug, Clone, Copy)]
pub struct ClientBuilder {
    max_length: u32,
    body_type: u8,
}

impl ClientBuilder {
    pub fn new() -> ClientBuilder {
        ClientBuilder {
            max_length: 65536,
            body_type: BodyType::Plain.into(),
        }
    }

    pub fn max_length(mut self, max_length: u32) -> Self {
        self.max_length = max_length;
        self
    }

    pub fn body_type(mut self, body_type: u8) -> Self {
        self.body_type = body_type;
        self
    }

    pub async fn connect(self, addr: impl ToSocketAddrs) -> Result<Client, ConnectionError> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Client {
            state: Mutex::new(ClientState {
                stream,
                read_buf: BytesMut::new(),
            }),
            decoder: Decoder::new(self.max_length),
            body_type: self.body_type,
            next_message_id: AtomicU32::new(1),
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        ClientBuilder::new()
    }
}

struct ClientState {
    stream: TcpStream,
    read_buf: BytesMut,
}

/// A single connection plus the bookkeeping needed to send one frame and
/// wait for exactly one reply.
pub struct Client {
    state: Mutex<ClientState>,
    decoder: Decoder,
    body_type: u8,
    next_message_id: AtomicU32,
}

impl Client {
    /// Connect with default protocol settings. Use [`ClientBuilder`] for
    /// non-default `maxLength`/`bodyType`.
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Client, ConnectionError> {
        ClientBuilder::new().connect(addr).await
    }

    /// Send a body as an application frame and return the reply body.
    pub async fn send(&self, body: impl Into<BytesMut>) -> Result<BytesMut, ConnectionError> {
        let frame = Frame::app(self.next_id(), self.body_type, 0, body.into());
        let reply = self.send_frame(frame).await?;
        Ok(reply.body)
    }

    /// Send an arbitrary frame (e.g. a hand-built ping) and return the reply.
    pub async fn send_frame(&self, frame: Frame) -> Result<Frame, ConnectionError> {
        let mut state = self.state.lock().await;

        let mut out = BytesMut::new();
        frame.encode(&mut out);
        state.stream.write_all(&out).await?;
        state.stream.flush().await?;

        loop {
            if let Some(reply) = self.decoder.decode(&mut state.read_buf)? {
                return Ok(reply);
            }
            let mut chunk = [0u8; 4096];
            let n = state.stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(ConnectionError::Eof);
            }
            state.read_buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// Send a ping frame and wait for its echo.
    pub async fn ping(&self) -> Result<(), ConnectionError> {
        let id = self.next_id();
        let reply = self.send_frame(Frame::ping(id, 0)).await?;
        debug_assert!(reply.is_ping());
        Ok(())
    }

    /// Close the underlying connection.
    pub async fn close(&self) -> std::io::Result<()> {
        self.state.lock().await.stream.shutdown().await
    }

    fn next_id(&self) -> u32 {
        self.next_message_id.fetch_add(1, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::Server;
    use tokio::net::TcpListener;

    async fn free_port() -> u16 {
        TcpListener::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn send_round_trips_through_an_echo_server() {
        let port = free_port().await;
        let server = Server::builder("127.0.0.1", port)
            .handle(|body| body)
            .build()
            .unwrap();

        let server_task = tokio::spawn(async move {
            server.start().await.unwrap();
        });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let client = Client::connect(("127.0.0.1", port)).await.unwrap();
        let reply = client.send(BytesMut::from(&b"hello"[..])).await.unwrap();
        assert_eq!(&reply[..], b"hello");

        client.close().await.unwrap();
        server_task.abort();
    }

    #[tokio::test]
    async fn ping_gets_echoed_without_invoking_the_handler() {
        let port = free_port().await;
        let server = Server::builder("127.0.0.1", port)
            .handle(|_: BytesMut| panic!("handler must not run for a ping"))
            .build()
            .unwrap();

        let server_task = tokio::spawn(async move {
            server.start().await.unwrap();
        });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let client = Client::connect(("127.0.0.1", port)).await.unwrap();
        client.ping().await.unwrap();

        client.close().await.unwrap();
        server_task.abort();
    }

    /// Hand-assembles a 16-byte frame header so malformed frames (bad
    /// marker, declared-oversize body) can be sent without going through
    /// the well-formed `Frame`/`Decoder` types.
    fn raw_header(marker: [u8; 2], version: u8, body_type: u8, message_id: u32, body_length: u32, reserved: u32) -> Vec<u8> {
        let mut header = Vec::with_capacity(16);
        header.extend_from_slice(&marker);
        header.push(version);
        header.push(body_type);
        header.extend_from_slice(&message_id.to_be_bytes());
        header.extend_from_slice(&body_length.to_be_bytes());
        header.extend_from_slice(&reserved.to_be_bytes());
        header
    }

    #[tokio::test]
    async fn bad_marker_frame_closes_the_connection_without_a_reply() {
        let port = free_port().await;
        let server = Server::builder("127.0.0.1", port).handle(|b| b).build().unwrap();
        let server_task = tokio::spawn(async move {
            server.start().await.unwrap();
        });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let header = raw_header(*b"XX", 1, 1, 1, 0, 0);
        stream.write_all(&header).await.unwrap();
        stream.flush().await.unwrap();

        let mut buf = [0u8; 16];
        let n = tokio::time::timeout(std::time::Duration::from_secs(1), stream.read(&mut buf))
            .await
            .expect("connection must close promptly")
            .unwrap();
        assert_eq!(n, 0, "server must close the connection without replying to a bad marker");

        server_task.abort();
    }

    #[tokio::test]
    async fn oversize_header_closes_the_connection_without_reading_the_body() {
        let port = free_port().await;
        let server = Server::builder("127.0.0.1", port).handle(|b| b).build().unwrap();
        let server_task = tokio::spawn(async move {
            server.start().await.unwrap();
        });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let header = raw_header(Frame::FIXED_MARKER, 1, 1, 1, 0x0001_0001, 0);
        stream.write_all(&header).await.unwrap();
        stream.flush().await.unwrap();
        // deliberately never send the (oversize) declared body

        let mut buf = [0u8; 16];
        let n = tokio::time::timeout(std::time::Duration::from_secs(1), stream.read(&mut buf))
            .await
            .expect("connection must close promptly")
            .unwrap();
        assert_eq!(n, 0, "server must close the connection without waiting for an oversize body");

        server_task.abort();
    }

    #[tokio::test]
    async fn pipelined_frames_all_round_trip_with_unique_message_ids() {
        use std::collections::HashSet;

        let port = free_port().await;
        let server = Server::builder("127.0.0.1", port).handle(|b| b).build().unwrap();
        let server_task = tokio::spawn(async move {
            server.start().await.unwrap();
        });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let mut out = BytesMut::new();
        for id in 1..=1000u32 {
            Frame::app(id, 1, 0, BytesMut::from(&b"x"[..])).encode(&mut out);
        }
        stream.write_all(&out).await.unwrap();
        stream.flush().await.unwrap();

        let decoder = Decoder::new(65536);
        let mut acc = BytesMut::new();
        let mut seen = HashSet::new();
        let mut chunk = [0u8; 4096];
        while seen.len() < 1000 {
            while let Some(frame) = decoder.decode(&mut acc).unwrap() {
                seen.insert(frame.message_id);
            }
            if seen.len() >= 1000 {
                break;
            }
            let n = stream.read(&mut chunk).await.unwrap();
            assert!(n > 0, "connection closed before all 1000 replies arrived");
            acc.extend_from_slice(&chunk[..n]);
        }

        assert_eq!(seen, (1..=1000u32).collect::<HashSet<_>>());

        server_task.abort();
    }

    #[tokio::test]
    async fn graceful_close_drains_replies_and_close_returns_promptly() {
        use std::collections::HashSet;
        use std::sync::Arc;

        let port = free_port().await;
        let server = Arc::new(Server::builder("127.0.0.1", port).handle(|b| b).build().unwrap());
        let server_for_task = server.clone();
        let server_task = tokio::spawn(async move {
            server_for_task.start().await.unwrap();
        });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let mut out = BytesMut::new();
        for id in 1..=100u32 {
            Frame::app(id, 1, 0, BytesMut::from(&b"x"[..])).encode(&mut out);
        }
        stream.write_all(&out).await.unwrap();
        stream.flush().await.unwrap();
        stream.shutdown().await.unwrap(); // half-close: no more requests from this client

        let decoder = Decoder::new(65536);
        let mut acc = BytesMut::new();
        let mut seen = HashSet::new();
        let mut chunk = [0u8; 4096];
        while seen.len() < 100 {
            while let Some(frame) = decoder.decode(&mut acc).unwrap() {
                seen.insert(frame.message_id);
            }
            if seen.len() >= 100 {
                break;
            }
            let n = stream.read(&mut chunk).await.unwrap();
            assert!(n > 0, "connection closed before all 100 replies arrived");
            acc.extend_from_slice(&chunk[..n]);
        }
        assert_eq!(seen, (1..=100u32).collect::<HashSet<_>>());

        let closed = tokio::time::timeout(std::time::Duration::from_secs(1), server.close()).await;
        assert!(closed.is_ok(), "close() must return within one second of the connection draining");

        server_task.await.unwrap();
    }
}
