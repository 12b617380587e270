// tests/integration/test_helpers.rs

//! Test helpers shared by the relay, handshake, and end-to-end tests.

#![allow(dead_code)]

use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokenrelay::config::{Config, PolicyConfig};
use tokenrelay::connection::{ConnectionHandler, ConnectionSettings};
use tokenrelay::core::auth::{ClientRole, TokenAuthenticator};
use tokenrelay::core::events::event_queue;
use tokenrelay::core::handle::{CloseReceiver, ConnectionHandle, ConnectionParts, OutboxReceiver};
use tokenrelay::core::identity::{BanScope, ConnectionIdentity, SessionId};
use tokenrelay::core::{EventLoop, RelayEvent};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

pub const RELAY_TOKEN: &str = "0123456789abcdef0123456789abcdef";
pub const OPERATOR_TOKEN: &str = "fedcba9876543210fedcba9876543210";

/// Sets up minimal tracing for tests; ignores the error if already initialized.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::new("warn"))
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

pub fn addr(ip: [u8; 4], port: u16) -> SocketAddr {
    SocketAddr::from((ip, port))
}

pub fn authenticator() -> Arc<TokenAuthenticator> {
    Arc::new(TokenAuthenticator::new(
        RELAY_TOKEN.to_string(),
        OPERATOR_TOKEN.to_string(),
    ))
}

/// A small policy that makes bans reachable in a few steps.
pub fn test_policy() -> PolicyConfig {
    PolicyConfig {
        message_rate: Duration::from_secs(1),
        ban_limit: 3,
        ban_duration: Duration::from_secs(10),
        ban_scope: BanScope::Ip,
        ban_purge_interval: Duration::from_secs(60),
    }
}

/// The event-loop side of a fake connection: its handle plus the receivers the
/// reader and writer tasks would normally own.
pub struct TestClient {
    pub handle: ConnectionHandle,
    pub outbox_rx: OutboxReceiver,
    pub close_rx: CloseReceiver,
}

impl TestClient {
    pub fn new(session_id: SessionId, addr: SocketAddr) -> Self {
        Self::with_capacity(session_id, addr, 64)
    }

    pub fn with_capacity(session_id: SessionId, addr: SocketAddr, capacity: usize) -> Self {
        let ConnectionParts {
            handle,
            outbox_rx,
            close_rx,
        } = ConnectionHandle::new(ConnectionIdentity::new(session_id, addr), capacity);
        Self {
            handle,
            outbox_rx,
            close_rx,
        }
    }

    pub fn identity(&self) -> ConnectionIdentity {
        self.handle.identity()
    }

    pub fn session_id(&self) -> SessionId {
        self.identity().session_id()
    }

    pub fn connected(&self, role: ClientRole) -> RelayEvent {
        RelayEvent::Connected {
            conn: self.handle.clone(),
            role,
        }
    }

    pub fn disconnected(&self) -> RelayEvent {
        RelayEvent::Disconnected {
            conn: self.handle.clone(),
        }
    }

    pub fn message(&self, payload: &[u8]) -> RelayEvent {
        RelayEvent::NewMessage {
            conn: self.handle.clone(),
            payload: Bytes::copy_from_slice(payload),
        }
    }

    pub fn command(&self, payload: &str) -> RelayEvent {
        RelayEvent::Command {
            conn: self.handle.clone(),
            payload: Bytes::copy_from_slice(payload.as_bytes()),
        }
    }

    /// Everything queued for this client so far.
    pub fn received(&mut self) -> Vec<Bytes> {
        let mut chunks = Vec::new();
        while let Ok(chunk) = self.outbox_rx.try_recv() {
            chunks.push(chunk);
        }
        chunks
    }

    /// Everything queued for this client, as lines without the trailing newline.
    pub fn lines(&mut self) -> Vec<String> {
        self.received()
            .iter()
            .map(|chunk| {
                String::from_utf8_lossy(chunk)
                    .trim_end_matches('\n')
                    .to_string()
            })
            .collect()
    }

    pub fn was_closed(&mut self) -> bool {
        !matches!(self.close_rx.try_recv(), Err(TryRecvError::Empty))
    }
}

/// A relay running over real TCP on an ephemeral localhost port.
pub struct TestRelay {
    pub addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
}

impl TestRelay {
    pub async fn start(config: Config) -> Self {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind test listener");
        let addr = listener.local_addr().expect("Listener has no address");

        let (shutdown_tx, _) = broadcast::channel(1);
        let (event_tx, event_rx) = event_queue(config.relay.event_queue_capacity);
        let event_loop = EventLoop::new(config.policy.clone(), event_rx);
        tokio::spawn(event_loop.run(shutdown_tx.subscribe()));

        let settings = ConnectionSettings::from_config(&config);
        let authenticator = authenticator();
        let accept_shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut session_id: SessionId = 0;
            while let Ok((socket, peer)) = listener.accept().await {
                session_id += 1;
                let handler = ConnectionHandler::new(
                    socket,
                    ConnectionIdentity::new(session_id, peer),
                    authenticator.clone(),
                    event_tx.clone(),
                    settings,
                    accept_shutdown.subscribe(),
                );
                tokio::spawn(async move {
                    let _ = handler.run().await;
                });
            }
        });

        Self { addr, shutdown_tx }
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// The client side of a TCP connection to a `TestRelay`.
pub struct TestPeer {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

pub const READ_TIMEOUT: Duration = Duration::from_secs(2);

impl TestPeer {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr)
            .await
            .expect("Failed to connect to test relay");
        let (read_half, writer) = stream.into_split();
        Self {
            reader: BufReader::new(read_half),
            writer,
        }
    }

    /// Connects, answers the prompt with `token`, and returns the welcome line.
    pub async fn authenticated(addr: SocketAddr, token: &str) -> (Self, String) {
        let mut peer = Self::connect(addr).await;
        assert_eq!(peer.read_line().await, "Paste token below:");
        peer.send(format!("Token: {token}\n").as_bytes()).await;
        let welcome = peer.read_line().await;
        (peer, welcome)
    }

    pub async fn send(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.expect("Write failed");
    }

    pub async fn read_line(&mut self) -> String {
        let mut line = String::new();
        tokio::time::timeout(READ_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .expect("Timed out waiting for a line")
            .expect("Read failed");
        line.trim_end_matches('\n').to_string()
    }

    pub async fn read_chunk(&mut self) -> Vec<u8> {
        let mut buf = [0u8; 1024];
        let n = tokio::time::timeout(READ_TIMEOUT, self.reader.read(&mut buf))
            .await
            .expect("Timed out waiting for data")
            .expect("Read failed");
        buf[..n].to_vec()
    }

    /// True if the relay closed the connection (EOF or reset) within the read timeout.
    pub async fn is_closed_by_relay(&mut self) -> bool {
        let mut buf = [0u8; 64];
        match tokio::time::timeout(READ_TIMEOUT, self.reader.read(&mut buf)).await {
            Ok(Ok(0)) | Ok(Err(_)) => true,
            Ok(Ok(_)) | Err(_) => false,
        }
    }

    /// True if nothing at all arrives within `window`.
    pub async fn stays_silent(&mut self, window: Duration) -> bool {
        let mut buf = [0u8; 64];
        tokio::time::timeout(window, self.reader.read(&mut buf))
            .await
            .is_err()
    }
}
