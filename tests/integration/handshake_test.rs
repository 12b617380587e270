// tests/integration/handshake_test.rs

use super::test_helpers::{OPERATOR_TOKEN, RELAY_TOKEN, authenticator, init_tracing};
use bytes::Bytes;
use std::net::SocketAddr;
use std::time::Duration;
use tokenrelay::connection::{
    ConnectionHandler, ConnectionSettings, TOKEN_PROMPT, TOKEN_REJECTED, handshake,
};
use tokenrelay::core::RelayError;
use tokenrelay::core::RelayEvent;
use tokenrelay::core::auth::ClientRole;
use tokenrelay::core::events::{EventReceiver, event_queue};
use tokenrelay::core::identity::ConnectionIdentity;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

fn settings(handshake_timeout: Duration) -> ConnectionSettings {
    ConnectionSettings {
        read_buffer_size: 512,
        outbox_capacity: 8,
        handshake_timeout,
        write_timeout: Duration::from_secs(1),
    }
}

struct Harness {
    client: BufReader<DuplexStream>,
    events: EventReceiver,
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<Result<(), RelayError>>,
}

fn spawn_handler(handshake_timeout: Duration) -> Harness {
    init_tracing();
    let (client, server) = tokio::io::duplex(4096);
    let (event_tx, events) = event_queue(16);
    let (shutdown_tx, _) = broadcast::channel(1);
    let addr: SocketAddr = "127.0.0.1:40000".parse().unwrap();
    let handler = ConnectionHandler::new(
        server,
        ConnectionIdentity::new(1, addr),
        authenticator(),
        event_tx,
        settings(handshake_timeout),
        shutdown_tx.subscribe(),
    );
    Harness {
        client: BufReader::new(client),
        events,
        shutdown_tx,
        task: tokio::spawn(handler.run()),
    }
}

async fn next_event(events: &mut EventReceiver) -> RelayEvent {
    tokio::time::timeout(EVENT_TIMEOUT, events.recv())
        .await
        .expect("Timed out waiting for an event")
        .expect("Event queue closed")
}

impl Harness {
    async fn read_line(&mut self) -> String {
        let mut line = String::new();
        self.client.read_line(&mut line).await.unwrap();
        line
    }

    async fn authenticate(&mut self, token: &str) -> RelayEvent {
        assert_eq!(self.read_line().await.as_bytes(), TOKEN_PROMPT);
        self.client
            .write_all(format!("{token}\n").as_bytes())
            .await
            .unwrap();
        next_event(&mut self.events).await
    }
}

#[tokio::test]
async fn test_handshake_rejects_wrong_token() {
    let mock = tokio_test::io::Builder::new()
        .write(TOKEN_PROMPT)
        .read(b"Token: not-the-token\n")
        .write(TOKEN_REJECTED)
        .build();
    let (mut reader, mut writer) = tokio::io::split(mock);

    let err = handshake(&mut reader, &mut writer, &authenticator(), EVENT_TIMEOUT)
        .await
        .unwrap_err();
    assert_eq!(err, RelayError::InvalidToken);
}

#[tokio::test]
async fn test_handshake_accepts_member_token() {
    let token_line = format!("Token: {RELAY_TOKEN}\r\n");
    let mock = tokio_test::io::Builder::new()
        .write(TOKEN_PROMPT)
        .read(token_line.as_bytes())
        .build();
    let (mut reader, mut writer) = tokio::io::split(mock);

    let role = handshake(&mut reader, &mut writer, &authenticator(), EVENT_TIMEOUT)
        .await
        .unwrap();
    assert_eq!(role, ClientRole::Member);
}

#[tokio::test]
async fn test_handshake_accepts_operator_token() {
    let mock = tokio_test::io::Builder::new()
        .write(TOKEN_PROMPT)
        .read(OPERATOR_TOKEN.as_bytes())
        .build();
    let (mut reader, mut writer) = tokio::io::split(mock);

    let role = handshake(&mut reader, &mut writer, &authenticator(), EVENT_TIMEOUT)
        .await
        .unwrap();
    assert_eq!(role, ClientRole::Operator);
}

#[tokio::test]
async fn test_handler_reports_connected_then_messages() {
    let mut h = spawn_handler(EVENT_TIMEOUT);

    let conn = match h.authenticate(RELAY_TOKEN).await {
        RelayEvent::Connected { conn, role } => {
            assert_eq!(role, ClientRole::Member);
            conn
        }
        other => panic!("Expected Connected, got {}", other.kind()),
    };

    // Writes queued by the event loop reach the client through the outbox writer.
    conn.send_line("welcome").unwrap();
    assert_eq!(h.read_line().await, "welcome\n");

    h.client.write_all(b"hello").await.unwrap();
    match next_event(&mut h.events).await {
        RelayEvent::NewMessage { payload, .. } => assert_eq!(payload, Bytes::from_static(b"hello")),
        other => panic!("Expected NewMessage, got {}", other.kind()),
    }

    h.client.write_all(b"!ban 7").await.unwrap();
    match next_event(&mut h.events).await {
        RelayEvent::Command { payload, .. } => assert_eq!(payload, Bytes::from_static(b"ban 7")),
        other => panic!("Expected Command, got {}", other.kind()),
    }

    drop(h.client);
    assert_eq!(next_event(&mut h.events).await.kind(), "disconnected");
    assert!(h.task.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_handler_wrong_token_never_connects() {
    let mut h = spawn_handler(EVENT_TIMEOUT);

    let event = h.authenticate("guess").await;
    assert_eq!(event.kind(), "disconnected");
    assert_eq!(h.read_line().await.as_bytes(), TOKEN_REJECTED);

    let mut rest = Vec::new();
    h.client.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());
    assert_eq!(h.task.await.unwrap(), Err(RelayError::InvalidToken));
}

#[tokio::test]
async fn test_handler_handshake_timeout() {
    let mut h = spawn_handler(Duration::from_millis(50));

    assert_eq!(h.read_line().await.as_bytes(), TOKEN_PROMPT);
    assert_eq!(next_event(&mut h.events).await.kind(), "disconnected");
    assert_eq!(h.task.await.unwrap(), Err(RelayError::HandshakeTimeout));
}

#[tokio::test]
async fn test_handler_eof_during_handshake() {
    let mut h = spawn_handler(EVENT_TIMEOUT);

    assert_eq!(h.read_line().await.as_bytes(), TOKEN_PROMPT);
    drop(h.client);
    assert_eq!(next_event(&mut h.events).await.kind(), "disconnected");
    assert_eq!(h.task.await.unwrap(), Err(RelayError::HandshakeAborted));
}

#[tokio::test]
async fn test_handler_stops_when_relay_closes_connection() {
    let mut h = spawn_handler(EVENT_TIMEOUT);

    let RelayEvent::Connected { conn, .. } = h.authenticate(OPERATOR_TOKEN).await else {
        panic!("Expected Connected");
    };
    conn.close();

    assert_eq!(next_event(&mut h.events).await.kind(), "disconnected");
    assert!(h.task.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_handler_stops_on_global_shutdown() {
    let mut h = spawn_handler(EVENT_TIMEOUT);

    assert_eq!(h.authenticate(RELAY_TOKEN).await.kind(), "connected");
    h.shutdown_tx.send(()).unwrap();

    assert_eq!(next_event(&mut h.events).await.kind(), "disconnected");
    assert!(h.task.await.unwrap().is_ok());
}
