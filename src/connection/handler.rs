// src/connection/handler.rs

//! Defines the `ConnectionHandler`, the reader task that owns one client connection
//! from the token handshake until it disconnects.

use super::guard::ConnectionGuard;
use super::outbox::OutboxWriter;
use crate::config::Config;
use crate::core::auth::{ClientRole, TokenAuthenticator, extract_token};
use crate::core::errors::RelayError;
use crate::core::events::{EventSender, RelayEvent};
use crate::core::handle::{CloseReceiver, ConnectionHandle, ConnectionParts};
use crate::core::identity::ConnectionIdentity;
use crate::core::metrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

pub const TOKEN_PROMPT: &[u8] = b"Paste token below:\n";
pub const TOKEN_REJECTED: &[u8] = b"Invalid token, closing connection\n";

/// Size of the single read that carries the client's token.
pub const HANDSHAKE_BUFFER_SIZE: usize = 64;

/// Delay before answering a wrong token, to slow down guessing.
const REJECTION_DELAY: Duration = Duration::from_millis(100);

/// Per-connection limits, taken from the relay configuration.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionSettings {
    pub read_buffer_size: usize,
    pub outbox_capacity: usize,
    pub handshake_timeout: Duration,
    pub write_timeout: Duration,
}

impl ConnectionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            read_buffer_size: config.relay.read_buffer_size,
            outbox_capacity: config.relay.outbox_capacity,
            handshake_timeout: config.relay.handshake_timeout,
            write_timeout: config.relay.write_timeout,
        }
    }
}

/// Performs the handshake for one connection, then turns every read into an event
/// for the relay event loop.
pub struct ConnectionHandler<S> {
    stream: S,
    identity: ConnectionIdentity,
    authenticator: Arc<TokenAuthenticator>,
    events: EventSender,
    settings: ConnectionSettings,
    global_shutdown_rx: broadcast::Receiver<()>,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    pub fn new(
        stream: S,
        identity: ConnectionIdentity,
        authenticator: Arc<TokenAuthenticator>,
        events: EventSender,
        settings: ConnectionSettings,
        global_shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            stream,
            identity,
            authenticator,
            events,
            settings,
            global_shutdown_rx,
        }
    }

    /// Runs the connection to completion. `Connected` is only ever sent after a
    /// successful handshake, and every exit reports `Disconnected` unless the
    /// event loop itself is gone.
    pub async fn run(mut self) -> Result<(), RelayError> {
        let _guard = ConnectionGuard::new(self.identity);
        let ConnectionParts {
            handle,
            outbox_rx,
            mut close_rx,
        } = ConnectionHandle::new(self.identity, self.settings.outbox_capacity);

        let (mut reader, mut writer) = tokio::io::split(self.stream);

        let role = match handshake(
            &mut reader,
            &mut writer,
            &self.authenticator,
            self.settings.handshake_timeout,
        )
        .await
        {
            Ok(role) => role,
            Err(e) => {
                metrics::HANDSHAKE_FAILURES_TOTAL.inc();
                info!("Handshake with {} failed: {}", self.identity, e);
                let _ = writer.shutdown().await;
                let _ = self.events.send(RelayEvent::Disconnected { conn: handle }).await;
                return Err(e);
            }
        };
        debug!("{} authenticated as {:?}.", self.identity, role);

        // From here on the event loop is the only writer, through the outbox.
        let outbox_writer =
            OutboxWriter::new(writer, outbox_rx, self.identity, self.settings.write_timeout);
        tokio::spawn(outbox_writer.run());

        if self
            .events
            .send(RelayEvent::Connected {
                conn: handle.clone(),
                role,
            })
            .await
            .is_err()
        {
            return Err(RelayError::EventLoopClosed);
        }

        let result = read_loop(
            &mut reader,
            &handle,
            &self.events,
            self.settings.read_buffer_size,
            &mut close_rx,
            &mut self.global_shutdown_rx,
        )
        .await;

        let _ = self.events.send(RelayEvent::Disconnected { conn: handle }).await;
        result
    }
}

/// Prompts for the token, reads it, and checks it. On a mismatch the rejection
/// line is written before returning `InvalidToken`.
pub async fn handshake<R, W>(
    reader: &mut R,
    writer: &mut W,
    authenticator: &TokenAuthenticator,
    timeout: Duration,
) -> Result<ClientRole, RelayError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    writer.write_all(TOKEN_PROMPT).await?;
    writer.flush().await?;

    let mut buf = [0u8; HANDSHAKE_BUFFER_SIZE];
    let n = tokio::time::timeout(timeout, reader.read(&mut buf)).await??;
    if n == 0 {
        return Err(RelayError::HandshakeAborted);
    }

    let token = extract_token(&buf[..n]);
    match authenticator.verify(&token) {
        Some(role) => Ok(role),
        None => {
            tokio::time::sleep(REJECTION_DELAY).await;
            writer.write_all(TOKEN_REJECTED).await?;
            writer.flush().await?;
            Err(RelayError::InvalidToken)
        }
    }
}

/// Reads fixed-size chunks until the peer leaves, the relay closes the connection,
/// or the server shuts down. Errors are never retried.
async fn read_loop<S: AsyncRead>(
    reader: &mut ReadHalf<S>,
    handle: &ConnectionHandle,
    events: &EventSender,
    buffer_size: usize,
    close_rx: &mut CloseReceiver,
    global_shutdown_rx: &mut broadcast::Receiver<()>,
) -> Result<(), RelayError> {
    let identity = handle.identity();
    let mut buf = vec![0u8; buffer_size];

    loop {
        tokio::select! {
            biased;

            _ = global_shutdown_rx.recv() => {
                debug!("Reader for {} received global shutdown signal.", identity);
                return Ok(());
            }
            _ = close_rx.recv() => {
                debug!("Reader for {} closed by the relay.", identity);
                return Ok(());
            }
            result = reader.read(&mut buf) => {
                match result {
                    Ok(0) => {
                        debug!("Connection from {} closed by peer.", identity);
                        return Ok(());
                    }
                    Ok(n) => {
                        let event = RelayEvent::from_read(handle.clone(), &buf[..n]);
                        if events.send(event).await.is_err() {
                            return Err(RelayError::EventLoopClosed);
                        }
                    }
                    Err(e) => {
                        let e = RelayError::from(e);
                        if e.is_normal_disconnect() {
                            debug!("Connection from {} closed by peer: {}", identity, e);
                            return Ok(());
                        }
                        warn!("Read error for {}: {}", identity, e);
                        return Err(e);
                    }
                }
            }
        }
    }
}
