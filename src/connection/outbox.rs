// src/connection/outbox.rs

//! The per-connection writer task that drains a client's outbox onto its socket.

use crate::core::errors::is_normal_disconnect_kind;
use crate::core::handle::OutboxReceiver;
use crate::core::identity::ConnectionIdentity;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

/// Owns the write half of a connection once the handshake has succeeded.
///
/// The event loop only ever enqueues; this task is the one that may block on a
/// slow client. It exits when every `ConnectionHandle` is dropped (after flushing
/// whatever is still queued) or when a write fails or times out.
pub struct OutboxWriter<W> {
    writer: W,
    rx: OutboxReceiver,
    identity: ConnectionIdentity,
    write_timeout: Duration,
}

impl<W: AsyncWrite + Unpin> OutboxWriter<W> {
    pub fn new(
        writer: W,
        rx: OutboxReceiver,
        identity: ConnectionIdentity,
        write_timeout: Duration,
    ) -> Self {
        Self {
            writer,
            rx,
            identity,
            write_timeout,
        }
    }

    pub async fn run(mut self) {
        while let Some(chunk) = self.rx.recv().await {
            match tokio::time::timeout(self.write_timeout, self.writer.write_all(&chunk)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) if is_normal_disconnect_kind(e.kind()) => {
                    debug!("Peer {} went away while writing: {}", self.identity, e);
                    break;
                }
                Ok(Err(e)) => {
                    warn!("Write to {} failed: {}", self.identity, e);
                    break;
                }
                Err(_) => {
                    warn!(
                        "Write to {} timed out after {:?}, giving up on this client.",
                        self.identity, self.write_timeout
                    );
                    break;
                }
            }
        }

        // Dropping the receiver makes further deliveries fail with `ConnectionClosed`.
        self.rx.close();
        let _ = self.writer.shutdown().await;
        debug!("Writer for {} finished.", self.identity);
    }
}
