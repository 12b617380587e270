// src/core/handle.rs

//! The handle through which the event loop talks to a single connection.

use super::errors::RelayError;
use super::identity::ConnectionIdentity;
use bytes::Bytes;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc};

pub type OutboxReceiver = mpsc::Receiver<Bytes>;
pub type CloseReceiver = broadcast::Receiver<()>;

/// A cheaply cloneable handle to one connection.
///
/// Writes never touch the socket directly: they are queued on a bounded outbox
/// that a dedicated writer task drains. Closing signals the connection's reader
/// task to stop; once every handle is dropped the writer flushes what is left
/// in the outbox and shuts the socket down.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    identity: ConnectionIdentity,
    outbox: mpsc::Sender<Bytes>,
    close_tx: broadcast::Sender<()>,
}

/// Everything created alongside a new handle. The receivers belong to the
/// connection's writer and reader tasks respectively.
pub struct ConnectionParts {
    pub handle: ConnectionHandle,
    pub outbox_rx: OutboxReceiver,
    pub close_rx: CloseReceiver,
}

impl ConnectionHandle {
    /// Creates a handle with an outbox holding at most `outbox_capacity` chunks.
    pub fn new(identity: ConnectionIdentity, outbox_capacity: usize) -> ConnectionParts {
        let (outbox, outbox_rx) = mpsc::channel(outbox_capacity.max(1));
        let (close_tx, close_rx) = broadcast::channel(1);
        ConnectionParts {
            handle: Self {
                identity,
                outbox,
                close_tx,
            },
            outbox_rx,
            close_rx,
        }
    }

    pub fn identity(&self) -> ConnectionIdentity {
        self.identity
    }

    /// Queues raw bytes for the client without waiting.
    pub fn deliver(&self, payload: Bytes) -> Result<(), RelayError> {
        match self.outbox.try_send(payload) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(RelayError::OutboxFull),
            Err(TrySendError::Closed(_)) => Err(RelayError::ConnectionClosed),
        }
    }

    /// Queues a system line for the client, appending the trailing newline.
    pub fn send_line(&self, line: &str) -> Result<(), RelayError> {
        let mut text = String::with_capacity(line.len() + 1);
        text.push_str(line);
        text.push('\n');
        self.deliver(Bytes::from(text))
    }

    /// Asks the connection's reader to stop. Closing twice is a no-op.
    pub fn close(&self) {
        // An error only means the reader is already gone.
        let _ = self.close_tx.send(());
    }

    /// True once the writer task has dropped its end of the outbox.
    pub fn is_closed(&self) -> bool {
        self.outbox.is_closed()
    }
}
