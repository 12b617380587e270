// src/core/events.rs

//! Defines the events connection readers send to the event loop.
//!
//! The event queue is the only channel between reader tasks and the loop; no other
//! mutable state is shared between them.

use super::auth::ClientRole;
use super::handle::ConnectionHandle;
use super::identity::ConnectionIdentity;
use bytes::Bytes;
use tokio::sync::mpsc;

pub type EventSender = mpsc::Sender<RelayEvent>;
pub type EventReceiver = mpsc::Receiver<RelayEvent>;

/// Everything that can happen to a connection, as seen by the event loop.
#[derive(Debug, Clone)]
pub enum RelayEvent {
    /// The connection presented a valid token.
    Connected {
        conn: ConnectionHandle,
        role: ClientRole,
    },
    /// The connection is gone, or never got past the handshake.
    Disconnected { conn: ConnectionHandle },
    /// One read's worth of chat payload.
    NewMessage {
        conn: ConnectionHandle,
        payload: Bytes,
    },
    /// A read that started with `!`, with the `!` stripped.
    Command {
        conn: ConnectionHandle,
        payload: Bytes,
    },
}

impl RelayEvent {
    pub fn conn(&self) -> &ConnectionHandle {
        match self {
            RelayEvent::Connected { conn, .. }
            | RelayEvent::Disconnected { conn }
            | RelayEvent::NewMessage { conn, .. }
            | RelayEvent::Command { conn, .. } => conn,
        }
    }

    /// The identity of the connection that produced the event.
    pub fn identity(&self) -> ConnectionIdentity {
        self.conn().identity()
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RelayEvent::Connected { .. } => "connected",
            RelayEvent::Disconnected { .. } => "disconnected",
            RelayEvent::NewMessage { .. } => "message",
            RelayEvent::Command { .. } => "command",
        }
    }

    /// Classifies one read from an authenticated client. A read longer than one byte
    /// that starts with `!` is a command; everything else is a chat message.
    pub fn from_read(conn: ConnectionHandle, chunk: &[u8]) -> Self {
        if chunk.len() > 1 && chunk[0] == b'!' {
            RelayEvent::Command {
                conn,
                payload: Bytes::copy_from_slice(&chunk[1..]),
            }
        } else {
            RelayEvent::NewMessage {
                conn,
                payload: Bytes::copy_from_slice(chunk),
            }
        }
    }
}

/// Creates the single bounded queue feeding the event loop.
pub fn event_queue(capacity: usize) -> (EventSender, EventReceiver) {
    mpsc::channel(capacity.max(1))
}
