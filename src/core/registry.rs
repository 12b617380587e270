// src/core/registry.rs

//! The Client Registry: every authenticated, currently admitted connection.
//!
//! The registry is owned by the event loop and is never shared, so it needs no locking.

use super::auth::ClientRole;
use super::commands::BanTarget;
use super::handle::ConnectionHandle;
use super::identity::{BanKey, BanScope, ConnectionIdentity, SessionId};
use indexmap::IndexMap;
use std::time::Instant;

/// Per-client state tracked by the event loop.
#[derive(Debug)]
pub struct ClientState {
    pub conn: ConnectionHandle,
    pub role: ClientRole,
    pub connected_at: Instant,
    /// Time of the last message that passed policy checks.
    pub last_message: Instant,
    /// Policy violations so far. Never reset by a successful message.
    pub strikes: u32,
}

impl ClientState {
    pub fn identity(&self) -> ConnectionIdentity {
        self.conn.identity()
    }
}

/// Maps session ids to client state, preserving registration order for fan-out.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: IndexMap<SessionId, ClientState>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Default::default()
    }

    /// Registers a new client. Returns `false`, leaving the existing entry untouched,
    /// if the session is already registered.
    pub fn register(&mut self, conn: ConnectionHandle, role: ClientRole, now: Instant) -> bool {
        let session_id = conn.identity().session_id();
        if self.clients.contains_key(&session_id) {
            return false;
        }
        self.clients.insert(
            session_id,
            ClientState {
                conn,
                role,
                connected_at: now,
                last_message: now,
                strikes: 0,
            },
        );
        true
    }

    pub fn get(&self, session_id: SessionId) -> Option<&ClientState> {
        self.clients.get(&session_id)
    }

    pub fn get_mut(&mut self, session_id: SessionId) -> Option<&mut ClientState> {
        self.clients.get_mut(&session_id)
    }

    /// Removes a client. Removing an absent session is a no-op that returns `None`.
    pub fn remove(&mut self, session_id: SessionId) -> Option<ClientState> {
        self.clients.shift_remove(&session_id)
    }

    pub fn contains(&self, session_id: SessionId) -> bool {
        self.clients.contains_key(&session_id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Iterates clients in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &ClientState> {
        self.clients.values()
    }

    /// Every registered client except `sender`, in registration order.
    pub fn recipients_except(&self, sender: SessionId) -> impl Iterator<Item = &ClientState> {
        self.clients
            .iter()
            .filter(move |(id, _)| **id != sender)
            .map(|(_, state)| state)
    }

    /// Resolves an operator-supplied target to a registered session.
    pub fn find(&self, target: &BanTarget) -> Option<SessionId> {
        match target {
            BanTarget::Session(id) => self.clients.contains_key(id).then_some(*id),
            BanTarget::Addr(addr) => self
                .clients
                .iter()
                .find(|(_, state)| state.identity().addr() == *addr)
                .map(|(id, _)| *id),
        }
    }

    /// Sessions whose ban key under `scope` equals `key`.
    pub fn sessions_with_ban_key(&self, key: BanKey, scope: BanScope) -> Vec<SessionId> {
        self.clients
            .iter()
            .filter(|(_, state)| state.identity().ban_key(scope) == key)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Removes and returns every client.
    pub fn drain(&mut self) -> Vec<ClientState> {
        self.clients.drain(..).map(|(_, state)| state).collect()
    }
}
