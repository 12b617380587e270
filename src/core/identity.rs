// src/core/identity.rs

//! Connection identity: the key every registry entry and event is indexed by.

use serde::Deserialize;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// A monotonically assigned per-connection identifier, minted by the accept loop.
pub type SessionId = u64;

/// Identifies one accepted connection for its whole lifetime.
///
/// The session id is unique per process, so two connections that happen to
/// reuse the same remote address and port never collide in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionIdentity {
    session_id: SessionId,
    addr: SocketAddr,
}

impl ConnectionIdentity {
    pub fn new(session_id: SessionId, addr: SocketAddr) -> Self {
        Self { session_id, addr }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Derives the key bans are recorded under for this connection.
    pub fn ban_key(&self, scope: BanScope) -> BanKey {
        match scope {
            BanScope::Ip => BanKey::Ip(self.addr.ip()),
            BanScope::Address => BanKey::Addr(self.addr),
        }
    }
}

/// Rendered as `<session_id>@<addr>`, the form clients see and operators target.
impl fmt::Display for ConnectionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.session_id, self.addr)
    }
}

/// How widely a ban applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BanScope {
    /// Every connection from the banned peer IP is refused.
    #[default]
    Ip,
    /// Only the exact `ip:port` pair is refused.
    Address,
}

/// The key under which a ban is stored in the `BanRegistry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BanKey {
    Ip(IpAddr),
    Addr(SocketAddr),
}

impl fmt::Display for BanKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BanKey::Ip(ip) => write!(f, "{ip}"),
            BanKey::Addr(addr) => write!(f, "{addr}"),
        }
    }
}
