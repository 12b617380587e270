// src/connection/guard.rs

//! Defines `ConnectionGuard`, an RAII guard for open-connection accounting.

use crate::core::identity::ConnectionIdentity;
use crate::core::metrics;
use tracing::debug;

/// Counts a connection as open for as long as its reader task holds the guard,
/// however that task ends.
pub struct ConnectionGuard {
    identity: ConnectionIdentity,
}

impl ConnectionGuard {
    pub(crate) fn new(identity: ConnectionIdentity) -> Self {
        metrics::OPEN_CONNECTIONS.inc();
        Self { identity }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        metrics::OPEN_CONNECTIONS.dec();
        debug!("Connection {} released.", self.identity);
    }
}
