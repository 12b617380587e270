// src/connection/mod.rs

//! Manages the lifecycle of a single client connection: the token handshake,
//! the reader that feeds the event loop, and the writer that drains the outbox.

mod guard;
mod handler;
mod outbox;

pub use guard::ConnectionGuard;
pub use handler::{
    ConnectionHandler, ConnectionSettings, HANDSHAKE_BUFFER_SIZE, TOKEN_PROMPT, TOKEN_REJECTED,
    handshake,
};
pub use outbox::OutboxWriter;
