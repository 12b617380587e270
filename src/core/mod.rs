// src/core/mod.rs

//! The central module containing the relay's state machine and its data structures.

pub mod auth;
pub mod bans;
pub mod commands;
pub mod errors;
pub mod events;
pub mod handle;
pub mod identity;
pub mod metrics;
pub mod registry;
pub mod relay;

pub use errors::RelayError;
pub use events::RelayEvent;
pub use relay::{EventLoop, Relay};
