// src/server/context.rs

use crate::config::Config;
use crate::core::auth::TokenAuthenticator;
use crate::core::events::{EventReceiver, EventSender};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{Semaphore, broadcast};
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;

/// Holds all the initialized state required to run the server's main loop.
pub struct ServerContext {
    pub config: Arc<Config>,
    pub authenticator: Arc<TokenAuthenticator>,
    pub listener: TcpListener,
    pub acceptor: Option<TlsAcceptor>,
    pub shutdown_tx: broadcast::Sender<()>,
    pub background_tasks: JoinSet<Result<(), anyhow::Error>>,
    pub event_tx: EventSender,
    /// Taken by the spawner when the event loop task starts.
    pub event_rx: Option<EventReceiver>,
    pub connection_permits: Arc<Semaphore>,
}
