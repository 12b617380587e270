// src/server/connection_loop.rs

//! Contains the main server loop for accepting connections and handling graceful shutdown.

use super::context::ServerContext;
use super::tls;
use crate::connection::{ConnectionHandler, ConnectionSettings};
use crate::core::auth::TokenAuthenticator;
use crate::core::events::EventSender;
use crate::core::identity::{ConnectionIdentity, SessionId};
use crate::core::RelayError;
use crate::core::metrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::{OwnedSemaphorePermit, TryAcquireError, broadcast};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

const BACKGROUND_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);
const CLIENT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// The main server loop that accepts connections and handles graceful shutdown.
pub async fn run(mut ctx: ServerContext) {
    let mut session_id_counter: SessionId = 0;
    let mut client_tasks = JoinSet::new();
    let settings = ConnectionSettings::from_config(&ctx.config);

    let (mut sigint, mut sigterm) = match (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
    ) {
        (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
        (Err(e), _) | (_, Err(e)) => {
            error!("CRITICAL: Failed to register signal handlers: {}. Shutting down.", e);
            shutdown(ctx, client_tasks).await;
            return;
        }
    };

    loop {
        tokio::select! {
            biased;

            _ = sigint.recv() => {
                info!("SIGINT received, initiating graceful shutdown.");
                break;
            }
            _ = sigterm.recv() => {
                info!("SIGTERM received, initiating graceful shutdown.");
                break;
            }

            Some(res) = ctx.background_tasks.join_next() => {
                match res {
                    Ok(Ok(())) => { error!("CRITICAL: A background task finished unexpectedly. Shutting down."); break; }
                    Ok(Err(e)) => { error!("CRITICAL: Background task failed: {}. Shutting down.", e); break; }
                    Err(e) => { error!("CRITICAL: Background task panicked: {e:?}. Shutting down."); break; }
                }
            },

            res = ctx.listener.accept() => {
                let (socket, addr) = match res {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        continue;
                    }
                };

                let permit = match ctx.connection_permits.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(TryAcquireError::NoPermits) => {
                        warn!("Connection limit reached, rejecting {}.", addr);
                        continue;
                    }
                    Err(TryAcquireError::Closed) => {
                        error!("Connection semaphore closed. Shutting down.");
                        break;
                    }
                };

                session_id_counter = session_id_counter.wrapping_add(1);
                let identity = ConnectionIdentity::new(session_id_counter, addr);
                info!("Accepted new connection {}.", identity);
                metrics::CONNECTIONS_ACCEPTED_TOTAL.inc();

                let authenticator = ctx.authenticator.clone();
                let events = ctx.event_tx.clone();
                let global_shutdown_rx = ctx.shutdown_tx.subscribe();

                if let Some(acceptor) = ctx.acceptor.clone() {
                    client_tasks.spawn(async move {
                        match tls::accept(&acceptor, socket, settings.handshake_timeout).await {
                            Ok(tls_stream) => {
                                debug!("TLS handshake successful for {addr}");
                                serve(tls_stream, identity, authenticator, events, settings, global_shutdown_rx, permit).await;
                            }
                            Err(RelayError::HandshakeTimeout) => {
                                metrics::HANDSHAKE_FAILURES_TOTAL.inc();
                                warn!("TLS handshake with {addr} timed out, dropping connection.");
                            }
                            Err(e) => {
                                metrics::HANDSHAKE_FAILURES_TOTAL.inc();
                                warn!("TLS handshake error for {addr}: {e}");
                            }
                        }
                    });
                } else {
                    client_tasks.spawn(serve(socket, identity, authenticator, events, settings, global_shutdown_rx, permit));
                }
            },

            Some(res) = client_tasks.join_next() => {
                if let Err(e) = res
                    && e.is_panic()
                {
                    error!("A client handler panicked: {e:?}");
                }
            },
        }
    }

    shutdown(ctx, client_tasks).await;
}

/// Runs one connection's handler while holding its slot under `max_clients`.
async fn serve<S>(
    stream: S,
    identity: ConnectionIdentity,
    authenticator: Arc<TokenAuthenticator>,
    events: EventSender,
    settings: ConnectionSettings,
    global_shutdown_rx: broadcast::Receiver<()>,
    _permit: OwnedSemaphorePermit,
) where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let handler = ConnectionHandler::new(
        stream,
        identity,
        authenticator,
        events,
        settings,
        global_shutdown_rx,
    );
    match handler.run().await {
        Ok(()) | Err(RelayError::InvalidToken) | Err(RelayError::HandshakeTimeout) => {}
        Err(e) if e.is_normal_disconnect() => {}
        Err(e) => warn!("Connection {} terminated unexpectedly: {}", identity, e),
    }
}

/// Signals every task to stop, then waits for the event loop and the client tasks.
async fn shutdown(mut ctx: ServerContext, mut client_tasks: JoinSet<()>) {
    info!("Shutting down. Sending signal to all tasks.");
    if ctx.shutdown_tx.send(()).is_err() {
        debug!("No tasks were listening for the shutdown signal.");
    }

    info!("Waiting for background tasks to finish...");
    if tokio::time::timeout(BACKGROUND_SHUTDOWN_TIMEOUT, async {
        while ctx.background_tasks.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        warn!("Timed out waiting for background tasks to finish cleanly.");
    }

    if tokio::time::timeout(CLIENT_SHUTDOWN_TIMEOUT, async {
        while client_tasks.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        warn!("Timed out waiting for client connections, aborting the rest.");
        client_tasks.shutdown().await;
    }
    info!("All client connections closed.");
    info!("Server shutdown complete.");
}

