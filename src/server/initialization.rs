// src/server/initialization.rs

//! Handles server initialization: token generation, TLS setup, and binding the listener.

use super::context::ServerContext;
use super::tls::setup_tls;
use crate::config::Config;
use crate::core::auth::TokenAuthenticator;
use crate::core::events::event_queue;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{Semaphore, broadcast};
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Initializes all server components before starting the main loop.
pub async fn setup(config: Config) -> Result<ServerContext> {
    log_startup_info(&config);
    let (shutdown_tx, _) = broadcast::channel(1);

    let authenticator = TokenAuthenticator::generate(config.operator_token.clone())
        .context("Failed to generate access tokens")?;
    // Printed outside the log so no level filter can hide the tokens.
    let operator_generated = config.operator_token.is_none();
    authenticator
        .announce(&mut std::io::stdout().lock(), operator_generated)
        .context("Failed to print access tokens")?;
    if !operator_generated {
        info!("Operator token loaded from configuration.");
    }

    let acceptor = setup_tls(&config)?;

    let listener = TcpListener::bind((config.host.as_str(), config.port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", config.host, config.port))?;
    info!(
        "Relay listening on {}:{}{}",
        config.host,
        config.port,
        if acceptor.is_some() { " (TLS)" } else { "" }
    );

    let (event_tx, event_rx) = event_queue(config.relay.event_queue_capacity);
    let connection_permits = Arc::new(Semaphore::new(config.max_clients));

    Ok(ServerContext {
        config: Arc::new(config),
        authenticator: Arc::new(authenticator),
        listener,
        acceptor,
        shutdown_tx,
        background_tasks: JoinSet::new(),
        event_tx,
        event_rx: Some(event_rx),
        connection_permits,
    })
}

/// Logs key configuration parameters at startup.
fn log_startup_info(config: &Config) {
    let policy = &config.policy;
    info!(
        "Policy: one message per {:?}, ban after {} strikes for {:?} (scope: {:?}).",
        policy.message_rate, policy.ban_limit, policy.ban_duration, policy.ban_scope
    );
    info!(
        "Accepting up to {} connections; event queue holds {} events.",
        config.max_clients, config.relay.event_queue_capacity
    );
    if !config.tls.enabled {
        warn!("TLS is disabled. Tokens and messages travel in plain text.");
    }
}
