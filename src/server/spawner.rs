// src/server/spawner.rs

//! Spawns the server's long-running background tasks.

use super::context::ServerContext;
use super::metrics_server;
use crate::core::relay::EventLoop;
use anyhow::{Result, anyhow};
use tracing::info;

/// Spawns the event loop and, when enabled, the metrics exporter into the
/// context's background task set.
pub fn spawn_all(ctx: &mut ServerContext) -> Result<()> {
    let event_rx = ctx
        .event_rx
        .take()
        .ok_or_else(|| anyhow!("Event loop has already been started"))?;

    // --- Relay Event Loop ---
    let event_loop = EventLoop::new(ctx.config.policy.clone(), event_rx);
    let shutdown_rx = ctx.shutdown_tx.subscribe();
    ctx.background_tasks.spawn(async move {
        event_loop.run(shutdown_rx).await;
        Ok(())
    });

    // --- Metrics Server ---
    if ctx.config.metrics.enabled {
        let port = ctx.config.metrics.port;
        let shutdown_rx = ctx.shutdown_tx.subscribe();
        ctx.background_tasks
            .spawn(async move { metrics_server::run_metrics_server(port, shutdown_rx).await });
    }

    info!("All background tasks have been spawned.");
    Ok(())
}
