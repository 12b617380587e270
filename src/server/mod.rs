// src/server/mod.rs

use crate::config::Config;
use anyhow::Result;

mod connection_loop;
mod context;
mod initialization;
mod metrics_server;
mod spawner;
pub mod tls;

pub use context::ServerContext;

/// The main server startup function, orchestrating all setup phases.
pub async fn run(config: Config) -> Result<()> {
    // 1. Generate tokens, bind the listener, load TLS.
    let mut server_context = initialization::setup(config).await?;

    // 2. Start the event loop and the optional metrics exporter.
    spawner::spawn_all(&mut server_context)?;

    // 3. Accept connections until a signal or a failed background task stops us.
    connection_loop::run(server_context).await;

    Ok(())
}
