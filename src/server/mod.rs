// src/server/mod.rs

use crate::config::Config;
use anyhow::Result;

mod connection_loop;
mod context;
mod initialization;
mod metrics_server;
mod spawner;
mod stream;
mod worker;

pub use stream::ClientStream;
pub use worker::Worker;

/// The main server startup function, orchestrating all setup phases.
pub async fn run(config: Config) -> Result<()> {
    // 1. Initialize server state, listener and TLS.
    let mut server_context = initialization::setup(config).await?;

    // 2. Spawn background tasks.
    spawner::spawn_all(&mut server_context);

    // 3. Accept connections until shutdown.
    connection_loop::run(server_context).await
}
