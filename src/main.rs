//! Web3D Match Server
//!
//! Reads configuration from the environment and serves until Ctrl-C.

use std::sync::Arc;
use anyhow::Context;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use web3d::{GameServer, ServerConfig, VERSION};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    let config = ServerConfig::from_env().context("Invalid configuration")?;

    info!("Web3D Server v{}", VERSION);
    info!("Bind: {}{}", config.bind_addr, config.path);
    info!(
        "Match: {} collectibles, {}s countdown, up to {} players",
        config.match_config.collectible_count,
        config.match_config.countdown.as_secs(),
        config.match_config.max_players
    );
    info!("Match history: {}", config.recorder.endpoint());

    let server = Arc::new(GameServer::new(config));

    let signal_server = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, shutting down");
            signal_server.shutdown();
        }
    });

    server.run().await.context("Server failed")?;
    info!("Server stopped");
    Ok(())
}
