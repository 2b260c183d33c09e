//! Tic-Tac-Toe Lobby Server
//!
//! Reads configuration from the environment, opens the user store and
//! serves the lobby until Ctrl-C.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tictactoe_lobby::{
    network::server::{GameServer, ServerConfig},
    store::{MemoryUserStore, UserStore},
    VERSION,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Tic-Tac-Toe Lobby Server v{}", VERSION);

    let config = ServerConfig::from_env().context("reading configuration")?;
    info!("Bind address: {}", config.bind_addr);
    info!("Guest logins: {}", if config.allow_guests { "enabled" } else { "disabled" });
    if let Some(ttl) = config.challenge_ttl {
        info!("Challenges expire after {:?}", ttl);
    }

    let store: Arc<dyn UserStore> = match &config.data_file {
        Some(path) => {
            let store = MemoryUserStore::open(path)
                .await
                .with_context(|| format!("opening user store {}", path.display()))?;
            info!("Loaded {} users from {}", store.len().await, path.display());
            Arc::new(store)
        }
        None => {
            warn!("LOBBY_DATA_FILE not set; stats will not survive a restart");
            Arc::new(MemoryUserStore::new())
        }
    };

    let server = Arc::new(GameServer::new(config, store));

    let signal_server = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, shutting down");
            signal_server.shutdown();
        }
    });

    server.run().await.context("lobby server failed")?;

    info!("Server stopped");
    Ok(())
}
