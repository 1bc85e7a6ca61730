//! Buzzer Server
//!
//! Serves buzzer sessions over HTTP and Server-Sent Events until Ctrl-C.

use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use buzzer::{BuzzerServer, ServerConfig, VERSION};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging, RUST_LOG overrides the default level
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = ServerConfig::from_env();
    info!("Buzzer Server v{}", VERSION);
    info!("Bind address: {}", config.bind_addr);
    match config.heartbeat_interval {
        Some(period) => info!("Host heartbeat: {} ms", period.as_millis()),
        None => info!("Host heartbeat: disabled"),
    }

    let server = Arc::new(BuzzerServer::new(config));

    let signal_server = server.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => signal_server.shutdown(),
            Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    server.run().await?;
    info!("Server stopped");

    Ok(())
}
