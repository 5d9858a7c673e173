use std::sync::Arc;

use clap::Parser;
use tokio::net::UnixListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use database_operator::FakeDriverConfig;
use database_operator::driver::FakeProvisioner;
use database_operator::driver::client::socket_path;
use database_operator::driver::server::serve;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("database_operator=info".parse()?),
        )
        .init();

    let config = FakeDriverConfig::parse();
    let path = socket_path(&config.driver_addr)?;

    // A socket left behind by a previous run blocks bind
    if path.exists() {
        std::fs::remove_file(&path)?;
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let listener = UnixListener::bind(&path)?;
    info!(socket = %path.display(), name = %config.name, "Fake driver listening");

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
                return;
            }
            info!("Received shutdown signal");
            shutdown.cancel();
        });
    }

    serve(listener, Arc::new(FakeProvisioner::new(config.name)), shutdown).await?;

    if let Err(e) = std::fs::remove_file(&path) {
        error!(socket = %path.display(), "Failed to remove socket: {}", e);
    }
    info!("Fake driver stopped");
    Ok(())
}
