//! Bidscope analytics server entry point.

use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bidscope_engine::AnalyticsEngineBuilder;
use bidscope_ext_memory::create_seeded_ledger;
use bidscope_server::{Server, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,bidscope=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Bidscope Analytics Server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/bidscope.toml".to_string());

    let server_config = if std::path::Path::new(&config_path).exists() {
        info!("Loading configuration from {}", config_path);
        ServerConfig::from_file(&config_path)?
    } else {
        info!("Using default configuration");
        ServerConfig::default()
    };

    // Create ledger
    let ledger = create_seeded_ledger(server_config.seed_file.as_ref())?;

    // Build engine
    let engine = AnalyticsEngineBuilder::new()
        .with_config(server_config.analytics.clone())
        .with_ledger(ledger.clone())
        .with_events(ledger.subscribe())
        .build()?;

    let engine = Arc::new(engine);

    // Start engine
    engine.start();

    // Start server
    let server = Server::new(server_config, engine.clone(), ledger);
    server
        .start(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await?;

    engine.shutdown().await;
    Ok(())
}
