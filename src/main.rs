//! vertex-relay - HTTP Server Entry Point
//!
//! Starts the HTTP server that relays inference requests to Vertex AI.

use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vertex_relay::{api, config::Config};

fn main() -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async_main())
}

async fn async_main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vertex_relay=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    let account_ids: Vec<&str> = config.accounts.iter().map(|a| a.id.as_str()).collect();
    info!(
        accounts = ?account_ids,
        models = config.models.len(),
        api_key_configured = config.api_key_configured(),
        "Loaded configuration"
    );
    if config.accounts.is_empty() {
        warn!("No accounts configured; requests will fail until accounts are provided");
    }

    // Start HTTP server
    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting server on {}", addr);

    api::serve(config).await?;

    Ok(())
}
