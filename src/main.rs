mod api;
mod bootstrap;
mod config;
mod engine;
mod error;
mod execution;
mod funding;
mod ledger;
mod middleware;
mod scheduler;
mod server;
mod wallet;

use std::{fs::OpenOptions, sync::Arc};

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;

// Initialize logging and tracing
fn init_tracing(config: &Config) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("{},tower_http=debug", config.log_level)))
        .context("invalid log level")?;

    let registry = tracing_subscriber::registry().with(filter);
    match &config.log_output {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log output {}", path.display()))?;
            registry
                .with(tracing_subscriber::fmt::layer().json().with_writer(Arc::new(file)))
                .init();
        }
        None => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::from_env()?;
    init_tracing(&config)?;

    info!("🚀 Starting angelbot");

    let bind_address = config.bind_address.clone();
    let rate_limit = config.rate_limit;

    let (state, scheduler) = bootstrap::initialize_app_state(config).await?;
    let engine = state.engine.clone();

    // Create HTTP server
    let app = server::create_app(state, rate_limit);

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown requested");
            }
            shutdown.cancel();
        }
    });

    // Run the Server
    server::run_server(app, &bind_address, shutdown)
        .await
        .map_err(|e| anyhow::anyhow!("server error: {}", e))?;

    engine.shutdown();
    scheduler.await?;
    info!(pending = engine.queue_len(), "👋 angelbot stopped");

    Ok(())
}
