use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use image_cache_proxy::{
    config::Config,
    services::ImageOrchestrator,
    web::{AppState, WebServer},
};

#[derive(Parser)]
#[command(name = "image-cache-proxy")]
#[command(version)]
#[command(about = "Fetches, transforms and serves remote images behind a two-tier cache")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path (defaults to $CONFIG_FILE or config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Listening IP address
    #[arg(short = 'H', long, value_name = "IP")]
    host: Option<String>,

    /// Listening port
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    /// Root directory of the persistent cache (overrides config file)
    #[arg(short = 's', long, value_name = "DIR")]
    storage_path: Option<PathBuf>,

    /// Require a tenant identifier on every request
    #[arg(long)]
    tenancy: bool,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_filter = if cli.log_level == "trace" {
        format!("image_cache_proxy={},tower_http=trace", cli.log_level)
    } else {
        format!("image_cache_proxy={}", cli.log_level)
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Image Cache Proxy v{}", env!("CARGO_PKG_VERSION"));

    let mut config = match &cli.config {
        Some(path) => {
            let config = Config::load_from_file(path)?;
            info!("Configuration loaded from: {}", path);
            config
        }
        None => Config::load()?,
    };

    if let Some(host) = cli.host {
        config.web.host = host;
    }
    if let Some(port) = cli.port {
        config.web.port = port;
    }
    if let Some(storage_path) = cli.storage_path {
        config.cache.storage_path = storage_path;
    }
    if cli.tenancy {
        config.tenancy.enabled = true;
    }

    tokio::fs::create_dir_all(&config.cache.storage_path).await?;
    info!(
        "Persistent cache at {} (tenancy {}), memory capacity {}",
        config.cache.storage_path.display(),
        if config.tenancy.enabled { "enabled" } else { "disabled" },
        config.cache.memory_capacity
    );

    let orchestrator = Arc::new(ImageOrchestrator::from_config(&config)?);
    let web_server = WebServer::new(AppState::new(config, orchestrator))?;

    info!(
        "Starting web server on {}:{}",
        web_server.host(),
        web_server.port()
    );

    let (server_ready_tx, server_ready_rx) = tokio::sync::oneshot::channel();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = web_server.serve_with_signal(server_ready_tx).await {
            tracing::error!("Web server failed: {}", e);
        }
    });

    match server_ready_rx.await {
        Ok(Ok(())) => info!("Web server is now listening"),
        Ok(Err(bind_error)) => {
            tracing::error!("Failed to bind web server: {}", bind_error);
            return Err(bind_error);
        }
        Err(_) => {
            tracing::error!("Web server task completed without signaling");
            return Err(anyhow::anyhow!("Web server failed to start"));
        }
    }

    server_handle.await?;
    info!("Image Cache Proxy stopped");
    Ok(())
}
