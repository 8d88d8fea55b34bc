//! Thrift over HTTP server.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ net::listener ──▶ http::server ──▶ net::connection
//!                                                          (head/body/end)
//!                                                               │
//!                                                               ▼
//!                                                     bridge::ProcessingBridge
//!                                                     (spawn_blocking + gate)
//!                                                               │
//!     Client Response                                           ▼
//!     ◀───────────────────────────────────────────── http::response
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use thrift_http::config::loader::load_config;
use thrift_http::config::AdapterConfig;
use thrift_http::lifecycle::{signals, Shutdown};
use thrift_http::net::Listener;
use thrift_http::observability::{logging, metrics};
use thrift_http::ping::PingProcessor;
use thrift_http::HttpServer;

#[derive(Parser)]
#[command(name = "thrift-http")]
#[command(about = "Serve a Thrift processor over HTTP", long_about = None)]
struct Cli {
    /// TOML configuration file. Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `listener.bind_address`.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => AdapterConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
    }

    logging::init_logging(&config.observability)?;
    tracing::info!("thrift-http v{} starting", env!("CARGO_PKG_VERSION"));

    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        processing_ms = config.timeouts.processing_ms,
        max_body_size = config.limits.max_body_size,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = Listener::bind(&config.listener).await?;

    let shutdown = Arc::new(Shutdown::new());
    let server_shutdown = shutdown.subscribe();
    let trigger = Arc::clone(&shutdown);
    tokio::spawn(async move {
        if let Err(e) = signals::wait_for_signal().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signals");
        }
        trigger.trigger();
    });

    let server = HttpServer::new(config, Arc::new(PingProcessor::new()));
    server.run(listener, server_shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
