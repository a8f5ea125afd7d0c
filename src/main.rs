//! Access gateway forwarding core.
//!
//! # Architecture Overview
//!
//! ```text
//!                         ┌───────────────────────────────────────────────────────┐
//!                         │                    ACCESS GATEWAY                      │
//!                         │                                                        │
//!   Client Request        │  ┌─────────┐   ┌──────────┐   ┌──────────────────┐    │
//!   ──────────────────────┼─▶│  http   │──▶│ routing  │──▶│ proxy selector   │    │
//!                         │  │ server  │   │ (service)│   │ direct | engine  │    │
//!                         │  └─────────┘   └──────────┘   └────────┬─────────┘    │
//!                         │                                        │              │
//!                         │        ┌───────────────┐      ┌────────▼─────────┐    │
//!                         │        │ signing       │◀─────│ director         │    │
//!                         │        │ (sigv4)       │      │ (rewrite, strip) │    │
//!                         │        └───────────────┘      └────────┬─────────┘    │
//!                         │                                        │              │
//!   Client Response       │  ┌─────────────┐              ┌────────▼─────────┐    │
//!   ◀─────────────────────┼──│ stream copy │◀─────────────│ upstream         │◀───┼── Upstream
//!                         │  │ / tunnel    │              │ transport        │    │
//!                         │  └─────────────┘              └──────────────────┘    │
//!                         │                                                        │
//!                         │  config (reload) · observability · lifecycle          │
//!                         └───────────────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use access_proxy::config::{load_config, watcher::ConfigWatcher, ProxyConfig};
use access_proxy::lifecycle::{shutdown_signal, Shutdown};
use access_proxy::net::load_tls_config;
use access_proxy::observability::{logging, metrics};
use access_proxy::HttpServer;

#[derive(Parser)]
#[command(name = "access-proxy")]
#[command(about = "Forwarding core of an identity-aware access gateway", long_about = None)]
struct Cli {
    /// Configuration file (TOML, or JSON when it ends in .json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Reload services and secrets when the configuration file changes
    #[arg(short, long, requires = "config")]
    watch: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "access-proxy starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        services = config.services.len(),
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    // Hot reload; the watcher must outlive the server.
    let (_watcher, config_updates) = match (&cli.config, cli.watch) {
        (Some(path), true) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            (Some(watcher.run()?), updates)
        }
        _ => (None, mpsc::unbounded_channel().1),
    };

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    let bind_address = config.listener.bind_address.clone();
    let tls = config.listener.tls.clone();
    let server = HttpServer::new(config);

    let mut server_task = match tls {
        Some(tls) => {
            let addr: SocketAddr = bind_address.parse()?;
            let rustls = load_tls_config(Path::new(&tls.cert_path), Path::new(&tls.key_path)).await?;
            tokio::spawn(server.run_tls(addr, rustls, config_updates, server_shutdown))
        }
        None => {
            let listener = TcpListener::bind(&bind_address).await?;
            tracing::info!(address = %listener.local_addr()?, "Listening for connections");
            tokio::spawn(server.run(listener, config_updates, server_shutdown))
        }
    };

    tokio::select! {
        result = &mut server_task => result??,
        _ = shutdown_signal() => {
            shutdown.trigger();
            server_task.await??;
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
