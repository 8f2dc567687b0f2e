//! EventStoreDB cluster proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!                         ┌──────────────────────────────────────────────────────┐
//!                         │                    CLUSTER PROXY                     │
//!                         │                                                      │
//!   Client Request        │  ┌─────────┐   ┌─────────┐   ┌──────────────────┐    │
//!   ──────────────────────┼─▶│net (TLS)│──▶│  http   │──▶│ auth middleware  │    │
//!                         │  │peer cert│   │ server  │   │ cert/basic/users │    │
//!                         │  └─────────┘   └─────────┘   └────────┬─────────┘    │
//!                         │                                       │              │
//!                         │               ┌───────────────────────┼──────┐       │
//!                         │               ▼                       ▼      │       │
//!                         │        ┌──────────────┐      ┌──────────────┐│       │
//!                         │        │   backup     │      │   forward    ││       │
//!                         │        │ orchestrator │      │  transform   ││       │
//!                         │        └──────┬───────┘      └──────┬───────┘│       │
//!                         │               ▼                     │        │       │
//!                         │        ┌──────────────┐             │        │       │
//!                         │        │ exec + demux │             │        │       │
//!                         │        └──────┬───────┘             │        │       │
//!   Client Response       │               │                     │        │       │
//!   ◀─────────────────────┼───────────────┴─────────────────────┘        │       │
//!                         │          pod exec (kube)         cluster nodes       │
//!                         │                                                      │
//!                         │  config · observability · lifecycle (shutdown)       │
//!                         └──────────────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

use eventstore_proxy::config::load_config;
use eventstore_proxy::lifecycle::{self, spawn_signal_handler, Shutdown};
use eventstore_proxy::observability::{init_logging, init_metrics};

#[derive(Parser)]
#[command(name = "eventstore-proxy")]
#[command(about = "Authenticating reverse proxy and backup endpoint for EventStoreDB clusters", long_about = None)]
struct Cli {
    /// TOML configuration file; defaults and PROXY_* variables apply without one.
    #[arg(short, long, env = "PROXY_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;
    init_logging(&config.observability);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "eventstore-proxy starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        tls = config.listener.tls.is_some(),
        auth_mode = %config.auth.mode,
        nodes = config.cluster.nodes.len(),
        backup = config.backup.enabled,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    spawn_signal_handler(shutdown.clone());

    let app = lifecycle::build(config, &shutdown).await?;
    app.server.serve(shutdown.wait()).await?;

    shutdown.trigger();
    if let Err(e) = lifecycle::join_background(app.background).await {
        tracing::error!(error = %e, "Stopped after background failure");
        return Err(e.into());
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
