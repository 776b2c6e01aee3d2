//! Envelope dispenser (v1)
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌──────────────────────────────────────────────────┐
//!                    │                ENVELOPE DISPENSER                │
//!                    │                                                  │
//!   POST /fund       │  ┌─────────┐    ┌───────────────┐   ┌─────────┐  │
//!   POST /claim ─────┼─▶│  http   │───▶│   envelope    │──▶│  store  │  │
//!                    │  │ server  │    │   lifecycle   │   └─────────┘  │
//!                    │  └─────────┘    └───────┬───────┘                │
//!                    │                         │ payout request         │
//!                    │                         ▼                        │
//!                    │                 ┌───────────────┐                │
//!                    │                 │ payout queue  │                │
//!                    │                 └───────┬───────┘                │
//!                    │                         ▼                        │
//!                    │                 ┌───────────────┐   ┌─────────┐  │
//!                    │                 │  dispatcher   │──▶│  chain  │──┼──▶ RPC node
//!                    │                 └───────────────┘   │ client  │  │
//!                    │                                     └─────────┘  │
//!                    └──────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use envelope_dispenser::lifecycle::{signals, startup, Shutdown};
use envelope_dispenser::observability::{logging, metrics};
use envelope_dispenser::HttpServer;

#[derive(Parser)]
#[command(name = "envelope-dispenser")]
#[command(about = "Digital envelope token dispenser", long_about = None)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();
    let config = startup::load(args.config.as_deref())?;

    logging::init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "envelope-dispenser starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        rpc_url = %config.chain.rpc_url,
        request_timeout_secs = config.timeouts.request_secs,
        dispatcher_enabled = config.dispatcher.enabled,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let deriver = startup::deriver_from_env()?;
    let chain = startup::chain_client(&config)?;
    let services = startup::build_services(&config, deriver, chain);

    let shutdown = Arc::new(Shutdown::new());

    let dispatcher_task = if config.dispatcher.enabled {
        let dispatcher = services.dispatcher.clone();
        let rx = shutdown.subscribe();
        Some(tokio::spawn(async move { dispatcher.run(rx).await }))
    } else {
        tracing::warn!("Payout dispatcher disabled; claims will queue without being paid");
        None
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let server = HttpServer::new(&config, services.lifecycle.clone());
    let server_rx = shutdown.subscribe();

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { signals::shutdown_on_signal(&shutdown).await });
    }

    server.run(listener, server_rx).await?;

    // Also stops the dispatcher if the server exited on its own
    shutdown.trigger();
    if let Some(task) = dispatcher_task {
        if let Err(e) = task.await {
            tracing::error!(error = %e, "Payout dispatcher task failed");
        }
    }

    let pending = services.queue.ready_len().await + services.queue.in_flight_len().await;
    if pending > 0 {
        tracing::warn!(pending = pending, "Unpaid payout requests left in the queue");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
