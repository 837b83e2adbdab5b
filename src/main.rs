use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use turnstile::config::TurnstileConfig;
use turnstile::grpc::GrpcServer;
use turnstile::ratelimit::PolicyRegistry;

/// Per-identity admission control service.
#[derive(Debug, Parser)]
#[command(name = "turnstile", version, about)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured gRPC listen address
    #[arg(long)]
    grpc_addr: Option<SocketAddr>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_thread_ids(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init();
    }

    info!("Starting Turnstile Admission Service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = TurnstileConfig::load(args.config.as_deref())?;
    if let Some(addr) = args.grpc_addr {
        config.server.grpc_addr = addr;
    }
    info!(
        grpc_addr = %config.server.grpc_addr,
        clock = ?config.clock,
        policies = config.policies.len(),
        "Configuration loaded"
    );

    let registry = Arc::new(PolicyRegistry::from_config(
        &config.policies,
        config.clock.build(),
    )?);
    if registry.is_empty() {
        warn!("No admission policies configured; every request will be rejected");
    }

    let sweeper = match config.server.sweep_interval_secs {
        0 => None,
        secs => Some(registry.clone().spawn_sweeper(Duration::from_secs(secs))),
    };

    let grpc_server = GrpcServer::new(config.server.grpc_addr, registry);

    // Run the server with graceful shutdown on Ctrl+C
    grpc_server.serve_with_shutdown(shutdown_signal()).await?;

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }

    info!("Turnstile Admission Service stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
