//! proctor relay daemon
//!
//! Maintains persistent authenticated SSH sessions to the agent on every
//! managed host and serves trusted front-end clients over a Unix socket.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use proctor_core::acl::SystemGroups;
use proctor_core::config;
use proctor_relay::client::run_client_listener;
use proctor_relay::supervisor::{run_reload_loop, run_supervisor};
use proctor_relay::RelayState;

#[derive(Parser)]
#[command(name = "proctor-relay")]
#[command(about = "proctor relay daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Client socket path (overrides config)
    #[arg(short, long)]
    socket: Option<PathBuf>,

    /// Run in foreground with verbose output
    #[arg(short, long)]
    foreground: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.foreground { "debug" } else { &args.log_level };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("proctor relay starting...");

    let config_path = args
        .config
        .unwrap_or_else(|| PathBuf::from(config::DEFAULT_CONFIG_PATH));
    let mut relay_config = config::load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    if let Some(socket) = args.socket {
        relay_config.relay.socket_path = socket;
    }

    tracing::info!(
        "{} hosts, {} ACL rules",
        relay_config.host_entries().len(),
        relay_config.rules().len()
    );

    let state = RelayState::new(relay_config, Arc::new(SystemGroups));

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();

    // Setup signal handlers
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install signal handler")
                .recv()
                .await;
        };

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }

        cancel_clone.cancel();
    });

    // Host supervisor: connect sweep + watchdogs
    let supervisor = tokio::spawn(run_supervisor(Arc::clone(&state), cancel.clone()));

    // Configuration reload loop
    tokio::spawn(run_reload_loop(
        Arc::clone(&state),
        config_path,
        cancel.clone(),
    ));

    // Client listener runs until shutdown
    run_client_listener(Arc::clone(&state), cancel.clone()).await?;

    cancel.cancel();
    let _ = supervisor.await;

    tracing::info!("relay shutdown complete");
    Ok(())
}
