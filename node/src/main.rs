// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # SFT Node
//!
//! Entry point for the `sft-node` binary. Parses CLI arguments, loads the
//! TOML configuration, initializes logging and metrics, opens the token
//! service and serves the HTTP API until SIGINT/SIGTERM.
//!
//! Subcommands:
//!
//! - `run`     — serve the API
//! - `keygen`  — generate an issuer key
//! - `version` — print build version information

mod api;
mod cli;
mod config;
mod logging;
mod metrics;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::signal;

use sft_protocol::config::Network;
use sft_protocol::crypto::SigningContext;
use sft_protocol::FungibleTokenService;

use cli::{Commands, SftNodeCli};
use config::NodeConfig;
use logging::LogFormat;
use metrics::NodeMetrics;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = SftNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Keygen(args) => keygen(args),
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Load config, open the service and serve until a shutdown signal.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    let mut config = NodeConfig::load(&args.config)?;
    config.apply_overrides(&args);
    logging::init_logging(&config.logging.filter, config.logging.log_format());

    tracing::info!(
        config = %args.config.display(),
        network = %config.service.network,
        listen = %config.server.listen,
        db_path = %config.service.db_path.display(),
        "starting sft-node"
    );

    // --- Persistent storage ---
    let db_path = &config.service.db_path;
    std::fs::create_dir_all(db_path)
        .with_context(|| format!("failed to create database directory: {}", db_path.display()))?;

    // --- Token service ---
    let service = Arc::new(
        FungibleTokenService::from_config(&config.service)
            .context("failed to start the token service")?,
    );
    tracing::info!(
        issuer = %service.address(),
        funding_utxos = service.funding_pool().available_len(),
        funding_value = service.funding_pool().available_value(),
        "token service ready"
    );

    // --- Metrics ---
    let node_metrics = Arc::new(NodeMetrics::new().context("failed to register metrics")?);
    let pool = service.funding_pool();
    node_metrics.set_funding(pool.available_len(), pool.available_value());

    // --- Application state ---
    let app_state = api::AppState {
        version: env!("CARGO_PKG_VERSION").to_string(),
        service,
        metrics: node_metrics,
    };

    // --- Serve ---
    let router = api::create_router(app_state);
    let listen = &config.server.listen;
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("failed to bind API listener on {}", listen))?;
    tracing::info!("API server listening on {}", listen);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("API server error")?;

    tracing::info!("sft-node stopped");
    Ok(())
}

/// Generate an issuer key, print it, optionally write the WIF to a file.
fn keygen(args: cli::KeygenArgs) -> Result<()> {
    let network: Network = args.network.parse().context("invalid --network")?;
    let ctx = SigningContext::generate(network);
    let wif = ctx.to_wif();

    if let Some(path) = &args.out {
        std::fs::write(path, format!("{}\n", wif))
            .with_context(|| format!("failed to write key to {}", path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
                .with_context(|| format!("failed to restrict permissions on {}", path.display()))?;
        }
    }

    println!("Issuer key generated.");
    println!("  Network : {}", network);
    println!("  Address : {}", ctx.address());
    println!("  WIF     : {}", wif);
    if let Some(path) = &args.out {
        println!("  Written : {}", path.display());
    }
    Ok(())
}

fn print_version() {
    println!("sft-node {}", env!("CARGO_PKG_VERSION"));
    println!("rustc    {}", rustc_version());
}

fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}

/// Resolves on SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received, draining connections");
}
