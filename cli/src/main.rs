// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # skiff
//!
//! Keeps a set of SSH-reachable machines in one container cluster.
//!
//! ## Commands
//!
//! - `skiff status` - Membership of every machine listed in the manifest
//! - `skiff apply` - Bootstrap or reconcile the cluster and rebalance managers
//! - `skiff leave [HOST] [--force]` - Take one machine (or all) out of the cluster
//! - `skiff teardown` - Force every machine out of the cluster
//! - `skiff check` - Probe each machine for an installed control plane

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use skiff_cli::commands;
use skiff_cli::manifest::ClusterManifest;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// skiff - SSH-tunneled cluster membership and quorum coordinator
#[derive(Parser)]
#[command(name = "skiff")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to the cluster manifest (default: ./skiff.yaml)
    #[arg(
        short,
        long,
        global = true,
        env = "SKIFF_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "SKIFF_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show cluster membership
    #[command(name = "status")]
    Status,

    /// Bring the cluster in line with the manifest
    #[command(name = "apply")]
    Apply,

    /// Take a machine out of the cluster (all machines when HOST is omitted)
    #[command(name = "leave")]
    Leave {
        #[arg(value_name = "HOST")]
        host: Option<String>,

        /// Leave at once, even as a manager
        #[arg(long)]
        force: bool,
    },

    /// Force every machine out of the cluster
    #[command(name = "teardown")]
    Teardown,

    /// Check that the control plane is installed everywhere
    #[command(name = "check")]
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level)?;

    let Some(command) = cli.command else {
        eprintln!("{}", "No command specified. Use --help for usage.".yellow());
        std::process::exit(1);
    };

    let manifest = ClusterManifest::load(cli.config).context("Failed to load cluster manifest")?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted, cancelling");
            on_signal.cancel();
        }
    });

    match command {
        Commands::Status => commands::status::execute(&manifest, &cancel).await,
        Commands::Apply => commands::apply::execute(&manifest, &cancel).await,
        Commands::Leave { host, force } => {
            commands::leave::execute(&manifest, &cancel, host, force).await
        }
        Commands::Teardown => commands::leave::teardown(&manifest, &cancel).await,
        Commands::Check => commands::check::execute(&manifest, &cancel).await,
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    Ok(())
}
