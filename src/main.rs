//! # docvault CLI (`dv`)
//!
//! The `dv` binary runs the document-capture persistence service and a few
//! operational commands against the same configuration.
//!
//! ## Usage
//!
//! ```bash
//! dv --config ./config/dv.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `dv serve` | Start the HTTP API for the capture UI |
//! | `dv refresh` | Rebuild every subfolder manifest under the docs root |
//!
//! `dv refresh` needs a storage bearer token in `DRIVE_ACCESS_TOKEN`; the
//! server reads the token per request from the `Authorization` header
//! instead.

mod canon;
mod completion;
mod config;
mod drive;
mod manifest;
mod models;
mod persister;
mod refresh;
mod resolver;
mod server;
mod slug;
mod sources;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// docvault — persist captured document bundles and their summaries to a
/// cloud file store, maintaining a per-folder manifest index.
#[derive(Parser)]
#[command(
    name = "dv",
    about = "docvault — a document-capture persistence service for cloud file stores",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/dv.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server for the capture UI.
    ///
    /// Exposes the save, summarize, canonical-update, and manifest-refresh
    /// endpoints documented in the server module.
    Serve,

    /// Rebuild every subfolder manifest under the docs root.
    ///
    /// Walks the monitored root folder, lists each subfolder, and rewrites
    /// its `manifest.json` from the observed listing (replace semantics).
    /// Requires `DRIVE_ACCESS_TOKEN` in the environment.
    Refresh,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Serve => server::run_server(&config).await,
        Commands::Refresh => run_refresh(&config).await,
    }
}

async fn run_refresh(config: &config::Config) -> Result<()> {
    let token = std::env::var("DRIVE_ACCESS_TOKEN")
        .context("DRIVE_ACCESS_TOKEN environment variable not set")?;
    let drive = drive::DriveClient::new(token)?;
    let store = manifest::ManifestStore::new();

    let outcome = refresh::refresh_manifests(&drive, &store, config).await?;
    for message in &outcome.messages {
        println!("{}", message);
    }
    println!("processed {} file(s)", outcome.processed_files.len());
    Ok(())
}
