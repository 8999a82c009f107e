//! # Caseline CLI
//!
//! The `caseline` binary manages the database and serves the HTTP API.
//!
//! ## Usage
//!
//! ```bash
//! caseline --config ./config/caseline.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `caseline init` | Create the SQLite database and run schema migrations |
//! | `caseline seed` | Load sample supervision records and knowledge-base guidance |
//! | `caseline serve` | Start the chat/analysis HTTP server |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use caseline::{config, migrate, seed, server};

/// Caseline — AI-assisted probation violation analysis backend.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/caseline.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "caseline",
    about = "Caseline — AI-assisted probation violation analysis backend",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/caseline.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables. Safe to
    /// run repeatedly.
    Init,

    /// Load sample supervision records and knowledge-base guidance.
    ///
    /// Gives the RAG chat something to retrieve on a fresh install.
    Seed,

    /// Start the HTTP server.
    ///
    /// Binds to the address configured in `[server].bind` and serves the
    /// chat and analysis endpoints.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Seed => {
            seed::run_seed(&cfg).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
