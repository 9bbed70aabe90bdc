//! # resonance
//!
//! Command-line front end for the Resonance streaming pipeline.
//!
//! ## Commands
//!
//! - `start`: Run the pipeline until interrupted
//! - `send`: Publish a single test message to the bus
//! - `config`: Show the effective configuration
//!
//! ## Example
//!
//! ```bash
//! # Start the complete pipeline
//! resonance start
//!
//! # Send a test state update
//! resonance send --type state --message "Test update"
//!
//! # Send a repository event to LexAmoris
//! resonance send --type event --target lexamoris --message "New commit"
//!
//! # Show configuration
//! resonance --config resonance.toml config
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use resonance_node::Config;
use std::path::PathBuf;
use std::process::ExitCode;

mod commands;

use commands::{config, send, start};

/// Resonance streaming pipeline CLI.
#[derive(Parser, Debug)]
#[command(name = "resonance")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file (TOML); built-in defaults if omitted
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Force the simulated bus and simulated sockets
    #[arg(long, global = true)]
    simulate: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(long, short, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the streaming pipeline
    Start,

    /// Send a test message
    Send {
        /// Type of message to send
        #[arg(long = "type", value_enum)]
        kind: send::Kind,

        /// Message content
        #[arg(long, default_value = "Test message")]
        message: String,

        /// Target node (for event messages)
        #[arg(long)]
        target: Option<String>,
    },

    /// Show configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => Config::default(),
    };
    if cli.simulate {
        config = config.simulated();
    }

    match cli.command {
        Commands::Start => {
            start::run(config).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Send {
            kind,
            message,
            target,
        } => {
            let sent = send::run(&config, kind, &message, target.as_deref()).await;
            Ok(if sent {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::Config => {
            config::run(&config);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn setup_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();
}
