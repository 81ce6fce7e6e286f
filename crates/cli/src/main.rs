//! StudyGuide CLI — the main entry point.
//!
//! Commands:
//! - `onboard`  — Write a default config and create storage directories
//! - `gateway`  — Start the HTTP API server
//! - `doctor`   — Diagnose configuration and provider reachability

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "studyguide",
    about = "StudyGuide — a tool-using study assistant backend",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize configuration and storage directories
    Onboard,

    /// Start the HTTP gateway server
    Gateway {
        /// Override the port
        #[arg(short, long, env = "STUDYGUIDE_PORT")]
        port: Option<u16>,

        /// Override the bind address
        #[arg(long)]
        host: Option<String>,
    },

    /// Diagnose system health
    Doctor {
        /// Also contact the model provider
        #[arg(long)]
        online: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Onboard => commands::onboard::run().await?,
        Commands::Gateway { port, host } => commands::gateway::run(port, host).await?,
        Commands::Doctor { online } => commands::doctor::run(online).await?,
    }

    Ok(())
}
