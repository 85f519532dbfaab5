//! Tidepool CLI - Command-line interface
//!
//! Provides command-line access to provider management, source queries,
//! and playback.

mod commands;

use clap::Parser;
use tidepool_core::tracing_setup::{CliLogLevel, init_tracing};

#[derive(Parser)]
#[command(name = "tidepool")]
#[command(about = "A streaming-source aggregator")]
struct Cli {
    /// Console log verbosity
    #[arg(long, default_value = "warn")]
    log_level: CliLogLevel,

    #[command(subcommand)]
    command: commands::Commands,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_tracing_level(), None)?;

    if let Err(error) = commands::handle_command(cli.command).await {
        eprintln!("Error: {}", error.user_message());
        std::process::exit(1);
    }

    Ok(())
}
