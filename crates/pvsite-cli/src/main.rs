//! pvsite CLI - Command-line interface
//!
//! Drives the photovoltaic site pipeline: land cover download, land cover filtering, request
//! planning, Sentinel-2 download and inference packaging.

mod cli;
mod commands;
mod config_loader;
mod dry_run;
mod errors;
mod output;
mod output_types;
mod pipeline;
mod progress;

use anyhow::Result;
use clap::Parser;
use cli::Cli;

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Create async runtime
    let runtime = tokio::runtime::Runtime::new()?;

    // Execute the command
    if let Err(error) = runtime.block_on(async { commands::execute(cli).await }) {
        errors::from_anyhow(&error).display();
        std::process::exit(1);
    }

    Ok(())
}
