//! Command implementations

mod fetch;
mod filter;
mod infer;
mod landcover;
mod plan;
mod status;
mod udp;

use crate::cli::{Cli, Commands};
use crate::config_loader::load_config_with_overrides;
use crate::output::OutputWriter;
use anyhow::Result;
use pvsite_core::config::CliConfigOverrides;

/// Execute a CLI command
pub async fn execute(cli: Cli) -> Result<()> {
    let output = OutputWriter::new(cli.json);

    let overrides = CliConfigOverrides {
        backend_url: cli.backend_url.clone(),
        shapefile: cli.shapefile.clone(),
        ..Default::default()
    };
    let config = load_config_with_overrides(cli.config.as_deref(), overrides)?;

    match cli.command {
        Commands::Landcover(args) => landcover::execute(args, config, &output, cli.dry_run).await,
        Commands::Filter(args) => filter::execute(args, config, &output, cli.dry_run),
        Commands::Plan(args) => plan::execute(args, config, &output),
        Commands::Fetch(args) => fetch::execute(args, config, &output, cli.dry_run).await,
        Commands::Udp(args) => udp::execute(args, config, &output, cli.dry_run).await,
        Commands::Infer(args) => infer::execute(args, config, &output, cli.dry_run).await,
        Commands::Status(args) => status::execute(args, &config, &output),
    }
}
