//! Landcover command implementation

use crate::cli::LandcoverArgs;
use crate::commands::fetch::{download, planned_downloads};
use crate::dry_run::display_planned_actions;
use crate::output::OutputWriter;
use crate::pipeline::{connect, land_cover_footprints, load_footprints};
use anyhow::Result;
use pvsite_core::config::LayeredConfig;
use pvsite_openeo::{land_cover_requests, Product};

pub async fn execute(
    args: LandcoverArgs,
    config: LayeredConfig,
    output: &OutputWriter,
    dry_run: bool,
) -> Result<()> {
    let dataset = load_footprints(&config)?;
    let margin = args.buffer.unwrap_or(config.lclu_buffer.value);
    let footprints = land_cover_footprints(&dataset.records, margin)?;
    let requests = land_cover_requests(&footprints, &config.lclu_dir.value);

    if dry_run {
        return display_planned_actions(output, &planned_downloads(&requests, "land cover raster"));
    }

    output.section("Land Cover Download");
    output.kv("Farms", dataset.records.len());
    output.kv("Context margin", format!("{} m", margin));
    output.kv("Directory", config.lclu_dir.value.display());

    let client = connect(&config).await?;
    download(&client, Product::LandCover, &requests, output).await
}
