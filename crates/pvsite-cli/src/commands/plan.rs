//! Plan command implementation

use crate::cli::PlanArgs;
use crate::commands::filter::valid_farms;
use crate::output::OutputWriter;
use crate::output_types::{PlanOutput, RequestRow};
use crate::pipeline::{load_footprints, plan_requests};
use anyhow::Result;
use pvsite_core::config::{CliConfigOverrides, LayeredConfig};
use pvsite_core::PvsiteError;

pub fn execute(args: PlanArgs, mut config: LayeredConfig, output: &OutputWriter) -> Result<()> {
    config.update_from_cli(CliConfigOverrides {
        min_patch_size: args.min_patch_size,
        ..Default::default()
    });

    let year = match args.year {
        Some(year) => year,
        None => *config
            .years
            .value
            .first()
            .ok_or_else(|| PvsiteError::ConfigMissing { key: "years".to_string() })?,
    };

    let dataset = load_footprints(&config)?;
    let valid = valid_farms(&config, &dataset.records)?;
    let requests = plan_requests(&config, &dataset.records, &valid, year)?;

    let rows: Vec<RequestRow> = requests.iter().map(RequestRow::from).collect();
    let merged = requests.iter().filter(|r| r.is_merged()).count();
    let pending = rows.iter().filter(|r| !r.exists).count();

    output.section(format!("Sentinel-2 requests for {}", year));
    output.table(&rows);
    output.kv("Valid farms", valid.len());
    output.kv("Requests", format!("{} ({} shared by several farms)", requests.len(), merged));
    output.kv("Still to download", pending);

    output.result(PlanOutput {
        year,
        min_patch_size: config.min_patch_size.value,
        valid_count: valid.len(),
        requests: rows,
    })
}
