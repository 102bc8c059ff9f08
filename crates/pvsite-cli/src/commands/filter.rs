//! Filter command implementation

use crate::cli::FilterArgs;
use crate::dry_run::{display_planned_actions, ActionType, PlannedAction};
use crate::errors;
use crate::output::OutputWriter;
use crate::output_types::{FilterOutput, VerdictRow};
use crate::pipeline::{load_footprints, run_filter};
use crate::progress::{create_progress_bar, finish_success};
use anyhow::Result;
use pvsite_core::config::LayeredConfig;
use pvsite_core::memo::ValidIndexFile;
use pvsite_core::models::GeometryRecord;
use pvsite_geo::FilterOutcome;

pub fn execute(args: FilterArgs, config: LayeredConfig, output: &OutputWriter, dry_run: bool) -> Result<()> {
    let dataset = load_footprints(&config)?;
    let memo = ValidIndexFile::new(config.valid_index_path());

    if dry_run {
        let action = if memo.exists() && !args.refresh {
            PlannedAction::new(ActionType::ReadRasters, "Reuse stored valid indices")
                .with_detail(format!("File: {}", memo.path().display()))
        } else {
            PlannedAction::new(
                ActionType::ReadRasters,
                format!("Classify {} farms from their land cover rasters", dataset.records.len()),
            )
            .with_detail(format!("Rasters: {}", config.lclu_dir.value.display()))
            .with_detail(format!("Write valid indices to {}", memo.path().display()))
        };
        return display_planned_actions(output, &[action]);
    }

    let pb = create_progress_bar(
        dataset.records.len() as u64,
        "Classifying land cover",
        output.is_json(),
    );
    let outcome = run_filter(&config, &dataset.records, args.refresh, |_| pb.inc(1))?;

    let valid = outcome.valid_indices();
    let reused = matches!(outcome, FilterOutcome::Reused(_));
    if reused {
        pb.finish_and_clear();
        output.info(format!("Reusing valid indices from {}", memo.path().display()));
    } else {
        finish_success(&pb, &format!("{} of {} farms passed", valid.len(), dataset.records.len()));
    }

    let verdicts: Vec<VerdictRow> = outcome
        .verdicts()
        .iter()
        .filter(|verdict| verdict.valid || !args.valid_only)
        .map(VerdictRow::from)
        .collect();

    if !reused {
        output.table(&verdicts);
    }
    output.kv("Valid farms", valid.len());
    output.kv("Valid-index file", memo.path().display());

    output.result(FilterOutput {
        reused,
        memo_path: memo.path().display().to_string(),
        valid_indices: valid,
        verdicts,
    })
}

/// Valid farm indices for the download steps, reusing the stored indices when present
pub fn valid_farms(config: &LayeredConfig, records: &[GeometryRecord]) -> Result<Vec<usize>> {
    let valid = run_filter(config, records, false, |_| {})?.valid_indices();
    if valid.is_empty() {
        return Err(errors::no_valid_farms(&config.valid_index_path()).into());
    }
    Ok(valid)
}
