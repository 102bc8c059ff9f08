//! Fetch command implementation

use crate::cli::FetchArgs;
use crate::commands::filter::valid_farms;
use crate::dry_run::{display_planned_actions, ActionType, PlannedAction};
use crate::errors;
use crate::output::OutputWriter;
use crate::output_types::{FailedRequest, FetchOutput};
use crate::pipeline::{connect, load_footprints, plan_requests};
use crate::progress::{create_progress_bar, finish_error, finish_success};
use anyhow::Result;
use pvsite_core::config::{CliConfigOverrides, LayeredConfig};
use pvsite_core::memo::ValidIndexFile;
use pvsite_core::models::{DownloadRequest, GeometryRecord};
use pvsite_openeo::{Backend, FetchDriver, FetchOutcome, Product, S2Options};

pub async fn execute(
    args: FetchArgs,
    mut config: LayeredConfig,
    output: &OutputWriter,
    dry_run: bool,
) -> Result<()> {
    config.update_from_cli(CliConfigOverrides {
        years: args.year.map(|year| vec![year]),
        min_patch_size: args.min_patch_size,
        ..Default::default()
    });

    let dataset = load_footprints(&config)?;

    if dry_run {
        let actions = planned_fetch(&config, &dataset.records)?;
        return display_planned_actions(output, &actions);
    }

    let valid = valid_farms(&config, &dataset.records)?;
    let mut plans = Vec::new();
    for &year in &config.years.value {
        let requests = plan_requests(&config, &dataset.records, &valid, year)?;
        let options = S2Options {
            year,
            max_cloud_cover: config.max_cloud_cover.value,
            temporal_statistics: config.temporal_statistics.value && !args.raw,
        };
        plans.push((options, requests));
    }

    let client = connect(&config).await?;
    for (options, requests) in plans {
        output.section(format!("Sentinel-2 {}", options.year));
        output.kv("Valid farms", valid.len());
        output.kv("Requests", requests.len());
        download(&client, Product::Sentinel2(options), &requests, output).await?;
    }
    Ok(())
}

/// Planned actions of a fetch run, reading only the stored valid indices
///
/// Without a valid-index file the classification is listed instead of the downloads, which
/// depend on its outcome.
fn planned_fetch(config: &LayeredConfig, records: &[GeometryRecord]) -> Result<Vec<PlannedAction>> {
    let memo = ValidIndexFile::new(config.valid_index_path());
    let valid: Vec<usize> = match memo.load_if_exists()? {
        Some(indices) => indices.into_iter().map(usize::from).collect(),
        None => {
            return Ok(vec![PlannedAction::new(
                ActionType::ReadRasters,
                format!("Classify {} farms from their land cover rasters", records.len()),
            )
            .with_detail(format!("Rasters: {}", config.lclu_dir.value.display()))
            .with_detail(format!("Write valid indices to {}", memo.path().display()))
            .with_detail("Sentinel-2 requests are planned from the valid farms")]);
        }
    };
    if valid.is_empty() {
        return Err(errors::no_valid_farms(memo.path()).into());
    }

    let mut actions = Vec::new();
    for &year in &config.years.value {
        let requests = plan_requests(config, records, &valid, year)?;
        actions.extend(planned_downloads(&requests, &format!("Sentinel-2 {} patch", year)));
    }
    Ok(actions)
}

/// One download action per request whose target does not exist yet
pub fn planned_downloads(requests: &[DownloadRequest], what: &str) -> Vec<PlannedAction> {
    requests
        .iter()
        .filter(|request| !request.target_path.exists())
        .map(|request| {
            PlannedAction::new(
                ActionType::Download,
                format!("Download {} to {}", what, request.target_path.display()),
            )
            .with_detail(format!("Members: {}", request.member_label()))
            .with_detail(format!(
                "Box: {:.4}, {:.4}, {:.4}, {:.4} ({})",
                request.bbox.west,
                request.bbox.south,
                request.bbox.east,
                request.bbox.north,
                request.crs.authority()
            ))
        })
        .collect()
}

/// Run the fetch driver with a progress bar and report the outcome
pub async fn download<B: Backend + ?Sized>(
    backend: &B,
    product: Product,
    requests: &[DownloadRequest],
    output: &OutputWriter,
) -> Result<()> {
    let name = product.name();
    let pb = create_progress_bar(requests.len() as u64, &format!("Downloading {}", name), output.is_json());

    let driver = FetchDriver::new(backend, product);
    let report = driver
        .run_with(requests, |request, outcome| {
            if let FetchOutcome::Failed(_) = outcome {
                pb.println(format!("✗ {} failed", request.target_path.display()));
            }
            pb.inc(1);
        })
        .await;

    let summary = format!(
        "{} downloaded, {} already present, {} failed",
        report.downloaded.len(),
        report.skipped.len(),
        report.failed.len()
    );
    if report.is_success() {
        finish_success(&pb, &summary);
    } else {
        finish_error(&pb, &summary);
    }

    let failed: Vec<FailedRequest> = report
        .failed
        .iter()
        .map(|(members, error)| FailedRequest {
            members: members.iter().map(usize::to_string).collect::<Vec<_>>().join(", "),
            error: error.clone(),
        })
        .collect();
    if !failed.is_empty() {
        output.table(&failed);
    }

    output.result(FetchOutput {
        product: name.to_string(),
        requests: requests.len(),
        downloaded: report.downloaded.iter().map(|p| p.display().to_string()).collect(),
        skipped: report.skipped.len(),
        failed,
    })?;

    if report.is_success() {
        Ok(())
    } else {
        Err(errors::downloads_failed(name, report.failed.len()).into())
    }
}
