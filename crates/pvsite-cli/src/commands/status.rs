//! Status command implementation

use crate::cli::StatusArgs;
use crate::output::OutputWriter;
use crate::output_types::{ConfigEntry, MemoStatus, StatusOutput};
use anyhow::Result;
use chrono::{DateTime, Utc};
use pvsite_core::config::LayeredConfig;
use pvsite_core::memo::ValidIndexFile;
use std::fs;
use std::path::Path;

pub fn execute(args: StatusArgs, config: &LayeredConfig, output: &OutputWriter) -> Result<()> {
    let shapefile = &config.shapefile.value;
    let memo = ValidIndexFile::new(config.valid_index_path());

    let memo_status = MemoStatus {
        path: memo.path().display().to_string(),
        valid_count: memo.load_if_exists().ok().flatten().map(|indices| indices.len()),
        modified: fs::metadata(memo.path())
            .and_then(|meta| meta.modified())
            .ok()
            .map(DateTime::<Utc>::from),
    };
    let land_cover_rasters = count_files(&config.lclu_dir.value, "tif");
    let s2_patches = count_files(&config.s2_dir.value, "nc");

    let entries: Option<Vec<ConfigEntry>> = args.verbose.then(|| {
        config
            .to_inspection_map()
            .into_iter()
            .map(|(key, (value, source))| ConfigEntry { key, value, source: format!("{:?}", source) })
            .collect()
    });

    output.section("Input");
    output.kv("Shapefile", shapefile.display());
    output.kv("Present", if shapefile.exists() { "✓" } else { "✗" });
    if !shapefile.exists() {
        output.warning(format!("{} does not exist, set `shapefile` or pass --shapefile", shapefile.display()));
    }
    output.kv("Backend", &config.backend_url.value);
    output.kv("Credentials", if config.credentials.is_some() { "configured" } else { "none" });

    output.section("Progress");
    output.kv("Land cover rasters", land_cover_rasters);
    match (memo_status.valid_count, memo_status.modified) {
        (Some(count), Some(modified)) => output.kv(
            "Valid farms",
            format!("{} (filtered {})", count, modified.format("%Y-%m-%d %H:%M:%S UTC")),
        ),
        (Some(count), None) => output.kv("Valid farms", count),
        _ => {
            output.kv("Valid farms", "not filtered yet");
            output.info("Run 'pvsite filter' after downloading the land cover rasters");
        }
    }
    output.kv("Sentinel-2 patches", s2_patches);

    if let Some(entries) = &entries {
        output.section("Configuration");
        output.table(entries);
    }

    output.result(StatusOutput {
        shapefile: shapefile.display().to_string(),
        shapefile_present: shapefile.exists(),
        memo: memo_status,
        land_cover_rasters,
        s2_patches,
        credentials: config.credentials.is_some(),
        config: entries,
    })
}

/// Number of files with `extension` directly in `dir`, 0 when the directory is missing
fn count_files(dir: &Path, extension: &str) -> usize {
    fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.path().extension().and_then(|e| e.to_str()) == Some(extension))
                .count()
        })
        .unwrap_or(0)
}
