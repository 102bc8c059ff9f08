//! Pipeline steps shared by several commands

use anyhow::{Context, Result};
use pvsite_core::config::LayeredConfig;
use pvsite_core::formats::{GeometryDataset, ShapefileLoader};
use pvsite_core::memo::ValidIndexFile;
use pvsite_core::models::{Crs, DownloadRequest, GeometryRecord, LandCoverVerdict, TargetNaming};
use pvsite_geo::{
    bounding_boxes, buffer_in_crs, merge_requests, reproject_all, FilterOutcome, LandCoverFilter,
    MergeOptions,
};
use pvsite_openeo::fetch::land_cover_path;
use pvsite_openeo::OpenEoClient;
use std::collections::HashSet;

use crate::errors;

/// Read the configured shapefile
pub fn load_footprints(config: &LayeredConfig) -> Result<GeometryDataset> {
    let path = &config.shapefile.value;
    if !path.exists() {
        return Err(errors::shapefile_not_found(path).into());
    }

    let dataset = ShapefileLoader::load(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    if !dataset.skipped.is_empty() {
        tracing::warn!(
            "{} of {} features in {} are not usable polygons",
            dataset.skipped.len(),
            dataset.source_len(),
            path.display()
        );
    }
    Ok(dataset)
}

/// Footprints in WGS84 grown by the land cover context margin, in meters
pub fn land_cover_footprints(records: &[GeometryRecord], margin: f64) -> Result<Vec<GeometryRecord>> {
    let geographic = reproject_all(records, &Crs::wgs84()).context("Failed to reproject footprints")?;
    let metric = Crs::utm32n();

    geographic
        .iter()
        .map(|record| {
            buffer_in_crs(record, margin, &metric)
                .with_context(|| format!("Failed to buffer geometry {}", record.index))
        })
        .collect()
}

/// Run the land cover filter, or reuse the stored valid indices
pub fn run_filter(
    config: &LayeredConfig,
    records: &[GeometryRecord],
    refresh: bool,
    on_verdict: impl FnMut(&LandCoverVerdict),
) -> Result<FilterOutcome> {
    let memo = ValidIndexFile::new(config.valid_index_path());
    let lclu_dir = config.lclu_dir.value.clone();

    LandCoverFilter::default()
        .run_memoized(records, |index| land_cover_path(&lclu_dir, index), &memo, refresh, on_verdict)
        .context("Failed to run the land cover filter")
}

/// Merge the valid footprints into Sentinel-2 requests for `year`
pub fn plan_requests(
    config: &LayeredConfig,
    records: &[GeometryRecord],
    valid: &[usize],
    year: i32,
) -> Result<Vec<DownloadRequest>> {
    let valid: HashSet<usize> = valid.iter().copied().collect();
    let valid_records: Vec<GeometryRecord> =
        records.iter().filter(|r| valid.contains(&r.index)).cloned().collect();

    let unknown = valid.len().saturating_sub(valid_records.len());
    if unknown > 0 {
        tracing::warn!("{} valid indices have no geometry in the shapefile", unknown);
    }

    let metric = reproject_all(&valid_records, &Crs::utm32n())
        .context("Failed to reproject footprints to EPSG:32632")?;

    let naming = TargetNaming::new(&config.s2_dir.value, "s2", year, "nc");
    let options = MergeOptions::new(naming).with_min_patch_size(config.min_patch_size.value);
    Ok(merge_requests(&bounding_boxes(&metric), &options))
}

/// Connect to the configured backend
pub async fn connect(config: &LayeredConfig) -> Result<OpenEoClient> {
    OpenEoClient::connect(&config.backend_url.value, config.credentials.as_ref())
        .await
        .with_context(|| format!("Failed to connect to {}", config.backend_url.value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{MultiPolygon, Rect};
    use std::path::PathBuf;

    fn square(index: usize, x: f64, y: f64, size: f64) -> GeometryRecord {
        let rect = Rect::new((x, y), (x + size, y + size));
        GeometryRecord::new(index, MultiPolygon::new(vec![rect.to_polygon()]), Crs::utm32n())
    }

    #[test]
    fn test_plan_requests_uses_valid_footprints_only() {
        let mut config = LayeredConfig::with_defaults();
        config.s2_dir.value = PathBuf::from("patches");

        let records = vec![
            square(0, 600_000.0, 5_300_000.0, 100.0),
            square(1, 601_000.0, 5_300_000.0, 100.0),
            square(2, 700_000.0, 5_400_000.0, 100.0),
        ];

        let requests = plan_requests(&config, &records, &[0, 1], 2022).unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].members, vec![0, 1]);
        assert_eq!(requests[0].target_path, PathBuf::from("patches/s2_2022_0_1.nc"));
    }

    #[test]
    fn test_plan_requests_ignores_duplicate_and_unknown_indices() {
        let config = LayeredConfig::with_defaults();
        let records = vec![square(0, 600_000.0, 5_300_000.0, 100.0), square(4, 650_000.0, 5_300_000.0, 100.0)];

        let requests = plan_requests(&config, &records, &[4, 4, 0, 9], 2022).unwrap();
        let members: Vec<Vec<usize>> = requests.into_iter().map(|r| r.members).collect();
        assert_eq!(members, vec![vec![0], vec![4]]);
    }

    #[test]
    fn test_missing_shapefile_has_suggestions() {
        let mut config = LayeredConfig::with_defaults();
        config.shapefile.value = PathBuf::from("/nonexistent/farms.shp");

        let error = load_footprints(&config).unwrap_err();
        assert!(error.downcast_ref::<errors::CliError>().is_some());
    }
}
