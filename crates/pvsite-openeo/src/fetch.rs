//! Sequential download of planned requests
//!
//! Requests are processed one at a time in the given order. A request whose target file exists
//! is considered done. Failures are logged and recorded, never retried, and do not stop the run.

use pvsite_core::error::Result;
use pvsite_core::models::{DownloadRequest, GeometryRecord, TargetNaming};
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::ports::Backend;
use crate::products::Product;

/// WorldCover map year used in land cover file names
pub const LAND_COVER_YEAR: i32 = 2021;

/// What happened to one request
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Downloaded { bytes: usize },
    Skipped,
    Failed(String),
}

/// Summary of a fetch run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchReport {
    pub downloaded: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
    /// Members of the failed request and the error message
    pub failed: Vec<(Vec<usize>, String)>,
}

impl FetchReport {
    pub fn total(&self) -> usize {
        self.downloaded.len() + self.skipped.len() + self.failed.len()
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Downloads one product for a list of requests
pub struct FetchDriver<'a, B: Backend + ?Sized> {
    backend: &'a B,
    product: Product,
}

impl<'a, B: Backend + ?Sized> FetchDriver<'a, B> {
    pub fn new(backend: &'a B, product: Product) -> Self {
        Self { backend, product }
    }

    pub fn product(&self) -> &Product {
        &self.product
    }

    pub async fn run(&self, requests: &[DownloadRequest]) -> FetchReport {
        self.run_with(requests, |_, _| {}).await
    }

    /// Like [`FetchDriver::run`], reporting every outcome as it happens
    pub async fn run_with(
        &self,
        requests: &[DownloadRequest],
        mut on_outcome: impl FnMut(&DownloadRequest, &FetchOutcome),
    ) -> FetchReport {
        let mut report = FetchReport::default();

        for request in requests {
            let outcome = self.fetch_one(request).await;
            on_outcome(request, &outcome);

            match outcome {
                FetchOutcome::Downloaded { .. } => report.downloaded.push(request.target_path.clone()),
                FetchOutcome::Skipped => report.skipped.push(request.target_path.clone()),
                FetchOutcome::Failed(message) => report.failed.push((request.members.clone(), message)),
            }
        }

        tracing::info!(
            "{}: {} downloaded, {} already present, {} failed",
            self.product.name(),
            report.downloaded.len(),
            report.skipped.len(),
            report.failed.len()
        );
        report
    }

    async fn fetch_one(&self, request: &DownloadRequest) -> FetchOutcome {
        if request.target_path.exists() {
            tracing::debug!("{} exists, skipping", request.target_path.display());
            return FetchOutcome::Skipped;
        }

        tracing::info!(
            "Requesting {} for {:?} -> {}",
            self.product.name(),
            request.members,
            request.target_path.display()
        );
        let started = std::time::Instant::now();

        match self.download(request).await {
            Ok(bytes) => {
                tracing::info!(
                    "{:?} downloaded ({} bytes) in {:.1}s",
                    request.members,
                    bytes,
                    started.elapsed().as_secs_f64()
                );
                FetchOutcome::Downloaded { bytes }
            }
            Err(e) => {
                tracing::error!("{:?} failed to download: {}", request.members, e);
                FetchOutcome::Failed(e.to_string())
            }
        }
    }

    async fn download(&self, request: &DownloadRequest) -> Result<usize> {
        let graph = self.product.graph(request);
        graph.validate()?;

        let bytes = self.backend.compute_result(&graph).await?;
        write_atomically(&request.target_path, &bytes).await?;
        Ok(bytes.len())
    }
}

/// Write to `<path>.part` and rename, so that an interrupted transfer never leaves a file under
/// the final name
pub async fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }

    let mut part = path.as_os_str().to_owned();
    part.push(".part");
    let part = PathBuf::from(part);

    fs::write(&part, bytes).await?;
    fs::rename(&part, path).await?;
    Ok(())
}

/// One land cover request per footprint, boxes taken in the footprint CRS
pub fn land_cover_requests(records: &[GeometryRecord], dir: &Path) -> Vec<DownloadRequest> {
    let naming = TargetNaming::new(dir, "lclu", LAND_COVER_YEAR, "tif");

    records
        .iter()
        .filter_map(|record| {
            let bbox = record.bounds()?;
            Some(DownloadRequest {
                members: vec![record.index],
                bbox,
                crs: record.crs.clone(),
                target_path: naming.path_for(&[record.index]),
            })
        })
        .collect()
}

/// Path of the land cover raster of a footprint
pub fn land_cover_path(dir: &Path, index: usize) -> PathBuf {
    TargetNaming::new(dir, "lclu", LAND_COVER_YEAR, "tif").path_for(&[index])
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{polygon, MultiPolygon};
    use pvsite_core::models::Crs;

    #[tokio::test]
    async fn test_write_atomically() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("s2_2022_1.nc");

        write_atomically(&path, b"CDF").await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"CDF");
        assert!(!dir.path().join("nested").join("s2_2022_1.nc.part").exists());
    }

    #[test]
    fn test_land_cover_requests() {
        let poly = polygon![(x: 10.0, y: 51.0), (x: 10.1, y: 51.0), (x: 10.1, y: 51.1), (x: 10.0, y: 51.0)];
        let records = vec![
            GeometryRecord::new(4, MultiPolygon::new(vec![poly]), Crs::wgs84()),
            GeometryRecord::new(5, MultiPolygon::new(vec![]), Crs::wgs84()),
        ];

        let requests = land_cover_requests(&records, Path::new("lclu"));
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].members, vec![4]);
        assert_eq!(requests[0].target_path, PathBuf::from("lclu/lclu_2021_4.tif"));
        assert_eq!(requests[0].crs, Crs::wgs84());
        assert_eq!(land_cover_path(Path::new("lclu"), 4), requests[0].target_path);
    }
}
