//! Fetch driver and batch job workflows against an in-memory backend

use async_trait::async_trait;
use pvsite_core::error::{PvsiteError, Result};
use pvsite_core::models::{BoundingBox, Crs, DownloadRequest};
use pvsite_openeo::graph::{ProcessGraph, UserDefinedProcess};
use pvsite_openeo::inference::{build_inference_udp, execute_udp_batch, store_udp};
use pvsite_openeo::ports::{Backend, JobAsset, JobRequest, JobStatus};
use pvsite_openeo::{BatchRun, FetchDriver, FetchOutcome, InferenceOptions, Product, S2Options};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;

/// Records calls; synchronous results fail when the west coordinate is negative
#[derive(Default)]
struct FakeBackend {
    computed: Mutex<Vec<ProcessGraph>>,
    stored: Mutex<Vec<String>>,
    jobs: Mutex<Vec<JobRequest>>,
    statuses: Mutex<VecDeque<JobStatus>>,
    assets: Vec<JobAsset>,
}

impl FakeBackend {
    fn with_job(statuses: &[JobStatus], assets: Vec<JobAsset>) -> Self {
        Self {
            statuses: Mutex::new(statuses.iter().copied().collect()),
            assets,
            ..Self::default()
        }
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn compute_result(&self, graph: &ProcessGraph) -> Result<Vec<u8>> {
        self.computed.lock().unwrap().push(graph.clone());

        let load = graph.node("loadcollection1").expect("graph loads a collection");
        let west = load.arguments["spatial_extent"]["west"].as_f64().unwrap();
        if west < 0.0 {
            return Err(PvsiteError::Backend { status: 500, message: "Internal".to_string() });
        }
        Ok(b"CDF\x01".to_vec())
    }

    async fn store_process(&self, process: &UserDefinedProcess) -> Result<()> {
        self.stored.lock().unwrap().push(process.id.clone());
        Ok(())
    }

    async fn create_job(&self, job: &JobRequest) -> Result<String> {
        self.jobs.lock().unwrap().push(job.clone());
        Ok("j-1".to_string())
    }

    async fn start_job(&self, _job_id: &str) -> Result<()> {
        Ok(())
    }

    async fn job_status(&self, _job_id: &str) -> Result<JobStatus> {
        let mut statuses = self.statuses.lock().unwrap();
        let status = if statuses.len() > 1 { statuses.pop_front() } else { statuses.front().copied() };
        Ok(status.unwrap_or(JobStatus::Finished))
    }

    async fn job_assets(&self, _job_id: &str) -> Result<Vec<JobAsset>> {
        Ok(self.assets.clone())
    }

    async fn download(&self, href: &str) -> Result<Vec<u8>> {
        if href.contains("missing") {
            return Err(PvsiteError::Backend { status: 404, message: "Not found".to_string() });
        }
        Ok(href.as_bytes().to_vec())
    }
}

fn request(dir: &Path, members: Vec<usize>, west: f64) -> DownloadRequest {
    let name = members.iter().map(usize::to_string).collect::<Vec<_>>().join("_");
    DownloadRequest {
        members,
        bbox: BoundingBox::new(west, 5_300_000.0, west + 5120.0, 5_305_120.0),
        crs: Crs::utm32n(),
        target_path: dir.join(format!("s2_2022_{}.nc", name)),
    }
}

fn asset(name: &str) -> JobAsset {
    JobAsset { name: name.to_string(), href: format!("https://example.org/{}", name), media_type: None }
}

#[tokio::test]
async fn test_fetch_skips_existing_targets() {
    let dir = TempDir::new().unwrap();
    let existing = request(dir.path(), vec![1], 600_000.0);
    std::fs::write(&existing.target_path, b"old").unwrap();
    let fresh = request(dir.path(), vec![2, 5], 610_000.0);

    let backend = FakeBackend::default();
    let driver = FetchDriver::new(&backend, Product::Sentinel2(S2Options::new(2022)));
    let report = driver.run(&[existing.clone(), fresh.clone()]).await;

    assert_eq!(report.skipped, vec![existing.target_path.clone()]);
    assert_eq!(report.downloaded, vec![fresh.target_path.clone()]);
    assert!(report.is_success());

    // Existing files are left untouched and only one graph was submitted
    assert_eq!(std::fs::read(&existing.target_path).unwrap(), b"old");
    assert_eq!(std::fs::read(&fresh.target_path).unwrap(), b"CDF\x01");
    assert_eq!(backend.computed.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_fetch_continues_after_failure() {
    let dir = TempDir::new().unwrap();
    let failing = request(dir.path(), vec![3, 7], -1.0);
    let ok = request(dir.path(), vec![12], 600_000.0);

    let backend = FakeBackend::default();
    let driver = FetchDriver::new(&backend, Product::Sentinel2(S2Options::new(2022)));

    let mut outcomes = Vec::new();
    let report = driver
        .run_with(&[failing.clone(), ok.clone()], |request, outcome| {
            outcomes.push((request.members.clone(), outcome.clone()));
        })
        .await;

    assert_eq!(report.total(), 2);
    assert!(!report.is_success());
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, vec![3, 7]);
    assert!(report.failed[0].1.contains("500"));
    assert_eq!(report.downloaded, vec![ok.target_path.clone()]);

    assert!(matches!(outcomes[0].1, FetchOutcome::Failed(_)));
    assert_eq!(outcomes[1].1, FetchOutcome::Downloaded { bytes: 4 });

    // No partial file is left behind for the failed request
    assert!(!failing.target_path.exists());
    let mut part = failing.target_path.into_os_string();
    part.push(".part");
    assert!(!PathBuf::from(part).exists());
}

#[tokio::test]
async fn test_land_cover_product_graph_is_submitted() {
    let dir = TempDir::new().unwrap();
    let mut lclu = request(dir.path(), vec![4], 10.0);
    lclu.crs = Crs::wgs84();
    lclu.target_path = dir.path().join("lclu_2021_4.tif");

    let backend = FakeBackend::default();
    let report = FetchDriver::new(&backend, Product::LandCover).run(&[lclu]).await;
    assert_eq!(report.downloaded.len(), 1);

    let computed = backend.computed.lock().unwrap();
    let save = computed[0].node("saveresult1").unwrap();
    assert_eq!(save.arguments["format"], "GTiff");
}

#[tokio::test]
async fn test_store_udp() {
    let backend = FakeBackend::default();
    let udp = build_inference_udp(&InferenceOptions::default());

    store_udp(&backend, &udp).await.unwrap();
    assert_eq!(*backend.stored.lock().unwrap(), vec!["pv_inference".to_string()]);
}

#[tokio::test]
async fn test_batch_job_polls_until_finished() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("photovoltaic_prediction.nc");
    let backend = FakeBackend::with_job(
        &[JobStatus::Queued, JobStatus::Queued, JobStatus::Running, JobStatus::Finished],
        vec![asset("openEO.nc")],
    );
    let run = BatchRun::inference(12.17, 51.46, 12.18, 51.47, 2020).with_poll_interval(Duration::ZERO);

    let mut seen = Vec::new();
    let written = execute_udp_batch(&backend, &run, &output, |status| seen.push(*status)).await.unwrap();

    assert_eq!(seen, vec![JobStatus::Queued, JobStatus::Running, JobStatus::Finished]);
    assert_eq!(written, vec![output.clone()]);
    assert_eq!(std::fs::read(&output).unwrap(), b"https://example.org/openEO.nc");

    let jobs = backend.jobs.lock().unwrap();
    assert_eq!(jobs[0].title, "photovoltaic_prediction");
    let options = jobs[0].job_options.as_ref().unwrap();
    assert!(options["udf-dependency-archives"][0].as_str().unwrap().ends_with("#onnx_deps"));
}

#[tokio::test]
async fn test_batch_job_error_status_fails() {
    let dir = TempDir::new().unwrap();
    let backend = FakeBackend::with_job(&[JobStatus::Running, JobStatus::Error], vec![asset("openEO.nc")]);
    let run = BatchRun::inference(12.17, 51.46, 12.18, 51.47, 2020).with_poll_interval(Duration::ZERO);

    let result = execute_udp_batch(&backend, &run, &dir.path().join("out.nc"), |_| {}).await;
    match result {
        Err(PvsiteError::JobFailed { job_id, status }) => {
            assert_eq!(job_id, "j-1");
            assert_eq!(status, "error");
        }
        other => panic!("expected JobFailed, got {:?}", other),
    }
}

#[tokio::test]
async fn test_batch_job_skips_failed_assets() {
    let dir = TempDir::new().unwrap();
    let backend = FakeBackend::with_job(
        &[JobStatus::Finished],
        vec![asset("part_1.nc"), asset("missing.nc")],
    );
    let run = BatchRun::inference(12.17, 51.46, 12.18, 51.47, 2020).with_poll_interval(Duration::ZERO);

    let written = execute_udp_batch(&backend, &run, &dir.path().join("out.nc"), |_| {}).await.unwrap();
    assert_eq!(written, vec![dir.path().join("part_1.nc")]);
}
