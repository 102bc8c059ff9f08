//! Inference packaging: the `pv_inference` user-defined process and its batch execution
//!
//! The process loads a cloud masked Sentinel-2 cube for a year, builds weekly mean composites,
//! fills gaps by linear interpolation, flattens the weeks into bands and reduces the bands to a
//! single prediction with a classifier run as a UDF on the backend.

use pvsite_core::config::{DEFAULT_DEPENDENCIES_URL, DEFAULT_INFERENCE_URL};
use pvsite_core::error::{PvsiteError, Result};
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::fetch::write_atomically;
use crate::graph::{
    callback, from_parameter, GraphBuilder, ProcessGraph, ProcessParameter, UserDefinedProcess,
};
use crate::ports::{Backend, JobAsset, JobProcess, JobRequest, JobStatus};
use crate::products::{cloud_masked_s2, S2_BANDS};

pub const INFERENCE_PROCESS_ID: &str = "pv_inference";

/// Classifier UDF executed by the backend
pub const DEFAULT_UDF: &str = include_str!("../udf/rf_onnx.py");

/// Weeks the published model was trained on
pub const DEFAULT_WEEK_COUNT: usize = 43;

/// Directory the dependency archive is unpacked to, imported by the UDF
const DEPENDENCIES_TARGET: &str = "onnx_deps";

/// A contiguous range of weekly composites, `first` is zero based
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeekWindow {
    pub first: usize,
    pub count: usize,
}

impl WeekWindow {
    pub fn last(&self) -> usize {
        self.first + self.count.saturating_sub(1)
    }
}

impl Default for WeekWindow {
    fn default() -> Self {
        Self { first: 0, count: DEFAULT_WEEK_COUNT }
    }
}

/// Settings of the inference process
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceOptions {
    /// UDF source code
    pub udf: String,
    pub default_year: i64,
    pub inference_url: String,
    /// Restrict the series to a window of weeks; `None` keeps every week of the year
    pub week_window: Option<WeekWindow>,
}

impl Default for InferenceOptions {
    fn default() -> Self {
        Self {
            udf: DEFAULT_UDF.to_string(),
            default_year: 2021,
            inference_url: DEFAULT_INFERENCE_URL.to_string(),
            week_window: Some(WeekWindow::default()),
        }
    }
}

/// Build the `pv_inference` process
pub fn build_inference_udp(options: &InferenceOptions) -> UserDefinedProcess {
    let mut builder = GraphBuilder::new();

    let start = builder.add(
        "text_concat",
        json!({ "data": [from_parameter("year"), "-01-01"], "separator": "" }),
    );
    let end = builder.add(
        "text_concat",
        json!({ "data": [from_parameter("year"), "-12-31"], "separator": "" }),
    );

    let masked = cloud_masked_s2(
        &mut builder,
        from_parameter("spatial_extent"),
        json!([start.output(), end.output()]),
        None,
    );

    let weekly = builder.add(
        "aggregate_temporal_period",
        json!({
            "data": masked.output(),
            "period": "week",
            "reducer": callback(single_process("mean", json!({ "data": from_parameter("data") }))),
        }),
    );

    let interpolated = builder.add(
        "apply_dimension",
        json!({
            "data": weekly.output(),
            "dimension": "t",
            "process": callback(single_process(
                "array_interpolate_linear",
                json!({ "data": from_parameter("data") }),
            )),
        }),
    );

    let series = match options.week_window {
        Some(window) => builder.add(
            "apply_dimension",
            json!({
                "data": interpolated.output(),
                "dimension": "t",
                "process": callback(week_filter(window)),
            }),
        ),
        None => interpolated,
    };

    let stacked = builder.add(
        "apply_dimension",
        json!({
            "data": series.output(),
            "dimension": "t",
            "target_dimension": "bands",
            "process": callback(single_process("array_create", json!({ "data": from_parameter("data") }))),
        }),
    );

    // Without a window the number of weeks depends on the year, so the labels stay the backend's
    let features = match options.week_window {
        Some(window) => builder.add(
            "rename_labels",
            json!({
                "data": stacked.output(),
                "dimension": "bands",
                "target": timestep_band_names(&S2_BANDS, window.count),
            }),
        ),
        None => stacked,
    };

    let udf = single_process(
        "run_udf",
        json!({
            "data": from_parameter("data"),
            "udf": options.udf,
            "runtime": "Python",
            "context": { "model_url": from_parameter("inference_url") },
        }),
    );
    let prediction = builder.add(
        "reduce_dimension",
        json!({ "data": features.output(), "dimension": "bands", "reducer": callback(udf) }),
    );

    UserDefinedProcess {
        id: INFERENCE_PROCESS_ID.to_string(),
        summary: Some("Photovoltaic farm prediction from Sentinel-2 weekly composites".to_string()),
        description: Some(format!(
            "Runs a pixel classifier on {} Sentinel-2 bands over {} weekly composites of a year.",
            S2_BANDS.len(),
            options.week_window.map(|w| w.count.to_string()).unwrap_or_else(|| "all".to_string())
        )),
        parameters: vec![
            ProcessParameter::new(
                "spatial_extent",
                "The bounding box to load.",
                json!({
                    "type": "object",
                    "properties": {
                        "west": { "type": "number" },
                        "south": { "type": "number" },
                        "east": { "type": "number" },
                        "north": { "type": "number" },
                        "crs": { "type": "string" }
                    }
                }),
            ),
            ProcessParameter::integer(
                "year",
                "The year of the Sentinel-2 time series.",
                options.default_year,
            ),
            ProcessParameter::string(
                "inference_url",
                "URL of the ONNX classifier.",
                &options.inference_url,
            ),
        ],
        process_graph: builder.finish(&prediction),
    }
}

/// Graph of a single process, used for callbacks
fn single_process(process_id: &str, arguments: Value) -> ProcessGraph {
    let mut builder = GraphBuilder::new();
    let node = builder.add(process_id, arguments);
    builder.finish(&node)
}

/// Keep the elements whose index lies within `window`
fn week_filter(window: WeekWindow) -> ProcessGraph {
    let condition = single_process(
        "between",
        json!({ "x": from_parameter("index"), "min": window.first, "max": window.last() }),
    );
    single_process(
        "array_filter",
        json!({ "data": from_parameter("data"), "condition": callback(condition) }),
    )
}

/// Band labels after flattening time into bands: every time step of the first band, then
/// every time step of the second band, and so on
pub fn timestep_band_names(bands: &[&str], timesteps: usize) -> Vec<String> {
    bands
        .iter()
        .flat_map(|band| (1..=timesteps).map(move |t| format!("{}_t{}", band, t)))
        .collect()
}

/// Job options making the ONNX runtime archive available to the UDF
pub fn job_options(dependencies_url: &str) -> Value {
    json!({
        "udf-dependency-archives": [format!("{}#{}", dependencies_url, DEPENDENCIES_TARGET)],
    })
}

/// Save the process on the backend under its id
pub async fn store_udp<B: Backend + ?Sized>(backend: &B, udp: &UserDefinedProcess) -> Result<()> {
    udp.process_graph.validate()?;
    backend.store_process(udp).await
}

/// A batch run of a stored process
#[derive(Debug, Clone, PartialEq)]
pub struct BatchRun {
    pub title: String,
    pub process_id: String,
    /// Concrete values for the process parameters
    pub arguments: Map<String, Value>,
    pub dependencies_url: String,
    pub poll_interval: Duration,
}

impl BatchRun {
    /// Run of `pv_inference` over a WGS84 box
    pub fn inference(west: f64, south: f64, east: f64, north: f64, year: i32) -> Self {
        let mut arguments = Map::new();
        arguments.insert(
            "spatial_extent".to_string(),
            json!({ "west": west, "south": south, "east": east, "north": north }),
        );
        arguments.insert("year".to_string(), json!(year));

        Self {
            title: "photovoltaic_prediction".to_string(),
            process_id: INFERENCE_PROCESS_ID.to_string(),
            arguments,
            dependencies_url: DEFAULT_DEPENDENCIES_URL.to_string(),
            poll_interval: Duration::from_secs(30),
        }
    }

    pub fn with_argument(mut self, name: &str, value: Value) -> Self {
        self.arguments.insert(name.to_string(), value);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_dependencies_url(mut self, url: impl Into<String>) -> Self {
        self.dependencies_url = url.into();
        self
    }

    /// Graph calling the stored process and saving its output as netCDF
    pub fn graph(&self) -> ProcessGraph {
        let mut builder = GraphBuilder::new();
        let prediction = builder.add(&self.process_id, Value::Object(self.arguments.clone()));
        let save = builder.add(
            "save_result",
            json!({ "data": prediction.output(), "format": "netCDF", "options": {} }),
        );
        builder.finish(&save)
    }

    pub fn job_request(&self) -> JobRequest {
        JobRequest {
            title: self.title.clone(),
            process: JobProcess { process_graph: self.graph() },
            job_options: Some(job_options(&self.dependencies_url)),
        }
    }
}

/// Submit `run` as a batch job, wait for it and download its assets
///
/// A single asset is written to `output`; several assets are written next to it under their
/// own names. Assets that fail to download are logged and left out of the returned paths.
pub async fn execute_udp_batch<B: Backend + ?Sized>(
    backend: &B,
    run: &BatchRun,
    output: &Path,
    mut on_status: impl FnMut(&JobStatus),
) -> Result<Vec<PathBuf>> {
    let request = run.job_request();
    request.process.process_graph.validate()?;

    let job_id = backend.create_job(&request).await?;
    tracing::info!("Created batch job {} ({})", job_id, run.title);
    backend.start_job(&job_id).await?;

    let mut last = None;
    let status = loop {
        let status = backend.job_status(&job_id).await?;
        if last != Some(status) {
            tracing::info!("Job {} is {}", job_id, status);
            on_status(&status);
            last = Some(status);
        }
        if status.is_terminal() {
            break status;
        }
        tokio::time::sleep(run.poll_interval).await;
    };

    if status != JobStatus::Finished {
        return Err(PvsiteError::JobFailed { job_id, status: status.to_string() });
    }

    let assets = backend.job_assets(&job_id).await?;
    if assets.is_empty() {
        tracing::warn!("Job {} finished without result assets", job_id);
    }

    let mut written = Vec::with_capacity(assets.len());
    for (asset, path) in asset_targets(&assets, output) {
        match download_asset(backend, asset, &path).await {
            Ok(()) => {
                tracing::info!("Saved {} to {}", asset.name, path.display());
                written.push(path);
            }
            Err(e) => tracing::error!("Failed to download asset {} of job {}: {}", asset.name, job_id, e),
        }
    }
    Ok(written)
}

fn asset_targets<'a>(assets: &'a [JobAsset], output: &Path) -> Vec<(&'a JobAsset, PathBuf)> {
    if let [asset] = assets {
        return vec![(asset, output.to_path_buf())];
    }

    let dir = output.parent().unwrap_or_else(|| Path::new(""));
    assets.iter().map(|asset| (asset, dir.join(&asset.name))).collect()
}

async fn download_asset<B: Backend + ?Sized>(backend: &B, asset: &JobAsset, path: &Path) -> Result<()> {
    let bytes = backend.download(&asset.href).await?;
    write_atomically(path, &bytes).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_udp_parameters() {
        let udp = build_inference_udp(&InferenceOptions::default());
        assert_eq!(udp.id, "pv_inference");

        let names: Vec<&str> = udp.parameters.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["spatial_extent", "year", "inference_url"]);
        assert_eq!(udp.parameter("year").unwrap().default, Some(json!(2021)));
        assert_eq!(
            udp.parameter("inference_url").unwrap().default,
            Some(json!(DEFAULT_INFERENCE_URL))
        );
        assert!(udp.parameter("spatial_extent").unwrap().default.is_none());
    }

    #[test]
    fn test_udp_graph_pipeline() {
        let udp = build_inference_udp(&InferenceOptions::default());
        let graph = &udp.process_graph;
        graph.validate().unwrap();
        let value = graph.to_value().unwrap();

        let load = &value["loadcollection1"]["arguments"];
        assert_eq!(load["spatial_extent"], json!({ "from_parameter": "spatial_extent" }));
        assert_eq!(load["temporal_extent"][0]["from_node"], "textconcat1");
        assert_eq!(load["temporal_extent"][1]["from_node"], "textconcat2");
        assert_eq!(value["textconcat2"]["arguments"]["data"][1], "-12-31");

        let weekly = &value["aggregatetemporalperiod1"]["arguments"];
        assert_eq!(weekly["period"], "week");
        assert_eq!(weekly["data"]["from_node"], "mask1");

        let window = &value["applydimension2"]["arguments"]["process"]["process_graph"];
        let between = &window["arrayfilter1"]["arguments"]["condition"]["process_graph"]["between1"];
        assert_eq!(between["arguments"]["min"], 0);
        assert_eq!(between["arguments"]["max"], 42);

        let labels = value["renamelabels1"]["arguments"]["target"].as_array().unwrap();
        assert_eq!(labels.len(), 430);
        assert_eq!(labels[0], "B02_t1");
        assert_eq!(labels[43], "B03_t1");

        let reducer = &value["reducedimension2"]["arguments"];
        assert_eq!(reducer["dimension"], "bands");
        assert_eq!(reducer["data"]["from_node"], "renamelabels1");
        let udf = &reducer["reducer"]["process_graph"]["runudf1"]["arguments"];
        assert_eq!(udf["runtime"], "Python");
        assert_eq!(udf["context"]["model_url"], json!({ "from_parameter": "inference_url" }));
        assert!(udf["udf"].as_str().unwrap().contains("apply_datacube"));

        assert_eq!(graph.result_node(), Some("reducedimension2"));
    }

    #[test]
    fn test_udp_without_week_window() {
        let options = InferenceOptions { week_window: None, ..InferenceOptions::default() };
        let udp = build_inference_udp(&options);
        udp.process_graph.validate().unwrap();

        assert_eq!(udp.process_graph.nodes_with_process("rename_labels").count(), 0);
        assert_eq!(udp.process_graph.nodes_with_process("apply_dimension").count(), 2);
    }

    #[test]
    fn test_udp_save_and_load() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("pv_inference.json");
        let udp = build_inference_udp(&InferenceOptions::default());

        udp.save(&path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("\"id\": \"pv_inference\""));
        assert_eq!(UserDefinedProcess::load(&path).unwrap(), udp);
    }

    #[test]
    fn test_timestep_band_names() {
        assert_eq!(
            timestep_band_names(&["B02", "B03"], 2),
            vec!["B02_t1", "B02_t2", "B03_t1", "B03_t2"]
        );
        assert!(timestep_band_names(&["B02"], 0).is_empty());
    }

    #[test]
    fn test_job_options() {
        let options = job_options("https://example.org/deps.zip");
        assert_eq!(
            options,
            json!({ "udf-dependency-archives": ["https://example.org/deps.zip#onnx_deps"] })
        );
    }

    #[test]
    fn test_batch_run_graph() {
        let run = BatchRun::inference(12.17, 51.46, 12.18, 51.47, 2020);
        let graph = run.graph();
        graph.validate().unwrap();

        let call = graph.node("pvinference1").unwrap();
        assert_eq!(call.process_id, "pv_inference");
        assert_eq!(call.arguments["year"], 2020);
        assert_eq!(call.arguments["spatial_extent"]["west"], 12.17);
        assert_eq!(graph.result_node(), Some("saveresult1"));

        let request = run.job_request();
        assert_eq!(request.title, "photovoltaic_prediction");
        assert!(request.job_options.is_some());
    }

    #[test]
    fn test_asset_targets() {
        let asset = |name: &str| JobAsset {
            name: name.to_string(),
            href: format!("https://example.org/{}", name),
            media_type: None,
        };
        let output = Path::new("out/prediction.nc");

        let single = [asset("openEO.nc")];
        assert_eq!(asset_targets(&single, output)[0].1, PathBuf::from("out/prediction.nc"));

        let several = [asset("a.nc"), asset("b.nc")];
        let targets: Vec<PathBuf> = asset_targets(&several, output).into_iter().map(|(_, p)| p).collect();
        assert_eq!(targets, vec![PathBuf::from("out/a.nc"), PathBuf::from("out/b.nc")]);
    }
}
