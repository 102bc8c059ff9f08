use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// pvsite - Photovoltaic farm site screening on openEO
#[derive(Parser, Debug)]
#[command(name = "pvsite")]
#[command(about = "Photovoltaic farm site screening and Sentinel-2 data acquisition", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Output results in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Show planned actions without executing them
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Configuration file (defaults to ./pvsite.toml when present)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// openEO backend URL
    #[arg(long, global = true, value_name = "URL")]
    pub backend_url: Option<String>,

    /// Shapefile with the farm footprints
    #[arg(long, global = true, value_name = "FILE")]
    pub shapefile: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Download one land cover raster per farm
    Landcover(LandcoverArgs),

    /// Classify farms by the land cover inside and around them
    Filter(FilterArgs),

    /// Show the merged Sentinel-2 download requests
    Plan(PlanArgs),

    /// Download Sentinel-2 patches for the valid farms
    Fetch(FetchArgs),

    /// Build the inference process and store it
    Udp(UdpArgs),

    /// Run the stored inference process as a batch job
    Infer(InferArgs),

    /// Show configuration and progress on disk
    Status(StatusArgs),
}

#[derive(Parser, Debug)]
pub struct LandcoverArgs {
    /// Context buffer around each farm in meters (overrides configuration)
    #[arg(long)]
    pub buffer: Option<f64>,
}

#[derive(Parser, Debug)]
pub struct FilterArgs {
    /// Recompute the verdicts even when the valid-index file exists
    #[arg(long)]
    pub refresh: bool,

    /// Only list the farms that passed
    #[arg(long)]
    pub valid_only: bool,
}

#[derive(Parser, Debug)]
pub struct PlanArgs {
    /// Acquisition year (defaults to the first configured year)
    #[arg(long)]
    pub year: Option<i32>,

    /// Minimum patch edge length in meters
    #[arg(long)]
    pub min_patch_size: Option<f64>,
}

#[derive(Parser, Debug)]
pub struct FetchArgs {
    /// Acquisition year (defaults to every configured year)
    #[arg(long)]
    pub year: Option<i32>,

    /// Minimum patch edge length in meters
    #[arg(long)]
    pub min_patch_size: Option<f64>,

    /// Save the masked time series instead of temporal statistics
    #[arg(long)]
    pub raw: bool,
}

#[derive(Parser, Debug)]
pub struct UdpArgs {
    /// Where to save the process JSON
    #[arg(long, default_value = "pv_inference.json")]
    pub output: PathBuf,

    /// Do not store the process on the backend
    #[arg(long)]
    pub no_remote: bool,

    /// UDF source file (defaults to the bundled ONNX classifier UDF)
    #[arg(long, value_name = "FILE")]
    pub udf: Option<String>,

    /// First week of the series fed to the classifier (zero based)
    #[arg(long, default_value = "0")]
    pub first_week: usize,

    /// Number of weeks fed to the classifier; 0 keeps every week
    #[arg(long, default_value = "43")]
    pub weeks: usize,
}

#[derive(Parser, Debug)]
pub struct InferArgs {
    #[arg(long, allow_hyphen_values = true)]
    pub west: f64,

    #[arg(long, allow_hyphen_values = true)]
    pub south: f64,

    #[arg(long, allow_hyphen_values = true)]
    pub east: f64,

    #[arg(long, allow_hyphen_values = true)]
    pub north: f64,

    /// Year of the Sentinel-2 time series
    #[arg(long, default_value = "2021")]
    pub year: i32,

    /// Where to save the prediction
    #[arg(long, default_value = "photovoltaic_prediction.nc")]
    pub output: PathBuf,

    /// Batch job title
    #[arg(long, default_value = "photovoltaic_prediction")]
    pub title: String,
}

#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Also list every configuration value with its source
    #[arg(long)]
    pub verbose: bool,
}
