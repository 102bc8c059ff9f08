use chrono::{DateTime, Utc};
use pvsite_core::models::{DownloadRequest, LandCoverClass, LandCoverVerdict};
use serde::Serialize;
use tabled::Tabled;

/// Output for the landcover and fetch commands
#[derive(Debug, Serialize)]
pub struct FetchOutput {
    pub product: String,
    pub requests: usize,
    pub downloaded: Vec<String>,
    pub skipped: usize,
    pub failed: Vec<FailedRequest>,
}

#[derive(Debug, Serialize, Tabled)]
pub struct FailedRequest {
    #[tabled(rename = "Members")]
    pub members: String,
    #[tabled(rename = "Error")]
    pub error: String,
}

/// Output for filter command
#[derive(Debug, Serialize)]
pub struct FilterOutput {
    /// Whether the valid-index file was reused instead of reading rasters
    pub reused: bool,
    pub memo_path: String,
    pub valid_indices: Vec<usize>,
    pub verdicts: Vec<VerdictRow>,
}

#[derive(Debug, Serialize, Tabled)]
pub struct VerdictRow {
    #[tabled(rename = "Index")]
    pub index: usize,
    #[tabled(rename = "Inside")]
    pub inside: String,
    #[tabled(rename = "Outside")]
    pub outside: String,
    #[tabled(rename = "Effective")]
    pub effective: String,
    #[tabled(rename = "Valid")]
    pub valid: bool,
}

impl From<&LandCoverVerdict> for VerdictRow {
    fn from(verdict: &LandCoverVerdict) -> Self {
        Self {
            index: verdict.index,
            inside: class_label(verdict.majority_inside),
            outside: class_label(verdict.majority_outside),
            effective: class_label(verdict.effective_class),
            valid: verdict.valid,
        }
    }
}

fn class_label(class: Option<LandCoverClass>) -> String {
    match class {
        Some(class) => format!("{} ({})", class.label(), class.code()),
        None => "-".to_string(),
    }
}

/// Output for plan command
#[derive(Debug, Serialize)]
pub struct PlanOutput {
    pub year: i32,
    pub min_patch_size: f64,
    pub valid_count: usize,
    pub requests: Vec<RequestRow>,
}

#[derive(Debug, Serialize, Tabled)]
pub struct RequestRow {
    #[tabled(rename = "Members")]
    pub members: String,
    #[tabled(rename = "Width (m)")]
    pub width: String,
    #[tabled(rename = "Height (m)")]
    pub height: String,
    #[tabled(rename = "Target")]
    pub target: String,
    #[tabled(rename = "Exists")]
    pub exists: bool,
}

impl From<&DownloadRequest> for RequestRow {
    fn from(request: &DownloadRequest) -> Self {
        Self {
            members: request.member_label(),
            width: format!("{:.0}", request.bbox.width()),
            height: format!("{:.0}", request.bbox.height()),
            target: request.target_path.display().to_string(),
            exists: request.target_path.exists(),
        }
    }
}

/// Output for udp command
#[derive(Debug, Serialize)]
pub struct UdpOutput {
    pub process_id: String,
    pub saved_to: String,
    pub stored_remotely: bool,
    pub parameters: Vec<String>,
    pub nodes: usize,
}

/// Output for infer command
#[derive(Debug, Serialize)]
pub struct InferOutput {
    pub title: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub statuses: Vec<String>,
    pub outputs: Vec<String>,
}

/// Output for status command
#[derive(Debug, Serialize)]
pub struct StatusOutput {
    pub shapefile: String,
    pub shapefile_present: bool,
    pub memo: MemoStatus,
    pub land_cover_rasters: usize,
    pub s2_patches: usize,
    pub credentials: bool,
    pub config: Option<Vec<ConfigEntry>>,
}

#[derive(Debug, Serialize)]
pub struct MemoStatus {
    pub path: String,
    pub valid_count: Option<usize>,
    pub modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Tabled)]
pub struct ConfigEntry {
    #[tabled(rename = "Key")]
    pub key: String,
    #[tabled(rename = "Value")]
    pub value: String,
    #[tabled(rename = "Source")]
    pub source: String,
}
