//! Backend port definitions

use async_trait::async_trait;
use pvsite_core::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::graph::{ProcessGraph, UserDefinedProcess};

/// Port for an openEO backend
///
/// The REST client implements it against a real service; tests use in-memory fakes.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Execute a graph synchronously and return the bytes of its single result
    async fn compute_result(&self, graph: &ProcessGraph) -> Result<Vec<u8>>;

    /// Store (create or replace) a user-defined process
    async fn store_process(&self, process: &UserDefinedProcess) -> Result<()>;

    /// Create a batch job and return its id
    async fn create_job(&self, job: &JobRequest) -> Result<String>;

    /// Queue a created job for processing
    async fn start_job(&self, job_id: &str) -> Result<()>;

    /// Current status of a job
    async fn job_status(&self, job_id: &str) -> Result<JobStatus>;

    /// Result assets of a finished job
    async fn job_assets(&self, job_id: &str) -> Result<Vec<JobAsset>>;

    /// Download an asset
    async fn download(&self, href: &str) -> Result<Vec<u8>>;
}

/// Body of a batch job creation request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRequest {
    pub title: String,
    pub process: JobProcess,
    /// Backend specific options, e.g. UDF dependency archives
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_options: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobProcess {
    pub process_graph: ProcessGraph,
}

/// Lifecycle state of a batch job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Created,
    Queued,
    Running,
    Finished,
    Error,
    Canceled,
}

impl JobStatus {
    /// No further transitions happen from this state
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Finished | JobStatus::Error | JobStatus::Canceled)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobStatus::Created => "created",
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Finished => "finished",
            JobStatus::Error => "error",
            JobStatus::Canceled => "canceled",
        };
        f.write_str(name)
    }
}

/// A downloadable result file of a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobAsset {
    /// Asset key, usually the file name
    pub name: String,
    pub href: String,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
}
