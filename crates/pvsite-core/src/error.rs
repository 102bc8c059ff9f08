//! Error types for pvsite

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PvsiteError {
    // Input errors
    #[error("{format} error: {message}")]
    Format { format: String, message: String },

    #[error("Invalid path {path}: {reason}")]
    InvalidPath { path: PathBuf, reason: String },

    #[error("Projection failed from EPSG:{from} to EPSG:{to}: {reason}")]
    Projection { from: u32, to: u32, reason: String },

    // Raster errors
    #[error("Raster error in {path}: {reason}")]
    Raster { path: PathBuf, reason: String },

    // Backend errors
    #[error("openEO backend returned {status}: {message}")]
    Backend { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Batch job {job_id} ended with status {status}")]
    JobFailed { job_id: String, status: String },

    // Classifier errors
    #[error("Failed to load classifier session from {url}: {reason}")]
    Session { url: String, reason: String },

    #[error("Inference failed: {0}")]
    Inference(String),

    // Configuration errors
    #[error("Missing required configuration: {key}")]
    ConfigMissing { key: String },

    #[error("Invalid configuration value for {key}: {reason}")]
    ConfigInvalid { key: String, reason: String },

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for PvsiteError {
    fn from(err: serde_json::Error) -> Self {
        PvsiteError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PvsiteError>;
