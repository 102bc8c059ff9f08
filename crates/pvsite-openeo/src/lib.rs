//! pvsite openEO - backend access, process graphs and inference packaging
//!
//! This crate defines the [`Backend`] port with its REST adapter, the graphs of the downloaded
//! products, the fetch driver and the `pv_inference` user-defined process.

pub mod client;
pub mod fetch;
pub mod graph;
pub mod inference;
pub mod ports;
pub mod products;
pub mod session;

// Re-export main types
pub use client::OpenEoClient;
pub use fetch::{land_cover_path, land_cover_requests, FetchDriver, FetchOutcome, FetchReport};
pub use graph::{GraphBuilder, ProcessGraph, UserDefinedProcess};
pub use inference::{
    build_inference_udp, execute_udp_batch, store_udp, BatchRun, InferenceOptions, WeekWindow,
};
pub use ports::{Backend, JobAsset, JobRequest, JobStatus};
pub use products::{Product, S2Options};
pub use session::{apply_classifier, Classifier, SessionCache, SessionLoader};
