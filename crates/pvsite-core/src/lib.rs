//! pvsite core - Domain models, configuration and input formats
//!
//! This crate holds the types shared by every stage of the pipeline: geometry records,
//! land-cover verdicts, download requests, the layered configuration and the error type.

pub mod config;
pub mod error;
pub mod formats;
pub mod memo;
pub mod models;

pub use error::{PvsiteError, Result};
