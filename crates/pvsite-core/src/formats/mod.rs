//! Input formats for farm footprints
//!
//! Each format implements [`GeometryReader`]. Readers never abort on a single malformed
//! feature: it is reported in [`GeometryDataset::skipped`] and the batch goes on.

use std::path::Path;

use crate::error::Result;
use crate::models::{Crs, GeometryRecord};

pub mod shapefile;

pub use self::shapefile::ShapefileLoader;

/// Reader for a vector dataset of farm footprints
pub trait GeometryReader {
    /// Read all usable geometries from `path`
    fn read(&self, path: &Path) -> Result<GeometryDataset>;

    /// Get supported file extensions (e.g., ["shp"])
    fn supported_extensions(&self) -> &[&str];

    /// Get human-readable format name
    fn format_name(&self) -> &str;
}

/// Geometries read from one source file
#[derive(Debug, Clone)]
pub struct GeometryDataset {
    /// Dataset name (file stem)
    pub name: String,

    /// CRS declared by the source
    pub crs: Crs,

    /// Usable geometries in source order
    pub records: Vec<GeometryRecord>,

    /// Features that could not be turned into a polygon geometry
    pub skipped: Vec<SkippedFeature>,
}

impl GeometryDataset {
    /// Number of rows in the source, usable or not
    pub fn source_len(&self) -> usize {
        self.records.len() + self.skipped.len()
    }
}

/// A source row that was left out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedFeature {
    pub index: usize,
    pub reason: String,
}
