//! pvsite Geo - Geometry, CRS and raster operations
//!
//! This crate handles the geospatial side of the pipeline: CRS transformations, buffering,
//! land cover majority voting over downloaded rasters and merging of nearby farms into shared
//! download requests.

pub mod buffer;
pub mod landcover;
pub mod merge;
pub mod transform;

pub use buffer::{buffer, buffer_in_crs};
pub use landcover::{
    classify, valid_indices, zonal_modes, FilterOutcome, LandCoverFilter, LandCoverRaster,
};
pub use merge::{bounding_boxes, merge_requests, MergeOptions, DEFAULT_MIN_PATCH_SIZE};
pub use transform::{reproject, reproject_all};
