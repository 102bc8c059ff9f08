//! Outward buffering of farm footprints

use geo::Buffer;
use pvsite_core::error::Result;
use pvsite_core::models::{Crs, GeometryRecord};

use crate::transform::reproject;

/// Buffer a record by `distance` in the units of its CRS
///
/// A zero (or negative) distance returns the record unchanged.
pub fn buffer(record: &GeometryRecord, distance: f64) -> GeometryRecord {
    if !(distance > 0.0) {
        return record.clone();
    }

    record.with_geometry(record.geometry.buffer(distance), record.crs.clone())
}

/// Buffer a record by `distance` measured in `metric_crs`, returning it in its original CRS
///
/// Used for the land cover context margin, which is given in meters while the
/// footprints and WorldCover rasters are geographic.
pub fn buffer_in_crs(
    record: &GeometryRecord,
    distance: f64,
    metric_crs: &Crs,
) -> Result<GeometryRecord> {
    let metric = reproject(record, metric_crs)?;
    reproject(&buffer(&metric, distance), &record.crs)
}
