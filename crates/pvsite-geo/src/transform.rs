//! CRS transformation

use geo::{Coord, MapCoords};
use proj::Proj;
use pvsite_core::error::{PvsiteError, Result};
use pvsite_core::models::{Crs, GeometryRecord};

/// Check if two CRS are the same
pub fn crs_match(crs1: &Crs, crs2: &Crs) -> bool {
    crs1.epsg == crs2.epsg
}

fn projection(from_crs: &Crs, to_crs: &Crs) -> Result<Proj> {
    Proj::new_known_crs(&from_crs.authority(), &to_crs.authority(), None).map_err(|e| {
        PvsiteError::Projection {
            from: from_crs.epsg,
            to: to_crs.epsg,
            reason: format!("Failed to create projection: {}", e),
        }
    })
}

/// Reproject a record to another CRS
///
/// The result keeps the record index. Reprojecting to the CRS the record is already in
/// returns a copy.
pub fn reproject(record: &GeometryRecord, to_crs: &Crs) -> Result<GeometryRecord> {
    if crs_match(&record.crs, to_crs) {
        return Ok(record.clone());
    }

    let proj = projection(&record.crs, to_crs)?;

    let geometry = record
        .geometry
        .try_map_coords(|coord| {
            proj.convert((coord.x, coord.y)).map(|(x, y)| Coord { x, y })
        })
        .map_err(|e| PvsiteError::Projection {
            from: record.crs.epsg,
            to: to_crs.epsg,
            reason: format!("Projection of geometry {} failed: {}", record.index, e),
        })?;

    Ok(record.with_geometry(geometry, to_crs.clone()))
}

/// Reproject every record, failing on the first record that cannot be transformed
pub fn reproject_all(records: &[GeometryRecord], to_crs: &Crs) -> Result<Vec<GeometryRecord>> {
    records.iter().map(|record| reproject(record, to_crs)).collect()
}
