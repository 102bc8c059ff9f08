//! Shapefile reader for farm footprints
//!
//! Shapefiles consist of multiple component files (.shp, .shx, .dbf, .prj). The first three
//! must be present; a missing .prj falls back to EPSG:4326.

use geo::{Coord, LineString, MultiPolygon, Polygon};
use shapefile::{PolygonRing, Reader as ShapefileReader, Shape};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{PvsiteError, Result};
use crate::formats::{GeometryDataset, GeometryReader, SkippedFeature};
use crate::models::{Crs, GeometryRecord};

const REQUIRED_COMPONENTS: [&str; 3] = ["shp", "shx", "dbf"];

/// Shapefile geometry loader
#[derive(Debug, Default, Clone, Copy)]
pub struct ShapefileLoader;

impl GeometryReader for ShapefileLoader {
    fn read(&self, path: &Path) -> Result<GeometryDataset> {
        self.verify_components(path)?;

        let mut reader = ShapefileReader::from_path(path).map_err(|e| PvsiteError::Format {
            format: "Shapefile".to_string(),
            message: format!("Failed to open {}: {}", path.display(), e),
        })?;

        let crs = self.extract_crs(path)?;

        let mut records = Vec::new();
        let mut skipped = Vec::new();

        for (index, result) in reader.iter_shapes_and_records().enumerate() {
            let (shape, _record) = result.map_err(|e| PvsiteError::Format {
                format: "Shapefile".to_string(),
                message: format!("Failed to read feature {}: {}", index, e),
            })?;

            match shape_to_multipolygon(&shape) {
                Ok(geometry) => records.push(GeometryRecord::new(index, geometry, crs.clone())),
                Err(reason) => {
                    tracing::warn!("Skipping feature {}: {}", index, reason);
                    skipped.push(SkippedFeature { index, reason });
                }
            }
        }

        let name = path.file_stem().and_then(|s| s.to_str()).unwrap_or("unnamed").to_string();

        tracing::info!(
            "Read {} geometries from {} ({} skipped, {})",
            records.len(),
            path.display(),
            skipped.len(),
            crs.authority()
        );

        Ok(GeometryDataset { name, crs, records, skipped })
    }

    fn supported_extensions(&self) -> &[&str] {
        &["shp"]
    }

    fn format_name(&self) -> &str {
        "Shapefile"
    }
}

impl ShapefileLoader {
    /// Read the shapefile and return its records, the common entry point of the pipeline
    pub fn load(path: impl AsRef<Path>) -> Result<GeometryDataset> {
        ShapefileLoader.read(path.as_ref())
    }

    /// Get the base path for a Shapefile (without extension)
    fn shapefile_base(&self, path: &Path) -> Result<PathBuf> {
        let is_shp = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("shp"))
            .unwrap_or(false);

        if !is_shp {
            return Err(PvsiteError::InvalidPath {
                path: path.to_path_buf(),
                reason: "Not a Shapefile (.shp)".to_string(),
            });
        }

        Ok(path.with_extension(""))
    }

    /// Verify that all required Shapefile component files exist
    fn verify_components(&self, path: &Path) -> Result<()> {
        let base = self.shapefile_base(path)?;
        let missing: Vec<String> = REQUIRED_COMPONENTS
            .iter()
            .filter(|ext| !base.with_extension(ext).exists())
            .map(|ext| format!(".{}", ext))
            .collect();

        if !missing.is_empty() {
            return Err(PvsiteError::Format {
                format: "Shapefile".to_string(),
                message: format!(
                    "Missing required component files for {}: {}",
                    path.display(),
                    missing.join(", ")
                ),
            });
        }

        Ok(())
    }

    /// Extract CRS from the Shapefile .prj file
    fn extract_crs(&self, path: &Path) -> Result<Crs> {
        let prj_path = self.shapefile_base(path)?.with_extension("prj");

        if !prj_path.exists() {
            tracing::warn!("No .prj next to {}, assuming EPSG:4326", path.display());
            return Ok(Crs::wgs84());
        }

        let prj_content = fs::read_to_string(&prj_path).map_err(|e| PvsiteError::Format {
            format: "Shapefile".to_string(),
            message: format!("Failed to read .prj file: {}", e),
        })?;

        Ok(crs_from_prj(&prj_content).unwrap_or_else(|| {
            tracing::warn!("No EPSG code in {}, assuming EPSG:4326", prj_path.display());
            Crs::wgs84()
        }))
    }
}

/// Find the CRS declared by a .prj WKT string
///
/// The outermost `AUTHORITY["EPSG", ...]` is the last one in the string. ESRI flavoured WKT
/// without authority is recognised for the two systems the pipeline works with.
fn crs_from_prj(wkt: &str) -> Option<Crs> {
    if let Some(epsg) = last_authority_code(wkt) {
        return Some(known_crs(epsg));
    }

    if let Some(start) = wkt.find("EPSG:") {
        let code: String =
            wkt[start + 5..].chars().take_while(|c| c.is_ascii_digit()).collect();
        if let Ok(epsg) = code.parse::<u32>() {
            return Some(known_crs(epsg));
        }
    }

    if wkt.contains("WGS_1984_UTM_Zone_32N") {
        return Some(Crs::utm32n());
    }
    if wkt.starts_with("GEOGCS[\"GCS_WGS_1984\"") {
        return Some(Crs::wgs84());
    }

    None
}

fn last_authority_code(wkt: &str) -> Option<u32> {
    const PATTERN: &str = "AUTHORITY[\"EPSG\",";
    let start = wkt.rfind(PATTERN)? + PATTERN.len();
    let digits: String = wkt[start..]
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

fn known_crs(epsg: u32) -> Crs {
    match epsg {
        4326 => Crs::wgs84(),
        32632 => Crs::utm32n(),
        other => Crs::new(other, format!("EPSG:{}", other)),
    }
}

/// Convert a polygon shape to a MultiPolygon, or explain why it cannot be used
pub(crate) fn shape_to_multipolygon(shape: &Shape) -> std::result::Result<MultiPolygon<f64>, String> {
    match shape {
        Shape::Polygon(polygon) => rings_to_multipolygon(polygon.rings(), |p| (p.x, p.y)),
        Shape::PolygonZ(polygon) => rings_to_multipolygon(polygon.rings(), |p| (p.x, p.y)),
        Shape::PolygonM(polygon) => rings_to_multipolygon(polygon.rings(), |p| (p.x, p.y)),
        Shape::NullShape => Err("null shape".to_string()),
        other => Err(format!("unsupported shape type {}", other.shapetype())),
    }
}

/// Outer rings open a new polygon, inner rings belong to the most recent outer ring
fn rings_to_multipolygon<P>(
    rings: &[PolygonRing<P>],
    xy: impl Fn(&P) -> (f64, f64),
) -> std::result::Result<MultiPolygon<f64>, String> {
    let mut polygons: Vec<(LineString<f64>, Vec<LineString<f64>>)> = Vec::new();

    for ring in rings {
        let line = ring_to_line(ring.points(), &xy)?;
        match ring {
            PolygonRing::Outer(_) => polygons.push((line, Vec::new())),
            PolygonRing::Inner(_) => match polygons.last_mut() {
                Some((_, interiors)) => interiors.push(line),
                None => return Err("inner ring without outer ring".to_string()),
            },
        }
    }

    if polygons.is_empty() {
        return Err("polygon without rings".to_string());
    }

    Ok(MultiPolygon::new(
        polygons.into_iter().map(|(exterior, interiors)| Polygon::new(exterior, interiors)).collect(),
    ))
}

fn ring_to_line<P>(
    points: &[P],
    xy: &impl Fn(&P) -> (f64, f64),
) -> std::result::Result<LineString<f64>, String> {
    let coords: Vec<Coord<f64>> = points
        .iter()
        .map(|p| {
            let (x, y) = xy(p);
            Coord { x, y }
        })
        .collect();

    if coords.len() < 4 {
        return Err(format!("ring with {} points", coords.len()));
    }
    if coords.iter().any(|c| !c.x.is_finite() || !c.y.is_finite()) {
        return Err("ring with non-finite coordinates".to_string());
    }

    Ok(LineString::new(coords))
}
