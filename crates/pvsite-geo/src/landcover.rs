//! Land cover majority voting over WorldCover rasters
//!
//! Each farm has its own small raster covering the footprint plus a context margin. The
//! majority class inside the footprint and the majority class of the surroundings decide
//! whether the farm is kept for training.

use geo::{BoundingRect, Contains, MultiPolygon, Point, Rect};
use pvsite_core::error::{PvsiteError, Result};
use pvsite_core::memo::ValidIndexFile;
use pvsite_core::models::{Crs, GeometryRecord, LandCoverClass, LandCoverVerdict};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tiff::decoder::{Decoder, DecodingResult};
use tiff::tags::Tag;

use crate::transform::reproject;

// GeoTIFF tag codes. Resolved through `Tag::from_u16_exhaustive` so that the named variant is
// used whenever the tiff crate knows the tag.
const MODEL_PIXEL_SCALE_TAG: u16 = 33550;
const MODEL_TIEPOINT_TAG: u16 = 33922;
const GDAL_NODATA_TAG: u16 = 42113;

/// WorldCover legend value for missing data
const WORLDCOVER_NODATA: u8 = 0;

/// North-up affine transform of a raster
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform {
    pub origin_x: f64,
    pub origin_y: f64,
    pub pixel_width: f64,
    /// Negative for north-up rasters
    pub pixel_height: f64,
}

impl GeoTransform {
    pub fn new(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self { origin_x, origin_y, pixel_width, pixel_height }
    }

    /// World coordinate of the centre of a pixel
    pub fn pixel_centre(&self, col: usize, row: usize) -> Point<f64> {
        Point::new(
            self.origin_x + (col as f64 + 0.5) * self.pixel_width,
            self.origin_y + (row as f64 + 0.5) * self.pixel_height,
        )
    }
}

/// A single band land cover raster with one class code per pixel
#[derive(Debug, Clone)]
pub struct LandCoverRaster {
    width: usize,
    height: usize,
    transform: GeoTransform,
    data: Vec<u8>,
    nodata: Option<u8>,
}

impl LandCoverRaster {
    pub fn new(
        width: usize,
        height: usize,
        transform: GeoTransform,
        data: Vec<u8>,
        nodata: Option<u8>,
    ) -> Result<Self> {
        if data.len() != width * height {
            return Err(PvsiteError::Format {
                format: "raster".to_string(),
                message: format!(
                    "Expected {}x{} = {} pixels, got {}",
                    width,
                    height,
                    width * height,
                    data.len()
                ),
            });
        }

        Ok(Self { width, height, transform, data, nodata })
    }

    /// Read a single band GeoTIFF as downloaded from the backend
    ///
    /// The georeference comes from the ModelPixelScale and ModelTiepoint tags. When the
    /// GDAL nodata tag is absent the WorldCover "no data" value (0) is assumed.
    pub fn from_geotiff(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raster_error = |reason: String| PvsiteError::Raster { path: path.to_path_buf(), reason };

        let file = File::open(path)?;
        let mut decoder = Decoder::new(BufReader::new(file))
            .map_err(|e| raster_error(format!("TIFF decode error: {}", e)))?;

        let (width, height) = decoder
            .dimensions()
            .map_err(|e| raster_error(format!("Cannot read dimensions: {}", e)))?;

        let transform = read_geotransform(&mut decoder).map_err(raster_error)?;
        let nodata = read_nodata(&mut decoder).or(Some(WORLDCOVER_NODATA));

        let image = decoder
            .read_image()
            .map_err(|e| raster_error(format!("Cannot read image data: {}", e)))?;

        let data: Vec<u8> = match image {
            DecodingResult::U8(buf) => buf,
            DecodingResult::U16(buf) => buf
                .into_iter()
                .map(|v| u8::try_from(v).map_err(|_| raster_error(format!("Class code {} out of range", v))))
                .collect::<Result<_>>()?,
            _ => return Err(raster_error("Unsupported pixel format, expected 8 bit classes".to_string())),
        };

        Self::new(width as usize, height as usize, transform, data, nodata)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    /// Class code at a pixel, `None` for nodata
    pub fn value(&self, col: usize, row: usize) -> Option<u8> {
        let value = *self.data.get(row * self.width + col)?;
        if Some(value) == self.nodata {
            None
        } else {
            Some(value)
        }
    }
}

fn read_geotransform<R: std::io::Read + std::io::Seek>(
    decoder: &mut Decoder<R>,
) -> std::result::Result<GeoTransform, String> {
    let scale = decoder
        .get_tag_f64_vec(Tag::from_u16_exhaustive(MODEL_PIXEL_SCALE_TAG))
        .map_err(|_| "No pixel scale tag".to_string())?;

    let tiepoint = decoder
        .get_tag_f64_vec(Tag::from_u16_exhaustive(MODEL_TIEPOINT_TAG))
        .map_err(|_| "No tiepoint tag".to_string())?;

    if scale.len() < 2 || tiepoint.len() < 6 {
        return Err("Cannot determine geotransform".to_string());
    }

    // tiepoint: [I, J, K, X, Y, Z], scale: [ScaleX, ScaleY, ScaleZ]
    Ok(GeoTransform::new(
        tiepoint[3] - tiepoint[0] * scale[0],
        tiepoint[4] + tiepoint[1] * scale[1],
        scale[0],
        -scale[1],
    ))
}

fn read_nodata<R: std::io::Read + std::io::Seek>(decoder: &mut Decoder<R>) -> Option<u8> {
    let text = decoder
        .get_tag_ascii_string(Tag::from_u16_exhaustive(GDAL_NODATA_TAG))
        .ok()?;
    let value: f64 = text.trim_matches(char::from(0)).trim().parse().ok()?;

    if value.fract() == 0.0 && (0.0..=255.0).contains(&value) {
        Some(value as u8)
    } else {
        None
    }
}

/// Majority class inside the geometry and in the rest of the raster
///
/// A pixel is inside when its centre is. Nodata pixels are ignored, ties go to the smaller
/// class code and a side without any pixel yields `None`.
pub fn zonal_modes(
    geometry: &MultiPolygon<f64>,
    raster: &LandCoverRaster,
) -> (Option<LandCoverClass>, Option<LandCoverClass>) {
    let mut inside = [0u64; 256];
    let mut outside = [0u64; 256];
    let bounds: Option<Rect<f64>> = geometry.bounding_rect();

    for row in 0..raster.height {
        for col in 0..raster.width {
            let Some(code) = raster.value(col, row) else {
                continue;
            };

            let centre = raster.transform.pixel_centre(col, row);
            let is_inside = bounds.map(|b| b.contains(&centre)).unwrap_or(false)
                && geometry.contains(&centre);

            if is_inside {
                inside[code as usize] += 1;
            } else {
                outside[code as usize] += 1;
            }
        }
    }

    (mode(&inside), mode(&outside))
}

fn mode(histogram: &[u64; 256]) -> Option<LandCoverClass> {
    let mut best: Option<(usize, u64)> = None;
    for (code, &count) in histogram.iter().enumerate() {
        if count > 0 && best.map(|(_, c)| count > c).unwrap_or(true) {
            best = Some((code, count));
        }
    }
    best.map(|(code, _)| LandCoverClass::from_code(code as u8))
}

/// Apply the site policy to the two majority classes
pub fn verdict_from_modes(
    index: usize,
    inside: Option<LandCoverClass>,
    outside: Option<LandCoverClass>,
) -> LandCoverVerdict {
    let (effective_class, valid) = match inside {
        None => (None, false),
        Some(LandCoverClass::BuiltUp) => match outside {
            // Rooftop-like footprint in open land is still a ground mounted farm
            Some(surrounding) if surrounding.is_natural() => (Some(surrounding), true),
            _ => (Some(LandCoverClass::BuiltUp), false),
        },
        Some(LandCoverClass::PermanentWaterBodies) => {
            (Some(LandCoverClass::PermanentWaterBodies), false)
        }
        Some(class) => (Some(class), true),
    };

    LandCoverVerdict {
        index,
        majority_inside: inside,
        majority_outside: outside,
        effective_class,
        valid,
    }
}

/// Classify one footprint against its land cover raster
pub fn classify(
    index: usize,
    geometry: &MultiPolygon<f64>,
    raster: &LandCoverRaster,
) -> LandCoverVerdict {
    let (inside, outside) = zonal_modes(geometry, raster);
    verdict_from_modes(index, inside, outside)
}

/// Result of a filter run that may have been served from the memo file
#[derive(Debug, Clone, PartialEq)]
pub enum FilterOutcome {
    /// Indices read back from an existing memo file
    Reused(Vec<usize>),
    /// Verdicts computed from the rasters in this run
    Computed(Vec<LandCoverVerdict>),
}

impl FilterOutcome {
    /// Indices of the farms that passed, ascending
    pub fn valid_indices(&self) -> Vec<usize> {
        match self {
            FilterOutcome::Reused(indices) => indices.clone(),
            FilterOutcome::Computed(verdicts) => valid_indices(verdicts),
        }
    }

    pub fn verdicts(&self) -> &[LandCoverVerdict] {
        match self {
            FilterOutcome::Reused(_) => &[],
            FilterOutcome::Computed(verdicts) => verdicts,
        }
    }
}

/// Indices of the valid verdicts, ascending
pub fn valid_indices(verdicts: &[LandCoverVerdict]) -> Vec<usize> {
    let mut indices: Vec<usize> = verdicts.iter().filter(|v| v.valid).map(|v| v.index).collect();
    indices.sort_unstable();
    indices
}

/// Land cover filter over per-farm rasters
#[derive(Debug, Clone)]
pub struct LandCoverFilter {
    raster_crs: Crs,
}

impl Default for LandCoverFilter {
    fn default() -> Self {
        Self::new(Crs::wgs84())
    }
}

impl LandCoverFilter {
    /// Filter for rasters in `raster_crs`; footprints are reprojected when needed
    pub fn new(raster_crs: Crs) -> Self {
        Self { raster_crs }
    }

    /// Classify a single footprint, turning any read or projection failure into an invalid
    /// verdict
    pub fn evaluate(&self, record: &GeometryRecord, raster_path: &Path) -> LandCoverVerdict {
        match self.try_evaluate(record, raster_path) {
            Ok(verdict) => {
                tracing::debug!(
                    "Geometry {}: inside={:?} outside={:?} valid={}",
                    verdict.index,
                    verdict.majority_inside.map(|c| c.code()),
                    verdict.majority_outside.map(|c| c.code()),
                    verdict.valid
                );
                verdict
            }
            Err(e) => {
                tracing::error!("Land cover check failed for geometry {}: {}", record.index, e);
                LandCoverVerdict::failed(record.index)
            }
        }
    }

    fn try_evaluate(&self, record: &GeometryRecord, raster_path: &Path) -> Result<LandCoverVerdict> {
        let raster = LandCoverRaster::from_geotiff(raster_path)?;
        let footprint = reproject(record, &self.raster_crs)?;
        Ok(classify(record.index, &footprint.geometry, &raster))
    }

    /// Classify every record, in order
    pub fn run(
        &self,
        records: &[GeometryRecord],
        raster_path_for: impl Fn(usize) -> PathBuf,
    ) -> Vec<LandCoverVerdict> {
        self.run_with(records, raster_path_for, |_| {})
    }

    /// Like [`LandCoverFilter::run`], reporting every verdict as it is produced
    pub fn run_with(
        &self,
        records: &[GeometryRecord],
        raster_path_for: impl Fn(usize) -> PathBuf,
        mut on_verdict: impl FnMut(&LandCoverVerdict),
    ) -> Vec<LandCoverVerdict> {
        let verdicts: Vec<LandCoverVerdict> = records
            .iter()
            .map(|record| {
                let verdict = self.evaluate(record, &raster_path_for(record.index));
                on_verdict(&verdict);
                verdict
            })
            .collect();

        tracing::info!(
            "Land cover filter kept {} of {} geometries",
            verdicts.iter().filter(|v| v.valid).count(),
            verdicts.len()
        );
        verdicts
    }

    /// Reuse the memo file when it exists, otherwise classify and store the valid indices
    ///
    /// Nothing is stored when every raster failed to load, so a run before the land cover
    /// download does not leave an empty memo behind.
    pub fn run_memoized(
        &self,
        records: &[GeometryRecord],
        raster_path_for: impl Fn(usize) -> PathBuf,
        memo: &ValidIndexFile,
        refresh: bool,
        on_verdict: impl FnMut(&LandCoverVerdict),
    ) -> Result<FilterOutcome> {
        if !refresh {
            if let Some(indices) = memo.load_if_exists()? {
                tracing::info!(
                    "Reusing {} valid indices from {}",
                    indices.len(),
                    memo.path().display()
                );
                return Ok(FilterOutcome::Reused(indices.into_iter().map(usize::from).collect()));
            }
        }

        let verdicts = self.run_with(records, raster_path_for, on_verdict);
        if !verdicts.is_empty() && verdicts.iter().all(LandCoverVerdict::is_failed) {
            tracing::warn!(
                "No land cover raster could be read for any of {} geometries, {} not written",
                verdicts.len(),
                memo.path().display()
            );
        } else {
            memo.store(&valid_indices(&verdicts))?;
        }
        Ok(FilterOutcome::Computed(verdicts))
    }
}
