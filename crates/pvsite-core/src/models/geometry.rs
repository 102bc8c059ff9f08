//! Geometry types shared by all pvsite crates.

use geo::{BoundingRect, MultiPolygon, Rect};
use serde::{Deserialize, Serialize};

/// Coordinate Reference System identified by EPSG code
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Crs {
    pub epsg: u32,
    pub name: String,
}

impl Default for Crs {
    fn default() -> Self {
        Self::wgs84()
    }
}

impl Crs {
    pub fn new(epsg: u32, name: impl Into<String>) -> Self {
        Self { epsg, name: name.into() }
    }

    /// WGS 84 (EPSG:4326)
    pub fn wgs84() -> Self {
        Self::new(4326, "WGS 84")
    }

    /// WGS 84 / UTM zone 32N (EPSG:32632), the metric CRS used for Germany
    pub fn utm32n() -> Self {
        Self::new(32632, "WGS 84 / UTM zone 32N")
    }

    /// Authority string as understood by PROJ and openEO, e.g. `EPSG:32632`
    pub fn authority(&self) -> String {
        format!("EPSG:{}", self.epsg)
    }
}

/// Axis aligned bounding box in the units of its CRS
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl BoundingBox {
    pub fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self { west, south, east, north }
    }

    pub fn width(&self) -> f64 {
        self.east - self.west
    }

    pub fn height(&self) -> f64 {
        self.north - self.south
    }

    /// Closed-interval overlap test; touching edges count as intersecting
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        let x_overlap = self.west <= other.east && self.east >= other.west;
        let y_overlap = self.south <= other.north && self.north >= other.south;

        x_overlap && y_overlap
    }

    /// Smallest box covering both boxes
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            west: self.west.min(other.west),
            south: self.south.min(other.south),
            east: self.east.max(other.east),
            north: self.north.max(other.north),
        }
    }

    /// Grow the box by `distance` on every side
    pub fn expand(&self, distance: f64) -> BoundingBox {
        BoundingBox {
            west: self.west - distance,
            south: self.south - distance,
            east: self.east + distance,
            north: self.north + distance,
        }
    }
}

impl From<Rect<f64>> for BoundingBox {
    fn from(rect: Rect<f64>) -> Self {
        BoundingBox::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y)
    }
}

/// A farm footprint read from the source dataset
#[derive(Debug, Clone, PartialEq)]
pub struct GeometryRecord {
    /// Positional row of the shape in the source file
    pub index: usize,
    pub geometry: MultiPolygon<f64>,
    pub crs: Crs,
}

impl GeometryRecord {
    pub fn new(index: usize, geometry: MultiPolygon<f64>, crs: Crs) -> Self {
        Self { index, geometry, crs }
    }

    /// Bounding box of the geometry, `None` for an empty geometry
    pub fn bounds(&self) -> Option<BoundingBox> {
        self.geometry.bounding_rect().map(BoundingBox::from)
    }

    /// Derive a record with the same index and a new geometry
    pub fn with_geometry(&self, geometry: MultiPolygon<f64>, crs: Crs) -> Self {
        Self { index: self.index, geometry, crs }
    }
}
