pub mod geometry;
pub mod landcover;
pub mod request;

pub use geometry::{BoundingBox, Crs, GeometryRecord};
pub use landcover::{LandCoverClass, LandCoverVerdict};
pub use request::{DownloadRequest, TargetNaming};
