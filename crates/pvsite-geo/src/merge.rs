//! Merging of nearby farms into shared Sentinel-2 download requests
//!
//! Every farm needs a patch of at least `min_patch_size` meters per side. Small farms are
//! grown to that size and every not yet assigned farm whose box touches the grown box joins
//! the same request, so that one download serves all of them.

use pvsite_core::models::{BoundingBox, Crs, DownloadRequest, GeometryRecord, TargetNaming};
use rstar::{RTree, RTreeObject, AABB};
use std::collections::HashSet;

/// Default minimum patch edge in meters (512 Sentinel-2 pixels at 10 m)
pub const DEFAULT_MIN_PATCH_SIZE: f64 = 5120.0;

/// Parameters of a merge run
#[derive(Debug, Clone)]
pub struct MergeOptions {
    /// Minimum edge length of a request box, in CRS units
    pub min_patch_size: f64,
    /// CRS of the input boxes, carried into every request
    pub crs: Crs,
    pub naming: TargetNaming,
}

impl MergeOptions {
    pub fn new(naming: TargetNaming) -> Self {
        Self { min_patch_size: DEFAULT_MIN_PATCH_SIZE, crs: Crs::utm32n(), naming }
    }

    pub fn with_min_patch_size(mut self, min_patch_size: f64) -> Self {
        self.min_patch_size = min_patch_size;
        self
    }
}

/// Footprint box stored in the R-tree
#[derive(Debug, Clone, Copy)]
struct Footprint {
    index: usize,
    bbox: BoundingBox,
}

impl RTreeObject for Footprint {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        envelope(&self.bbox)
    }
}

fn envelope(bbox: &BoundingBox) -> AABB<[f64; 2]> {
    AABB::from_corners([bbox.west, bbox.south], [bbox.east, bbox.north])
}

/// Half of the growth needed for the box to reach `min_patch_size` along both axes,
/// rounded up to whole units before halving
pub fn patch_buffer(bbox: &BoundingBox, min_patch_size: f64) -> f64 {
    let missing = (min_patch_size - bbox.width()).max(min_patch_size - bbox.height()).max(0.0);
    missing.ceil() / 2.0
}

/// Bounding boxes of records, skipping empty geometries
pub fn bounding_boxes(records: &[GeometryRecord]) -> Vec<(usize, BoundingBox)> {
    records
        .iter()
        .filter_map(|record| match record.bounds() {
            Some(bbox) => Some((record.index, bbox)),
            None => {
                tracing::warn!("Geometry {} is empty, no request is planned for it", record.index);
                None
            }
        })
        .collect()
}

/// Group valid footprints into download requests
///
/// Footprints are visited in index order. A footprint that already belongs to a request is
/// skipped; otherwise its grown box is tested against the unbuffered boxes of all footprints
/// that are not assigned yet. The result is ordered by member count, largest first, with
/// ties kept in visiting order.
pub fn merge_requests(valid: &[(usize, BoundingBox)], options: &MergeOptions) -> Vec<DownloadRequest> {
    let mut footprints: Vec<Footprint> = Vec::with_capacity(valid.len());
    let mut seen = HashSet::new();
    for &(index, bbox) in valid {
        if seen.insert(index) {
            footprints.push(Footprint { index, bbox });
        } else {
            tracing::warn!("Geometry {} listed twice, keeping the first box", index);
        }
    }
    footprints.sort_by_key(|f| f.index);

    let tree = RTree::bulk_load(footprints.clone());
    let mut consumed: HashSet<usize> = HashSet::new();
    let mut requests = Vec::new();

    for driver in &footprints {
        if consumed.contains(&driver.index) {
            continue;
        }

        let buffer = patch_buffer(&driver.bbox, options.min_patch_size);
        let candidate = if buffer > 0.0 { driver.bbox.expand(buffer) } else { driver.bbox };

        let mut hits: Vec<Footprint> = tree
            .locate_in_envelope_intersecting(&envelope(&candidate))
            .filter(|f| !consumed.contains(&f.index))
            .copied()
            .collect();
        if !hits.iter().any(|f| f.index == driver.index) {
            hits.push(*driver);
        }
        hits.sort_by_key(|f| f.index);

        let bbox = hits.iter().fold(candidate, |acc, f| acc.union(&f.bbox));
        let members: Vec<usize> = hits.iter().map(|f| f.index).collect();

        if members.len() > 1 {
            tracing::info!("Geometry {} merged with {:?}", driver.index, members);
        }

        consumed.extend(members.iter().copied());
        requests.push(DownloadRequest {
            target_path: options.naming.path_for(&members),
            members,
            bbox,
            crs: options.crs.clone(),
        });
    }

    requests.sort_by(|a, b| b.members.len().cmp(&a.members.len()));

    tracing::info!(
        "Planned {} requests for {} geometries",
        requests.len(),
        footprints.len()
    );
    requests
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn options() -> MergeOptions {
        MergeOptions::new(TargetNaming::new("patches", "s2", 2022, "nc"))
    }

    fn square(x: f64, y: f64, size: f64) -> BoundingBox {
        BoundingBox::new(x, y, x + size, y + size)
    }

    #[test]
    fn test_patch_buffer() {
        assert_eq!(patch_buffer(&square(0.0, 0.0, 1000.0), 5120.0), 2060.0);
        assert_eq!(patch_buffer(&BoundingBox::new(0.0, 0.0, 5000.0, 100.5), 5120.0), 2510.0);
        assert_eq!(patch_buffer(&square(0.0, 0.0, 6000.0), 5120.0), 0.0);
    }

    #[test]
    fn test_overlapping_pair_and_isolated_farm() {
        let valid = vec![
            (3, square(0.0, 0.0, 200.0)),
            (7, square(2000.0, 0.0, 200.0)),
            (12, square(50_000.0, 50_000.0, 200.0)),
        ];

        let requests = merge_requests(&valid, &options());

        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].members, vec![3, 7]);
        assert_eq!(requests[0].target_path, PathBuf::from("patches/s2_2022_3_7.nc"));
        assert_eq!(requests[1].members, vec![12]);
        assert_eq!(requests[1].target_path, PathBuf::from("patches/s2_2022_12.nc"));
        assert_eq!(requests[1].crs, Crs::utm32n());
    }

    #[test]
    fn test_singleton_uses_grown_box() {
        let requests = merge_requests(&[(0, square(1000.0, 1000.0, 120.0))], &options());

        assert_eq!(requests.len(), 1);
        let bbox = requests[0].bbox;
        assert_eq!(bbox, BoundingBox::new(-1500.0, -1500.0, 3620.0, 3620.0));
        assert!(bbox.width() >= 5120.0 && bbox.height() >= 5120.0);
    }

    #[test]
    fn test_large_farm_keeps_own_box() {
        let big = square(0.0, 0.0, 8000.0);
        let requests = merge_requests(&[(4, big)], &options());
        assert_eq!(requests[0].bbox, big);
    }

    #[test]
    fn test_merged_box_covers_members() {
        // The far edge of 1 sticks out of the grown box of 0
        let valid = vec![(0, square(0.0, 0.0, 100.0)), (1, BoundingBox::new(2000.0, 0.0, 9000.0, 100.0))];

        let requests = merge_requests(&valid, &options());
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].bbox.east, 9000.0);
        assert_eq!(requests[0].bbox.west, -2510.0);
    }

    #[test]
    fn test_assigned_farms_are_not_pulled_again() {
        // 0 pulls in 1; 2 touches 1 but 1 is already taken
        let valid = vec![
            (0, square(0.0, 0.0, 100.0)),
            (1, square(2500.0, 0.0, 100.0)),
            (2, square(5000.0, 0.0, 100.0)),
        ];

        let requests = merge_requests(&valid, &options());
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].members, vec![0, 1]);
        assert_eq!(requests[1].members, vec![2]);
    }

    #[test]
    fn test_stable_order_for_equal_sizes() {
        let valid = vec![
            (9, square(0.0, 0.0, 100.0)),
            (2, square(100_000.0, 0.0, 100.0)),
            (5, square(200_000.0, 0.0, 100.0)),
            (6, square(202_000.0, 0.0, 100.0)),
        ];

        let requests = merge_requests(&valid, &options());
        let members: Vec<Vec<usize>> = requests.into_iter().map(|r| r.members).collect();
        assert_eq!(members, vec![vec![5, 6], vec![2], vec![9]]);
    }

    #[test]
    fn test_empty_input() {
        assert!(merge_requests(&[], &options()).is_empty());
    }
}
