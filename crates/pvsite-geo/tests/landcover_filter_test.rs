//! Land cover filter over GeoTIFF rasters on disk

use geo::{polygon, MultiPolygon};
use pvsite_core::memo::ValidIndexFile;
use pvsite_core::models::{Crs, GeometryRecord, LandCoverClass};
use pvsite_geo::landcover::{FilterOutcome, LandCoverFilter, LandCoverRaster};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tiff::encoder::{colortype, TiffEncoder};
use tiff::tags::Tag;

const PIXEL: f64 = 0.001;
const ORIGIN: (f64, f64) = (10.0, 51.006);

/// Write a 6x6 single band GeoTIFF with `inside` in the central 2x2 block
fn write_lclu(path: &Path, inside: u8, outside: u8) {
    let mut data = vec![outside; 36];
    for row in 2..4 {
        for col in 2..4 {
            data[row * 6 + col] = inside;
        }
    }

    let file = File::create(path).unwrap();
    let mut encoder = TiffEncoder::new(file).unwrap();
    let mut image = encoder.new_image::<colortype::Gray8>(6, 6).unwrap();
    image
        .encoder()
        .write_tag(Tag::from_u16_exhaustive(33550), &[PIXEL, PIXEL, 0.0][..])
        .unwrap();
    image
        .encoder()
        .write_tag(Tag::from_u16_exhaustive(33922), &[0.0, 0.0, 0.0, ORIGIN.0, ORIGIN.1, 0.0][..])
        .unwrap();
    image.write_data(&data).unwrap();
}

fn farm(index: usize) -> GeometryRecord {
    let poly = polygon![
        (x: 10.002, y: 51.002),
        (x: 10.004, y: 51.002),
        (x: 10.004, y: 51.004),
        (x: 10.002, y: 51.004),
        (x: 10.002, y: 51.002),
    ];
    GeometryRecord::new(index, MultiPolygon::new(vec![poly]), Crs::wgs84())
}

fn raster_path(dir: &Path) -> impl Fn(usize) -> PathBuf + '_ {
    move |i| dir.join(format!("lclu_2021_{}.tif", i))
}

#[test]
fn test_read_geotiff() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("lclu.tif");
    write_lclu(&path, 40, 10);

    let raster = LandCoverRaster::from_geotiff(&path).unwrap();
    assert_eq!(raster.width(), 6);
    assert_eq!(raster.height(), 6);
    assert!((raster.transform().origin_x - ORIGIN.0).abs() < 1e-12);
    assert!((raster.transform().pixel_height + PIXEL).abs() < 1e-12);
    assert_eq!(raster.value(2, 2), Some(40));
    assert_eq!(raster.value(0, 0), Some(10));
}

#[test]
fn test_filter_run_and_memo() {
    let dir = TempDir::new().unwrap();
    write_lclu(&dir.path().join("lclu_2021_0.tif"), 40, 10);
    write_lclu(&dir.path().join("lclu_2021_1.tif"), 80, 40);
    write_lclu(&dir.path().join("lclu_2021_3.tif"), 50, 30);
    // no raster for 2

    let records = vec![farm(0), farm(1), farm(2), farm(3)];
    let memo = ValidIndexFile::new(dir.path().join("aux").join("LCLU_valid_idx.txt"));
    let filter = LandCoverFilter::default();

    let mut seen = Vec::new();
    let outcome = filter
        .run_memoized(&records, raster_path(dir.path()), &memo, false, |v| seen.push(v.index))
        .unwrap();

    assert_eq!(seen, vec![0, 1, 2, 3]);
    let verdicts = outcome.verdicts();
    assert_eq!(verdicts.len(), 4);
    assert_eq!(verdicts[0].effective_class, Some(LandCoverClass::Cropland));
    assert!(!verdicts[1].valid);
    assert_eq!(verdicts[2].effective_class, None);
    assert_eq!(verdicts[3].majority_inside, Some(LandCoverClass::BuiltUp));
    assert_eq!(verdicts[3].effective_class, Some(LandCoverClass::Grassland));
    assert_eq!(outcome.valid_indices(), vec![0, 3]);
    assert_eq!(fs::read_to_string(memo.path()).unwrap(), "0,3,");

    // Second run is served from the memo, rasters are not touched
    for i in [0, 1] {
        fs::remove_file(dir.path().join(format!("lclu_2021_{}.tif", i))).unwrap();
    }
    let reused = filter
        .run_memoized(&records, raster_path(dir.path()), &memo, false, |_| panic!("no raster read"))
        .unwrap();
    assert_eq!(reused, FilterOutcome::Reused(vec![0, 3]));

    // A refresh recomputes and overwrites the memo
    let refreshed = filter
        .run_memoized(&records, raster_path(dir.path()), &memo, true, |_| {})
        .unwrap();
    assert_eq!(refreshed.valid_indices(), vec![3]);
    assert_eq!(fs::read_to_string(memo.path()).unwrap(), "3,");
}

#[test]
fn test_memo_not_written_without_any_raster() {
    let dir = TempDir::new().unwrap();
    let records = vec![farm(0), farm(1)];
    let memo = ValidIndexFile::new(dir.path().join("aux").join("LCLU_valid_idx.txt"));

    let outcome = LandCoverFilter::default()
        .run_memoized(&records, raster_path(dir.path()), &memo, false, |_| {})
        .unwrap();

    assert!(outcome.verdicts().iter().all(|v| v.is_failed()));
    assert!(outcome.valid_indices().is_empty());
    assert!(!memo.exists());
    assert!(!dir.path().join("aux").exists());

    // Once a raster is there the memo is written as usual
    write_lclu(&dir.path().join("lclu_2021_1.tif"), 40, 10);
    let outcome = LandCoverFilter::default()
        .run_memoized(&records, raster_path(dir.path()), &memo, false, |_| {})
        .unwrap();
    assert_eq!(outcome.valid_indices(), vec![1]);
    assert_eq!(fs::read_to_string(memo.path()).unwrap(), "1,");
}

#[test]
fn test_footprint_is_reprojected_to_raster_crs() {
    let dir = TempDir::new().unwrap();
    write_lclu(&dir.path().join("lclu_2021_5.tif"), 30, 10);

    let utm = pvsite_geo::transform::reproject(&farm(5), &Crs::utm32n()).unwrap();
    let verdicts = LandCoverFilter::default().run(&[utm], raster_path(dir.path()));

    assert!(verdicts[0].valid);
    assert_eq!(verdicts[0].majority_inside, Some(LandCoverClass::Grassland));
}
