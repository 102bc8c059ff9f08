//! Loading real shapefiles written to a temporary directory

use geo::Area;
use pvsite_core::formats::ShapefileLoader;
use pvsite_core::models::Crs;
use shapefile::dbase::{FieldName, FieldValue, Record, TableWriterBuilder};
use shapefile::{Point, Polygon, PolygonRing};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const UTM32N_PRJ: &str = r#"PROJCS["WGS 84 / UTM zone 32N",GEOGCS["WGS 84",DATUM["WGS_1984",SPHEROID["WGS 84",6378137,298.257223563,AUTHORITY["EPSG","7030"]],AUTHORITY["EPSG","6326"]],PRIMEM["Greenwich",0],UNIT["degree",0.0174532925199433],AUTHORITY["EPSG","4326"]],PROJECTION["Transverse_Mercator"],PARAMETER["central_meridian",9],UNIT["metre",1],AUTHORITY["EPSG","32632"]]"#;

fn square(x: f64, y: f64, size: f64) -> Polygon {
    Polygon::new(PolygonRing::Outer(vec![
        Point::new(x, y),
        Point::new(x, y + size),
        Point::new(x + size, y + size),
        Point::new(x + size, y),
        Point::new(x, y),
    ]))
}

fn write_farms(dir: &Path, farms: &[Polygon]) -> PathBuf {
    let path = dir.join("farms.shp");
    let table = TableWriterBuilder::new().add_character_field(FieldName::try_from("name").unwrap(), 32);
    let mut writer = shapefile::Writer::from_path(&path, table).unwrap();

    for (i, farm) in farms.iter().enumerate() {
        let mut record = Record::default();
        record.insert("name".to_string(), FieldValue::Character(Some(format!("farm {}", i))));
        writer.write_shape_and_record(farm, &record).unwrap();
    }
    path
}

#[test]
fn test_load_keeps_source_order() {
    let dir = TempDir::new().unwrap();
    let path = write_farms(
        dir.path(),
        &[square(600_000.0, 5_300_000.0, 100.0), square(601_000.0, 5_300_000.0, 50.0)],
    );
    fs::write(path.with_extension("prj"), UTM32N_PRJ).unwrap();

    let dataset = ShapefileLoader::load(&path).unwrap();

    assert_eq!(dataset.name, "farms");
    assert_eq!(dataset.crs, Crs::utm32n());
    assert!(dataset.skipped.is_empty());
    assert_eq!(dataset.source_len(), 2);

    let indices: Vec<usize> = dataset.records.iter().map(|r| r.index).collect();
    assert_eq!(indices, vec![0, 1]);
    assert!((dataset.records[0].geometry.unsigned_area() - 10_000.0).abs() < 1e-6);
    assert!((dataset.records[1].geometry.unsigned_area() - 2_500.0).abs() < 1e-6);
    assert!(dataset.records.iter().all(|r| r.crs == Crs::utm32n()));
}

#[test]
fn test_missing_prj_defaults_to_wgs84() {
    let dir = TempDir::new().unwrap();
    let path = write_farms(dir.path(), &[square(10.0, 51.0, 0.01)]);

    let dataset = ShapefileLoader::load(&path).unwrap();
    assert_eq!(dataset.crs, Crs::wgs84());
    assert_eq!(dataset.records.len(), 1);
}

#[test]
fn test_missing_dbf_is_fatal() {
    let dir = TempDir::new().unwrap();
    let path = write_farms(dir.path(), &[square(10.0, 51.0, 0.01)]);
    fs::remove_file(path.with_extension("dbf")).unwrap();

    let err = ShapefileLoader::load(&path).unwrap_err();
    assert!(err.to_string().contains(".dbf"));
}
