//! Process graphs for the downloaded products

use pvsite_core::models::{BoundingBox, Crs, DownloadRequest};
use serde_json::{json, Value};

use crate::graph::{callback, from_parameter, GraphBuilder, NodeRef, ProcessGraph};

pub const S2_COLLECTION: &str = "SENTINEL2_L2A";
pub const LAND_COVER_COLLECTION: &str = "ESA_WORLDCOVER_10M_2021_V2";
pub const LAND_COVER_BAND: &str = "MAP";

/// Sentinel-2 bands used as features, in cube order
pub const S2_BANDS: [&str; 10] =
    ["B02", "B03", "B04", "B05", "B06", "B07", "B08", "B8A", "B11", "B12"];

/// Scene classification band
pub const SCL_BAND: &str = "SCL";

/// SCL classes masked as cloud: cloud shadows, medium and high probability clouds
pub const SCL_CLOUD_CLASSES: [u8; 3] = [3, 8, 9];

/// openEO spatial extent object for a box, with an explicit CRS
pub fn spatial_extent(bbox: &BoundingBox, crs: &Crs) -> Value {
    json!({
        "west": bbox.west,
        "south": bbox.south,
        "east": bbox.east,
        "north": bbox.north,
        "crs": crs.authority(),
    })
}

/// Growing season used for the training patches
pub fn growing_season(year: i32) -> Value {
    json!([format!("{}-04-01", year), format!("{}-10-31", year)])
}

/// `properties` filter keeping scenes with at most `max_cloud_cover` percent cloud cover
pub fn cloud_cover_filter(max_cloud_cover: u8) -> Value {
    let mut lte = GraphBuilder::new();
    let node = lte.add("lte", json!({ "x": from_parameter("value"), "y": max_cloud_cover }));
    json!({ "eo:cloud_cover": callback(lte.finish(&node)) })
}

/// Load Sentinel-2 L2A with SCL, mask clouds and drop SCL again
///
/// Returns the node of the masked ten band cube.
pub fn cloud_masked_s2(
    builder: &mut GraphBuilder,
    spatial_extent: Value,
    temporal_extent: Value,
    properties: Option<Value>,
) -> NodeRef {
    let mut bands: Vec<&str> = S2_BANDS.to_vec();
    bands.push(SCL_BAND);

    let mut load_args = json!({
        "id": S2_COLLECTION,
        "spatial_extent": spatial_extent,
        "temporal_extent": temporal_extent,
        "bands": bands,
    });
    if let Some(properties) = properties {
        load_args["properties"] = properties;
    }
    let cube = builder.add("load_collection", load_args);

    let cloud_mask = builder.add(
        "reduce_dimension",
        json!({
            "data": cube.output(),
            "dimension": "bands",
            "reducer": callback(scl_cloud_mask()),
        }),
    );

    let features = builder.add("filter_bands", json!({ "data": cube.output(), "bands": S2_BANDS }));

    builder.add("mask", json!({ "data": features.output(), "mask": cloud_mask.output() }))
}

/// Band math callback: 1.0 where SCL is a cloud class, 0.0 elsewhere
fn scl_cloud_mask() -> ProcessGraph {
    let mut builder = GraphBuilder::new();
    let scl = builder.add(
        "array_element",
        json!({ "data": from_parameter("data"), "label": SCL_BAND }),
    );

    let mut combined: Option<NodeRef> = None;
    for class in SCL_CLOUD_CLASSES {
        let eq = builder.add("eq", json!({ "x": scl.output(), "y": class }));
        combined = Some(match combined {
            None => eq,
            Some(previous) => builder.add("or", json!({ "x": previous.output(), "y": eq.output() })),
        });
    }

    let flag = combined.unwrap_or(scl);
    let mask = builder.add("multiply", json!({ "x": flag.output(), "y": 1.0 }));
    builder.finish(&mask)
}

/// Per pixel temporal statistics: 10th, 50th, 90th percentile, standard deviation and mean
fn temporal_statistics() -> ProcessGraph {
    let mut builder = GraphBuilder::new();
    let quantiles = builder.add(
        "quantiles",
        json!({ "data": from_parameter("data"), "probabilities": [0.1, 0.5, 0.9] }),
    );
    let sd = builder.add("sd", json!({ "data": from_parameter("data") }));
    let mean = builder.add("mean", json!({ "data": from_parameter("data") }));
    let concat = builder.add(
        "array_concat",
        json!({ "array1": quantiles.output(), "array2": [sd.output(), mean.output()] }),
    );
    builder.finish(&concat)
}

/// Settings of the Sentinel-2 patch product
#[derive(Debug, Clone, PartialEq)]
pub struct S2Options {
    pub year: i32,
    pub max_cloud_cover: u8,
    /// Reduce the time series to statistics; otherwise the masked series is saved as is
    pub temporal_statistics: bool,
}

impl S2Options {
    pub fn new(year: i32) -> Self {
        Self { year, max_cloud_cover: 65, temporal_statistics: true }
    }
}

/// Graph producing the Sentinel-2 feature patch of one request as netCDF
pub fn s2_patch_graph(request: &DownloadRequest, options: &S2Options) -> ProcessGraph {
    let mut builder = GraphBuilder::new();
    let masked = cloud_masked_s2(
        &mut builder,
        spatial_extent(&request.bbox, &request.crs),
        growing_season(options.year),
        Some(cloud_cover_filter(options.max_cloud_cover)),
    );

    let cube = if options.temporal_statistics {
        builder.add(
            "apply_dimension",
            json!({
                "data": masked.output(),
                "process": callback(temporal_statistics()),
                "dimension": "t",
                "target_dimension": "bands",
            }),
        )
    } else {
        masked
    };

    let save = builder.add(
        "save_result",
        json!({ "data": cube.output(), "format": "netCDF", "options": {} }),
    );
    builder.finish(&save)
}

/// Graph producing the WorldCover map of one request as GeoTIFF
pub fn land_cover_graph(request: &DownloadRequest) -> ProcessGraph {
    let mut builder = GraphBuilder::new();
    let cube = builder.add(
        "load_collection",
        json!({
            "id": LAND_COVER_COLLECTION,
            "spatial_extent": spatial_extent(&request.bbox, &request.crs),
            "temporal_extent": null,
            "bands": [LAND_COVER_BAND],
        }),
    );
    let save = builder.add(
        "save_result",
        json!({ "data": cube.output(), "format": "GTiff", "options": {} }),
    );
    builder.finish(&save)
}

/// Product downloaded by the fetch driver
#[derive(Debug, Clone, PartialEq)]
pub enum Product {
    Sentinel2(S2Options),
    LandCover,
}

impl Product {
    pub fn graph(&self, request: &DownloadRequest) -> ProcessGraph {
        match self {
            Product::Sentinel2(options) => s2_patch_graph(request, options),
            Product::LandCover => land_cover_graph(request),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Product::Sentinel2(_) => "Sentinel-2 patch",
            Product::LandCover => "land cover",
        }
    }
}
