//! Study-area polygon
//!
//! Read from GeoJSON: a `FeatureCollection`, a single `Feature` or a bare
//! `Polygon`/`MultiPolygon`. Coordinates are WGS84 unless the legacy
//! `crs` member names another EPSG code; they are reprojected into the
//! study CRS on load.

use geo::{Area, BooleanOps, Contains, LineString, MultiPolygon, Point, Polygon};
use serde::Deserialize;
use std::path::Path;

use crate::core::resample::{parse_epsg, CrsTransformer};
use crate::types::{BurnError, BurnResult};

/// EPSG code of GeoJSON without a `crs` member
pub const GEOJSON_DEFAULT_EPSG: u32 = 4326;

type Ring = Vec<Vec<f64>>;

#[derive(Debug, Deserialize)]
struct CrsProperties {
    name: String,
}

#[derive(Debug, Deserialize)]
struct NamedCrs {
    properties: CrsProperties,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum AreaGeometry {
    Polygon { coordinates: Vec<Ring> },
    MultiPolygon { coordinates: Vec<Vec<Ring>> },
}

#[derive(Debug, Deserialize)]
struct AreaFeature {
    geometry: Option<AreaGeometry>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum AreaDocument {
    FeatureCollection {
        features: Vec<AreaFeature>,
        #[serde(default)]
        crs: Option<NamedCrs>,
    },
    Feature {
        geometry: Option<AreaGeometry>,
        #[serde(default)]
        crs: Option<NamedCrs>,
    },
    Polygon {
        coordinates: Vec<Ring>,
        #[serde(default)]
        crs: Option<NamedCrs>,
    },
    MultiPolygon {
        coordinates: Vec<Vec<Ring>>,
        #[serde(default)]
        crs: Option<NamedCrs>,
    },
}

/// EPSG code from a named CRS: `EPSG:32718`, `urn:ogc:def:crs:EPSG::32718`
/// or the CRS84 urn
fn named_crs_epsg(name: &str) -> BurnResult<u32> {
    if name.contains("CRS84") {
        return Ok(GEOJSON_DEFAULT_EPSG);
    }
    match name.rsplit_once("EPSG") {
        Some((_, code)) => parse_epsg(code.trim_start_matches(':')),
        None => parse_epsg(name),
    }
}

fn to_ring(coords: &Ring, transformer: &CrsTransformer) -> BurnResult<LineString<f64>> {
    let mut xs = Vec::with_capacity(coords.len());
    let mut ys = Vec::with_capacity(coords.len());
    for position in coords {
        match position.as_slice() {
            [x, y, ..] => {
                xs.push(*x);
                ys.push(*y);
            }
            _ => {
                return Err(BurnError::InvalidGeometry(
                    "study area position needs two coordinates".to_string(),
                ))
            }
        }
    }
    transformer.transform(&mut xs, &mut ys)?;
    Ok(xs.into_iter().zip(ys).collect::<Vec<_>>().into())
}

fn to_polygon(rings: &[Ring], transformer: &CrsTransformer) -> BurnResult<Polygon<f64>> {
    let (exterior, interiors) = rings
        .split_first()
        .ok_or_else(|| BurnError::InvalidGeometry("study area polygon has no rings".to_string()))?;
    let interiors = interiors
        .iter()
        .map(|r| to_ring(r, transformer))
        .collect::<BurnResult<Vec<_>>>()?;
    Ok(Polygon::new(to_ring(exterior, transformer)?, interiors))
}

fn collect_geometry(
    geometry: AreaGeometry,
    transformer: &CrsTransformer,
    out: &mut Vec<Polygon<f64>>,
) -> BurnResult<()> {
    match geometry {
        AreaGeometry::Polygon { coordinates } => out.push(to_polygon(&coordinates, transformer)?),
        AreaGeometry::MultiPolygon { coordinates } => {
            for rings in &coordinates {
                out.push(to_polygon(rings, transformer)?);
            }
        }
    }
    Ok(())
}

/// Study area in the study CRS
#[derive(Debug, Clone)]
pub struct StudyArea {
    shape: MultiPolygon<f64>,
    epsg: u32,
}

impl StudyArea {
    pub fn new(shape: MultiPolygon<f64>, epsg: u32) -> BurnResult<Self> {
        if shape.0.is_empty() || shape.unsigned_area() <= 0.0 {
            return Err(BurnError::InvalidGeometry("study area is empty".to_string()));
        }
        Ok(Self { shape, epsg })
    }

    pub fn from_geojson_str(text: &str, study_epsg: u32) -> BurnResult<Self> {
        let document: AreaDocument = serde_json::from_str(text)?;
        let (geometries, crs) = match document {
            AreaDocument::FeatureCollection { features, crs } => {
                (features.into_iter().filter_map(|f| f.geometry).collect(), crs)
            }
            AreaDocument::Feature { geometry, crs } => (geometry.into_iter().collect(), crs),
            AreaDocument::Polygon { coordinates, crs } => (vec![AreaGeometry::Polygon { coordinates }], crs),
            AreaDocument::MultiPolygon { coordinates, crs } => {
                (vec![AreaGeometry::MultiPolygon { coordinates }], crs)
            }
        };
        let source_epsg = match crs {
            Some(crs) => named_crs_epsg(&crs.properties.name)?,
            None => GEOJSON_DEFAULT_EPSG,
        };

        let transformer = CrsTransformer::new(source_epsg, study_epsg)?;
        let mut polygons = Vec::new();
        for geometry in geometries {
            collect_geometry(geometry, &transformer, &mut polygons)?;
        }
        log::debug!(
            "Study area: {} polygons, EPSG:{} -> EPSG:{}",
            polygons.len(),
            source_epsg,
            study_epsg
        );
        Self::new(MultiPolygon::new(polygons), study_epsg)
    }

    pub fn from_geojson_file<P: AsRef<Path>>(path: P, study_epsg: u32) -> BurnResult<Self> {
        log::info!("Reading study area: {}", path.as_ref().display());
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_geojson_str(&text, study_epsg)
    }

    pub fn epsg(&self) -> u32 {
        self.epsg
    }

    pub fn shape(&self) -> &MultiPolygon<f64> {
        &self.shape
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        self.shape.contains(&Point::new(x, y))
    }

    /// Part of `polygon` inside the area. When the intersection falls
    /// apart into several pieces the largest one is kept.
    pub fn clip(&self, polygon: &Polygon<f64>) -> Option<Polygon<f64>> {
        MultiPolygon::new(vec![polygon.clone()])
            .intersection(&self.shape)
            .into_iter()
            .map(|part| (part.unsigned_area(), part))
            .filter(|(area, _)| *area > 0.0)
            .max_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, part)| part)
    }
}
