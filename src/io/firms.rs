//! Fire event ingestion
//!
//! FIRMS active-fire exports are CSV files with one detection per row.
//! Each detection becomes a square footprint sized by the instrument pixel
//! (1000 m for MODIS, 375 m for VIIRS and anything else) centred on the
//! detection reprojected into the study CRS. The study CRS must be
//! projected so the footprint is measured in metres. With a study area
//! set, detections outside it are dropped and footprints are clipped to it.

use chrono::NaiveDate;
use geo::{LineString, Point, Polygon};
use serde::Deserialize;
use std::io::Read;
use std::path::Path;

use crate::core::resample::{spatial_ref, CrsTransformer};
use crate::io::study_area::StudyArea;
use crate::types::{BurnError, BurnResult, EventGeometry, FireEvent};

/// Geographic CRS of FIRMS coordinates
pub const FIRMS_EPSG: u32 = 4326;

pub const MODIS_FOOTPRINT_M: f64 = 1000.0;
pub const VIIRS_FOOTPRINT_M: f64 = 375.0;

/// Raw FIRMS row; unused columns (brightness, frp, ...) are ignored
#[derive(Debug, Deserialize)]
struct FirmsRecord {
    latitude: f64,
    longitude: f64,
    acq_date: NaiveDate,
    confidence: String,
    #[serde(default)]
    instrument: Option<String>,
}

/// Numeric confidence from a FIRMS value: `h`/`n`/`l` (VIIRS) or 0-100 (MODIS)
pub fn parse_confidence(raw: &str) -> BurnResult<f64> {
    let raw = raw.trim();
    match raw.to_ascii_lowercase().as_str() {
        "h" | "high" => Ok(80.0),
        "n" | "nominal" => Ok(60.0),
        "l" | "low" => Ok(30.0),
        other => other
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| BurnError::InvalidFormat(format!("unrecognized confidence '{}'", raw))),
    }
}

/// Footprint edge length in metres for an instrument name
pub fn footprint_size(instrument: Option<&str>) -> f64 {
    match instrument {
        Some(name) if name.trim().eq_ignore_ascii_case("MODIS") => MODIS_FOOTPRINT_M,
        _ => VIIRS_FOOTPRINT_M,
    }
}

fn square(center_x: f64, center_y: f64, size: f64) -> Polygon<f64> {
    let h = size / 2.0;
    Polygon::new(
        LineString::from(vec![
            (center_x - h, center_y - h),
            (center_x + h, center_y - h),
            (center_x + h, center_y + h),
            (center_x - h, center_y + h),
            (center_x - h, center_y - h),
        ]),
        vec![],
    )
}

/// FIRMS CSV reader producing square-footprint events in the study CRS
pub struct FirmsReader {
    transformer: CrsTransformer,
    study_epsg: u32,
    study_area: Option<StudyArea>,
}

impl FirmsReader {
    /// Fails for a geographic study CRS: footprint sizes are metres
    pub fn new(study_epsg: u32) -> BurnResult<Self> {
        if !spatial_ref(study_epsg)?.is_projected() {
            return Err(BurnError::Reprojection(format!(
                "FIRMS footprints need a projected study CRS, EPSG:{} is not projected",
                study_epsg
            )));
        }
        Ok(Self {
            transformer: CrsTransformer::new(FIRMS_EPSG, study_epsg)?,
            study_epsg,
            study_area: None,
        })
    }

    pub fn with_study_area(mut self, area: StudyArea) -> BurnResult<Self> {
        if area.epsg() != self.study_epsg {
            return Err(BurnError::Reprojection(format!(
                "study area is in EPSG:{}, detections are projected to EPSG:{}",
                area.epsg(),
                self.study_epsg
            )));
        }
        self.study_area = Some(area);
        Ok(self)
    }

    pub fn read_path<P: AsRef<Path>>(&self, path: P) -> BurnResult<Vec<FireEvent>> {
        log::info!("Reading FIRMS detections: {}", path.as_ref().display());
        let file = std::fs::File::open(path.as_ref())?;
        self.read_from(file)
    }

    /// Parse all rows. A malformed row fails the whole file.
    pub fn read_from<R: Read>(&self, reader: R) -> BurnResult<Vec<FireEvent>> {
        let mut csv_reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let mut records = Vec::new();
        for record in csv_reader.deserialize::<FirmsRecord>() {
            records.push(record?);
        }

        let mut xs: Vec<f64> = records.iter().map(|r| r.longitude).collect();
        let mut ys: Vec<f64> = records.iter().map(|r| r.latitude).collect();
        self.transformer.transform(&mut xs, &mut ys)?;

        let mut events = Vec::with_capacity(records.len());
        let mut outside = 0usize;
        for (index, record) in records.into_iter().enumerate() {
            let confidence = parse_confidence(&record.confidence)?;
            let size = footprint_size(record.instrument.as_deref());
            let footprint = square(xs[index], ys[index], size);
            let clipped = match &self.study_area {
                None => Some(footprint),
                Some(area) if area.contains(xs[index], ys[index]) => area.clip(&footprint),
                Some(_) => None,
            };
            let Some(footprint) = clipped else {
                outside += 1;
                continue;
            };
            events.push(FireEvent {
                id: format!("firms-{}-{:05}", record.acq_date, index),
                geometry: EventGeometry::Polygon(footprint),
                acquisition_date: record.acq_date,
                confidence,
                instrument: record.instrument,
            });
        }

        if outside > 0 {
            log::info!("Dropped {} FIRMS detections outside the study area", outside);
        }
        log::info!(
            "Loaded {} FIRMS detections into EPSG:{}",
            events.len(),
            self.study_epsg
        );
        Ok(events)
    }
}

/// Events at or above `min_confidence`, in input order
pub fn filter_by_confidence(events: Vec<FireEvent>, min_confidence: f64) -> Vec<FireEvent> {
    let total = events.len();
    let kept: Vec<FireEvent> = events
        .into_iter()
        .filter(|e| e.confidence >= min_confidence)
        .collect();
    log::info!(
        "Confidence >= {}: kept {} of {} events",
        min_confidence,
        kept.len(),
        total
    );
    kept
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum GeometryRecord {
    Point { coordinates: [f64; 2] },
    Polygon { coordinates: Vec<Vec<[f64; 2]>> },
}

#[derive(Debug, Deserialize)]
struct EventRecord {
    id: String,
    acq_date: NaiveDate,
    confidence: f64,
    #[serde(default)]
    instrument: Option<String>,
    geometry: GeometryRecord,
}

fn ring(coords: &[[f64; 2]]) -> LineString<f64> {
    coords.iter().map(|&[x, y]| (x, y)).collect::<Vec<_>>().into()
}

fn to_geometry(id: &str, record: GeometryRecord) -> BurnResult<EventGeometry> {
    match record {
        GeometryRecord::Point { coordinates: [x, y] } => Ok(EventGeometry::Point(Point::new(x, y))),
        GeometryRecord::Polygon { coordinates } => {
            let mut rings = coordinates.iter();
            let exterior = rings
                .next()
                .ok_or_else(|| BurnError::InvalidGeometry(format!("event {} polygon has no rings", id)))?;
            let interiors = rings.map(|r| ring(r)).collect();
            Ok(EventGeometry::Polygon(Polygon::new(ring(exterior), interiors)))
        }
    }
}

/// Parse a JSON array of events with footprints already in the study CRS.
/// Geometries use GeoJSON `Point`/`Polygon` objects.
pub fn parse_events_json(text: &str) -> BurnResult<Vec<FireEvent>> {
    let records: Vec<EventRecord> = serde_json::from_str(text)?;
    records
        .into_iter()
        .map(|r| {
            let geometry = to_geometry(&r.id, r.geometry)?;
            Ok(FireEvent {
                id: r.id,
                geometry,
                acquisition_date: r.acq_date,
                confidence: r.confidence,
                instrument: r.instrument,
            })
        })
        .collect()
}

pub fn load_events_json<P: AsRef<Path>>(path: P) -> BurnResult<Vec<FireEvent>> {
    log::info!("Reading event list: {}", path.as_ref().display());
    let text = std::fs::read_to_string(path.as_ref())?;
    parse_events_json(&text)
}

/// Load events by extension: `.csv` is FIRMS, anything else the JSON list.
/// The study area applies to FIRMS detections only; JSON footprints are
/// taken as given.
pub fn load_events<P: AsRef<Path>>(
    path: P,
    study_epsg: u32,
    study_area: Option<StudyArea>,
) -> BurnResult<Vec<FireEvent>> {
    let is_csv = path
        .as_ref()
        .extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case("csv"));
    if is_csv {
        let mut reader = FirmsReader::new(study_epsg)?;
        if let Some(area) = study_area {
            reader = reader.with_study_area(area)?;
        }
        reader.read_path(path)
    } else {
        load_events_json(path)
    }
}
