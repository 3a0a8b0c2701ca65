use chrono::NaiveDate;
use geo::{BoundingRect, Point, Polygon};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Real-valued band data (reflectance, index, mask). `NaN` marks no data.
pub type BandImage = Array2<f32>;

/// Integer band data for candidate and merged rasters
pub type IntBand = Array2<i16>;

/// No-data sentinel for `i16` bands (`burn_binary`, `burn_date`)
pub const NODATA_I16: i16 = i16::MIN;

/// Band names written to candidate and merged rasters
pub const BURN_BINARY_BAND: &str = "burn_binary";
pub const BURN_DATE_BAND: &str = "burn_date";

/// Geospatial transformation parameters (GDAL ordering)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform with square pixels
    pub fn north_up(top_left_x: f64, top_left_y: f64, pixel_size: f64) -> Self {
        Self {
            top_left_x,
            pixel_width: pixel_size,
            rotation_x: 0.0,
            top_left_y,
            rotation_y: 0.0,
            pixel_height: -pixel_size,
        }
    }

    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    pub fn is_north_up(&self) -> bool {
        self.rotation_x == 0.0 && self.rotation_y == 0.0 && self.pixel_width > 0.0 && self.pixel_height < 0.0
    }

    /// Map coordinates of the centre of pixel (row, col)
    pub fn pixel_center(&self, row: usize, col: usize) -> (f64, f64) {
        let x = self.top_left_x + (col as f64 + 0.5) * self.pixel_width;
        let y = self.top_left_y + (row as f64 + 0.5) * self.pixel_height;
        (x, y)
    }

    /// Fractional (row, col) of a map coordinate
    pub fn fractional_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        let col = (x - self.top_left_x) / self.pixel_width;
        let row = (y - self.top_left_y) / self.pixel_height;
        (row, col)
    }
}

/// Projected bounding box in map units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn is_finite(&self) -> bool {
        self.min_x.is_finite() && self.min_y.is_finite() && self.max_x.is_finite() && self.max_y.is_finite()
    }
}

/// Rectangular sub-window of a parent grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GridWindow {
    pub row_offset: usize,
    pub col_offset: usize,
    pub rows: usize,
    pub cols: usize,
}

impl GridWindow {
    pub fn full(rows: usize, cols: usize) -> Self {
        Self { row_offset: 0, col_offset: 0, rows, cols }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn row_end(&self) -> usize {
        self.row_offset + self.rows
    }

    pub fn col_end(&self) -> usize {
        self.col_offset + self.cols
    }
}

/// Raster grid definition: shape, affine transform and CRS
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    pub rows: usize,
    pub cols: usize,
    pub transform: GeoTransform,
    pub epsg: u32,
}

impl GridSpec {
    pub fn new(rows: usize, cols: usize, transform: GeoTransform, epsg: u32) -> Self {
        Self { rows, cols, transform, epsg }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn pixel_count(&self) -> usize {
        self.rows * self.cols
    }

    pub fn pixel_size(&self) -> f64 {
        self.transform.pixel_width.abs()
    }

    pub fn bounds(&self) -> BoundingBox {
        let t = &self.transform;
        let x0 = t.top_left_x;
        let x1 = t.top_left_x + self.cols as f64 * t.pixel_width;
        let y0 = t.top_left_y;
        let y1 = t.top_left_y + self.rows as f64 * t.pixel_height;
        BoundingBox {
            min_x: x0.min(x1),
            min_y: y0.min(y1),
            max_x: x0.max(x1),
            max_y: y0.max(y1),
        }
    }

    /// Pixel containing a map coordinate, if inside the grid
    pub fn pixel_of(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        let (row, col) = self.transform.fractional_pixel(x, y);
        if row < 0.0 || col < 0.0 || !row.is_finite() || !col.is_finite() {
            return None;
        }
        let (row, col) = (row.floor() as usize, col.floor() as usize);
        if row < self.rows && col < self.cols {
            Some((row, col))
        } else {
            None
        }
    }

    /// Window of whole pixels touched by `bbox`, clipped to the grid.
    /// A degenerate (zero-size) box still yields the pixel that contains it.
    pub fn window_for(&self, bbox: &BoundingBox) -> Option<GridWindow> {
        if !bbox.is_finite() || !self.transform.is_north_up() {
            return None;
        }
        let t = &self.transform;
        let pw = t.pixel_width;
        let ph = -t.pixel_height;

        let col_start = ((bbox.min_x - t.top_left_x) / pw).floor();
        let mut col_end = ((bbox.max_x - t.top_left_x) / pw).ceil();
        let row_start = ((t.top_left_y - bbox.max_y) / ph).floor();
        let mut row_end = ((t.top_left_y - bbox.min_y) / ph).ceil();
        if col_end <= col_start {
            col_end = col_start + 1.0;
        }
        if row_end <= row_start {
            row_end = row_start + 1.0;
        }

        let col_start = col_start.max(0.0);
        let row_start = row_start.max(0.0);
        let col_end = col_end.min(self.cols as f64);
        let row_end = row_end.min(self.rows as f64);
        if col_end <= col_start || row_end <= row_start {
            return None;
        }

        Some(GridWindow {
            row_offset: row_start as usize,
            col_offset: col_start as usize,
            rows: (row_end - row_start) as usize,
            cols: (col_end - col_start) as usize,
        })
    }

    /// Grid describing a window of this grid
    pub fn subgrid(&self, window: &GridWindow) -> GridSpec {
        let t = &self.transform;
        let transform = GeoTransform {
            top_left_x: t.top_left_x + window.col_offset as f64 * t.pixel_width,
            top_left_y: t.top_left_y + window.row_offset as f64 * t.pixel_height,
            ..*t
        };
        GridSpec::new(window.rows, window.cols, transform, self.epsg)
    }
}

/// Multi-band raster over one grid. All bands share the grid shape.
#[derive(Debug, Clone)]
pub struct RasterImage {
    grid: GridSpec,
    bands: BTreeMap<String, BandImage>,
}

impl RasterImage {
    pub fn new(grid: GridSpec) -> Self {
        Self { grid, bands: BTreeMap::new() }
    }

    /// Image of the given bands, every pixel no data
    pub fn empty(grid: GridSpec, band_names: &[&str]) -> Self {
        let shape = grid.shape();
        let bands = band_names
            .iter()
            .map(|name| (name.to_string(), Array2::from_elem(shape, f32::NAN)))
            .collect();
        Self { grid, bands }
    }

    pub fn with_band(mut self, name: &str, data: BandImage) -> BurnResult<Self> {
        self.insert_band(name, data)?;
        Ok(self)
    }

    pub fn insert_band(&mut self, name: &str, data: BandImage) -> BurnResult<()> {
        if data.dim() != self.grid.shape() {
            return Err(BurnError::Processing(format!(
                "Band '{}' has shape {:?}, grid is {:?}",
                name,
                data.dim(),
                self.grid.shape()
            )));
        }
        self.bands.insert(name.to_string(), data);
        Ok(())
    }

    pub fn grid(&self) -> &GridSpec {
        &self.grid
    }

    pub fn band(&self, name: &str) -> Option<&BandImage> {
        self.bands.get(name)
    }

    /// Band lookup that reports which scene lacks it
    pub fn require_band(&self, name: &str, scene: &str) -> BurnResult<&BandImage> {
        self.bands.get(name).ok_or_else(|| BurnError::MissingBand {
            band: name.to_string(),
            scene: scene.to_string(),
        })
    }

    pub fn band_names(&self) -> impl Iterator<Item = &str> {
        self.bands.keys().map(|k| k.as_str())
    }

    pub fn bands(&self) -> impl Iterator<Item = (&str, &BandImage)> {
        self.bands.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn bands_mut(&mut self) -> impl Iterator<Item = (&str, &mut BandImage)> {
        self.bands.iter_mut().map(|(k, v)| (k.as_str(), v))
    }
}

/// One dated reflectance acquisition
#[derive(Debug, Clone)]
pub struct Observation {
    pub scene_id: String,
    pub date: NaiveDate,
    pub image: RasterImage,
}

/// Event footprint geometry in the study CRS
#[derive(Debug, Clone, PartialEq)]
pub enum EventGeometry {
    Point(Point<f64>),
    Polygon(Polygon<f64>),
}

impl EventGeometry {
    pub fn bounding_box(&self) -> Option<BoundingBox> {
        match self {
            EventGeometry::Point(p) => Some(BoundingBox {
                min_x: p.x(),
                min_y: p.y(),
                max_x: p.x(),
                max_y: p.y(),
            }),
            EventGeometry::Polygon(poly) => poly.bounding_rect().map(|r| BoundingBox {
                min_x: r.min().x,
                min_y: r.min().y,
                max_x: r.max().x,
                max_y: r.max().y,
            }),
        }
    }
}

/// Documented fire detection with its footprint
#[derive(Debug, Clone)]
pub struct FireEvent {
    pub id: String,
    pub geometry: EventGeometry,
    pub acquisition_date: NaiveDate,
    pub confidence: f64,
    pub instrument: Option<String>,
}

/// Per-event detection on a window of the study grid.
/// Pixels outside the footprint are `NODATA_I16` in both bands.
#[derive(Debug, Clone)]
pub struct CandidateRaster {
    pub event_id: String,
    pub window: GridWindow,
    pub burn_binary: IntBand,
    pub burn_date: IntBand,
}

impl CandidateRaster {
    pub fn covered_pixels(&self) -> usize {
        self.burn_binary.iter().filter(|&&v| v != NODATA_I16).count()
    }

    pub fn burned_pixels(&self) -> usize {
        self.burn_binary.iter().filter(|&&v| v == 1).count()
    }
}

/// Final per-year burn mosaic
#[derive(Debug, Clone)]
pub struct MergedRaster {
    pub grid: GridSpec,
    pub burn_binary: IntBand,
    pub burn_date: IntBand,
}

impl MergedRaster {
    pub fn covered_pixels(&self) -> usize {
        self.burn_binary.iter().filter(|&&v| v != NODATA_I16).count()
    }

    pub fn burned_pixels(&self) -> usize {
        self.burn_binary.iter().filter(|&&v| v == 1).count()
    }
}

/// Error types for burn-area processing
#[derive(Debug, thiserror::Error)]
pub enum BurnError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Source unavailable ({provider}): {reason}")]
    SourceUnavailable {
        provider: String,
        reason: String,
        transient: bool,
    },

    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("Missing band '{band}' in scene {scene}")]
    MissingBand { band: String, scene: String },

    #[error("Reprojection error: {0}")]
    Reprojection(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Export error: {0}")]
    Export(String),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("Processing error: {0}")]
    Processing(String),
}

impl BurnError {
    /// Whether retrying the same request may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, BurnError::SourceUnavailable { transient: true, .. })
    }

    /// Short category name used in run summaries
    pub fn kind(&self) -> &'static str {
        match self {
            BurnError::Io(_) => "io",
            BurnError::Gdal(_) => "gdal",
            BurnError::Csv(_) => "csv",
            BurnError::Json(_) => "json",
            BurnError::SourceUnavailable { .. } => "source_unavailable",
            BurnError::InvalidGeometry(_) => "invalid_geometry",
            BurnError::MissingBand { .. } => "missing_band",
            BurnError::Reprojection(_) => "reprojection",
            BurnError::InvalidConfig(_) => "invalid_config",
            BurnError::Export(_) => "export",
            BurnError::InvalidFormat(_) => "invalid_format",
            BurnError::Processing(_) => "processing",
        }
    }
}

/// Result type for burn-area operations
pub type BurnResult<T> = Result<T, BurnError>;
