//! Processing configuration
//!
//! Everything that changes between study years or study areas lives in one
//! immutable [`ProcessingConfig`] value that is passed to each component.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::types::{BurnError, BurnResult};

/// Sentinel-2 scene classification codes masked before compositing:
/// saturated/defective, cloud shadow, water, cloud medium probability,
/// cloud high probability, thin cirrus.
pub const DEFAULT_EXCLUDED_SCL: [u8; 6] = [1, 3, 6, 8, 9, 10];

/// Band names used by the detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BandNames {
    pub nir: String,
    pub swir: String,
    pub classification: String,
}

impl Default for BandNames {
    fn default() -> Self {
        Self {
            nir: "B8".to_string(),
            swir: "B12".to_string(),
            classification: "SCL".to_string(),
        }
    }
}

/// Cloud/quality filter parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudMaskParams {
    /// Classification values treated as unusable
    pub excluded_classes: Vec<u8>,
    /// Multiplier from digital numbers to surface reflectance
    pub scale_factor: f32,
}

impl Default for CloudMaskParams {
    fn default() -> Self {
        Self {
            excluded_classes: DEFAULT_EXCLUDED_SCL.to_vec(),
            scale_factor: 1.0 / 10_000.0,
        }
    }
}

/// Pre/post compositing windows around the acquisition date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowParams {
    pub pre_days: u32,
    pub post_days: u32,
    /// Days excluded on each side of the acquisition date
    pub buffer_days: u32,
}

impl Default for WindowParams {
    fn default() -> Self {
        Self {
            pre_days: 60,
            post_days: 60,
            buffer_days: 1,
        }
    }
}

/// Which candidate wins a quality tie in the mosaic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// Last event in input order wins
    InputOrder,
    /// Events are sorted by identifier first, last one wins
    EventId,
}

/// Backoff policy for imagery reads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
        }
    }
}

/// Input and output locations. `{year}` is replaced by the study year.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PathTemplates {
    pub events: Option<String>,
    pub obstacle_mask: Option<String>,
    pub scene_catalog: Option<String>,
    pub output: Option<String>,
    /// Download cache for remote scenes; defaults to the user cache dir
    pub cache_dir: Option<String>,
    /// Optional study-area GeoJSON; FIRMS detections are clipped to it
    pub aoi: Option<String>,
}

/// Complete processing configuration for one study year
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    pub study_year: i32,
    pub bands: BandNames,
    pub cloud_mask: CloudMaskParams,
    pub windows: WindowParams,
    /// dNBR at or above this value is a burn candidate
    pub burn_threshold: f32,
    /// Events below this confidence are not processed
    pub min_confidence: f64,
    /// Target CRS identifier, `EPSG:<code>`
    pub target_crs: String,
    /// Target pixel size in target CRS units
    pub target_pixel_size: f64,
    /// Export refuses rasters with more pixels than this
    pub max_pixels: f64,
    pub tie_break: TieBreak,
    /// Events processed concurrently before folding into the mosaic
    pub batch_size: usize,
    pub retry: RetryPolicy,
    pub paths: PathTemplates,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            study_year: 2022,
            bands: BandNames::default(),
            cloud_mask: CloudMaskParams::default(),
            windows: WindowParams::default(),
            burn_threshold: 0.27,
            min_confidence: 60.0,
            target_crs: "EPSG:32718".to_string(),
            target_pixel_size: 20.0,
            max_pixels: 1e13,
            tie_break: TieBreak::InputOrder,
            batch_size: 32,
            retry: RetryPolicy::default(),
            paths: PathTemplates::default(),
        }
    }
}

impl ProcessingConfig {
    /// Load from a JSON file; missing fields take their defaults
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> BurnResult<Self> {
        log::info!("Loading processing configuration: {}", path.as_ref().display());
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: ProcessingConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Copy of this configuration for another study year
    pub fn for_year(&self, year: i32) -> Self {
        Self {
            study_year: year,
            ..self.clone()
        }
    }

    /// Reject configurations that cannot produce a meaningful run.
    /// CRS validity is checked separately by the resampler.
    pub fn validate(&self) -> BurnResult<()> {
        if !(-2.0..=2.0).contains(&self.burn_threshold) || !self.burn_threshold.is_finite() {
            return Err(BurnError::InvalidConfig(format!(
                "burn_threshold {} outside the dNBR range [-2, 2]",
                self.burn_threshold
            )));
        }
        if self.windows.pre_days == 0 || self.windows.post_days == 0 {
            return Err(BurnError::InvalidConfig(
                "pre/post window lengths must be at least one day".to_string(),
            ));
        }
        if self.windows.buffer_days >= self.windows.pre_days.min(self.windows.post_days) {
            return Err(BurnError::InvalidConfig(format!(
                "buffer of {} days leaves an empty compositing window",
                self.windows.buffer_days
            )));
        }
        if !(self.cloud_mask.scale_factor > 0.0) {
            return Err(BurnError::InvalidConfig(format!(
                "scale_factor must be positive, got {}",
                self.cloud_mask.scale_factor
            )));
        }
        if !(self.target_pixel_size > 0.0) || !self.target_pixel_size.is_finite() {
            return Err(BurnError::InvalidConfig(format!(
                "target_pixel_size must be positive, got {}",
                self.target_pixel_size
            )));
        }
        if !(self.max_pixels >= 1.0) {
            return Err(BurnError::InvalidConfig(format!(
                "max_pixels must be at least 1, got {}",
                self.max_pixels
            )));
        }
        for (label, name) in [
            ("nir", &self.bands.nir),
            ("swir", &self.bands.swir),
            ("classification", &self.bands.classification),
        ] {
            if name.trim().is_empty() {
                return Err(BurnError::InvalidConfig(format!("{} band name is empty", label)));
            }
        }
        if self.bands.nir == self.bands.swir {
            return Err(BurnError::InvalidConfig(
                "nir and swir bands must differ".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(BurnError::InvalidConfig("batch_size must be positive".to_string()));
        }
        if self.retry.max_attempts == 0 {
            return Err(BurnError::InvalidConfig(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Expand `{year}` in a path template
    pub fn resolve(&self, template: &str) -> PathBuf {
        PathBuf::from(template.replace("{year}", &self.study_year.to_string()))
    }

    fn required_path(&self, template: &Option<String>, what: &str) -> BurnResult<PathBuf> {
        template
            .as_deref()
            .map(|t| self.resolve(t))
            .ok_or_else(|| BurnError::InvalidConfig(format!("no {} path configured", what)))
    }

    pub fn events_path(&self) -> BurnResult<PathBuf> {
        self.required_path(&self.paths.events, "events")
    }

    pub fn obstacle_mask_path(&self) -> BurnResult<PathBuf> {
        self.required_path(&self.paths.obstacle_mask, "obstacle mask")
    }

    pub fn scene_catalog_path(&self) -> BurnResult<PathBuf> {
        self.required_path(&self.paths.scene_catalog, "scene catalog")
    }

    pub fn output_path(&self) -> BurnResult<PathBuf> {
        self.required_path(&self.paths.output, "output")
    }

    pub fn aoi_path(&self) -> Option<PathBuf> {
        self.paths.aoi.as_deref().map(|t| self.resolve(t))
    }

    pub fn cache_dir(&self) -> PathBuf {
        match &self.paths.cache_dir {
            Some(t) => self.resolve(t),
            None => dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("burnmosaic")
                .join("scenes"),
        }
    }
}
