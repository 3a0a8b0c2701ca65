//! burnmosaic: yearly burned-area mapping from fire detections and optical imagery
//!
//! For every documented fire event the library composites cloud-filtered
//! reflectance before and after the event, flags pixels whose dNBR reaches
//! the burn threshold, removes water and built-up ground, stamps the event
//! date, and folds all events of a year into one two-band quality mosaic
//! (`burn_binary`, `burn_date`) resampled to the output grid.

pub mod types;
pub mod config;
pub mod io;
pub mod core;

#[cfg(feature = "python")]
mod python;

// Re-export main types and functions for easier access
pub use types::{
    BandImage, BurnError, BurnResult, CandidateRaster, EventGeometry, FireEvent, GeoTransform, GridSpec,
    GridWindow, MergedRaster, Observation, RasterImage, NODATA_I16,
};
pub use config::{ProcessingConfig, TieBreak};
pub use core::{BurnPipeline, Cancellation, PipelineOutput, RunSummary, run_year};
pub use io::{ImagerySource, RetryingSource, SceneCatalog};
