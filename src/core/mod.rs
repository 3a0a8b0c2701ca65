//! Core burn detection modules

pub mod cloud_mask;
pub mod composite;
pub mod burn_index;
pub mod obstacle;
pub mod event_raster;
pub mod quality_mosaic;
pub mod resample;
pub mod pipeline;

// Re-export main types
pub use cloud_mask::CloudMasker;
pub use composite::{DateWindow, TemporalCompositor, nan_median};
pub use burn_index::{BurnIndexDifferencer, normalized_difference, DNBR_FILL};
pub use obstacle::{ObstacleMask, build_obstacle_mask};
pub use event_raster::{EventRasterizer, days_since_epoch, date_from_days};
pub use quality_mosaic::{MosaicAccumulator, quality_mosaic};
pub use resample::{GridResampler, CrsTransformer, parse_epsg};
pub use pipeline::{BurnPipeline, Cancellation, PipelineOutput, RunSummary, SkippedEvent, run_year};
