//! Input/output: imagery providers, fire events, study area, GeoTIFF rasters

pub mod scene_source;
pub mod firms;
pub mod geotiff;
pub mod study_area;

pub use scene_source::{ImagerySource, RetryingSource, SceneCatalog, SceneEntry, retry_with_backoff};
pub use firms::{FirmsReader, filter_by_confidence, load_events, load_events_json};
pub use study_area::StudyArea;
pub use geotiff::{read_merged_geotiff, read_obstacle_layers, read_obstacle_mask, read_single_band, write_merged_geotiff};
