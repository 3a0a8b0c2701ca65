//! Per-event burn detection and yearly mosaicking
//!
//! Each admitted event runs cloud masking, compositing, differencing,
//! obstacle exclusion and rasterization on its own footprint window.
//! Events run in parallel batches; every batch is collected in submission
//! order and folded into the mosaic before the next batch starts. A failed
//! event is logged and recorded in the [`RunSummary`], never fatal.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::{ProcessingConfig, TieBreak};
use crate::core::burn_index::BurnIndexDifferencer;
use crate::core::cloud_mask::CloudMasker;
use crate::core::composite::{DateWindow, TemporalCompositor};
use crate::core::event_raster::EventRasterizer;
use crate::core::obstacle::ObstacleMask;
use crate::core::quality_mosaic::MosaicAccumulator;
use crate::core::resample::GridResampler;
use crate::io::firms::load_events;
use crate::io::geotiff::{read_obstacle_mask, write_merged_geotiff};
use crate::io::scene_source::{ImagerySource, RetryingSource, SceneCatalog};
use crate::io::study_area::StudyArea;
use crate::types::{BurnResult, CandidateRaster, FireEvent, GridSpec, MergedRaster, RasterImage};

/// Shared stop flag. Cancelling stops new batches; in-flight events finish.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    flag: Arc<AtomicBool>,
}

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// An event that contributed nothing to the mosaic
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedEvent {
    pub event_id: String,
    pub kind: &'static str,
    pub reason: String,
}

/// Outcome counts of one run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    /// Events below the confidence floor, never attempted
    pub below_confidence: usize,
    pub attempted: usize,
    pub merged: usize,
    pub skipped: Vec<SkippedEvent>,
    pub cancelled: bool,
}

impl RunSummary {
    /// Skipped events counted per error kind
    pub fn skipped_by_kind(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for skipped in &self.skipped {
            *counts.entry(skipped.kind).or_insert(0) += 1;
        }
        counts
    }

    pub fn log(&self) {
        log::info!(
            "Run summary: {} attempted, {} merged, {} skipped, {} below confidence{}",
            self.attempted,
            self.merged,
            self.skipped.len(),
            self.below_confidence,
            if self.cancelled { " (cancelled)" } else { "" }
        );
        for (kind, count) in self.skipped_by_kind() {
            log::info!("  skipped [{}]: {}", kind, count);
        }
    }
}

/// Result of a run: the resampled mosaic (if any pixel was covered) and the summary
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub mosaic: Option<MergedRaster>,
    pub summary: RunSummary,
}

/// Burn-area pipeline for one study year
pub struct BurnPipeline<'a> {
    config: &'a ProcessingConfig,
    source: &'a dyn ImagerySource,
    obstacles: &'a ObstacleMask,
    masker: CloudMasker,
    compositor: TemporalCompositor,
    differencer: BurnIndexDifferencer,
    resampler: GridResampler,
    cancellation: Cancellation,
}

impl<'a> BurnPipeline<'a> {
    /// Validates the configuration and target CRS before any event runs
    pub fn new(
        config: &'a ProcessingConfig,
        source: &'a dyn ImagerySource,
        obstacles: &'a ObstacleMask,
    ) -> BurnResult<Self> {
        config.validate()?;
        let resampler = GridResampler::new(&config.target_crs, config.target_pixel_size)?;
        Ok(Self {
            config,
            source,
            obstacles,
            masker: CloudMasker::new(config.cloud_mask.clone(), &config.bands),
            compositor: TemporalCompositor::new(vec![config.bands.nir.clone(), config.bands.swir.clone()]),
            differencer: BurnIndexDifferencer::new(&config.bands, config.burn_threshold),
            resampler,
            cancellation: Cancellation::new(),
        })
    }

    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn study_grid(&self) -> &GridSpec {
        self.obstacles.grid()
    }

    fn composite(&self, grid: &GridSpec, window: &DateWindow) -> BurnResult<RasterImage> {
        let observations = self.source.observations(grid, window)?;
        let masked = observations
            .iter()
            .map(|obs| self.masker.apply(obs))
            .collect::<BurnResult<Vec<_>>>()?;
        self.compositor.composite(&masked, window, grid)
    }

    /// Candidate raster for one event on its footprint window
    pub fn process_event(&self, event: &FireEvent) -> BurnResult<CandidateRaster> {
        let rasterizer = EventRasterizer::new(self.obstacles.grid());
        let window = rasterizer.window_for(event)?;
        let grid = self.obstacles.grid().subgrid(&window);

        let pre_window = DateWindow::pre_fire(event.acquisition_date, &self.config.windows);
        let post_window = DateWindow::post_fire(event.acquisition_date, &self.config.windows);
        log::debug!(
            "Event {}: pre {} post {} on {}x{} window",
            event.id,
            pre_window,
            post_window,
            window.rows,
            window.cols
        );

        let pre = self.composite(&grid, &pre_window)?;
        let post = self.composite(&grid, &post_window)?;
        let candidate = self.differencer.burn_candidate(&pre, &post)?;
        let burned = self.obstacles.exclude(&candidate, &window)?;
        rasterizer.rasterize(event, window, &burned)
    }

    #[cfg(feature = "parallel")]
    fn process_batch(&self, batch: &[&FireEvent]) -> Vec<BurnResult<CandidateRaster>> {
        use rayon::prelude::*;
        batch.par_iter().map(|event| self.process_event(event)).collect()
    }

    #[cfg(not(feature = "parallel"))]
    fn process_batch(&self, batch: &[&FireEvent]) -> Vec<BurnResult<CandidateRaster>> {
        batch.iter().map(|event| self.process_event(event)).collect()
    }

    /// Events that pass the confidence floor, in fold order
    fn admitted<'e>(&self, events: &'e [FireEvent]) -> Vec<&'e FireEvent> {
        let mut admitted: Vec<&FireEvent> = events
            .iter()
            .filter(|e| e.confidence >= self.config.min_confidence)
            .collect();
        if self.config.tie_break == TieBreak::EventId {
            admitted.sort_by(|a, b| a.id.cmp(&b.id));
        }
        admitted
    }

    /// Fold all admitted events into a mosaic on the study grid
    pub fn accumulate(&self, events: &[FireEvent]) -> BurnResult<(MosaicAccumulator, RunSummary)> {
        let admitted = self.admitted(events);
        let mut summary = RunSummary {
            below_confidence: events.len() - admitted.len(),
            ..Default::default()
        };
        log::info!(
            "Processing {} events for {} ({} below confidence {})",
            admitted.len(),
            self.config.study_year,
            summary.below_confidence,
            self.config.min_confidence
        );

        let mut mosaic = MosaicAccumulator::new(self.obstacles.grid().clone());
        for (index, batch) in admitted.chunks(self.config.batch_size).enumerate() {
            if self.cancellation.is_cancelled() {
                log::warn!("Run cancelled before batch {}", index + 1);
                summary.cancelled = true;
                break;
            }

            let results = self.process_batch(batch);
            for (event, result) in batch.iter().zip(results) {
                summary.attempted += 1;
                match result {
                    Ok(candidate) => {
                        mosaic.fold(&candidate)?;
                        summary.merged += 1;
                    }
                    Err(e) => {
                        log::warn!("Skipping event {}: {}", event.id, e);
                        summary.skipped.push(SkippedEvent {
                            event_id: event.id.clone(),
                            kind: e.kind(),
                            reason: e.to_string(),
                        });
                    }
                }
            }
            log::debug!("Batch {} folded, {} candidates so far", index + 1, mosaic.folded());
        }
        Ok((mosaic, summary))
    }

    /// Full run: fold, crop to coverage, resample to the target grid
    pub fn run(&self, events: &[FireEvent]) -> BurnResult<PipelineOutput> {
        let (mosaic, summary) = self.accumulate(events)?;
        let mosaic = match mosaic.finish() {
            Some(merged) => Some(self.resampler.resample(&merged)?),
            None => {
                log::warn!("No event covered any pixel of the study grid");
                None
            }
        };
        summary.log();
        Ok(PipelineOutput { mosaic, summary })
    }
}

/// Run one study year end to end from the configured paths: obstacle mask,
/// events, scene catalog (with retries) and the GeoTIFF output.
pub fn run_year(config: &ProcessingConfig, cancellation: Cancellation) -> BurnResult<PipelineOutput> {
    config.validate()?;
    log::info!("Burned area mapping for {}", config.study_year);

    let obstacles = read_obstacle_mask(config.obstacle_mask_path()?)?;
    let study_epsg = obstacles.grid().epsg;
    let study_area = match config.aoi_path() {
        Some(path) => Some(StudyArea::from_geojson_file(path, study_epsg)?),
        None => None,
    };
    let events = load_events(config.events_path()?, study_epsg, study_area)?;
    let catalog = SceneCatalog::from_json_file(config.scene_catalog_path()?, config.cache_dir())?;
    let source = RetryingSource::new(catalog, config.retry.clone());
    let output_path = config.output_path()?;

    let pipeline = BurnPipeline::new(config, &source, &obstacles)?.with_cancellation(cancellation);
    let output = pipeline.run(&events)?;

    match &output.mosaic {
        Some(mosaic) => write_merged_geotiff(mosaic, &output_path, config.max_pixels)?,
        None => log::warn!("Nothing to export for {}", config.study_year),
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BurnError, EventGeometry, GeoTransform, Observation};
    use chrono::NaiveDate;
    use geo::Point;

    struct FailingSource;

    impl ImagerySource for FailingSource {
        fn observations(&self, _grid: &GridSpec, _window: &DateWindow) -> BurnResult<Vec<Observation>> {
            Err(BurnError::SourceUnavailable {
                provider: "failing".to_string(),
                reason: "HTTP 404".to_string(),
                transient: false,
            })
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    fn point_event(id: &str, confidence: f64) -> FireEvent {
        FireEvent {
            id: id.to_string(),
            geometry: EventGeometry::Point(Point::new(15.0, 15.0)),
            acquisition_date: NaiveDate::from_ymd_opt(2022, 6, 15).unwrap(),
            confidence,
            instrument: None,
        }
    }

    #[test]
    fn test_cancellation_flag() {
        let c = Cancellation::new();
        let shared = c.clone();
        assert!(!c.is_cancelled());
        shared.cancel();
        assert!(c.is_cancelled());
    }

    #[test]
    fn test_failed_events_are_summarized() {
        let grid = GridSpec::new(4, 4, GeoTransform::north_up(0.0, 40.0, 10.0), 32718);
        let mask = ObstacleMask::clear(grid);
        let config = ProcessingConfig::default();
        let pipeline = BurnPipeline::new(&config, &FailingSource, &mask).unwrap();

        let events = vec![point_event("a", 80.0), point_event("b", 30.0), point_event("c", 60.0)];
        let output = pipeline.run(&events).unwrap();

        assert!(output.mosaic.is_none());
        assert_eq!(output.summary.below_confidence, 1);
        assert_eq!(output.summary.attempted, 2);
        assert_eq!(output.summary.merged, 0);
        assert_eq!(output.summary.skipped_by_kind().get("source_unavailable"), Some(&2));
    }

    #[test]
    fn test_invalid_crs_fails_before_processing() {
        let grid = GridSpec::new(4, 4, GeoTransform::north_up(0.0, 40.0, 10.0), 32718);
        let mask = ObstacleMask::clear(grid);
        let config = ProcessingConfig {
            target_crs: "EPSG:999999".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            BurnPipeline::new(&config, &FailingSource, &mask),
            Err(BurnError::Reprojection(_))
        ));
    }

    #[test]
    fn test_event_id_ordering() {
        let grid = GridSpec::new(4, 4, GeoTransform::north_up(0.0, 40.0, 10.0), 32718);
        let mask = ObstacleMask::clear(grid);
        let config = ProcessingConfig {
            tie_break: TieBreak::EventId,
            ..Default::default()
        };
        let pipeline = BurnPipeline::new(&config, &FailingSource, &mask).unwrap();
        let events = vec![point_event("b", 80.0), point_event("a", 80.0)];
        let ids: Vec<&str> = pipeline.admitted(&events).iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
