use std::sync::atomic::{AtomicUsize, Ordering};

use burnmosaic::config::{ProcessingConfig, RetryPolicy, TieBreak};
use burnmosaic::core::composite::DateWindow;
use burnmosaic::core::event_raster::days_since_epoch;
use burnmosaic::core::obstacle::ObstacleMask;
use burnmosaic::core::pipeline::{BurnPipeline, Cancellation};
use burnmosaic::io::scene_source::{ImagerySource, RetryingSource};
use burnmosaic::types::{
    BurnError, BurnResult, EventGeometry, FireEvent, GeoTransform, GridSpec, MergedRaster, Observation,
    RasterImage, NODATA_I16,
};
use chrono::{Duration, NaiveDate};
use geo::polygon;
use ndarray::Array2;

const ORIGIN_X: f64 = 400_000.0;
const ORIGIN_Y: f64 = 8_970_200.0;
const PIXEL: f64 = 10.0;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn study_grid() -> GridSpec {
    GridSpec::new(20, 20, GeoTransform::north_up(ORIGIN_X, ORIGIN_Y, PIXEL), 32718)
}

fn config() -> ProcessingConfig {
    ProcessingConfig {
        target_pixel_size: PIXEL,
        batch_size: 2,
        retry: RetryPolicy {
            max_attempts: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
        },
        ..Default::default()
    }
}

/// Rectangular event aligned to study-grid pixel edges
fn event(id: &str, acquired: NaiveDate, col: usize, row: usize, cols: usize, rows: usize) -> FireEvent {
    let x0 = ORIGIN_X + col as f64 * PIXEL;
    let x1 = x0 + cols as f64 * PIXEL;
    let y1 = ORIGIN_Y - row as f64 * PIXEL;
    let y0 = y1 - rows as f64 * PIXEL;
    FireEvent {
        id: id.to_string(),
        geometry: EventGeometry::Polygon(polygon![
            (x: x0, y: y0),
            (x: x1, y: y0),
            (x: x1, y: y1),
            (x: x0, y: y1),
            (x: x0, y: y0),
        ]),
        acquisition_date: acquired,
        confidence: 80.0,
        instrument: Some("VIIRS".to_string()),
    }
}

/// Scenes every five days through 2022. Before `fire_date` the surface has
/// NBR 0.5 (B8 3000, B12 1000), from `fire_date` on NBR 0.1 (B8 1100, B12 900).
struct SyntheticSource {
    scenes: Vec<NaiveDate>,
    fire_date: NaiveDate,
    cloudy_pre_west_of: Option<f64>,
    fail_east_of: Option<f64>,
    omit_swir: bool,
}

impl SyntheticSource {
    fn new(fire_date: NaiveDate) -> Self {
        let start = date(2022, 1, 1);
        let scenes = (0..73).map(|i| start + Duration::days(5 * i)).collect();
        Self {
            scenes,
            fire_date,
            cloudy_pre_west_of: None,
            fail_east_of: None,
            omit_swir: false,
        }
    }
}

impl ImagerySource for SyntheticSource {
    fn observations(&self, grid: &GridSpec, window: &DateWindow) -> BurnResult<Vec<Observation>> {
        if let Some(limit) = self.fail_east_of {
            if grid.bounds().max_x > limit {
                return Err(BurnError::SourceUnavailable {
                    provider: "synthetic".to_string(),
                    reason: "HTTP 404 Not Found".to_string(),
                    transient: false,
                });
            }
        }

        let mut observations = Vec::new();
        for &day in self.scenes.iter().filter(|d| window.contains(**d)) {
            let before = day < self.fire_date;
            let (nir, swir) = if before { (3000.0, 1000.0) } else { (1100.0, 900.0) };
            let scl = Array2::from_shape_fn(grid.shape(), |(r, c)| {
                let (x, _) = grid.transform.pixel_center(r, c);
                let cloudy = before && self.cloudy_pre_west_of.map_or(false, |limit| x < limit);
                if cloudy {
                    9.0
                } else {
                    4.0
                }
            });
            let mut image = RasterImage::new(grid.clone())
                .with_band("B8", Array2::from_elem(grid.shape(), nir))?
                .with_band("SCL", scl)?;
            if !self.omit_swir {
                image.insert_band("B12", Array2::from_elem(grid.shape(), swir))?;
            }
            observations.push(Observation {
                scene_id: format!("S2_{}", day.format("%Y%m%d")),
                date: day,
                image,
            });
        }
        Ok(observations)
    }

    fn name(&self) -> &str {
        "synthetic"
    }
}

fn run(source: &dyn ImagerySource, mask: &ObstacleMask, events: &[FireEvent], config: &ProcessingConfig) -> MergedRaster {
    let pipeline = BurnPipeline::new(config, source, mask).unwrap();
    let output = pipeline.run(events).unwrap();
    assert!(output.summary.skipped.is_empty(), "skipped: {:?}", output.summary.skipped);
    output.mosaic.expect("mosaic should cover at least one pixel")
}

/// Full study-grid mosaic (no crop, no resampling)
fn run_full(source: &dyn ImagerySource, mask: &ObstacleMask, events: &[FireEvent], config: &ProcessingConfig) -> MergedRaster {
    let pipeline = BurnPipeline::new(config, source, mask).unwrap();
    let (mosaic, summary) = pipeline.accumulate(events).unwrap();
    assert!(summary.skipped.is_empty(), "skipped: {:?}", summary.skipped);
    mosaic.finish_full()
}

#[test]
fn test_single_event_burns_whole_footprint() {
    init_logging();
    let source = SyntheticSource::new(date(2022, 6, 15));
    let mask = ObstacleMask::clear(study_grid());
    let events = vec![event("e1", date(2022, 6, 15), 4, 8, 8, 8)];

    let merged = run(&source, &mask, &events, &config());

    assert_eq!(merged.grid.shape(), (8, 8));
    assert_eq!(merged.grid.epsg, 32718);
    assert_eq!(merged.grid.transform.top_left_x, ORIGIN_X + 40.0);
    assert_eq!(merged.grid.transform.top_left_y, ORIGIN_Y - 80.0);
    assert!(merged.burn_binary.iter().all(|&b| b == 1));
    assert!(merged.burn_date.iter().all(|&d| d == 19158));
}

#[test]
fn test_obstacles_remove_half_the_footprint() {
    init_logging();
    let source = SyntheticSource::new(date(2022, 6, 15));
    let grid = study_grid();
    let obstacles = Array2::from_shape_fn(grid.shape(), |(_, c)| if c >= 8 { 1.0 } else { 0.0 });
    let mask = ObstacleMask::new(grid, obstacles).unwrap();
    let events = vec![event("e1", date(2022, 6, 15), 4, 8, 8, 8)];

    let merged = run(&source, &mask, &events, &config());

    assert_eq!(merged.grid.shape(), (8, 8));
    for ((_, c), &b) in merged.burn_binary.indexed_iter() {
        let expected = if c < 4 { 1 } else { 0 };
        assert_eq!(b, expected);
    }
    for ((_, c), &d) in merged.burn_date.indexed_iter() {
        let expected = if c < 4 { 19158 } else { NODATA_I16 };
        assert_eq!(d, expected);
    }
}

#[test]
fn test_overlapping_events_burned_wins_in_any_order() {
    init_logging();
    let source = SyntheticSource::new(date(2022, 6, 15));
    let mask = ObstacleMask::clear(study_grid());
    let early = event("a", date(2022, 3, 1), 0, 8, 8, 8);
    let late = event("b", date(2022, 6, 15), 4, 8, 8, 8);

    let ab = run_full(&source, &mask, &[early.clone(), late.clone()], &config());
    let ba = run_full(&source, &mask, &[late, early], &config());

    assert_eq!(ab.burn_binary, ba.burn_binary);
    assert_eq!(ab.burn_date, ba.burn_date);

    // Event a alone: imaged unchanged, unburned
    assert_eq!(ab.burn_binary[[10, 1]], 0);
    assert_eq!(ab.burn_date[[10, 1]], NODATA_I16);
    // Shared pixels take event b
    assert_eq!(ab.burn_binary[[10, 5]], 1);
    assert_eq!(ab.burn_date[[10, 5]], 19158);
    // Event b alone
    assert_eq!(ab.burn_binary[[10, 10]], 1);
}

#[test]
fn test_uncovered_pixels_stay_nodata() {
    init_logging();
    let source = SyntheticSource::new(date(2022, 6, 15));
    let mask = ObstacleMask::clear(study_grid());
    let events = vec![
        event("a", date(2022, 3, 1), 0, 0, 3, 3),
        event("b", date(2022, 6, 15), 12, 12, 4, 4),
    ];
    let merged = run_full(&source, &mask, &events, &config());

    for ((r, c), &b) in merged.burn_binary.indexed_iter() {
        let in_a = r < 3 && c < 3;
        let in_b = (12..16).contains(&r) && (12..16).contains(&c);
        if !in_a && !in_b {
            assert_eq!(b, NODATA_I16, "pixel ({}, {}) should be uncovered", r, c);
            assert_eq!(merged.burn_date[[r, c]], NODATA_I16);
        } else {
            assert_ne!(b, NODATA_I16);
        }
    }
}

#[test]
fn test_empty_pre_window_is_not_burned() {
    init_logging();
    let mut source = SyntheticSource::new(date(2022, 6, 15));
    source.scenes.retain(|d| *d >= date(2022, 6, 15));
    let mask = ObstacleMask::clear(study_grid());
    let events = vec![event("e1", date(2022, 6, 15), 4, 8, 8, 8)];

    let merged = run(&source, &mask, &events, &config());

    assert_eq!(merged.covered_pixels(), 64);
    assert!(merged.burn_binary.iter().all(|&b| b == 0));
    assert!(merged.burn_date.iter().all(|&d| d == NODATA_I16));
}

#[test]
fn test_clouded_pre_pixels_are_not_burned() {
    init_logging();
    let mut source = SyntheticSource::new(date(2022, 6, 15));
    source.cloudy_pre_west_of = Some(ORIGIN_X + 80.0);
    let mask = ObstacleMask::clear(study_grid());
    let events = vec![event("e1", date(2022, 6, 15), 4, 8, 8, 8)];

    let merged = run_full(&source, &mask, &events, &config());

    for c in 4..12 {
        let expected = if c < 8 { 0 } else { 1 };
        assert_eq!(merged.burn_binary[[9, c]], expected, "column {}", c);
    }
}

#[test]
fn test_rerun_is_bit_identical() {
    init_logging();
    let source = SyntheticSource::new(date(2022, 6, 15));
    let mask = ObstacleMask::clear(study_grid());
    let events = vec![
        event("a", date(2022, 3, 1), 0, 8, 8, 8),
        event("b", date(2022, 6, 15), 4, 8, 8, 8),
        event("c", date(2022, 6, 20), 6, 4, 6, 6),
    ];
    let first = run(&source, &mask, &events, &config());
    let second = run(&source, &mask, &events, &config());
    assert_eq!(first.grid, second.grid);
    assert_eq!(first.burn_binary, second.burn_binary);
    assert_eq!(first.burn_date, second.burn_date);
}

#[test]
fn test_tied_events_differ_only_in_date() {
    init_logging();
    let source = SyntheticSource::new(date(2022, 6, 15));
    let mask = ObstacleMask::clear(study_grid());
    let b = event("b", date(2022, 6, 15), 4, 8, 8, 8);
    let c = event("c", date(2022, 6, 20), 8, 8, 8, 8);

    let bc = run_full(&source, &mask, &[b.clone(), c.clone()], &config());
    let cb = run_full(&source, &mask, &[c.clone(), b.clone()], &config());

    assert_eq!(bc.burn_binary, cb.burn_binary);
    let shared = [10usize, 9];
    assert_eq!(bc.burn_binary[shared], 1);
    assert_eq!(bc.burn_date[shared], days_since_epoch(date(2022, 6, 20)) as i16);
    assert_eq!(cb.burn_date[shared], 19158);
    // Outside the overlap the order does not matter
    assert_eq!(bc.burn_date[[10, 5]], cb.burn_date[[10, 5]]);
    assert_eq!(bc.burn_date[[10, 14]], cb.burn_date[[10, 14]]);

    // Sorting by event id makes the order irrelevant
    let by_id = ProcessingConfig {
        tie_break: TieBreak::EventId,
        ..config()
    };
    let bc = run_full(&source, &mask, &[b.clone(), c.clone()], &by_id);
    let cb = run_full(&source, &mask, &[c, b], &by_id);
    assert_eq!(bc.burn_date, cb.burn_date);
    assert_eq!(bc.burn_date[shared], days_since_epoch(date(2022, 6, 20)) as i16);
}

#[test]
fn test_failed_event_is_skipped() {
    init_logging();
    let mut source = SyntheticSource::new(date(2022, 6, 15));
    source.fail_east_of = Some(ORIGIN_X + 150.0);
    let mask = ObstacleMask::clear(study_grid());
    let mut events = vec![
        event("west", date(2022, 6, 15), 0, 0, 4, 4),
        event("east", date(2022, 6, 15), 14, 0, 4, 4),
        event("low", date(2022, 6, 15), 0, 10, 4, 4),
    ];
    events[2].confidence = 30.0;

    let config = config();
    let pipeline = BurnPipeline::new(&config, &source, &mask).unwrap();
    let output = pipeline.run(&events).unwrap();

    let summary = &output.summary;
    assert_eq!(summary.below_confidence, 1);
    assert_eq!(summary.attempted, 2);
    assert_eq!(summary.merged, 1);
    assert_eq!(summary.skipped.len(), 1);
    assert_eq!(summary.skipped[0].event_id, "east");
    assert_eq!(summary.skipped[0].kind, "source_unavailable");

    let merged = output.mosaic.unwrap();
    assert_eq!(merged.grid.shape(), (4, 4));
    assert_eq!(merged.burned_pixels(), 16);
}

#[test]
fn test_missing_band_is_reported_per_event() {
    init_logging();
    let mut source = SyntheticSource::new(date(2022, 6, 15));
    source.omit_swir = true;
    let mask = ObstacleMask::clear(study_grid());
    let config = config();
    let pipeline = BurnPipeline::new(&config, &source, &mask).unwrap();
    let output = pipeline
        .run(&[event("e1", date(2022, 6, 15), 4, 8, 8, 8)])
        .unwrap();

    assert!(output.mosaic.is_none());
    assert_eq!(output.summary.skipped_by_kind().get("missing_band"), Some(&1));
}

/// Fails transiently a fixed number of times, then delegates
struct FlakySource {
    inner: SyntheticSource,
    failures_left: AtomicUsize,
}

impl ImagerySource for FlakySource {
    fn observations(&self, grid: &GridSpec, window: &DateWindow) -> BurnResult<Vec<Observation>> {
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(BurnError::SourceUnavailable {
                provider: "flaky".to_string(),
                reason: "HTTP 503 Service Unavailable".to_string(),
                transient: true,
            });
        }
        self.inner.observations(grid, window)
    }

    fn name(&self) -> &str {
        "flaky"
    }
}

#[test]
fn test_transient_source_errors_are_retried() {
    init_logging();
    let config = config();
    let mask = ObstacleMask::clear(study_grid());
    let events = vec![event("e1", date(2022, 6, 15), 4, 8, 8, 8)];

    let recovering = RetryingSource::new(
        FlakySource {
            inner: SyntheticSource::new(date(2022, 6, 15)),
            failures_left: AtomicUsize::new(2),
        },
        config.retry.clone(),
    );
    let merged = run(&recovering, &mask, &events, &config);
    assert_eq!(merged.burned_pixels(), 64);

    let exhausted = RetryingSource::new(
        FlakySource {
            inner: SyntheticSource::new(date(2022, 6, 15)),
            failures_left: AtomicUsize::new(10),
        },
        config.retry.clone(),
    );
    let pipeline = BurnPipeline::new(&config, &exhausted, &mask).unwrap();
    let output = pipeline.run(&events).unwrap();
    assert!(output.mosaic.is_none());
    assert_eq!(output.summary.skipped[0].kind, "source_unavailable");
}

#[test]
fn test_cancelled_run_starts_no_batch() {
    init_logging();
    let source = SyntheticSource::new(date(2022, 6, 15));
    let mask = ObstacleMask::clear(study_grid());
    let config = config();
    let cancellation = Cancellation::new();
    cancellation.cancel();

    let pipeline = BurnPipeline::new(&config, &source, &mask)
        .unwrap()
        .with_cancellation(cancellation);
    let output = pipeline
        .run(&[event("e1", date(2022, 6, 15), 4, 8, 8, 8)])
        .unwrap();

    assert!(output.summary.cancelled);
    assert_eq!(output.summary.attempted, 0);
    assert!(output.mosaic.is_none());
}

#[test]
fn test_resampled_to_coarser_grid() {
    init_logging();
    let source = SyntheticSource::new(date(2022, 6, 15));
    let mask = ObstacleMask::clear(study_grid());
    let events = vec![event("e1", date(2022, 6, 15), 4, 8, 8, 8)];
    let config = ProcessingConfig {
        target_pixel_size: 20.0,
        ..config()
    };

    let merged = run(&source, &mask, &events, &config);
    assert_eq!(merged.grid.shape(), (4, 4));
    assert_eq!(merged.grid.pixel_size(), 20.0);
    assert!(merged.burn_binary.iter().all(|&b| b == 1));
}
