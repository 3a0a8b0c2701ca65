use chrono::{Duration, NaiveDate};
use ndarray::Array2;
use num_traits::Float;

use crate::config::WindowParams;
use crate::types::{BurnError, BurnResult, GridSpec, Observation, RasterImage};

/// Closed calendar interval `[start, end]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> BurnResult<Self> {
        if end < start {
            return Err(BurnError::Processing(format!(
                "Date window ends ({}) before it starts ({})",
                end, start
            )));
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    /// `[acq - pre_days, acq - buffer_days]`
    pub fn pre_fire(acquisition: NaiveDate, params: &WindowParams) -> Self {
        Self {
            start: acquisition - Duration::days(i64::from(params.pre_days)),
            end: acquisition - Duration::days(i64::from(params.buffer_days)),
        }
    }

    /// `[acq + buffer_days, acq + post_days]`
    pub fn post_fire(acquisition: NaiveDate, params: &WindowParams) -> Self {
        Self {
            start: acquisition + Duration::days(i64::from(params.buffer_days)),
            end: acquisition + Duration::days(i64::from(params.post_days)),
        }
    }
}

impl std::fmt::Display for DateWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{} .. {}]", self.start, self.end)
    }
}

/// Median of the finite values; `None` if there are none.
/// Even counts average the two central values.
pub fn nan_median<T: Float>(values: &mut Vec<T>) -> Option<T> {
    values.retain(|v| v.is_finite());
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = values.len();
    let mid = n / 2;
    if n % 2 == 1 {
        Some(values[mid])
    } else {
        let two = T::one() + T::one();
        Some((values[mid - 1] + values[mid]) / two)
    }
}

/// Per-pixel median compositor over a date window
pub struct TemporalCompositor {
    bands: Vec<String>,
}

impl TemporalCompositor {
    pub fn new(bands: Vec<String>) -> Self {
        Self { bands }
    }

    /// Median composite of the observations dated inside `window`.
    /// No-data values are skipped; a pixel without any valid value stays `NaN`.
    pub fn composite(
        &self,
        observations: &[Observation],
        window: &DateWindow,
        grid: &GridSpec,
    ) -> BurnResult<RasterImage> {
        let selected: Vec<&Observation> = observations
            .iter()
            .filter(|obs| window.contains(obs.date))
            .collect();

        log::debug!(
            "Compositing {} of {} observations in {}",
            selected.len(),
            observations.len(),
            window
        );

        for obs in &selected {
            if obs.image.grid().shape() != grid.shape() {
                return Err(BurnError::Processing(format!(
                    "Scene {} has grid {:?}, composite grid is {:?}",
                    obs.scene_id,
                    obs.image.grid().shape(),
                    grid.shape()
                )));
            }
        }

        let mut output = RasterImage::new(grid.clone());
        let (rows, cols) = grid.shape();

        for band_name in &self.bands {
            let stack = selected
                .iter()
                .map(|obs| obs.image.require_band(band_name, &obs.scene_id))
                .collect::<BurnResult<Vec<_>>>()?;

            let mut composite = Array2::from_elem((rows, cols), f32::NAN);
            let mut samples = Vec::with_capacity(stack.len());
            for ((row, col), out) in composite.indexed_iter_mut() {
                samples.clear();
                samples.extend(stack.iter().map(|band| band[[row, col]]));
                if let Some(median) = nan_median(&mut samples) {
                    *out = median;
                }
            }
            output.insert_band(band_name, composite)?;
        }

        Ok(output)
    }
}
