use chrono::NaiveDate;
use geo::{Area, Contains, Point};
use ndarray::{Array2, Zip};

use crate::types::{
    BurnError, BurnResult, CandidateRaster, EventGeometry, FireEvent, GridSpec, GridWindow, NODATA_I16,
};

/// Epoch of the `burn_date` band
pub fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default()
}

/// Whole days from 1970-01-01 to `date`
pub fn days_since_epoch(date: NaiveDate) -> i64 {
    (date - epoch()).num_days()
}

/// Inverse of [`days_since_epoch`]
pub fn date_from_days(days: i64) -> Option<NaiveDate> {
    epoch().checked_add_signed(chrono::Duration::days(days))
}

/// Stamps per-event detections with their date and clips them to the footprint
pub struct EventRasterizer<'a> {
    study_grid: &'a GridSpec,
}

impl<'a> EventRasterizer<'a> {
    pub fn new(study_grid: &'a GridSpec) -> Self {
        Self { study_grid }
    }

    fn validate_geometry(event: &FireEvent) -> BurnResult<()> {
        match &event.geometry {
            EventGeometry::Point(p) => {
                if !p.x().is_finite() || !p.y().is_finite() {
                    return Err(BurnError::InvalidGeometry(format!(
                        "event {} has a non-finite point",
                        event.id
                    )));
                }
            }
            EventGeometry::Polygon(poly) => {
                let ring = poly.exterior();
                if ring.0.len() < 4 {
                    return Err(BurnError::InvalidGeometry(format!(
                        "event {} polygon has {} vertices",
                        event.id,
                        ring.0.len()
                    )));
                }
                if ring.0.iter().any(|c| !c.x.is_finite() || !c.y.is_finite()) {
                    return Err(BurnError::InvalidGeometry(format!(
                        "event {} polygon has non-finite coordinates",
                        event.id
                    )));
                }
                if !(poly.unsigned_area() > 0.0) {
                    return Err(BurnError::InvalidGeometry(format!(
                        "event {} polygon has zero area",
                        event.id
                    )));
                }
            }
        }
        Ok(())
    }

    /// Window of the study grid covering the event footprint
    pub fn window_for(&self, event: &FireEvent) -> BurnResult<GridWindow> {
        Self::validate_geometry(event)?;
        let bbox = event.geometry.bounding_box().ok_or_else(|| {
            BurnError::InvalidGeometry(format!("event {} has an empty geometry", event.id))
        })?;
        self.study_grid.window_for(&bbox).ok_or_else(|| {
            BurnError::InvalidGeometry(format!(
                "event {} footprint lies outside the study grid",
                event.id
            ))
        })
    }

    /// Pixels of `window` inside the footprint (pixel centre test;
    /// a point footprint selects the pixel that contains it)
    pub fn footprint(&self, event: &FireEvent, window: &GridWindow) -> BurnResult<Array2<bool>> {
        let t = &self.study_grid.transform;
        let mask = match &event.geometry {
            EventGeometry::Point(p) => {
                let hit = self.study_grid.pixel_of(p.x(), p.y());
                Array2::from_shape_fn(window.shape(), |(r, c)| {
                    hit == Some((window.row_offset + r, window.col_offset + c))
                })
            }
            EventGeometry::Polygon(poly) => Array2::from_shape_fn(window.shape(), |(r, c)| {
                let (x, y) = t.pixel_center(window.row_offset + r, window.col_offset + c);
                poly.contains(&Point::new(x, y))
            }),
        };

        if !mask.iter().any(|&inside| inside) {
            return Err(BurnError::InvalidGeometry(format!(
                "event {} footprint covers no pixel centre",
                event.id
            )));
        }
        Ok(mask)
    }

    /// Build the two-band candidate from the obstacle-filtered detection
    pub fn rasterize(
        &self,
        event: &FireEvent,
        window: GridWindow,
        burned: &Array2<bool>,
    ) -> BurnResult<CandidateRaster> {
        if burned.dim() != window.shape() {
            return Err(BurnError::Processing(format!(
                "Detection shape {:?} does not match window {:?}",
                burned.dim(),
                window.shape()
            )));
        }

        let days = days_since_epoch(event.acquisition_date);
        let days = i16::try_from(days).map_err(|_| {
            BurnError::Processing(format!(
                "event {} date {} does not fit the 16-bit date band",
                event.id, event.acquisition_date
            ))
        })?;

        let footprint = self.footprint(event, &window)?;

        let burn_binary = Zip::from(burned).and(&footprint).map_collect(|&b, &inside| {
            if !inside {
                NODATA_I16
            } else if b {
                1
            } else {
                0
            }
        });
        let burn_date = burn_binary.mapv(|b| if b == 1 { days } else { NODATA_I16 });

        let candidate = CandidateRaster {
            event_id: event.id.clone(),
            window,
            burn_binary,
            burn_date,
        };
        log::debug!(
            "Event {}: {} burned of {} footprint pixels",
            event.id,
            candidate.burned_pixels(),
            candidate.covered_pixels()
        );
        Ok(candidate)
    }
}
