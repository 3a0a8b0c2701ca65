//! Per-pixel quality mosaic over per-event candidate rasters
//!
//! Candidates are folded one at a time into a study-grid accumulator, so
//! memory stays proportional to the grid rather than to the number of
//! events. For every covered pixel the candidate with the highest
//! `burn_binary` wins and brings its `burn_date` along. Equal quality goes
//! to the candidate folded last, so the fold sequence must be fixed before
//! folding (see [`crate::config::TieBreak`]).

use ndarray::{s, Array2, Zip};

use crate::types::{BurnError, BurnResult, CandidateRaster, GridSpec, GridWindow, MergedRaster, NODATA_I16};

/// Streaming quality-mosaic accumulator
#[derive(Debug, Clone)]
pub struct MosaicAccumulator {
    grid: GridSpec,
    burn_binary: Array2<i16>,
    burn_date: Array2<i16>,
    folded: usize,
}

impl MosaicAccumulator {
    pub fn new(grid: GridSpec) -> Self {
        let shape = grid.shape();
        Self {
            grid,
            burn_binary: Array2::from_elem(shape, NODATA_I16),
            burn_date: Array2::from_elem(shape, NODATA_I16),
            folded: 0,
        }
    }

    pub fn grid(&self) -> &GridSpec {
        &self.grid
    }

    /// Number of candidates folded so far
    pub fn folded(&self) -> usize {
        self.folded
    }

    /// Fold one candidate. A covered candidate pixel replaces the current
    /// value when its quality is greater or equal.
    pub fn fold(&mut self, candidate: &CandidateRaster) -> BurnResult<()> {
        let w = &candidate.window;
        if w.row_end() > self.grid.rows || w.col_end() > self.grid.cols {
            return Err(BurnError::Processing(format!(
                "Candidate {} window {:?} exceeds mosaic grid {:?}",
                candidate.event_id,
                w,
                self.grid.shape()
            )));
        }
        if candidate.burn_binary.dim() != w.shape() || candidate.burn_date.dim() != w.shape() {
            return Err(BurnError::Processing(format!(
                "Candidate {} bands do not match its window {:?}",
                candidate.event_id,
                w.shape()
            )));
        }

        let region = s![w.row_offset..w.row_end(), w.col_offset..w.col_end()];
        let acc_binary = self.burn_binary.slice_mut(region);
        let acc_date = self.burn_date.slice_mut(region);

        Zip::from(acc_binary)
            .and(acc_date)
            .and(&candidate.burn_binary)
            .and(&candidate.burn_date)
            .for_each(|acc_b, acc_d, &cand_b, &cand_d| {
                if cand_b == NODATA_I16 {
                    return;
                }
                if *acc_b == NODATA_I16 || cand_b >= *acc_b {
                    *acc_b = cand_b;
                    *acc_d = cand_d;
                }
            });

        self.folded += 1;
        Ok(())
    }

    /// Merge another accumulator that holds candidates sequenced after ours
    pub fn combine(mut self, later: MosaicAccumulator) -> BurnResult<Self> {
        if later.grid != self.grid {
            return Err(BurnError::Processing(
                "Cannot combine mosaics on different grids".to_string(),
            ));
        }
        let later_count = later.folded;
        let whole = CandidateRaster {
            event_id: "partial-mosaic".to_string(),
            window: GridWindow::full(self.grid.rows, self.grid.cols),
            burn_binary: later.burn_binary,
            burn_date: later.burn_date,
        };
        self.fold(&whole)?;
        self.folded = self.folded - 1 + later_count;
        Ok(self)
    }

    /// Bounding window of all covered pixels
    fn covered_window(&self) -> Option<GridWindow> {
        let mut rows = (usize::MAX, 0usize);
        let mut cols = (usize::MAX, 0usize);
        for ((r, c), &v) in self.burn_binary.indexed_iter() {
            if v != NODATA_I16 {
                rows = (rows.0.min(r), rows.1.max(r));
                cols = (cols.0.min(c), cols.1.max(c));
            }
        }
        if rows.0 == usize::MAX {
            return None;
        }
        Some(GridWindow {
            row_offset: rows.0,
            col_offset: cols.0,
            rows: rows.1 - rows.0 + 1,
            cols: cols.1 - cols.0 + 1,
        })
    }

    /// Merged raster over the full study grid
    pub fn finish_full(self) -> MergedRaster {
        MergedRaster {
            grid: self.grid,
            burn_binary: self.burn_binary,
            burn_date: self.burn_date,
        }
    }

    /// Merged raster cropped to the union of covered pixels.
    /// `None` when nothing was covered.
    pub fn finish(self) -> Option<MergedRaster> {
        let window = self.covered_window()?;
        let region = s![window.row_offset..window.row_end(), window.col_offset..window.col_end()];
        let merged = MergedRaster {
            grid: self.grid.subgrid(&window),
            burn_binary: self.burn_binary.slice(region).to_owned(),
            burn_date: self.burn_date.slice(region).to_owned(),
        };
        log::info!(
            "✅ Quality mosaic of {} candidates: {}x{} pixels, {} burned",
            self.folded,
            window.rows,
            window.cols,
            merged.burned_pixels()
        );
        Some(merged)
    }
}

/// Fold a sequence of candidates in order into a mosaic on `grid`
pub fn quality_mosaic<'a, I>(grid: &GridSpec, candidates: I) -> BurnResult<MosaicAccumulator>
where
    I: IntoIterator<Item = &'a CandidateRaster>,
{
    candidates
        .into_iter()
        .try_fold(MosaicAccumulator::new(grid.clone()), |mut acc, candidate| {
            acc.fold(candidate)?;
            Ok(acc)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GeoTransform;
    use ndarray::array;

    const N: i16 = NODATA_I16;

    fn grid() -> GridSpec {
        GridSpec::new(3, 3, GeoTransform::north_up(0.0, 30.0, 10.0), 32718)
    }

    fn candidate(id: &str, row: usize, col: usize, binary: Array2<i16>, day: i16) -> CandidateRaster {
        let (rows, cols) = binary.dim();
        let date = binary.mapv(|b| if b == 1 { day } else { N });
        CandidateRaster {
            event_id: id.to_string(),
            window: GridWindow { row_offset: row, col_offset: col, rows, cols },
            burn_binary: binary,
            burn_date: date,
        }
    }

    #[test]
    fn test_burned_beats_unburned_either_order() {
        let a = candidate("a", 0, 0, array![[0, 0], [0, 0]], 100);
        let b = candidate("b", 1, 1, array![[1, 1], [1, 1]], 200);

        for order in [vec![&a, &b], vec![&b, &a]] {
            let merged = quality_mosaic(&grid(), order).unwrap().finish_full();
            assert_eq!(merged.burn_binary[[1, 1]], 1);
            assert_eq!(merged.burn_date[[1, 1]], 200);
            assert_eq!(merged.burn_binary[[0, 0]], 0);
            assert_eq!(merged.burn_date[[0, 0]], N);
            assert_eq!(merged.burn_binary[[0, 2]], N);
        }
    }

    #[test]
    fn test_tie_goes_to_last_folded() {
        let a = candidate("a", 0, 0, array![[1]], 100);
        let b = candidate("b", 0, 0, array![[1]], 200);
        let ab = quality_mosaic(&grid(), [&a, &b]).unwrap().finish_full();
        let ba = quality_mosaic(&grid(), [&b, &a]).unwrap().finish_full();
        assert_eq!(ab.burn_date[[0, 0]], 200);
        assert_eq!(ba.burn_date[[0, 0]], 100);
        assert_eq!(ab.burn_binary[[0, 0]], ba.burn_binary[[0, 0]]);
    }

    #[test]
    fn test_finish_crops_to_coverage() {
        let a = candidate("a", 1, 1, array![[1, 0]], 5);
        let merged = quality_mosaic(&grid(), [&a]).unwrap().finish().unwrap();
        assert_eq!(merged.grid.shape(), (1, 2));
        assert_eq!(merged.grid.transform.top_left_x, 10.0);
        assert_eq!(merged.grid.transform.top_left_y, 20.0);
        assert_eq!(merged.burn_binary, array![[1, 0]]);

        assert!(MosaicAccumulator::new(grid()).finish().is_none());
    }

    #[test]
    fn test_combine_respects_sequence() {
        let a = candidate("a", 0, 0, array![[1, 1]], 100);
        let b = candidate("b", 0, 1, array![[1, 0]], 200);
        let c = candidate("c", 0, 0, array![[0, 1]], 300);

        let sequential = quality_mosaic(&grid(), [&a, &b, &c]).unwrap().finish_full();
        let left = quality_mosaic(&grid(), [&a]).unwrap();
        let right = quality_mosaic(&grid(), [&b, &c]).unwrap();
        let combined = left.combine(right).unwrap();
        assert_eq!(combined.folded(), 3);
        let combined = combined.finish_full();

        assert_eq!(sequential.burn_binary, combined.burn_binary);
        assert_eq!(sequential.burn_date, combined.burn_date);
        assert_eq!(sequential.burn_date[[0, 0]], 100);
        assert_eq!(sequential.burn_date[[0, 1]], 300);
    }

    #[test]
    fn test_window_outside_grid_rejected() {
        let a = candidate("a", 2, 2, array![[1, 1]], 1);
        let mut acc = MosaicAccumulator::new(grid());
        assert!(acc.fold(&a).is_err());
    }
}
