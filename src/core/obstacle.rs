use ndarray::{Array2, Zip};

use crate::types::{BandImage, BurnError, BurnResult, GridSpec, GridWindow};

/// Water/construction mask on the study grid. 1 = invalid ground,
/// 0 = valid, `NaN` = unknown.
#[derive(Debug, Clone)]
pub struct ObstacleMask {
    grid: GridSpec,
    data: BandImage,
}

impl ObstacleMask {
    pub fn new(grid: GridSpec, data: BandImage) -> BurnResult<Self> {
        if data.dim() != grid.shape() {
            return Err(BurnError::Processing(format!(
                "Obstacle mask shape {:?} does not match grid {:?}",
                data.dim(),
                grid.shape()
            )));
        }
        Ok(Self { grid, data })
    }

    /// Mask with no obstacles anywhere
    pub fn clear(grid: GridSpec) -> Self {
        let data = Array2::zeros(grid.shape());
        Self { grid, data }
    }

    pub fn grid(&self) -> &GridSpec {
        &self.grid
    }

    /// Obstacle flags for a window; unknown or out-of-extent pixels are not obstacles
    pub fn obstacles_in(&self, window: &GridWindow) -> Array2<bool> {
        let (rows, cols) = self.grid.shape();
        Array2::from_shape_fn(window.shape(), |(r, c)| {
            let row = window.row_offset + r;
            let col = window.col_offset + c;
            if row >= rows || col >= cols {
                return false;
            }
            self.data[[row, col]] == 1.0
        })
    }

    /// `candidate AND NOT obstacle` over a window of the study grid
    pub fn exclude(&self, candidate: &Array2<bool>, window: &GridWindow) -> BurnResult<Array2<bool>> {
        if candidate.dim() != window.shape() {
            return Err(BurnError::Processing(format!(
                "Candidate shape {:?} does not match window {:?}",
                candidate.dim(),
                window.shape()
            )));
        }
        let obstacles = self.obstacles_in(window);
        Ok(Zip::from(candidate)
            .and(&obstacles)
            .map_collect(|&burn, &obstacle| burn && !obstacle))
    }

    pub fn obstacle_fraction(&self) -> f64 {
        let total = self.data.len().max(1);
        self.data.iter().filter(|&&v| v == 1.0).count() as f64 / total as f64
    }
}

/// Union of a water raster and a construction raster: 1 where either is 1.
/// Both inputs must already be aligned to the same grid.
pub fn build_obstacle_mask(
    grid: GridSpec,
    water: &BandImage,
    construction: &BandImage,
) -> BurnResult<ObstacleMask> {
    if water.dim() != construction.dim() {
        return Err(BurnError::Processing(format!(
            "Water {:?} and construction {:?} layers are not aligned",
            water.dim(),
            construction.dim()
        )));
    }
    let data = Zip::from(water).and(construction).map_collect(|&w, &c| {
        if w == 1.0 || c == 1.0 {
            1.0
        } else {
            0.0
        }
    });
    let mask = ObstacleMask::new(grid, data)?;
    log::info!(
        "Obstacle mask built: {:.2}% invalid ground",
        mask.obstacle_fraction() * 100.0
    );
    Ok(mask)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GeoTransform;
    use ndarray::array;

    fn grid(rows: usize, cols: usize) -> GridSpec {
        GridSpec::new(rows, cols, GeoTransform::north_up(0.0, 100.0, 10.0), 32718)
    }

    #[test]
    fn test_exclusion_truth_table() {
        let mask = ObstacleMask::new(grid(1, 4), array![[0.0, 1.0, f32::NAN, 1.0]]).unwrap();
        let candidate = array![[true, true, true, false]];
        let out = mask.exclude(&candidate, &GridWindow::full(1, 4)).unwrap();
        assert_eq!(out, array![[true, false, true, false]]);
    }

    #[test]
    fn test_window_outside_mask_is_valid_ground() {
        let mask = ObstacleMask::new(grid(2, 2), Array2::from_elem((2, 2), 1.0)).unwrap();
        let window = GridWindow { row_offset: 1, col_offset: 1, rows: 2, cols: 2 };
        let out = mask.exclude(&Array2::from_elem((2, 2), true), &window).unwrap();
        assert_eq!(out, array![[false, true], [true, true]]);
    }

    #[test]
    fn test_build_from_water_and_construction() {
        let water = array![[1.0, 0.0], [0.0, 0.0]];
        let construction = array![[0.0, 1.0], [f32::NAN, 0.0]];
        let mask = build_obstacle_mask(grid(2, 2), &water, &construction).unwrap();
        let flags = mask.obstacles_in(&GridWindow::full(2, 2));
        assert_eq!(flags, array![[true, true], [false, false]]);
        assert!((mask.obstacle_fraction() - 0.5).abs() < 1e-12);
    }
}
