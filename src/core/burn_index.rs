//! Normalized Burn Ratio differencing
//!
//! `NBR = (NIR - SWIR) / (NIR + SWIR)` is computed for the pre- and post-fire
//! composites, and `dNBR = NBR_pre - NBR_post`. Where either index is
//! missing the difference takes [`DNBR_FILL`], so thresholding never produces
//! a hole purely from missing imagery.

use ndarray::{Array2, Zip};

use crate::config::BandNames;
use crate::types::{BandImage, BurnError, BurnResult, RasterImage};

/// Value substituted for dNBR where either composite has no index
pub const DNBR_FILL: f32 = 0.0;

/// Normalized difference of two bands; `NaN` where either input is `NaN`
/// or the denominator is zero.
pub fn normalized_difference(a: &BandImage, b: &BandImage) -> BurnResult<BandImage> {
    if a.dim() != b.dim() {
        return Err(BurnError::Processing(format!(
            "Band shapes differ: {:?} vs {:?}",
            a.dim(),
            b.dim()
        )));
    }
    Ok(Zip::from(a).and(b).map_collect(|&a, &b| {
        let sum = a + b;
        if !a.is_finite() || !b.is_finite() || sum.abs() < 1e-10 {
            f32::NAN
        } else {
            (a - b) / sum
        }
    }))
}

/// dNBR change detector with a fixed threshold
pub struct BurnIndexDifferencer {
    nir: String,
    swir: String,
    threshold: f32,
}

impl BurnIndexDifferencer {
    pub fn new(bands: &BandNames, threshold: f32) -> Self {
        Self {
            nir: bands.nir.clone(),
            swir: bands.swir.clone(),
            threshold,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// NBR of one composite
    pub fn nbr(&self, composite: &RasterImage) -> BurnResult<BandImage> {
        let nir = composite.require_band(&self.nir, "composite")?;
        let swir = composite.require_band(&self.swir, "composite")?;
        normalized_difference(nir, swir)
    }

    /// dNBR with missing indices replaced by [`DNBR_FILL`]
    pub fn delta_nbr(&self, pre: &RasterImage, post: &RasterImage) -> BurnResult<BandImage> {
        let nbr_pre = self.nbr(pre)?;
        let nbr_post = self.nbr(post)?;
        if nbr_pre.dim() != nbr_post.dim() {
            return Err(BurnError::Processing(format!(
                "Pre/post composites differ in shape: {:?} vs {:?}",
                nbr_pre.dim(),
                nbr_post.dim()
            )));
        }
        Ok(Zip::from(&nbr_pre).and(&nbr_post).map_collect(|&pre, &post| {
            if pre.is_finite() && post.is_finite() {
                pre - post
            } else {
                DNBR_FILL
            }
        }))
    }

    /// Burn candidate: `dNBR >= threshold` (inclusive)
    pub fn classify(&self, delta_nbr: &BandImage) -> Array2<bool> {
        let threshold = self.threshold;
        delta_nbr.mapv(|d| d >= threshold)
    }

    /// Composites to burn candidate in one step
    pub fn burn_candidate(&self, pre: &RasterImage, post: &RasterImage) -> BurnResult<Array2<bool>> {
        let delta = self.delta_nbr(pre, post)?;
        let candidate = self.classify(&delta);
        log::debug!(
            "dNBR >= {}: {} of {} pixels",
            self.threshold,
            candidate.iter().filter(|&&c| c).count(),
            candidate.len()
        );
        Ok(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GeoTransform, GridSpec};
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn composite(nir: Array2<f32>, swir: Array2<f32>) -> RasterImage {
        let (rows, cols) = nir.dim();
        let grid = GridSpec::new(rows, cols, GeoTransform::north_up(0.0, 0.0, 10.0), 32718);
        RasterImage::new(grid)
            .with_band("B8", nir)
            .unwrap()
            .with_band("B12", swir)
            .unwrap()
    }

    fn differencer() -> BurnIndexDifferencer {
        BurnIndexDifferencer::new(&BandNames::default(), 0.27)
    }

    #[test]
    fn test_nbr_values() {
        let image = composite(array![[0.3, 0.0]], array![[0.1, 0.0]]);
        let nbr = differencer().nbr(&image).unwrap();
        assert_abs_diff_eq!(nbr[[0, 0]], 0.5, epsilon = 1e-6);
        assert!(nbr[[0, 1]].is_nan());
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let d = differencer();
        let delta = array![[0.27f32, 0.269999, 0.4, -0.1]];
        let c = d.classify(&delta);
        assert_eq!(c, array![[true, false, true, false]]);
    }

    #[test]
    fn test_missing_index_degrades_to_zero() {
        let d = differencer();
        let pre = composite(array![[f32::NAN, 0.3]], array![[f32::NAN, 0.1]]);
        let post = composite(array![[0.22, f32::NAN]], array![[0.18, 0.1]]);
        let delta = d.delta_nbr(&pre, &post).unwrap();
        assert_eq!(delta[[0, 0]], 0.0);
        assert_eq!(delta[[0, 1]], 0.0);
        assert!(delta.iter().all(|v| v.is_finite()));
        assert!(d.classify(&delta).iter().all(|&c| !c));
    }

    #[test]
    fn test_burn_scenario() {
        let d = differencer();
        let pre = composite(Array2::from_elem((2, 2), 0.3), Array2::from_elem((2, 2), 0.1));
        let post = composite(Array2::from_elem((2, 2), 0.22), Array2::from_elem((2, 2), 0.18));
        let delta = d.delta_nbr(&pre, &post).unwrap();
        assert_abs_diff_eq!(delta[[1, 1]], 0.4, epsilon = 1e-5);
        assert!(d.burn_candidate(&pre, &post).unwrap().iter().all(|&c| c));
    }
}
