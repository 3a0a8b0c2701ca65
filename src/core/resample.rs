use gdal::spatial_ref::{CoordTransform, SpatialRef};
use ndarray::Array2;

use crate::types::{BurnError, BurnResult, GeoTransform, GridSpec, MergedRaster, NODATA_I16};

/// Points sampled along each edge when projecting a grid outline
const EDGE_SAMPLES: usize = 21;

/// Parse `EPSG:<code>` (or a bare code) into the numeric code
pub fn parse_epsg(identifier: &str) -> BurnResult<u32> {
    let trimmed = identifier.trim();
    let code = match trimmed.split_once(':') {
        Some((authority, code)) if authority.eq_ignore_ascii_case("EPSG") => code,
        Some(_) => {
            return Err(BurnError::Reprojection(format!(
                "unsupported CRS authority in '{}'",
                identifier
            )))
        }
        None => trimmed,
    };
    code.trim()
        .parse::<u32>()
        .map_err(|_| BurnError::Reprojection(format!("'{}' is not an EPSG identifier", identifier)))
}

/// Spatial reference with x/y (easting/northing, lon/lat) axis order
pub fn spatial_ref(epsg: u32) -> BurnResult<SpatialRef> {
    let srs = SpatialRef::from_epsg(epsg)
        .map_err(|e| BurnError::Reprojection(format!("EPSG:{} is not recognized: {}", epsg, e)))?;
    srs.set_axis_mapping_strategy(gdal_sys::OSRAxisMappingStrategy::OAMS_TRADITIONAL_GIS_ORDER);
    Ok(srs)
}

/// Batch coordinate transformation between two EPSG codes
pub struct CrsTransformer {
    transform: Option<CoordTransform>,
}

impl CrsTransformer {
    pub fn new(source_epsg: u32, target_epsg: u32) -> BurnResult<Self> {
        if source_epsg == target_epsg {
            return Ok(Self { transform: None });
        }
        let source = spatial_ref(source_epsg)?;
        let target = spatial_ref(target_epsg)?;
        let transform = CoordTransform::new(&source, &target).map_err(|e| {
            BurnError::Reprojection(format!(
                "no transformation EPSG:{} -> EPSG:{}: {}",
                source_epsg, target_epsg, e
            ))
        })?;
        Ok(Self { transform: Some(transform) })
    }

    /// Transform in place
    pub fn transform(&self, xs: &mut [f64], ys: &mut [f64]) -> BurnResult<()> {
        let Some(transform) = &self.transform else {
            return Ok(());
        };
        let mut zs = vec![0.0; xs.len()];
        transform
            .transform_coords(xs, ys, &mut zs)
            .map_err(|e| BurnError::Reprojection(format!("coordinate transformation failed: {}", e)))
    }

    /// Transform in place. Points outside the valid domain of the
    /// transformation become NaN instead of failing the whole batch.
    /// Returns the number of such points.
    pub fn transform_or_nan(&self, xs: &mut [f64], ys: &mut [f64]) -> usize {
        if self.transform.is_none() {
            return 0;
        }
        let (source_xs, source_ys) = (xs.to_vec(), ys.to_vec());
        if self.transform(xs, ys).is_ok() {
            let mut failed = 0;
            for (x, y) in xs.iter_mut().zip(ys.iter_mut()) {
                if !(x.is_finite() && y.is_finite()) {
                    *x = f64::NAN;
                    *y = f64::NAN;
                    failed += 1;
                }
            }
            return failed;
        }
        retransform_each(&source_xs, &source_ys, xs, ys, |x, y| self.transform_point(x, y))
    }

    pub fn transform_point(&self, x: f64, y: f64) -> BurnResult<(f64, f64)> {
        let mut xs = [x];
        let mut ys = [y];
        self.transform(&mut xs, &mut ys)?;
        Ok((xs[0], ys[0]))
    }
}

/// Point-by-point fallback after a failed batch transform
fn retransform_each<F>(source_xs: &[f64], source_ys: &[f64], xs: &mut [f64], ys: &mut [f64], point: F) -> usize
where
    F: Fn(f64, f64) -> BurnResult<(f64, f64)>,
{
    let mut failed = 0;
    for i in 0..xs.len() {
        match point(source_xs[i], source_ys[i]) {
            Ok((x, y)) if x.is_finite() && y.is_finite() => {
                xs[i] = x;
                ys[i] = y;
            }
            _ => {
                xs[i] = f64::NAN;
                ys[i] = f64::NAN;
                failed += 1;
            }
        }
    }
    failed
}

/// Nearest-neighbour resampler onto a target CRS and pixel size
pub struct GridResampler {
    target_epsg: u32,
    pixel_size: f64,
}

impl GridResampler {
    /// Validates the target CRS up front
    pub fn new(target_crs: &str, pixel_size: f64) -> BurnResult<Self> {
        let target_epsg = parse_epsg(target_crs)?;
        spatial_ref(target_epsg)?;
        if !(pixel_size > 0.0) || !pixel_size.is_finite() {
            return Err(BurnError::InvalidConfig(format!(
                "target pixel size must be positive, got {}",
                pixel_size
            )));
        }
        log::debug!("Resampler target: EPSG:{} at {} units", target_epsg, pixel_size);
        Ok(Self { target_epsg, pixel_size })
    }

    pub fn target_epsg(&self) -> u32 {
        self.target_epsg
    }

    fn snap_down(&self, v: f64) -> f64 {
        (v / self.pixel_size + 1e-6).floor() * self.pixel_size
    }

    fn snap_up(&self, v: f64) -> f64 {
        (v / self.pixel_size - 1e-6).ceil() * self.pixel_size
    }

    /// Target grid covering the projected outline of `source`
    pub fn target_grid(&self, source: &GridSpec, forward: &CrsTransformer) -> BurnResult<GridSpec> {
        let b = source.bounds();
        let mut xs = Vec::with_capacity(EDGE_SAMPLES * 4);
        let mut ys = Vec::with_capacity(EDGE_SAMPLES * 4);
        for i in 0..EDGE_SAMPLES {
            let f = i as f64 / (EDGE_SAMPLES - 1) as f64;
            let x = b.min_x + f * b.width();
            let y = b.min_y + f * b.height();
            xs.extend_from_slice(&[x, x, b.min_x, b.max_x]);
            ys.extend_from_slice(&[b.min_y, b.max_y, y, y]);
        }
        let failed = forward.transform_or_nan(&mut xs, &mut ys);
        if failed > 0 {
            log::warn!("{} outline points could not be projected to EPSG:{}", failed, self.target_epsg);
        }

        // f64::min/max skip NaN; an all-NaN outline stays infinite
        let min_x = self.snap_down(xs.iter().cloned().fold(f64::INFINITY, f64::min));
        let max_x = self.snap_up(xs.iter().cloned().fold(f64::NEG_INFINITY, f64::max));
        let min_y = self.snap_down(ys.iter().cloned().fold(f64::INFINITY, f64::min));
        let max_y = self.snap_up(ys.iter().cloned().fold(f64::NEG_INFINITY, f64::max));
        if !(min_x.is_finite() && max_x.is_finite() && min_y.is_finite() && max_y.is_finite()) {
            return Err(BurnError::Reprojection(
                "projected extent is not finite".to_string(),
            ));
        }

        let cols = (((max_x - min_x) / self.pixel_size).round() as usize).max(1);
        let rows = (((max_y - min_y) / self.pixel_size).round() as usize).max(1);
        Ok(GridSpec::new(
            rows,
            cols,
            GeoTransform::north_up(min_x, max_y, self.pixel_size),
            self.target_epsg,
        ))
    }

    /// Resample both bands; categorical values are copied, never interpolated
    pub fn resample(&self, merged: &MergedRaster) -> BurnResult<MergedRaster> {
        let source = &merged.grid;
        log::info!(
            "Resampling {}x{} EPSG:{} -> EPSG:{} @ {}",
            source.rows,
            source.cols,
            source.epsg,
            self.target_epsg,
            self.pixel_size
        );

        let forward = CrsTransformer::new(source.epsg, self.target_epsg)?;
        let inverse = CrsTransformer::new(self.target_epsg, source.epsg)?;
        let target = self.target_grid(source, &forward)?;

        let mut burn_binary = Array2::from_elem(target.shape(), NODATA_I16);
        let mut burn_date = Array2::from_elem(target.shape(), NODATA_I16);
        let mut xs = vec![0.0; target.cols];
        let mut ys = vec![0.0; target.cols];
        let mut unprojectable = 0usize;

        for row in 0..target.rows {
            for col in 0..target.cols {
                let (x, y) = target.transform.pixel_center(row, col);
                xs[col] = x;
                ys[col] = y;
            }
            unprojectable += inverse.transform_or_nan(&mut xs, &mut ys);
            // Unprojectable centres are NaN and stay no data
            for col in 0..target.cols {
                if let Some((sr, sc)) = source.pixel_of(xs[col], ys[col]) {
                    burn_binary[[row, col]] = merged.burn_binary[[sr, sc]];
                    burn_date[[row, col]] = merged.burn_date[[sr, sc]];
                }
            }
        }

        if unprojectable > 0 {
            log::warn!(
                "{} target pixels fall outside EPSG:{} -> EPSG:{} and are left as no data",
                unprojectable,
                self.target_epsg,
                source.epsg
            );
        }
        log::info!("Resampled grid: {}x{} pixels", target.rows, target.cols);
        Ok(MergedRaster {
            grid: target,
            burn_binary,
            burn_date,
        })
    }
}
