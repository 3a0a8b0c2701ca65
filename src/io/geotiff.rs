use gdal::raster::{Buffer, RasterCreationOption};
use gdal::{Dataset, DriverManager, Metadata};
use ndarray::Array2;
use std::path::Path;

use crate::core::obstacle::{build_obstacle_mask, ObstacleMask};
use crate::core::resample::spatial_ref;
use crate::io::scene_source::dataset_epsg;
use crate::types::{
    BandImage, BurnError, BurnResult, GeoTransform, GridSpec, IntBand, MergedRaster, BURN_BINARY_BAND,
    BURN_DATE_BAND, NODATA_I16,
};

/// Read band 1 of a GeoTIFF as `f32` with no-data mapped to `NaN`
pub fn read_single_band<P: AsRef<Path>>(path: P) -> BurnResult<(GridSpec, BandImage)> {
    log::info!("Reading raster: {}", path.as_ref().display());
    let dataset = Dataset::open(path.as_ref())?;
    let (width, height) = dataset.raster_size();
    let transform = GeoTransform::from_gdal(dataset.geo_transform()?);
    if !transform.is_north_up() {
        return Err(BurnError::InvalidFormat(format!(
            "{} is not a north-up raster",
            path.as_ref().display()
        )));
    }
    let grid = GridSpec::new(height, width, transform, dataset_epsg(&dataset)?);

    let rasterband = dataset.rasterband(1)?;
    let nodata = rasterband.no_data_value();
    let buffer = rasterband.read_as::<f32>((0, 0), (width, height), (width, height), None)?;
    let mut data = Array2::from_shape_vec((height, width), buffer.data)
        .map_err(|e| BurnError::InvalidFormat(format!("Failed to reshape raster: {}", e)))?;
    if let Some(nd) = nodata {
        data.mapv_inplace(|v| if f64::from(v) == nd { f32::NAN } else { v });
    }

    log::debug!("Raster {}x{} in EPSG:{}", height, width, grid.epsg);
    Ok((grid, data))
}

/// Obstacle mask from a single-band GeoTIFF; its grid becomes the study grid
pub fn read_obstacle_mask<P: AsRef<Path>>(path: P) -> BurnResult<ObstacleMask> {
    let (grid, data) = read_single_band(path)?;
    ObstacleMask::new(grid, data)
}

/// Obstacle mask from separate water and construction layers on one grid
pub fn read_obstacle_layers<P: AsRef<Path>, Q: AsRef<Path>>(water: P, construction: Q) -> BurnResult<ObstacleMask> {
    let (grid, water) = read_single_band(water)?;
    let (other, construction) = read_single_band(construction)?;
    if other != grid {
        return Err(BurnError::InvalidFormat(
            "water and construction layers are on different grids".to_string(),
        ));
    }
    build_obstacle_mask(grid, &water, &construction)
}

/// Write the two-band `i16` burn raster (LZW, no data -32768).
/// Rasters with more than `max_pixels` pixels are refused.
pub fn write_merged_geotiff<P: AsRef<Path>>(merged: &MergedRaster, path: P, max_pixels: f64) -> BurnResult<()> {
    let path = path.as_ref();
    let grid = &merged.grid;
    if grid.pixel_count() as f64 > max_pixels {
        return Err(BurnError::Export(format!(
            "{}x{} raster exceeds the limit of {} pixels",
            grid.rows, grid.cols, max_pixels
        )));
    }
    log::info!("Writing burn mosaic GeoTIFF: {}", path.display());

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let options = [
        RasterCreationOption { key: "COMPRESS", value: "LZW" },
        RasterCreationOption { key: "TILED", value: "YES" },
    ];
    let mut dataset = driver.create_with_band_type_with_options::<i16, _>(
        path,
        grid.cols as isize,
        grid.rows as isize,
        2,
        &options,
    )?;
    dataset.set_geo_transform(&grid.transform.to_gdal())?;
    dataset.set_spatial_ref(&spatial_ref(grid.epsg)?)?;

    for (index, (name, band)) in [(BURN_BINARY_BAND, &merged.burn_binary), (BURN_DATE_BAND, &merged.burn_date)]
        .into_iter()
        .enumerate()
    {
        let mut rasterband = dataset.rasterband(index as isize + 1)?;
        let buffer = Buffer::new((grid.cols, grid.rows), band.iter().copied().collect::<Vec<i16>>());
        rasterband.write((0, 0), (grid.cols, grid.rows), &buffer)?;
        rasterband.set_no_data_value(Some(f64::from(NODATA_I16)))?;
        rasterband.set_description(name)?;
    }

    log::info!(
        "✅ Wrote {}x{} burn mosaic ({} burned pixels)",
        grid.rows,
        grid.cols,
        merged.burned_pixels()
    );
    Ok(())
}

fn read_i16_band(dataset: &Dataset, index: isize, grid: &GridSpec) -> BurnResult<IntBand> {
    let rasterband = dataset.rasterband(index)?;
    let buffer = rasterband.read_as::<i16>((0, 0), (grid.cols, grid.rows), (grid.cols, grid.rows), None)?;
    Array2::from_shape_vec(grid.shape(), buffer.data)
        .map_err(|e| BurnError::InvalidFormat(format!("Failed to reshape band {}: {}", index, e)))
}

/// Read a burn mosaic written by [`write_merged_geotiff`]
pub fn read_merged_geotiff<P: AsRef<Path>>(path: P) -> BurnResult<MergedRaster> {
    let dataset = Dataset::open(path.as_ref())?;
    if dataset.raster_count() < 2 {
        return Err(BurnError::InvalidFormat(format!(
            "{} has {} bands, expected {} and {}",
            path.as_ref().display(),
            dataset.raster_count(),
            BURN_BINARY_BAND,
            BURN_DATE_BAND
        )));
    }
    let (width, height) = dataset.raster_size();
    let grid = GridSpec::new(
        height,
        width,
        GeoTransform::from_gdal(dataset.geo_transform()?),
        dataset_epsg(&dataset)?,
    );
    Ok(MergedRaster {
        burn_binary: read_i16_band(&dataset, 1, &grid)?,
        burn_date: read_i16_band(&dataset, 2, &grid)?,
        grid,
    })
}
