use numpy::{IntoPyArray, PyArray2, PyReadonlyArray2};
use pyo3::prelude::*;
use pyo3::types::PyDict;

use crate::config::{BandNames, ProcessingConfig};
use crate::core::{days_since_epoch, BurnIndexDifferencer, Cancellation, MosaicAccumulator};
use crate::types::{BandImage, BurnError, CandidateRaster, GeoTransform, GridSpec, GridWindow, RasterImage};

fn to_py_err(e: BurnError) -> PyErr {
    match e {
        BurnError::InvalidConfig(_) | BurnError::InvalidGeometry(_) | BurnError::InvalidFormat(_) => {
            PyErr::new::<pyo3::exceptions::PyValueError, _>(e.to_string())
        }
        _ => PyErr::new::<pyo3::exceptions::PyRuntimeError, _>(e.to_string()),
    }
}

/// Unit grid for arrays that carry no georeferencing
fn array_grid(shape: (usize, usize)) -> GridSpec {
    GridSpec::new(shape.0, shape.1, GeoTransform::north_up(0.0, shape.0 as f64, 1.0), 4326)
}

fn composite(bands: &BandNames, nir: BandImage, swir: BandImage) -> PyResult<RasterImage> {
    RasterImage::new(array_grid(nir.dim()))
        .with_band(&bands.nir, nir)
        .and_then(|image| image.with_band(&bands.swir, swir))
        .map_err(to_py_err)
}

/// dNBR from pre/post NIR and SWIR composites
#[pyfunction]
fn delta_nbr<'py>(
    py: Python<'py>,
    pre_nir: PyReadonlyArray2<f32>,
    pre_swir: PyReadonlyArray2<f32>,
    post_nir: PyReadonlyArray2<f32>,
    post_swir: PyReadonlyArray2<f32>,
) -> PyResult<&'py PyArray2<f32>> {
    let bands = BandNames::default();
    let pre = composite(&bands, pre_nir.as_array().to_owned(), pre_swir.as_array().to_owned())?;
    let post = composite(&bands, post_nir.as_array().to_owned(), post_swir.as_array().to_owned())?;
    let differencer = BurnIndexDifferencer::new(&bands, ProcessingConfig::default().burn_threshold);
    let delta = differencer.delta_nbr(&pre, &post).map_err(to_py_err)?;
    Ok(delta.into_pyarray(py))
}

/// Boolean burn candidate `dNBR >= threshold`
#[pyfunction]
#[pyo3(signature = (delta_nbr, threshold = 0.27))]
fn classify_burn<'py>(py: Python<'py>, delta_nbr: PyReadonlyArray2<f32>, threshold: f32) -> &'py PyArray2<bool> {
    let differencer = BurnIndexDifferencer::new(&BandNames::default(), threshold);
    differencer.classify(&delta_nbr.as_array().to_owned()).into_pyarray(py)
}

/// Quality mosaic of same-shape (burn_binary, burn_date) pairs, last wins on ties
#[pyfunction]
fn quality_mosaic<'py>(
    py: Python<'py>,
    binaries: Vec<PyReadonlyArray2<i16>>,
    dates: Vec<PyReadonlyArray2<i16>>,
) -> PyResult<(&'py PyArray2<i16>, &'py PyArray2<i16>)> {
    if binaries.len() != dates.len() || binaries.is_empty() {
        return Err(PyErr::new::<pyo3::exceptions::PyValueError, _>(
            "need the same non-zero number of binary and date arrays",
        ));
    }
    let shape = binaries[0].as_array().dim();
    let mut mosaic = MosaicAccumulator::new(array_grid(shape));
    for (index, (binary, date)) in binaries.iter().zip(&dates).enumerate() {
        let candidate = CandidateRaster {
            event_id: format!("array-{}", index),
            window: GridWindow::full(shape.0, shape.1),
            burn_binary: binary.as_array().to_owned(),
            burn_date: date.as_array().to_owned(),
        };
        mosaic.fold(&candidate).map_err(to_py_err)?;
    }
    let merged = mosaic.finish_full();
    Ok((merged.burn_binary.into_pyarray(py), merged.burn_date.into_pyarray(py)))
}

/// Day offset since 1970-01-01 of an ISO date
#[pyfunction]
fn date_offset(date: &str) -> PyResult<i64> {
    let date = chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|e| PyErr::new::<pyo3::exceptions::PyValueError, _>(format!("{}: {}", date, e)))?;
    Ok(days_since_epoch(date))
}

/// Run one study year from a JSON configuration; returns the run summary
#[pyfunction]
#[pyo3(signature = (config_path, year = None))]
fn run_year<'py>(py: Python<'py>, config_path: &str, year: Option<i32>) -> PyResult<&'py PyDict> {
    let mut config = ProcessingConfig::from_json_file(config_path).map_err(to_py_err)?;
    if let Some(year) = year {
        config = config.for_year(year);
    }
    let output = py
        .allow_threads(|| crate::core::run_year(&config, Cancellation::new()))
        .map_err(to_py_err)?;

    let summary = PyDict::new(py);
    summary.set_item("attempted", output.summary.attempted)?;
    summary.set_item("merged", output.summary.merged)?;
    summary.set_item("below_confidence", output.summary.below_confidence)?;
    let skipped = PyDict::new(py);
    for (kind, count) in output.summary.skipped_by_kind() {
        skipped.set_item(kind, count)?;
    }
    summary.set_item("skipped", skipped)?;
    summary.set_item(
        "burned_pixels",
        output.mosaic.as_ref().map_or(0, |m| m.burned_pixels()),
    )?;
    Ok(summary)
}

/// Python module definition
#[pymodule]
fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(delta_nbr, m)?)?;
    m.add_function(wrap_pyfunction!(classify_burn, m)?)?;
    m.add_function(wrap_pyfunction!(quality_mosaic, m)?)?;
    m.add_function(wrap_pyfunction!(date_offset, m)?)?;
    m.add_function(wrap_pyfunction!(run_year, m)?)?;
    Ok(())
}
