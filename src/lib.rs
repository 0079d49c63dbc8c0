//! shoresat: satellite-derived shoreline time series
//!
//! Lists and fetches optical scenes for a coastal site, traces the sand/water
//! boundary at sub-pixel precision, filters the detections, measures
//! cross-shore positions along transects and corrects them for the tide.

pub mod config;
pub mod core;
pub mod io;
pub mod types;

// Re-export main types and functions for easier access
pub use config::PipelineConfig;
pub use core::{
    process_site, CancelToken, CrossDistanceSeries, ShorelineExtractor, ShorelinePipeline, TidalCorrector,
    Transect, TransectIntersector,
};
pub use io::{LocalSceneCatalog, MemoryCatalog, SceneCatalog};
pub use types::{
    GeoAccuracy, OutputCollection, Point, Region, Satellite, Shoreline, ShorelineRecord, ShoreError, ShoreResult,
};

#[cfg(feature = "python")]
mod python {
    use numpy::{IntoPyArray, PyArray1, PyReadonlyArray1};
    use pyo3::prelude::*;

    use crate::core::intersect::{cross_distance as median_cross_distance, Transect};
    use crate::core::tide::horizontal_shift;
    use crate::types::Point;

    fn to_py_err(e: crate::types::ShoreError) -> PyErr {
        PyErr::new::<pyo3::exceptions::PyValueError, _>(format!("{}", e))
    }

    /// Median cross-shore distance of shoreline points (xs, ys) along a transect
    #[pyfunction]
    fn cross_distance(
        xs: PyReadonlyArray1<f64>,
        ys: PyReadonlyArray1<f64>,
        origin: (f64, f64),
        end: (f64, f64),
        along_dist: f64,
    ) -> PyResult<(f64, usize)> {
        let xs = xs.as_slice()?;
        let ys = ys.as_slice()?;
        if xs.len() != ys.len() {
            return Err(PyErr::new::<pyo3::exceptions::PyValueError, _>(
                "xs and ys must have the same length",
            ));
        }
        let transect =
            Transect::new("py", Point::new(origin.0, origin.1), Point::new(end.0, end.1)).map_err(to_py_err)?;
        let points: Vec<Point> = xs.iter().zip(ys).map(|(&x, &y)| Point::new(x, y)).collect();
        Ok(median_cross_distance(&points, &transect, along_dist))
    }

    /// Shift raw cross-shore distances by (tide - reference_elevation) / slope
    #[pyfunction]
    fn tidal_correct<'py>(
        py: Python<'py>,
        distances: PyReadonlyArray1<f64>,
        tide_levels: PyReadonlyArray1<f64>,
        reference_elevation: f64,
        slope: f64,
    ) -> PyResult<&'py PyArray1<f64>> {
        let distances = distances.as_slice()?;
        let levels = tide_levels.as_slice()?;
        if distances.len() != levels.len() {
            return Err(PyErr::new::<pyo3::exceptions::PyValueError, _>(
                "distances and tide_levels must have the same length",
            ));
        }
        if !(slope.is_finite() && slope > 0.0) {
            return Err(PyErr::new::<pyo3::exceptions::PyValueError, _>("slope must be positive"));
        }
        let corrected: Vec<f64> = distances
            .iter()
            .zip(horizontal_shift(levels, reference_elevation, slope))
            .map(|(d, s)| d + s)
            .collect();
        Ok(corrected.into_pyarray(py))
    }

    /// Python module definition
    #[pymodule]
    fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
        m.add_function(wrap_pyfunction!(cross_distance, m)?)?;
        m.add_function(wrap_pyfunction!(tidal_correct, m)?)?;
        Ok(())
    }
}
