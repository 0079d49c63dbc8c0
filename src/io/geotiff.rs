//! GeoTIFF tiles through GDAL

use gdal::Dataset;
use ndarray::Array2;
use std::path::Path;

use crate::types::{Band, BandRaster, GeoTransform, Raster, RasterTile, SceneRef, ShoreError, ShoreResult};

/// First band of a raster with its grid
pub struct GeoRaster {
    pub data: Raster,
    pub geo_transform: GeoTransform,
    pub epsg: u32,
}

/// Read band 1 of any GDAL-readable raster (local path or `/vsicurl/` URL)
pub fn read_raster<P: AsRef<Path>>(path: P) -> ShoreResult<GeoRaster> {
    log::debug!("Reading raster {}", path.as_ref().display());
    let dataset = Dataset::open(path.as_ref())?;
    let geo_transform = GeoTransform::from_gdal(dataset.geo_transform()?);
    let (width, height) = dataset.raster_size();

    let epsg = dataset
        .spatial_ref()
        .and_then(|srs| srs.auth_code())
        .map_err(|e| ShoreError::Raster(format!("{}: no EPSG code ({})", path.as_ref().display(), e)))?;

    let band = dataset.rasterband(1)?;
    let nodata = band.no_data_value();
    let buffer = band.read_as::<f32>((0, 0), (width, height), (width, height), None)?;
    let mut data = Array2::from_shape_vec((height, width), buffer.data)
        .map_err(|e| ShoreError::Raster(format!("Failed to reshape raster data: {}", e)))?;
    if let Some(nd) = nodata {
        data.mapv_inplace(|v| if (v as f64 - nd).abs() < f64::EPSILON { f32::NAN } else { v });
    }

    Ok(GeoRaster { data, geo_transform, epsg: epsg as u32 })
}

/// Assemble a tile from one file per band plus an optional cloud mask file
/// (non-zero = cloud). The grid is taken from the largest band.
pub fn read_tile<P: AsRef<Path>>(
    scene: &SceneRef,
    band_files: &[(Band, P)],
    cloud_file: Option<P>,
) -> ShoreResult<RasterTile> {
    let mut bands = Vec::with_capacity(band_files.len());
    let mut grid: Option<(GeoTransform, u32, usize)> = None;
    for (band, path) in band_files {
        let raster = read_raster(path)?;
        let cells = raster.data.len();
        if grid.as_ref().map_or(true, |g| cells > g.2) {
            grid = Some((raster.geo_transform, raster.epsg, cells));
        }
        bands.push(BandRaster { band: *band, data: raster.data });
    }
    let (geo_transform, epsg, _) =
        grid.ok_or_else(|| ShoreError::Raster(format!("No band files given for {}", scene.id)))?;

    let cloud_mask = match cloud_file {
        Some(path) => read_raster(path)?.data.mapv(|v| v.is_finite() && v != 0.0),
        None => Array2::from_elem(bands[0].data.dim(), false),
    };

    Ok(RasterTile { scene: scene.clone(), bands, cloud_mask, nodata_mask: None, geo_transform, epsg })
}
