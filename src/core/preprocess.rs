use ndarray::{Array2, Array3, Axis};
use serde::{Deserialize, Serialize};

use crate::core::morphology;
use crate::types::{Band, Mask, Raster, RasterTile, Scene, ShoreError, ShoreResult};

/// Preprocessing parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessParams {
    /// Sharpen visible and NIR bands with the panchromatic band when present
    pub pansharpen: bool,
    /// Dilate the cloud mask by this many pixels
    pub cloud_mask_buffer: usize,
}

impl Default for PreprocessParams {
    fn default() -> Self {
        Self {
            pansharpen: true,
            cloud_mask_buffer: 0,
        }
    }
}

/// Brings a fetched tile onto a single grid with validity and cloud masks
pub struct Preprocessor {
    params: PreprocessParams,
}

impl Preprocessor {
    pub fn new(params: PreprocessParams) -> Self {
        Self { params }
    }

    pub fn standard() -> Self {
        Self::new(PreprocessParams::default())
    }

    pub fn params(&self) -> &PreprocessParams {
        &self.params
    }

    /// Resample, pansharpen and mask a raw tile
    pub fn process(&self, tile: &RasterTile) -> ShoreResult<Scene> {
        log::debug!("Preprocessing scene {}", tile.scene.id);

        let mut ms_bands = Vec::with_capacity(Band::MULTISPECTRAL.len());
        for band in Band::MULTISPECTRAL {
            let data = tile.band(band).ok_or_else(|| {
                ShoreError::Raster(format!("Scene {} is missing the {:?} band", tile.scene.id, band))
            })?;
            if data.is_empty() {
                return Err(ShoreError::Raster(format!(
                    "Scene {} has an empty {:?} band",
                    tile.scene.id, band
                )));
            }
            ms_bands.push(data);
        }

        let finest_ms = ms_bands
            .iter()
            .map(|b| b.dim())
            .max_by_key(|(r, c)| r * c)
            .unwrap_or((0, 0));
        let pan = tile.band(Band::Pan).filter(|p| !p.is_empty());
        let target = match pan {
            Some(p) if self.params.pansharpen && p.dim().0 >= finest_ms.0 => p.dim(),
            _ => finest_ms,
        };
        let tile_grid = tile
            .bands
            .iter()
            .map(|b| b.data.dim())
            .max_by_key(|(r, c)| r * c)
            .unwrap_or(target);
        let scale = tile_grid.0 as f64 / target.0 as f64;
        let geo_transform = tile.geo_transform.rescaled(scale);

        log::debug!(
            "Target grid {}x{} (tile grid {}x{}, scale {:.2})",
            target.0,
            target.1,
            tile_grid.0,
            tile_grid.1,
            scale
        );

        let mut stack = Array3::<f32>::zeros((Band::MULTISPECTRAL.len(), target.0, target.1));
        for (idx, data) in ms_bands.iter().enumerate() {
            let resampled = if data.dim() == target {
                (*data).clone()
            } else {
                resample_bilinear(data, target)
            };
            stack.index_axis_mut(Axis(0), idx).assign(&resampled);
        }

        let mut nodata = match &tile.nodata_mask {
            Some(mask) => resample_nearest(mask, target),
            None => Array2::from_elem(target, false),
        };
        for band in stack.outer_iter() {
            for ((i, j), v) in band.indexed_iter() {
                if !v.is_finite() {
                    nodata[[i, j]] = true;
                }
            }
        }

        if let Some(pan) = pan {
            if self.params.pansharpen && pan.dim() == target {
                pansharpen(&mut stack, pan, &nodata);
            }
        }

        let mut cloud_mask = resample_nearest(&tile.cloud_mask, target);
        if self.params.cloud_mask_buffer > 0 {
            cloud_mask = morphology::dilate(&cloud_mask, self.params.cloud_mask_buffer);
        }

        let total = nodata.len();
        let nodata_count = nodata.iter().filter(|&&v| v).count();
        let cloudy = cloud_mask
            .iter()
            .zip(nodata.iter())
            .filter(|&(&c, &n)| c && !n)
            .count();
        let cloud_cover = if nodata_count == total {
            1.0
        } else {
            cloudy as f64 / (total - nodata_count) as f64
        };
        let validity = ndarray::Zip::from(&nodata)
            .and(&cloud_mask)
            .map_collect(|&n, &c| !n && !c);

        log::debug!(
            "Scene {}: cloud cover {:.1}%, nodata {:.1}%",
            tile.scene.id,
            cloud_cover * 100.0,
            nodata_count as f64 / total as f64 * 100.0
        );

        Ok(Scene {
            meta: tile.scene.clone(),
            bands: stack,
            cloud_mask,
            validity,
            cloud_cover,
            nodata_fraction: nodata_count as f64 / total as f64,
            geo_transform,
            epsg: tile.epsg,
        })
    }
}

/// Intensity-substitution pansharpening of the visible and NIR bands
fn pansharpen(stack: &mut Array3<f32>, pan: &Raster, nodata: &Mask) {
    log::debug!("Pansharpening with {}x{} panchromatic band", pan.dim().0, pan.dim().1);
    let sharpened = [Band::Blue, Band::Green, Band::Red, Band::Nir];
    let (height, width) = pan.dim();

    for i in 0..height {
        for j in 0..width {
            if nodata[[i, j]] || !pan[[i, j]].is_finite() {
                continue;
            }
            let intensity = (stack[[0, i, j]] + stack[[1, i, j]] + stack[[2, i, j]]) / 3.0;
            if intensity <= f32::EPSILON {
                continue;
            }
            let ratio = pan[[i, j]] / intensity;
            for band in sharpened {
                if let Some(idx) = band.stack_index() {
                    stack[[idx, i, j]] *= ratio;
                }
            }
        }
    }
}

/// Bilinear resampling onto a grid covering the same extent
pub fn resample_bilinear(image: &Raster, target: (usize, usize)) -> Raster {
    let (src_rows, src_cols) = image.dim();
    let row_scale = src_rows as f64 / target.0 as f64;
    let col_scale = src_cols as f64 / target.1 as f64;

    Array2::from_shape_fn(target, |(i, j)| {
        let y = ((i as f64 + 0.5) * row_scale - 0.5).clamp(0.0, (src_rows - 1) as f64);
        let x = ((j as f64 + 0.5) * col_scale - 0.5).clamp(0.0, (src_cols - 1) as f64);

        let y1 = y.floor() as usize;
        let x1 = x.floor() as usize;
        let y2 = (y1 + 1).min(src_rows - 1);
        let x2 = (x1 + 1).min(src_cols - 1);
        let dy = y - y1 as f64;
        let dx = x - x1 as f64;

        let v11 = image[[y1, x1]] as f64;
        let v12 = image[[y2, x1]] as f64;
        let v21 = image[[y1, x2]] as f64;
        let v22 = image[[y2, x2]] as f64;

        (v11 * (1.0 - dx) * (1.0 - dy) + v21 * dx * (1.0 - dy) + v12 * (1.0 - dx) * dy + v22 * dx * dy) as f32
    })
}

/// Nearest-neighbour resampling of a mask onto a grid covering the same extent
pub fn resample_nearest(mask: &Mask, target: (usize, usize)) -> Mask {
    let (src_rows, src_cols) = mask.dim();
    if (src_rows, src_cols) == target {
        return mask.clone();
    }
    if src_rows == 0 || src_cols == 0 {
        return Array2::from_elem(target, false);
    }
    let row_scale = src_rows as f64 / target.0 as f64;
    let col_scale = src_cols as f64 / target.1 as f64;

    Array2::from_shape_fn(target, |(i, j)| {
        let si = (((i as f64 + 0.5) * row_scale) as usize).min(src_rows - 1);
        let sj = (((j as f64 + 0.5) * col_scale) as usize).min(src_cols - 1);
        mask[[si, sj]]
    })
}
