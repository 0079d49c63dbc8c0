use ndarray::{Array2, ArrayView2, Zip};
use serde::{Deserialize, Serialize};

use crate::types::{Band, Mask, Raster, Scene, ShoreResult};

/// Beach sediment brightness, selects the classification thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandColor {
    #[default]
    Default,
    /// Dark (volcanic or grey) sand
    Dark,
    /// Bright (white, carbonate) sand
    Bright,
}

/// Per-pixel land cover class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelClass {
    Other,
    Sand,
    Whitewater,
    Water,
}

/// Index thresholds for one sand colour mode
#[derive(Debug, Clone, Copy)]
pub struct ClassThresholds {
    /// MNDWI above which a pixel is water
    pub water_mndwi: f32,
    /// MNDWI at or below which a pixel may be sand
    pub sand_max_mndwi: f32,
    /// NDVI ceiling for sand (excludes vegetation)
    pub sand_max_ndvi: f32,
    /// Visible brightness range for sand (reflectance)
    pub sand_brightness: (f32, f32),
    /// Brightness above which wet pixels are breaking waves
    pub whitewater_brightness: f32,
    pub whitewater_mndwi: f32,
}

impl ClassThresholds {
    pub fn for_color(color: SandColor) -> Self {
        match color {
            SandColor::Default => Self {
                water_mndwi: 0.0,
                sand_max_mndwi: -0.05,
                sand_max_ndvi: 0.2,
                sand_brightness: (0.08, 0.45),
                whitewater_brightness: 0.45,
                whitewater_mndwi: 0.1,
            },
            SandColor::Dark => Self {
                water_mndwi: 0.0,
                sand_max_mndwi: -0.02,
                sand_max_ndvi: 0.2,
                sand_brightness: (0.03, 0.3),
                whitewater_brightness: 0.4,
                whitewater_mndwi: 0.1,
            },
            SandColor::Bright => Self {
                water_mndwi: 0.0,
                sand_max_mndwi: -0.05,
                sand_max_ndvi: 0.2,
                sand_brightness: (0.15, 0.7),
                whitewater_brightness: 0.7,
                whitewater_mndwi: 0.1,
            },
        }
    }
}

/// Classification output with the index the shoreline is traced on
#[derive(Debug, Clone)]
pub struct Classification {
    pub classes: Array2<PixelClass>,
    /// Modified normalised difference water index, NaN where invalid
    pub mndwi: Raster,
}

impl Classification {
    pub fn mask(&self, class: PixelClass) -> Mask {
        self.classes.mapv(|c| c == class)
    }

    pub fn count(&self, class: PixelClass) -> usize {
        self.classes.iter().filter(|&&c| c == class).count()
    }
}

/// (a - b) / (a + b), NaN where undefined
pub fn normalized_difference(a: ArrayView2<f32>, b: ArrayView2<f32>) -> Raster {
    let mut out = Array2::<f32>::zeros(a.dim());
    Zip::from(&mut out).and(&a).and(&b).for_each(|o, &x, &y| {
        let sum = x + y;
        *o = if x.is_finite() && y.is_finite() && sum.abs() > f32::EPSILON {
            (x - y) / sum
        } else {
            f32::NAN
        };
    });
    out
}

/// Rule-based sand / water / white-water classifier
#[derive(Debug, Clone)]
pub struct PixelClassifier {
    thresholds: ClassThresholds,
}

impl PixelClassifier {
    pub fn new(color: SandColor) -> Self {
        Self {
            thresholds: ClassThresholds::for_color(color),
        }
    }

    pub fn with_thresholds(thresholds: ClassThresholds) -> Self {
        Self { thresholds }
    }

    pub fn classify(&self, scene: &Scene) -> ShoreResult<Classification> {
        let blue = scene.band(Band::Blue)?;
        let green = scene.band(Band::Green)?;
        let red = scene.band(Band::Red)?;
        let nir = scene.band(Band::Nir)?;
        let swir = scene.band(Band::Swir1)?;

        let mut mndwi = normalized_difference(green, swir);
        let ndvi = normalized_difference(nir, red);
        let t = &self.thresholds;

        let mut classes = Array2::from_elem(scene.dim(), PixelClass::Other);
        let (height, width) = scene.dim();
        for i in 0..height {
            for j in 0..width {
                if !scene.validity[[i, j]] || !mndwi[[i, j]].is_finite() {
                    mndwi[[i, j]] = f32::NAN;
                    continue;
                }
                let m = mndwi[[i, j]];
                let brightness = (blue[[i, j]] + green[[i, j]] + red[[i, j]]) / 3.0;
                let veg = ndvi[[i, j]];

                classes[[i, j]] = if brightness >= t.whitewater_brightness && m > t.whitewater_mndwi {
                    PixelClass::Whitewater
                } else if m > t.water_mndwi {
                    PixelClass::Water
                } else if m <= t.sand_max_mndwi
                    && (!veg.is_finite() || veg < t.sand_max_ndvi)
                    && brightness >= t.sand_brightness.0
                    && brightness <= t.sand_brightness.1
                {
                    PixelClass::Sand
                } else {
                    PixelClass::Other
                };
            }
        }

        Ok(Classification { classes, mndwi })
    }
}

/// Otsu threshold of a sample, 256-bin histogram between its extremes
pub fn otsu_threshold(values: &[f32]) -> Option<f32> {
    let finite: Vec<f32> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.len() < 2 {
        return None;
    }
    let min = finite.iter().copied().fold(f32::INFINITY, f32::min);
    let max = finite.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if max - min <= f32::EPSILON {
        return None;
    }

    const BINS: usize = 256;
    let width = (max - min) / BINS as f32;
    let mut histogram = [0usize; BINS];
    for v in &finite {
        let bin = (((v - min) / width) as usize).min(BINS - 1);
        histogram[bin] += 1;
    }

    let total = finite.len() as f64;
    let centre = |b: usize| (min + (b as f32 + 0.5) * width) as f64;
    let sum_all: f64 = histogram.iter().enumerate().map(|(b, &c)| c as f64 * centre(b)).sum();

    let mut weight_low = 0.0;
    let mut sum_low = 0.0;
    // Empty bins between the classes give a plateau; take its middle
    let mut best = f64::NEG_INFINITY;
    let mut plateau = (0usize, 0usize);
    for (b, &count) in histogram.iter().enumerate().take(BINS - 1) {
        weight_low += count as f64;
        sum_low += count as f64 * centre(b);
        let weight_high = total - weight_low;
        if weight_low == 0.0 || weight_high == 0.0 {
            continue;
        }
        let mean_low = sum_low / weight_low;
        let mean_high = (sum_all - sum_low) / weight_high;
        let between = weight_low * weight_high * (mean_low - mean_high).powi(2);
        if between > best {
            best = between;
            plateau = (b, b);
        } else if between == best {
            plateau.1 = b;
        }
    }

    let split = (plateau.0 + plateau.1) / 2;
    Some(min + (split + 1) as f32 * width)
}
