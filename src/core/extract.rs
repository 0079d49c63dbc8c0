use serde::{Deserialize, Serialize};

use crate::core::classify::{otsu_threshold, PixelClass, PixelClassifier, SandColor};
use crate::core::contour::{find_contours, PixelContour};
use crate::core::crs;
use crate::core::geometry;
use crate::core::morphology;
use crate::types::{Point, Polyline, Scene, ShoreError, ShoreResult, Shoreline};

/// Shoreline extraction parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionParams {
    /// Maximum cloud cover fraction (0..1) of the scene
    pub cloud_thresh: f64,
    /// Maximum nodata fraction (0..1) of the scene
    pub max_nodata_fraction: f64,
    /// Minimum area of a connected sand region, m2
    pub min_beach_area: f64,
    /// Search buffer around sand pixels, metres
    pub buffer_size: f64,
    /// Minimum length of a shoreline polyline, metres
    pub min_length_sl: f64,
    pub sand_color: SandColor,
    /// Maximum distance from the reference shoreline, metres
    pub max_dist_ref: f64,
    /// EPSG code of the output coordinates
    pub output_epsg: u32,
}

impl Default for ExtractionParams {
    fn default() -> Self {
        Self {
            cloud_thresh: 0.5,
            max_nodata_fraction: 0.9,
            min_beach_area: 4500.0,
            buffer_size: 150.0,
            min_length_sl: 200.0,
            sand_color: SandColor::Default,
            max_dist_ref: 100.0,
            output_epsg: 32756,
        }
    }
}

impl ExtractionParams {
    pub fn validate(&self) -> ShoreResult<()> {
        let mut errors = Vec::new();
        if !(0.0..=1.0).contains(&self.cloud_thresh) {
            errors.push(format!("cloud_thresh {} must be within [0, 1]", self.cloud_thresh));
        }
        if !(0.0..=1.0).contains(&self.max_nodata_fraction) {
            errors.push(format!(
                "max_nodata_fraction {} must be within [0, 1]",
                self.max_nodata_fraction
            ));
        }
        for (name, value) in [
            ("min_beach_area", self.min_beach_area),
            ("buffer_size", self.buffer_size),
            ("min_length_sl", self.min_length_sl),
            ("max_dist_ref", self.max_dist_ref),
        ] {
            if !value.is_finite() || value < 0.0 {
                errors.push(format!("{} {} must be a non-negative number", name, value));
            }
        }
        if let Err(e) = crs::Crs::from_epsg(self.output_epsg) {
            errors.push(e.to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ShoreError::Config(errors.join("; ")))
        }
    }
}

/// Why a scene produced no shoreline
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DiscardReason {
    TooCloudy { cloud_cover: f64 },
    TooMuchNodata { fraction: f64 },
    NoSand,
    NoWater,
    NoThreshold,
    NoContour,
    TooShort,
    FarFromReference,
}

impl DiscardReason {
    /// Stable short label, used for run summaries
    pub fn label(&self) -> &'static str {
        match self {
            DiscardReason::TooCloudy { .. } => "too_cloudy",
            DiscardReason::TooMuchNodata { .. } => "too_much_nodata",
            DiscardReason::NoSand => "no_sand",
            DiscardReason::NoWater => "no_water",
            DiscardReason::NoThreshold => "no_threshold",
            DiscardReason::NoContour => "no_contour",
            DiscardReason::TooShort => "too_short",
            DiscardReason::FarFromReference => "far_from_reference",
        }
    }
}

impl std::fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiscardReason::TooCloudy { cloud_cover } => {
                write!(f, "cloud cover {:.1}% above threshold", cloud_cover * 100.0)
            }
            DiscardReason::TooMuchNodata { fraction } => {
                write!(f, "nodata {:.1}% above threshold", fraction * 100.0)
            }
            DiscardReason::NoSand => write!(f, "no sand pixels after filtering"),
            DiscardReason::NoWater => write!(f, "no water pixels near the beach"),
            DiscardReason::NoThreshold => write!(f, "sand and water indices not separable"),
            DiscardReason::NoContour => write!(f, "no sand/water boundary traced"),
            DiscardReason::TooShort => write!(f, "all traced boundaries shorter than minimum length"),
            DiscardReason::FarFromReference => write!(f, "no boundary near the reference shoreline"),
        }
    }
}

/// Result of extracting one scene
#[derive(Debug, Clone)]
pub enum ExtractionOutcome {
    Detected(Shoreline),
    Discarded(DiscardReason),
}

/// Sub-pixel shoreline extractor
#[derive(Debug, Clone)]
pub struct ShorelineExtractor {
    params: ExtractionParams,
    classifier: PixelClassifier,
    /// Reference shoreline in `output_epsg`
    reference: Option<Vec<Point>>,
}

impl ShorelineExtractor {
    pub fn new(params: ExtractionParams) -> ShoreResult<Self> {
        params.validate()?;
        let classifier = PixelClassifier::new(params.sand_color);
        Ok(Self {
            params,
            classifier,
            reference: None,
        })
    }

    /// Reject points farther than `max_dist_ref` from `points` (output coordinates)
    pub fn with_reference(mut self, points: Vec<Point>) -> ShoreResult<Self> {
        if points.is_empty() {
            return Err(ShoreError::InvalidGeometry(
                "Reference shoreline has no points".to_string(),
            ));
        }
        self.reference = Some(points);
        Ok(self)
    }

    pub fn without_reference(&self) -> Self {
        Self {
            params: self.params.clone(),
            classifier: self.classifier.clone(),
            reference: None,
        }
    }

    pub fn params(&self) -> &ExtractionParams {
        &self.params
    }

    pub fn reference(&self) -> Option<&[Point]> {
        self.reference.as_deref()
    }

    pub fn extract(&self, scene: &Scene) -> ShoreResult<ExtractionOutcome> {
        let p = &self.params;
        let id = &scene.meta.id;

        if scene.cloud_cover > p.cloud_thresh {
            log::debug!("{}: cloud cover {:.2} above {:.2}", id, scene.cloud_cover, p.cloud_thresh);
            return Ok(ExtractionOutcome::Discarded(DiscardReason::TooCloudy {
                cloud_cover: scene.cloud_cover,
            }));
        }
        if scene.nodata_fraction > p.max_nodata_fraction {
            return Ok(ExtractionOutcome::Discarded(DiscardReason::TooMuchNodata {
                fraction: scene.nodata_fraction,
            }));
        }

        let pixel_size = scene.pixel_size();
        if pixel_size.is_nan() || pixel_size <= 0.0 {
            return Err(ShoreError::Raster(format!("Scene {} has a degenerate geotransform", id)));
        }

        let classification = self.classifier.classify(scene)?;
        let min_pixels = (p.min_beach_area / (pixel_size * pixel_size)).ceil() as usize;
        let sand = morphology::remove_small_objects(&classification.mask(PixelClass::Sand), min_pixels);
        if !sand.iter().any(|&s| s) {
            return Ok(ExtractionOutcome::Discarded(DiscardReason::NoSand));
        }

        let radius = (p.buffer_size / pixel_size).ceil() as usize;
        let buffer = morphology::dilate(&sand, radius);

        let mut sand_values = Vec::new();
        let mut water_values = Vec::new();
        for ((idx, class), &in_buffer) in classification.classes.indexed_iter().zip(buffer.iter()) {
            if !in_buffer {
                continue;
            }
            match class {
                PixelClass::Sand if sand[idx] => sand_values.push(classification.mndwi[idx]),
                PixelClass::Water => water_values.push(classification.mndwi[idx]),
                _ => {}
            }
        }
        if water_values.is_empty() {
            return Ok(ExtractionOutcome::Discarded(DiscardReason::NoWater));
        }

        // Balance the two populations so a large water body does not swamp the threshold
        let n = sand_values.len().min(water_values.len());
        let sample: Vec<f32> = subsample(&sand_values, n)
            .chain(subsample(&water_values, n))
            .collect();
        let level = match otsu_threshold(&sample) {
            Some(t) => t,
            None => return Ok(ExtractionOutcome::Discarded(DiscardReason::NoThreshold)),
        };
        log::debug!("{}: MNDWI threshold {:.3} from {} samples", id, level, sample.len());

        let trace_mask = ndarray::Zip::from(&buffer)
            .and(&scene.validity)
            .map_collect(|&b, &v| b && v);
        let contours = find_contours(&classification.mndwi, level, Some(&trace_mask));
        if contours.is_empty() {
            return Ok(ExtractionOutcome::Discarded(DiscardReason::NoContour));
        }

        let mut segments = Vec::with_capacity(contours.len());
        for contour in &contours {
            segments.push(self.to_world(scene, contour)?);
        }
        segments.retain(|s| s.points.len() >= 2 && s.length() >= p.min_length_sl);
        if segments.is_empty() {
            return Ok(ExtractionOutcome::Discarded(DiscardReason::TooShort));
        }

        if let Some(reference) = &self.reference {
            segments = segments
                .iter()
                .flat_map(|s| clip_to_reference(s, reference, p.max_dist_ref))
                .filter(|s| s.points.len() >= 2 && s.length() >= p.min_length_sl)
                .collect();
            if segments.is_empty() {
                return Ok(ExtractionOutcome::Discarded(DiscardReason::FarFromReference));
            }
        }

        let shoreline = Shoreline::new(segments);
        log::debug!(
            "{}: {} shoreline segments, {} points, {:.0} m",
            id,
            shoreline.segments.len(),
            shoreline.point_count(),
            shoreline.length()
        );
        Ok(ExtractionOutcome::Detected(shoreline))
    }

    fn to_world(&self, scene: &Scene, contour: &PixelContour) -> ShoreResult<Polyline> {
        let native: Vec<Point> = contour
            .points
            .iter()
            .map(|&(row, col)| scene.geo_transform.pixel_to_world(row, col))
            .collect();
        let points = crs::transform_points(&native, scene.epsg, self.params.output_epsg)?;
        Ok(Polyline::new(points, contour.closed))
    }
}

/// Evenly spaced subsample of `n` values
fn subsample(values: &[f32], n: usize) -> impl Iterator<Item = f32> + '_ {
    let step = if n == 0 { 1 } else { (values.len() / n).max(1) };
    values.iter().copied().step_by(step).take(n)
}

/// Keep the runs of points within `max_dist` of the reference line
fn clip_to_reference(line: &Polyline, reference: &[Point], max_dist: f64) -> Vec<Polyline> {
    let keep: Vec<bool> = line
        .points
        .iter()
        .map(|p| geometry::distance_to_polyline(p, reference) <= max_dist)
        .collect();

    if keep.iter().all(|&k| k) {
        return vec![line.clone()];
    }

    let mut runs = Vec::new();
    let mut current = Vec::new();
    for (p, &k) in line.points.iter().zip(&keep) {
        if k {
            current.push(*p);
        } else if !current.is_empty() {
            runs.push(Polyline::new(std::mem::take(&mut current), false));
        }
    }
    if !current.is_empty() {
        runs.push(Polyline::new(current, false));
    }
    runs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GeoAccuracy, GeoTransform, Satellite, SceneRef};
    use chrono::{TimeZone, Utc};
    use ndarray::{Array2, Array3};

    /// Beach on the left (columns < `shore_col`), ocean on the right
    fn beach_scene(rows: usize, cols: usize, shore_col: usize, cloud_cover: f64) -> Scene {
        let mut bands = Array3::<f32>::zeros((5, rows, cols));
        for i in 0..rows {
            for j in 0..cols {
                let (b, g, r, nir, swir) = if j < shore_col {
                    (0.25, 0.28, 0.30, 0.32, 0.40)
                } else {
                    (0.08, 0.07, 0.05, 0.02, 0.01)
                };
                bands[[0, i, j]] = b;
                bands[[1, i, j]] = g;
                bands[[2, i, j]] = r;
                bands[[3, i, j]] = nir;
                bands[[4, i, j]] = swir;
            }
        }
        Scene {
            meta: SceneRef {
                id: "2020-01-01-00-00-00_S2_test".to_string(),
                satellite: Satellite::S2,
                acquired: Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
                cloud_cover,
                geoaccuracy: GeoAccuracy::Passed,
            },
            bands,
            cloud_mask: Array2::from_elem((rows, cols), false),
            validity: Array2::from_elem((rows, cols), true),
            cloud_cover,
            nodata_fraction: 0.0,
            geo_transform: GeoTransform {
                top_left_x: 340_000.0,
                pixel_width: 10.0,
                rotation_x: 0.0,
                top_left_y: 6_270_000.0,
                rotation_y: 0.0,
                pixel_height: -10.0,
            },
            epsg: 32756,
        }
    }

    fn params() -> ExtractionParams {
        ExtractionParams {
            min_beach_area: 1000.0,
            buffer_size: 50.0,
            min_length_sl: 200.0,
            ..ExtractionParams::default()
        }
    }

    #[test]
    fn test_straight_beach_is_traced() {
        let extractor = ShorelineExtractor::new(params()).unwrap();
        let scene = beach_scene(40, 40, 20, 0.0);

        let outcome = extractor.extract(&scene).unwrap();
        let shoreline = match outcome {
            ExtractionOutcome::Detected(s) => s,
            ExtractionOutcome::Discarded(r) => panic!("discarded: {}", r),
        };

        assert_eq!(shoreline.segments.len(), 1);
        // Boundary between pixel centres of columns 19 and 20
        for p in shoreline.points() {
            assert!((p.x - 340_200.0).abs() < 10.0, "x = {}", p.x);
        }
        assert!(shoreline.length() >= 200.0);
    }

    #[test]
    fn test_cloudy_scene_is_discarded() {
        let extractor = ShorelineExtractor::new(params()).unwrap();
        let scene = beach_scene(40, 40, 20, 0.8);
        match extractor.extract(&scene).unwrap() {
            ExtractionOutcome::Discarded(DiscardReason::TooCloudy { .. }) => {}
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_short_boundary_is_discarded() {
        let extractor = ShorelineExtractor::new(ExtractionParams {
            min_length_sl: 1000.0,
            ..params()
        })
        .unwrap();
        let scene = beach_scene(40, 40, 20, 0.0);
        match extractor.extract(&scene).unwrap() {
            ExtractionOutcome::Discarded(DiscardReason::TooShort) => {}
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_reference_far_away_discards() {
        let reference = vec![Point::new(345_000.0, 6_270_000.0), Point::new(345_000.0, 6_269_000.0)];
        let extractor = ShorelineExtractor::new(params())
            .unwrap()
            .with_reference(reference)
            .unwrap();
        let scene = beach_scene(40, 40, 20, 0.0);
        match extractor.extract(&scene).unwrap() {
            ExtractionOutcome::Discarded(DiscardReason::FarFromReference) => {}
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_invalid_params_rejected() {
        let bad = ExtractionParams {
            cloud_thresh: 1.5,
            output_epsg: 3857,
            ..ExtractionParams::default()
        };
        assert!(ShorelineExtractor::new(bad).is_err());
    }
}
