//! Reference shoreline supply.
//!
//! The pipeline never digitizes inline: a reference shoreline is either given
//! as points, read from a file, or produced by a [`Digitizer`] adapter reviewing
//! detections made without a reference.

use std::path::PathBuf;

use crate::core::crs;
use crate::core::extract::{ExtractionOutcome, ShorelineExtractor};
use crate::core::preprocess::Preprocessor;
use crate::io::catalog::SceneCatalog;
use crate::io::geojson;
use crate::types::{DateRange, Point, Region, Satellite, SceneRef, ShoreError, ShoreResult, Shoreline};

/// Reviewer decision for one candidate detection
#[derive(Debug, Clone, PartialEq)]
pub enum DigitizeDecision {
    /// Use these points (output coordinates) as the reference
    Accept(Vec<Point>),
    Skip,
    Stop,
}

/// Front end that turns a detection into a reference shoreline
pub trait Digitizer {
    fn review(&mut self, scene: &SceneRef, shoreline: &Shoreline) -> DigitizeDecision;
}

/// Accepts the first detection as is
#[derive(Debug, Default)]
pub struct FirstDetection;

impl Digitizer for FirstDetection {
    fn review(&mut self, scene: &SceneRef, shoreline: &Shoreline) -> DigitizeDecision {
        log::info!("Using the shoreline of {} as reference", scene.id);
        DigitizeDecision::Accept(shoreline.points().copied().collect())
    }
}

/// Where the reference shoreline comes from
#[derive(Debug, Clone, Default)]
pub enum ReferenceSource {
    #[default]
    None,
    /// Points already in the output CRS
    Points(Vec<Point>),
    /// GeoJSON of LineStrings in `epsg`
    File { path: PathBuf, epsg: u32 },
}

impl ReferenceSource {
    /// Reference points in `output_epsg`, `None` when no reference is configured
    pub fn resolve(&self, output_epsg: u32) -> ShoreResult<Option<Vec<Point>>> {
        match self {
            ReferenceSource::None => Ok(None),
            ReferenceSource::Points(points) => {
                if points.is_empty() {
                    return Err(ShoreError::InvalidGeometry("Reference shoreline has no points".to_string()));
                }
                Ok(Some(points.clone()))
            }
            ReferenceSource::File { path, epsg } => {
                let points: Vec<Point> = geojson::read_line_features(path)?
                    .into_iter()
                    .flat_map(|f| f.points)
                    .collect();
                if points.is_empty() {
                    return Err(ShoreError::InvalidGeometry(format!(
                        "No reference shoreline points in {}",
                        path.display()
                    )));
                }
                log::info!("Loaded {} reference points from {}", points.len(), path.display());
                Ok(Some(crs::transform_points(&points, *epsg, output_epsg)?))
            }
        }
    }
}

/// Offer detections (made without a reference) to `digitizer` until one is accepted
pub fn digitize_reference(
    catalog: &dyn SceneCatalog,
    region: &Region,
    dates: &DateRange,
    satellites: &[Satellite],
    preprocessor: &Preprocessor,
    extractor: &ShorelineExtractor,
    digitizer: &mut dyn Digitizer,
) -> ShoreResult<Vec<Point>> {
    let scenes = catalog.list_scenes(region, dates, satellites)?;
    if scenes.is_empty() {
        return Err(ShoreError::NoScenes);
    }

    let extractor = extractor.without_reference();
    let mut offered = 0;
    for scene in &scenes {
        let tile = match catalog.fetch_raster(scene) {
            Ok(tile) => tile,
            Err(e) => {
                log::warn!("Skipping {} while digitizing: {}", scene.id, e);
                continue;
            }
        };
        let processed = match preprocessor.process(&tile) {
            Ok(scene) => scene,
            Err(e) => {
                log::warn!("Skipping {} while digitizing: {}", scene.id, e);
                continue;
            }
        };
        let shoreline = match extractor.extract(&processed)? {
            ExtractionOutcome::Detected(s) => s,
            ExtractionOutcome::Discarded(reason) => {
                log::debug!("{} not offered for digitizing: {}", scene.id, reason);
                continue;
            }
        };

        offered += 1;
        match digitizer.review(scene, &shoreline) {
            DigitizeDecision::Accept(points) if !points.is_empty() => return Ok(points),
            DigitizeDecision::Accept(_) | DigitizeDecision::Skip => continue,
            DigitizeDecision::Stop => break,
        }
    }

    Err(ShoreError::NoValidDetections(format!(
        "no reference shoreline accepted from {} scenes ({} detections offered)",
        scenes.len(),
        offered
    )))
}
