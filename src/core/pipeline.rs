use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::config::PipelineConfig;
use crate::core::extract::{ExtractionOutcome, ShorelineExtractor};
use crate::core::intersect::{CrossDistanceSeries, TransectIntersector};
use crate::core::postfilter::{FilterReport, PostFilter};
use crate::core::preprocess::Preprocessor;
use crate::core::tide::TidalCorrector;
use crate::io::catalog::{sort_scene_refs, SceneCatalog};
use crate::io::tide::load_tide_series;
use crate::types::{
    DateRange, OutputCollection, Region, Satellite, SceneRef, ShoreError, ShoreResult, ShorelineRecord,
};

/// Cooperative cancellation flag, checked before every scene fetch
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Counters for one pipeline run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub scenes_listed: usize,
    pub processed: usize,
    pub detections: usize,
    /// Discard label -> count
    pub discards: BTreeMap<&'static str, usize>,
    /// Scenes skipped after fetch or preprocessing failures
    pub failures: usize,
    pub cancelled: bool,
}

#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub collection: OutputCollection,
    pub summary: RunSummary,
}

enum SceneOutcome {
    Detected(Box<ShorelineRecord>),
    Discarded(&'static str),
    Failed,
}

/// Lists, fetches and extracts every scene of one site
pub struct ShorelinePipeline {
    catalog: Arc<dyn SceneCatalog>,
    region: Region,
    dates: DateRange,
    satellites: Vec<Satellite>,
    preprocessor: Preprocessor,
    extractor: ShorelineExtractor,
    parallel: bool,
}

impl ShorelinePipeline {
    pub fn new(
        catalog: Arc<dyn SceneCatalog>,
        region: Region,
        dates: DateRange,
        mut satellites: Vec<Satellite>,
        preprocessor: Preprocessor,
        extractor: ShorelineExtractor,
    ) -> ShoreResult<Self> {
        satellites.sort();
        satellites.dedup();
        if satellites.is_empty() {
            return Err(ShoreError::Config("No satellites selected".to_string()));
        }
        Ok(Self {
            catalog,
            region,
            dates,
            satellites,
            preprocessor,
            extractor,
            parallel: false,
        })
    }

    pub fn from_config(config: &PipelineConfig, catalog: Arc<dyn SceneCatalog>) -> ShoreResult<Self> {
        config.validate()?;
        let mut extractor = ShorelineExtractor::new(config.extraction.clone())?;
        if let Some(points) = config.reference_source().resolve(config.extraction.output_epsg)? {
            extractor = extractor.with_reference(points)?;
        }
        Ok(Self::new(
            catalog,
            config.region()?,
            config.date_range()?,
            config.site.satellites.clone(),
            Preprocessor::new(config.preprocess.clone()),
            extractor,
        )?
        .with_parallel(config.output.parallel))
    }

    /// Process scenes concurrently (needs the `parallel` feature)
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        if parallel && !cfg!(feature = "parallel") {
            log::warn!("Parallel processing requested but the parallel feature is disabled");
        }
        self.parallel = parallel;
        self
    }

    pub fn region(&self) -> &Region {
        &self.region
    }

    pub fn dates(&self) -> &DateRange {
        &self.dates
    }

    pub fn satellites(&self) -> &[Satellite] {
        &self.satellites
    }

    pub fn extractor(&self) -> &ShorelineExtractor {
        &self.extractor
    }

    pub fn run(&self, cancel: &CancelToken) -> ShoreResult<PipelineRun> {
        let mut scenes = self.catalog.list_scenes(&self.region, &self.dates, &self.satellites)?;
        sort_scene_refs(&mut scenes);

        let mut summary = RunSummary { scenes_listed: scenes.len(), ..RunSummary::default() };
        if scenes.is_empty() {
            log::warn!("No scenes found between {} and {}", self.dates.start, self.dates.end);
            return Ok(PipelineRun { collection: OutputCollection::new(), summary });
        }
        log::info!("Processing {} scenes ({:?})", scenes.len(), self.satellites);

        let outcomes = if self.parallel {
            self.process_parallel(&scenes, cancel)
        } else {
            self.process_sequential(&scenes, cancel)
        };

        let mut collection = OutputCollection::new();
        for outcome in outcomes {
            let Some(outcome) = outcome else {
                summary.cancelled = true;
                continue;
            };
            summary.processed += 1;
            match outcome {
                SceneOutcome::Detected(record) => {
                    summary.detections += 1;
                    collection.insert(*record);
                }
                SceneOutcome::Discarded(label) => *summary.discards.entry(label).or_insert(0) += 1,
                SceneOutcome::Failed => summary.failures += 1,
            }
        }

        if summary.cancelled {
            log::warn!("Run cancelled after {} of {} scenes", summary.processed, summary.scenes_listed);
        }
        log::info!(
            "{} shorelines from {} scenes ({} discarded, {} failed)",
            summary.detections,
            summary.processed,
            summary.discards.values().sum::<usize>(),
            summary.failures
        );
        Ok(PipelineRun { collection, summary })
    }

    fn process_sequential(&self, scenes: &[SceneRef], cancel: &CancelToken) -> Vec<Option<SceneOutcome>> {
        let mut outcomes = Vec::with_capacity(scenes.len());
        for (i, scene) in scenes.iter().enumerate() {
            if cancel.is_cancelled() {
                outcomes.push(None);
                break;
            }
            log::debug!("Scene {} of {}: {}", i + 1, scenes.len(), scene.id);
            outcomes.push(Some(self.process_scene(scene)));
        }
        outcomes
    }

    #[cfg(feature = "parallel")]
    fn process_parallel(&self, scenes: &[SceneRef], cancel: &CancelToken) -> Vec<Option<SceneOutcome>> {
        scenes
            .par_iter()
            .map(|scene| {
                if cancel.is_cancelled() {
                    None
                } else {
                    Some(self.process_scene(scene))
                }
            })
            .collect()
    }

    #[cfg(not(feature = "parallel"))]
    fn process_parallel(&self, scenes: &[SceneRef], cancel: &CancelToken) -> Vec<Option<SceneOutcome>> {
        self.process_sequential(scenes, cancel)
    }

    fn process_scene(&self, scene_ref: &SceneRef) -> SceneOutcome {
        let tile = match self.catalog.fetch_raster(scene_ref) {
            Ok(tile) => tile,
            Err(e) => {
                log::warn!("Skipping {}: fetch failed: {}", scene_ref.id, e);
                return SceneOutcome::Failed;
            }
        };
        let scene = match self.preprocessor.process(&tile) {
            Ok(scene) => scene,
            Err(e) => {
                log::warn!("Skipping {}: preprocessing failed: {}", scene_ref.id, e);
                return SceneOutcome::Failed;
            }
        };
        match self.extractor.extract(&scene) {
            Ok(ExtractionOutcome::Detected(shoreline)) => SceneOutcome::Detected(Box::new(ShorelineRecord {
                date: scene_ref.acquired,
                satellite: scene_ref.satellite,
                scene_id: scene_ref.id.clone(),
                shoreline,
                geoaccuracy: scene_ref.geoaccuracy,
                cloud_cover: scene.cloud_cover,
            })),
            Ok(ExtractionOutcome::Discarded(reason)) => {
                log::info!("Discarded {}: {}", scene_ref.id, reason);
                SceneOutcome::Discarded(reason.label())
            }
            Err(e) => {
                log::warn!("Skipping {}: extraction failed: {}", scene_ref.id, e);
                SceneOutcome::Failed
            }
        }
    }
}

/// Everything produced for one site
#[derive(Debug, Clone)]
pub struct SiteResults {
    pub run: PipelineRun,
    pub filter_report: FilterReport,
    pub raw: CrossDistanceSeries,
    pub corrected: Option<CrossDistanceSeries>,
    /// Why tidal correction was skipped when the tide record does not cover the detections
    pub correction_error: Option<String>,
}

/// Extraction, post-filtering, intersection and (if configured) tidal correction.
///
/// Transects, the tide table and beach slopes are loaded and checked before any
/// scene is fetched. A tide record that does not cover the detected dates leaves
/// `corrected` empty and records the reason in `correction_error`.
pub fn process_site(
    config: &PipelineConfig,
    catalog: Arc<dyn SceneCatalog>,
    cancel: &CancelToken,
) -> ShoreResult<SiteResults> {
    let pipeline = ShorelinePipeline::from_config(config, catalog)?;
    let output_epsg = config.extraction.output_epsg;
    let transects = config.transects.load(output_epsg)?;
    let post_filter = PostFilter::new(config.postfilter.clone())?;
    let intersector = TransectIntersector::new(config.intersection.clone())?;

    let tide = match &config.tide {
        Some(tide) => {
            let series = load_tide_series(&tide.file, tide.time_column, tide.level_column)?;
            let corrector = TidalCorrector::new(tide.correction.clone())?;
            for transect in &transects {
                tide.correction.slope.for_transect(&transect.name)?;
            }
            Some((corrector, series))
        }
        None => None,
    };

    let mut run = pipeline.run(cancel)?;
    let filter_report = post_filter.apply(&mut run.collection);
    let raw = intersector.intersect(&run.collection, &transects)?;

    let mut correction_error = None;
    let corrected = match &tide {
        Some((corrector, series)) => match corrector.correct(&raw, series) {
            Ok(corrected) => Some(corrected),
            Err(ShoreError::TideCoverage(msg)) => {
                log::warn!("Skipping tidal correction, tide record does not cover {}", msg);
                correction_error = Some(msg);
                None
            }
            Err(e) => return Err(e),
        },
        None => None,
    };

    Ok(SiteResults { run, filter_report, raw, corrected, correction_error })
}
