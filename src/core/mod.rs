//! Core shoreline processing modules

pub mod classify;
pub mod contour;
pub mod crs;
pub mod extract;
pub mod geometry;
pub mod intersect;
pub mod morphology;
pub mod pipeline;
pub mod postfilter;
pub mod preprocess;
pub mod reference;
pub mod tide;

// Re-export main types
pub use classify::{PixelClass, PixelClassifier, SandColor};
pub use crs::Crs;
pub use extract::{DiscardReason, ExtractionOutcome, ExtractionParams, ShorelineExtractor};
pub use intersect::{CrossDistanceSeries, IntersectionParams, Transect, TransectIntersector, TransectSeries};
pub use pipeline::{process_site, CancelToken, PipelineRun, RunSummary, ShorelinePipeline, SiteResults};
pub use postfilter::{FilterReport, PostFilter, PostFilterParams};
pub use preprocess::{PreprocessParams, Preprocessor};
pub use reference::{digitize_reference, DigitizeDecision, Digitizer, FirstDetection, ReferenceSource};
pub use tide::{BeachSlope, TidalCorrector, TidalParams, TideSample, TideSeries};
