//! Pipeline configuration loaded from TOML.
//!
//! Every section except `[site]` has defaults, so a minimal file only names the
//! site, its polygon, the date range and the transects:
//!
//! ```toml
//! [site]
//! name = "NARRA"
//! polygon = [[151.296, -33.749], [151.312, -33.749], [151.312, -33.723], [151.296, -33.723]]
//! start_date = "2019-01-01"
//! end_date = "2019-12-31"
//! satellites = ["L8", "S2"]
//!
//! [catalog]
//! kind = "local"
//! directory = "data/NARRA"
//!
//! [transects]
//! file = "NARRA_transects.geojson"
//! ```

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::core::extract::ExtractionParams;
use crate::core::intersect::{IntersectionParams, Transect};
use crate::core::postfilter::PostFilterParams;
use crate::core::preprocess::PreprocessParams;
use crate::core::reference::ReferenceSource;
use crate::core::tide::{TidalCorrector, TidalParams};
use crate::io::catalog::{RetryPolicy, RetryingCatalog, SceneCatalog};
use crate::io::local::LocalSceneCatalog;
use crate::io::stac::StacCatalog;
use crate::io::transects::{load_transects, transects_from_map};
use crate::types::{DateRange, Point, Region, Satellite, ShoreError, ShoreResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    pub name: String,
    /// (lon, lat) vertices; the ring is closed automatically
    pub polygon: Vec<[f64; 2]>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default = "default_satellites")]
    pub satellites: Vec<Satellite>,
    #[serde(default = "default_max_area")]
    pub max_area_km2: f64,
}

fn default_satellites() -> Vec<Satellite> {
    vec![Satellite::L8]
}

fn default_max_area() -> f64 {
    100.0
}

/// Where scenes come from
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CatalogConfig {
    Local {
        directory: PathBuf,
    },
    Stac {
        endpoint: String,
        #[serde(default = "default_timeout")]
        timeout_secs: u64,
        #[serde(default = "default_page_limit")]
        page_limit: usize,
    },
}

fn default_timeout() -> u64 {
    60
}

fn default_page_limit() -> usize {
    100
}

impl Default for CatalogConfig {
    fn default() -> Self {
        CatalogConfig::Local { directory: PathBuf::from("data") }
    }
}

/// Optional reference shoreline; `file` wins over `points`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceConfig {
    pub file: Option<PathBuf>,
    pub points: Vec<[f64; 2]>,
    /// CRS of the file or points, defaults to the output CRS
    pub epsg: Option<u32>,
}

/// Transect geometry: a GeoJSON file or inline coordinates
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransectsConfig {
    pub file: Option<PathBuf>,
    pub coordinates: BTreeMap<String, Vec<[f64; 2]>>,
    /// CRS of the geometry, defaults to the output CRS
    pub epsg: Option<u32>,
}

impl TransectsConfig {
    /// Transects in `output_epsg`
    pub fn load(&self, output_epsg: u32) -> ShoreResult<Vec<Transect>> {
        let source_epsg = self.epsg.unwrap_or(output_epsg);
        match &self.file {
            Some(path) => load_transects(path, source_epsg, output_epsg),
            None => transects_from_map(&self.coordinates, source_epsg, output_epsg),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TideConfig {
    pub file: PathBuf,
    #[serde(default)]
    pub time_column: usize,
    #[serde(default = "default_level_column")]
    pub level_column: usize,
    #[serde(default)]
    pub correction: TidalParams,
}

fn default_level_column() -> usize {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Defaults to `<data dir>/shoresat/<site>`
    pub directory: Option<PathBuf>,
    pub parallel: bool,
    /// Gzip the shoreline collection
    pub compress: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self { directory: None, parallel: false, compress: true }
    }
}

/// Complete configuration of one site run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub site: SiteConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub preprocess: PreprocessParams,
    #[serde(default)]
    pub extraction: ExtractionParams,
    #[serde(default)]
    pub reference: ReferenceConfig,
    #[serde(default)]
    pub postfilter: PostFilterParams,
    #[serde(default)]
    pub intersection: IntersectionParams,
    #[serde(default)]
    pub transects: TransectsConfig,
    #[serde(default)]
    pub tide: Option<TideConfig>,
    #[serde(default)]
    pub output: OutputConfig,
}

impl PipelineConfig {
    pub fn load_from_file(path: &Path) -> ShoreResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&contents).map_err(|e| match e {
            ShoreError::Config(msg) => ShoreError::Config(format!("{}: {}", path.display(), msg)),
            other => other,
        })?;
        log::info!("Loaded configuration for site {} from {}", config.site.name, path.display());
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> ShoreResult<Self> {
        let config: Self = toml::from_str(contents).map_err(|e| ShoreError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check every section, reporting all problems at once
    pub fn validate(&self) -> ShoreResult<()> {
        let mut errors = Vec::new();

        if self.site.name.trim().is_empty() {
            errors.push("site.name must not be empty".to_string());
        }
        if self.site.satellites.is_empty() {
            errors.push("site.satellites must list at least one satellite".to_string());
        }
        if self.site.end_date < self.site.start_date {
            errors.push(format!(
                "site.end_date {} is before site.start_date {}",
                self.site.end_date, self.site.start_date
            ));
        }
        if self.site.max_area_km2.is_nan() || self.site.max_area_km2 <= 0.0 {
            errors.push("site.max_area_km2 must be positive".to_string());
        }
        if let Err(e) = self.region() {
            errors.push(format!("site.polygon: {}", e));
        }

        let checks: [(&str, ShoreResult<()>); 3] = [
            ("retry", self.retry.validate()),
            ("extraction", self.extraction.validate()),
            (
                "tide.correction",
                self.tide.as_ref().map_or(Ok(()), |t| TidalCorrector::new(t.correction.clone()).map(|_| ())),
            ),
        ];
        for (section, result) in checks {
            match result {
                Ok(()) => {}
                Err(ShoreError::Config(msg)) => errors.push(format!("{}: {}", section, msg)),
                Err(e) => errors.push(format!("{}: {}", section, e)),
            }
        }

        if !self.intersection.along_dist.is_finite() || self.intersection.along_dist <= 0.0 {
            errors.push("intersection.along_dist must be positive".to_string());
        }
        if let Some(t) = self.postfilter.max_geoaccuracy {
            if !t.is_finite() || t < 0.0 {
                errors.push("postfilter.max_geoaccuracy must be non-negative".to_string());
            }
        }
        if self.transects.file.is_none() && self.transects.coordinates.is_empty() {
            errors.push("transects: give a file or inline coordinates".to_string());
        }
        if let Some(tide) = &self.tide {
            if tide.time_column == tide.level_column {
                errors.push("tide.time_column and tide.level_column must differ".to_string());
            }
        }
        if let CatalogConfig::Stac { endpoint, .. } = &self.catalog {
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                errors.push(format!("catalog.endpoint {} is not an http(s) URL", endpoint));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ShoreError::Config(errors.join("; ")))
        }
    }

    pub fn region(&self) -> ShoreResult<Region> {
        Region::new(self.site.polygon.clone(), self.site.max_area_km2)
    }

    pub fn date_range(&self) -> ShoreResult<DateRange> {
        DateRange::from_dates(self.site.start_date, self.site.end_date)
    }

    pub fn reference_source(&self) -> ReferenceSource {
        let epsg = self.reference.epsg.unwrap_or(self.extraction.output_epsg);
        match &self.reference.file {
            Some(path) => ReferenceSource::File { path: path.clone(), epsg },
            None if self.reference.points.is_empty() => ReferenceSource::None,
            None => {
                let points: Vec<Point> = self.reference.points.iter().copied().map(Point::from).collect();
                match crate::core::crs::transform_points(&points, epsg, self.extraction.output_epsg) {
                    Ok(points) => ReferenceSource::Points(points),
                    Err(e) => {
                        log::warn!("Ignoring reference points: {}", e);
                        ReferenceSource::None
                    }
                }
            }
        }
    }

    /// Catalog described by `[catalog]`, wrapped with the `[retry]` policy
    pub fn build_catalog(&self) -> ShoreResult<Arc<dyn SceneCatalog>> {
        let policy = self.retry.clone();
        Ok(match &self.catalog {
            CatalogConfig::Local { directory } => {
                Arc::new(RetryingCatalog::new(LocalSceneCatalog::new(directory.clone())?, policy))
            }
            CatalogConfig::Stac { endpoint, timeout_secs, page_limit } => {
                Arc::new(RetryingCatalog::new(StacCatalog::new(endpoint, *timeout_secs, *page_limit)?, policy))
            }
        })
    }

    pub fn output_directory(&self) -> PathBuf {
        self.output.directory.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("shoresat")
                .join(&self.site.name)
        })
    }
}
