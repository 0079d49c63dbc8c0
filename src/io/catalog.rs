use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use crate::types::{DateRange, RasterTile, Region, Satellite, SceneRef, ShoreError, ShoreResult};

/// Source of satellite scenes for a region and time window
pub trait SceneCatalog: Send + Sync {
    /// Scenes intersecting `region` acquired within `dates` by any of `satellites`
    fn list_scenes(
        &self,
        region: &Region,
        dates: &DateRange,
        satellites: &[Satellite],
    ) -> ShoreResult<Vec<SceneRef>>;

    /// Raster data for one listed scene
    fn fetch_raster(&self, scene: &SceneRef) -> ShoreResult<RasterTile>;

    fn count_by_satellite(
        &self,
        region: &Region,
        dates: &DateRange,
        satellites: &[Satellite],
    ) -> ShoreResult<BTreeMap<Satellite, usize>> {
        let mut counts: BTreeMap<Satellite, usize> = satellites.iter().map(|&s| (s, 0)).collect();
        for scene in self.list_scenes(region, dates, satellites)? {
            *counts.entry(scene.satellite).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

/// Deterministic processing order: acquisition time, satellite, id
pub fn sort_scene_refs(scenes: &mut [SceneRef]) {
    scenes.sort_by(|a, b| {
        a.acquired
            .cmp(&b.acquired)
            .then(a.satellite.cmp(&b.satellite))
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// In-memory catalog of pre-built tiles
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    tiles: HashMap<String, RasterTile>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, tile: RasterTile) {
        self.tiles.insert(tile.scene.id.clone(), tile);
    }

    pub fn with_tiles(tiles: impl IntoIterator<Item = RasterTile>) -> Self {
        let mut catalog = Self::new();
        for tile in tiles {
            catalog.add(tile);
        }
        catalog
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }
}

impl SceneCatalog for MemoryCatalog {
    fn list_scenes(
        &self,
        _region: &Region,
        dates: &DateRange,
        satellites: &[Satellite],
    ) -> ShoreResult<Vec<SceneRef>> {
        let mut scenes: Vec<SceneRef> = self
            .tiles
            .values()
            .map(|t| t.scene.clone())
            .filter(|s| dates.contains(&s.acquired) && satellites.contains(&s.satellite))
            .collect();
        sort_scene_refs(&mut scenes);
        Ok(scenes)
    }

    fn fetch_raster(&self, scene: &SceneRef) -> ShoreResult<RasterTile> {
        self.tiles
            .get(&scene.id)
            .cloned()
            .ok_or_else(|| ShoreError::Catalog(format!("Scene {} not in catalog", scene.id)))
    }
}

/// Exponential backoff for catalog calls
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 2000,
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self { max_attempts: 1, ..Self::default() }
    }

    pub fn validate(&self) -> ShoreResult<()> {
        if self.max_attempts == 0 {
            return Err(ShoreError::Config("retry max_attempts must be at least 1".to_string()));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(ShoreError::Config(format!(
                "retry multiplier {} must be >= 1",
                self.multiplier
            )));
        }
        Ok(())
    }

    /// Delay before attempt `attempt + 1` (attempts count from 1)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        Duration::from_millis((self.initial_backoff_ms as f64 * factor).round() as u64)
    }

    /// Run `op`, retrying recoverable errors
    pub fn run<T, F>(&self, what: &str, mut op: F) -> ShoreResult<T>
    where
        F: FnMut() -> ShoreResult<T>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_recoverable() && attempt < max_attempts => {
                    let delay = self.backoff(attempt);
                    log::warn!(
                        "{} failed (attempt {} of {}): {}; retrying in {} ms",
                        what,
                        attempt,
                        max_attempts,
                        e,
                        delay.as_millis()
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Wraps a catalog with retries on recoverable errors
pub struct RetryingCatalog<C> {
    inner: C,
    policy: RetryPolicy,
}

impl<C: SceneCatalog> RetryingCatalog<C> {
    pub fn new(inner: C, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }
}

impl<C: SceneCatalog> SceneCatalog for RetryingCatalog<C> {
    fn list_scenes(
        &self,
        region: &Region,
        dates: &DateRange,
        satellites: &[Satellite],
    ) -> ShoreResult<Vec<SceneRef>> {
        self.policy
            .run("Scene listing", || self.inner.list_scenes(region, dates, satellites))
    }

    fn fetch_raster(&self, scene: &SceneRef) -> ShoreResult<RasterTile> {
        self.policy
            .run(&format!("Fetch of {}", scene.id), || self.inner.fetch_raster(scene))
    }
}
