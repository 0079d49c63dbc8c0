use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::types::{GeoAccuracy, OutputCollection, Satellite, ShoreError, ShoreResult};

/// Post-filter parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PostFilterParams {
    /// Collapse detections from the same satellite on the same UTC day
    pub remove_duplicates: bool,
    /// Drop detections whose georeferencing RMSE exceeds this (metres)
    pub max_geoaccuracy: Option<f64>,
}

impl Default for PostFilterParams {
    fn default() -> Self {
        Self {
            remove_duplicates: true,
            max_geoaccuracy: Some(10.0),
        }
    }
}

/// Counts of records removed by each pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterReport {
    pub duplicates_removed: usize,
    pub inaccurate_removed: usize,
}

/// Removes duplicate and poorly georeferenced detections
pub struct PostFilter {
    params: PostFilterParams,
}

impl PostFilter {
    pub fn new(params: PostFilterParams) -> ShoreResult<Self> {
        if let Some(t) = params.max_geoaccuracy {
            if !t.is_finite() || t < 0.0 {
                return Err(ShoreError::Config(format!(
                    "max_geoaccuracy {} must be a non-negative number",
                    t
                )));
            }
        }
        Ok(Self { params })
    }

    pub fn apply(&self, collection: &mut OutputCollection) -> FilterReport {
        let mut report = FilterReport::default();
        if self.params.remove_duplicates {
            report.duplicates_removed = remove_duplicates(collection, self.params.max_geoaccuracy);
        }
        if let Some(threshold) = self.params.max_geoaccuracy {
            report.inaccurate_removed = remove_inaccurate_georef(collection, threshold);
        }
        log::info!(
            "Post-filter removed {} duplicates and {} inaccurate detections, {} remain",
            report.duplicates_removed,
            report.inaccurate_removed,
            collection.len()
        );
        report
    }
}

/// Collapse records sharing (UTC day, satellite).
///
/// Records that pass the accuracy threshold (when one is set) outrank records
/// that fail it; among equals the best georeferencing score is kept, and on
/// equal scores the earliest one in collection order wins. Ranking this way
/// makes the pass give the same result whether it runs before or after
/// [`remove_inaccurate_georef`] with the same threshold.
pub fn remove_duplicates(collection: &mut OutputCollection, max_geoaccuracy: Option<f64>) -> usize {
    let rank = |accuracy: &GeoAccuracy| {
        let rejected = max_geoaccuracy.map_or(false, |t| !passes_georef(accuracy, t));
        (rejected, accuracy.score())
    };
    let mut kept: HashMap<(NaiveDate, Satellite), usize> = HashMap::new();
    let mut dropped = HashSet::new();

    for (idx, record) in collection.iter().enumerate() {
        let key = (record.date.date_naive(), record.satellite);
        match kept.get(&key).copied() {
            None => {
                kept.insert(key, idx);
            }
            Some(current) => {
                let current_rank = rank(&collection.records()[current].geoaccuracy);
                if rank(&record.geoaccuracy) < current_rank {
                    dropped.insert(current);
                    kept.insert(key, idx);
                } else {
                    dropped.insert(idx);
                }
            }
        }
    }

    let removed = collection.remove_indices(&dropped);
    if removed > 0 {
        log::debug!("Removed {} duplicate detections", removed);
    }
    removed
}

/// Whether a record with this accuracy survives [`remove_inaccurate_georef`]
pub fn passes_georef(accuracy: &GeoAccuracy, threshold: f64) -> bool {
    match *accuracy {
        GeoAccuracy::Rmse(rmse) => rmse <= threshold,
        GeoAccuracy::Failed => false,
        GeoAccuracy::Passed | GeoAccuracy::Unknown => true,
    }
}

/// Drop failed or RMSE-above-`threshold` records; pass flags and unknowns stay
pub fn remove_inaccurate_georef(collection: &mut OutputCollection, threshold: f64) -> usize {
    let removed = collection.retain(|r| passes_georef(&r.geoaccuracy, threshold));
    if removed > 0 {
        log::debug!("Removed {} detections above {} m georeferencing error", removed, threshold);
    }
    removed
}
