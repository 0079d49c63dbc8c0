use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::intersect::CrossDistanceSeries;
use crate::types::{ShoreError, ShoreResult};

/// Water level at one instant (metres above datum)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TideSample {
    pub time: DateTime<Utc>,
    pub level: f64,
}

/// Sorted tide record with unique timestamps
#[derive(Debug, Clone)]
pub struct TideSeries {
    samples: Vec<TideSample>,
}

impl TideSeries {
    pub fn new(mut samples: Vec<TideSample>) -> ShoreResult<Self> {
        if samples.is_empty() {
            return Err(ShoreError::Config("Tide series is empty".to_string()));
        }
        if let Some(bad) = samples.iter().find(|s| !s.level.is_finite()) {
            return Err(ShoreError::Config(format!("Non-finite tide level at {}", bad.time)));
        }
        samples.sort_by_key(|s| s.time);
        if let Some(pair) = samples.windows(2).find(|w| w[0].time == w[1].time) {
            return Err(ShoreError::Config(format!("Duplicate tide timestamp {}", pair[0].time)));
        }
        Ok(Self { samples })
    }

    pub fn samples(&self) -> &[TideSample] {
        &self.samples
    }

    pub fn span(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        (self.samples[0].time, self.samples[self.samples.len() - 1].time)
    }

    /// Nearest sample in time; the earlier one wins when equidistant
    pub fn nearest(&self, t: DateTime<Utc>) -> &TideSample {
        let idx = self.samples.partition_point(|s| s.time < t);
        if idx == 0 {
            return &self.samples[0];
        }
        if idx == self.samples.len() {
            return &self.samples[idx - 1];
        }
        let before = &self.samples[idx - 1];
        let after = &self.samples[idx];
        if after.time - t < t - before.time {
            after
        } else {
            before
        }
    }

    /// Level at `t`, failing outside the record or beyond `max_gap` from a sample
    pub fn level_at(&self, t: DateTime<Utc>, max_gap: Option<Duration>) -> ShoreResult<f64> {
        let (first, last) = self.span();
        if t < first || t > last {
            return Err(ShoreError::TideCoverage(format!(
                "{} (tide record spans {} to {})",
                t, first, last
            )));
        }
        let sample = self.nearest(t);
        if let Some(gap) = max_gap {
            let offset = if sample.time > t { sample.time - t } else { t - sample.time };
            if offset > gap {
                return Err(ShoreError::TideCoverage(format!(
                    "{} (nearest sample is {} minutes away)",
                    t,
                    offset.num_minutes()
                )));
            }
        }
        Ok(sample.level)
    }
}

/// Beach-face slope, uniform or per transect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BeachSlope {
    Uniform(f64),
    PerTransect(BTreeMap<String, f64>),
}

impl BeachSlope {
    pub fn for_transect(&self, name: &str) -> ShoreResult<f64> {
        match self {
            BeachSlope::Uniform(slope) => Ok(*slope),
            BeachSlope::PerTransect(map) => map
                .get(name)
                .copied()
                .ok_or_else(|| ShoreError::Config(format!("No beach slope for transect {}", name))),
        }
    }

    pub fn validate(&self) -> ShoreResult<()> {
        let check = |label: &str, s: f64| {
            if s.is_finite() && s > 0.0 {
                Ok(())
            } else {
                Err(ShoreError::Config(format!("Beach slope {} for {} must be positive", s, label)))
            }
        };
        match self {
            BeachSlope::Uniform(s) => check("all transects", *s),
            BeachSlope::PerTransect(map) => map.iter().try_for_each(|(name, s)| check(name, *s)),
        }
    }
}

impl Default for BeachSlope {
    fn default() -> Self {
        BeachSlope::Uniform(0.1)
    }
}

/// Tidal correction parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TidalParams {
    /// Datum the shorelines are projected to (metres)
    pub reference_elevation: f64,
    pub slope: BeachSlope,
    /// Largest accepted gap between an acquisition and its tide sample
    pub max_time_gap_minutes: Option<i64>,
}

impl Default for TidalParams {
    fn default() -> Self {
        Self {
            reference_elevation: 0.0,
            slope: BeachSlope::default(),
            max_time_gap_minutes: None,
        }
    }
}

/// Projects cross-shore distances onto a common water level
pub struct TidalCorrector {
    params: TidalParams,
}

impl TidalCorrector {
    pub fn new(params: TidalParams) -> ShoreResult<Self> {
        params.slope.validate()?;
        if !params.reference_elevation.is_finite() {
            return Err(ShoreError::Config("reference_elevation must be finite".to_string()));
        }
        if matches!(params.max_time_gap_minutes, Some(m) if m < 0) {
            return Err(ShoreError::Config("max_time_gap_minutes must not be negative".to_string()));
        }
        Ok(Self { params })
    }

    pub fn params(&self) -> &TidalParams {
        &self.params
    }

    pub fn correct(&self, raw: &CrossDistanceSeries, tides: &TideSeries) -> ShoreResult<CrossDistanceSeries> {
        log::info!(
            "Tidal correction of {} dates (reference elevation {} m)",
            raw.dates.len(),
            self.params.reference_elevation
        );
        self.shift(raw, tides, 1.0)
    }

    /// Undo [`TidalCorrector::correct`]
    pub fn revert(&self, corrected: &CrossDistanceSeries, tides: &TideSeries) -> ShoreResult<CrossDistanceSeries> {
        self.shift(corrected, tides, -1.0)
    }

    fn shift(&self, input: &CrossDistanceSeries, tides: &TideSeries, sign: f64) -> ShoreResult<CrossDistanceSeries> {
        let max_gap = self.params.max_time_gap_minutes.map(Duration::minutes);
        let levels = input
            .dates
            .iter()
            .map(|&d| tides.level_at(d, max_gap))
            .collect::<ShoreResult<Vec<f64>>>()?;

        let mut output = input.clone();
        for series in &mut output.series {
            let slope = self.params.slope.for_transect(&series.name)?;
            let shifts = horizontal_shift(&levels, self.params.reference_elevation, slope);
            for (value, shift) in series.distances.iter_mut().zip(shifts) {
                *value += sign * shift;
            }
        }
        Ok(output)
    }
}

/// Cross-shore shift of each water level: (level - reference) / slope
pub fn horizontal_shift(levels: &[f64], reference_elevation: f64, slope: f64) -> Vec<f64> {
    levels.iter().map(|l| (l - reference_elevation) / slope).collect()
}
