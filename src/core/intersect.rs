use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::core::geometry::median;
use crate::types::{OutputCollection, Point, Satellite, ShoreError, ShoreResult};

/// Shore-normal line segment, landward origin first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transect {
    pub name: String,
    pub origin: Point,
    pub end: Point,
}

impl Transect {
    pub fn new(name: impl Into<String>, origin: Point, end: Point) -> ShoreResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ShoreError::InvalidGeometry("Transect name is empty".to_string()));
        }
        if ![origin.x, origin.y, end.x, end.y].iter().all(|v| v.is_finite()) {
            return Err(ShoreError::InvalidGeometry(format!(
                "Transect {} has non-finite coordinates",
                name
            )));
        }
        if origin.distance(&end) <= f64::EPSILON {
            return Err(ShoreError::InvalidGeometry(format!(
                "Transect {} has zero length",
                name
            )));
        }
        Ok(Self { name, origin, end })
    }

    /// Unit vector from origin towards the seaward end
    pub fn direction(&self) -> (f64, f64) {
        let len = self.length();
        ((self.end.x - self.origin.x) / len, (self.end.y - self.origin.y) / len)
    }

    pub fn length(&self) -> f64 {
        self.origin.distance(&self.end)
    }
}

/// Intersection parameters.
///
/// A point is used for a transect when it lies within `along_dist` of the
/// transect line and its projection falls between one transect length behind
/// the origin and two transect lengths beyond it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntersectionParams {
    /// Half-width (metres) of the along-shore window around each transect
    pub along_dist: f64,
}

impl Default for IntersectionParams {
    fn default() -> Self {
        Self { along_dist: 25.0 }
    }
}

/// Cross-shore distances for one transect, aligned with the series dates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransectSeries {
    pub name: String,
    pub distances: Vec<f64>,
    /// Shoreline points that fell in the window, per date
    pub point_counts: Vec<usize>,
}

/// Per-transect, per-date cross-shore distances
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossDistanceSeries {
    pub dates: Vec<DateTime<Utc>>,
    pub satellites: Vec<Satellite>,
    /// In transect order
    pub series: Vec<TransectSeries>,
}

impl CrossDistanceSeries {
    pub fn get(&self, name: &str) -> Option<&TransectSeries> {
        self.series.iter().find(|s| s.name == name)
    }

    pub fn transect_names(&self) -> Vec<&str> {
        self.series.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }
}

/// Computes cross-shore distances along transects
pub struct TransectIntersector {
    params: IntersectionParams,
}

impl TransectIntersector {
    pub fn new(params: IntersectionParams) -> ShoreResult<Self> {
        if !params.along_dist.is_finite() || params.along_dist <= 0.0 {
            return Err(ShoreError::Config(format!(
                "along_dist must be positive, got {}",
                params.along_dist
            )));
        }
        Ok(Self { params })
    }

    pub fn standard() -> Self {
        Self { params: IntersectionParams::default() }
    }

    pub fn intersect(
        &self,
        collection: &OutputCollection,
        transects: &[Transect],
    ) -> ShoreResult<CrossDistanceSeries> {
        let mut names = HashSet::new();
        for t in transects {
            if !names.insert(t.name.as_str()) {
                return Err(ShoreError::Config(format!("Duplicate transect name: {}", t.name)));
            }
        }

        log::info!(
            "Intersecting {} shorelines with {} transects (along_dist {} m)",
            collection.len(),
            transects.len(),
            self.params.along_dist
        );

        let mut series: Vec<TransectSeries> = transects
            .iter()
            .map(|t| TransectSeries {
                name: t.name.clone(),
                distances: Vec::with_capacity(collection.len()),
                point_counts: Vec::with_capacity(collection.len()),
            })
            .collect();

        for record in collection {
            let points: Vec<Point> = record.shoreline.points().copied().collect();
            for (transect, out) in transects.iter().zip(series.iter_mut()) {
                let (distance, count) = cross_distance(&points, transect, self.params.along_dist);
                out.distances.push(distance);
                out.point_counts.push(count);
            }
        }

        for s in &series {
            let missing = s.distances.iter().filter(|d| d.is_nan()).count();
            if missing > 0 {
                log::debug!("Transect {}: {} of {} dates without intersection", s.name, missing, s.distances.len());
            }
        }

        Ok(CrossDistanceSeries {
            dates: collection.dates(),
            satellites: collection.iter().map(|r| r.satellite).collect(),
            series,
        })
    }
}

/// Median signed distance from the transect origin of the points lying within
/// `along_dist` of the transect line, and how many points were used.
///
/// Projections are limited to `[-length, 2 * length]` of the transect.
/// NaN only when no point falls in the window.
pub fn cross_distance(points: &[Point], transect: &Transect, along_dist: f64) -> (f64, usize) {
    let (ux, uy) = transect.direction();
    let length = transect.length();
    let reach = -length..=2.0 * length;
    let mut along: Vec<f64> = points
        .iter()
        .filter_map(|p| {
            let dx = p.x - transect.origin.x;
            let dy = p.y - transect.origin.y;
            let perpendicular = (dx * uy - dy * ux).abs();
            let projection = dx * ux + dy * uy;
            (perpendicular <= along_dist && reach.contains(&projection)).then_some(projection)
        })
        .collect();

    let count = along.len();
    (median(&mut along).unwrap_or(f64::NAN), count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GeoAccuracy, Polyline, Shoreline, ShorelineRecord};
    use approx::assert_abs_diff_eq;
    use chrono::TimeZone;

    fn collection_with(points: Vec<Point>) -> OutputCollection {
        let mut c = OutputCollection::new();
        c.insert(ShorelineRecord {
            date: Utc.with_ymd_and_hms(2019, 6, 1, 0, 0, 0).unwrap(),
            satellite: Satellite::S2,
            scene_id: "s".to_string(),
            shoreline: Shoreline::new(vec![Polyline::new(points, false)]),
            geoaccuracy: GeoAccuracy::Passed,
            cloud_cover: 0.0,
        });
        c
    }

    #[test]
    fn test_median_resists_outlier() {
        let t = Transect::new("t", Point::new(0.0, 0.0), Point::new(0.0, 100.0)).unwrap();
        let points = vec![
            Point::new(-5.0, 40.0),
            Point::new(0.0, 41.0),
            Point::new(5.0, 42.0),
            Point::new(2.0, 95.0),
            Point::new(200.0, 10.0),
        ];
        let (d, n) = cross_distance(&points, &t, 10.0);
        assert_eq!(n, 4);
        assert_abs_diff_eq!(d, 41.5, epsilon = 1e-9);
    }

    #[test]
    fn test_empty_window_is_nan() {
        let t = Transect::new("t", Point::new(0.0, 0.0), Point::new(100.0, 0.0)).unwrap();
        let (d, n) = cross_distance(&[Point::new(50.0, 30.0)], &t, 25.0);
        assert!(d.is_nan());
        assert_eq!(n, 0);
    }

    #[test]
    fn test_landward_points_are_negative() {
        let t = Transect::new("t", Point::new(0.0, 0.0), Point::new(100.0, 0.0)).unwrap();
        let (d, _) = cross_distance(&[Point::new(-20.0, 1.0)], &t, 25.0);
        assert_abs_diff_eq!(d, -20.0, epsilon = 1e-9);
    }

    #[test]
    fn test_far_points_on_the_line_are_ignored() {
        let t = Transect::new("t", Point::new(0.0, 0.0), Point::new(100.0, 0.0)).unwrap();
        let points = vec![
            Point::new(-150.0, 0.0),
            Point::new(60.0, 2.0),
            Point::new(250.0, -1.0),
            Point::new(5_000.0, 0.0),
        ];
        let (d, n) = cross_distance(&points, &t, 25.0);
        assert_eq!(n, 1);
        assert_abs_diff_eq!(d, 60.0, epsilon = 1e-9);

        let (d, n) = cross_distance(&[Point::new(-100.0, 3.0), Point::new(200.0, 3.0)], &t, 25.0);
        assert_eq!(n, 2);
        assert_abs_diff_eq!(d, 50.0, epsilon = 1e-9);

        let (d, n) = cross_distance(&[Point::new(-101.0, 0.0), Point::new(201.0, 0.0)], &t, 25.0);
        assert_eq!(n, 0);
        assert!(d.is_nan());
    }

    #[test]
    fn test_diagonal_transects() {
        // Shoreline along y = 500 - x, transects along y = x from the origin
        let shoreline: Vec<Point> = (0..=100).map(|i| Point::new(i as f64 * 5.0, 500.0 - i as f64 * 5.0)).collect();
        let transects = vec![
            Transect::new("a", Point::new(0.0, 0.0), Point::new(400.0, 400.0)).unwrap(),
            Transect::new("b", Point::new(100.0, -100.0), Point::new(500.0, 300.0)).unwrap(),
        ];
        let series = TransectIntersector::standard()
            .intersect(&collection_with(shoreline), &transects)
            .unwrap();

        let expected = 250.0 * 2f64.sqrt();
        assert_abs_diff_eq!(series.get("a").unwrap().distances[0], expected, epsilon = 1e-6);
        assert_abs_diff_eq!(series.get("b").unwrap().distances[0], expected, epsilon = 1e-6);
        assert_eq!(series.transect_names(), vec!["a", "b"]);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let t = Transect::new("x", Point::new(0.0, 0.0), Point::new(1.0, 0.0)).unwrap();
        let result = TransectIntersector::standard().intersect(&OutputCollection::new(), &[t.clone(), t]);
        assert!(matches!(result, Err(ShoreError::Config(_))));
    }

    #[test]
    fn test_invalid_transects() {
        assert!(Transect::new("z", Point::new(1.0, 1.0), Point::new(1.0, 1.0)).is_err());
        assert!(Transect::new("", Point::new(0.0, 0.0), Point::new(1.0, 1.0)).is_err());
        assert!(TransectIntersector::new(IntersectionParams { along_dist: 0.0 }).is_err());
    }
}
