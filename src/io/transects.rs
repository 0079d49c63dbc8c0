use std::collections::BTreeMap;
use std::path::Path;

use crate::core::crs;
use crate::core::intersect::Transect;
use crate::io::geojson::{self, LineFeature};
use crate::types::{Point, ShoreError, ShoreResult};

/// Load transects from a GeoJSON file of LineStrings.
///
/// Names come from the `name` property, else the feature index. The first and
/// last vertex of each line are the landward origin and the seaward end.
/// Coordinates in `source_epsg` are reprojected to `target_epsg`.
pub fn load_transects(path: &Path, source_epsg: u32, target_epsg: u32) -> ShoreResult<Vec<Transect>> {
    let features = geojson::read_line_features(path)?;
    let transects = from_features(features, source_epsg, target_epsg)?;
    log::info!("Loaded {} transects from {}", transects.len(), path.display());
    Ok(transects)
}

fn from_features(features: Vec<LineFeature>, source_epsg: u32, target_epsg: u32) -> ShoreResult<Vec<Transect>> {
    let mut transects = Vec::with_capacity(features.len());
    for (idx, feature) in features.into_iter().enumerate() {
        let name = feature.name.unwrap_or_else(|| idx.to_string());
        transects.push(transect_from_points(name, &feature.points, source_epsg, target_epsg)?);
    }
    ensure_unique(&transects)?;
    Ok(transects)
}

/// Build transects from a map of name to vertex list (BTreeMap keeps name order)
pub fn transects_from_map(
    map: &BTreeMap<String, Vec<[f64; 2]>>,
    source_epsg: u32,
    target_epsg: u32,
) -> ShoreResult<Vec<Transect>> {
    map.iter()
        .map(|(name, coords)| {
            let points: Vec<Point> = coords.iter().copied().map(Point::from).collect();
            transect_from_points(name.clone(), &points, source_epsg, target_epsg)
        })
        .collect()
}

/// Build transects from ordered (name, origin, end) triples
pub fn transects_from_pairs(
    pairs: &[(String, [f64; 2], [f64; 2])],
    source_epsg: u32,
    target_epsg: u32,
) -> ShoreResult<Vec<Transect>> {
    let transects = pairs
        .iter()
        .map(|(name, a, b)| {
            transect_from_points(name.clone(), &[Point::from(*a), Point::from(*b)], source_epsg, target_epsg)
        })
        .collect::<ShoreResult<Vec<_>>>()?;
    ensure_unique(&transects)?;
    Ok(transects)
}

fn transect_from_points(name: String, points: &[Point], source_epsg: u32, target_epsg: u32) -> ShoreResult<Transect> {
    if points.len() < 2 {
        return Err(ShoreError::Config(format!(
            "Transect {} needs at least 2 points, got {}",
            name,
            points.len()
        )));
    }
    let ends = crs::transform_points(&[points[0], points[points.len() - 1]], source_epsg, target_epsg)?;
    Transect::new(name, ends[0], ends[1]).map_err(|e| ShoreError::Config(e.to_string()))
}

fn ensure_unique(transects: &[Transect]) -> ShoreResult<()> {
    for (i, t) in transects.iter().enumerate() {
        if transects[..i].iter().any(|o| o.name == t.name) {
            return Err(ShoreError::Config(format!("Duplicate transect name: {}", t.name)));
        }
    }
    Ok(())
}
