//! Minimal GeoJSON reading and writing for line geometries

use serde_json::{json, Value};
use std::path::Path;

use crate::types::{Point, ShoreError, ShoreResult};

/// LineString feature read from a FeatureCollection
#[derive(Debug, Clone)]
pub struct LineFeature {
    pub name: Option<String>,
    pub points: Vec<Point>,
}

pub fn read_line_features(path: &Path) -> ShoreResult<Vec<LineFeature>> {
    let text = std::fs::read_to_string(path)?;
    parse_line_features(&text).map_err(|e| match e {
        ShoreError::Config(msg) => ShoreError::Config(format!("{}: {}", path.display(), msg)),
        other => other,
    })
}

/// Parse every LineString (or MultiLineString part) of a GeoJSON document
pub fn parse_line_features(text: &str) -> ShoreResult<Vec<LineFeature>> {
    let doc: Value = serde_json::from_str(text)?;
    let features: Vec<&Value> = match doc.get("type").and_then(Value::as_str) {
        Some("FeatureCollection") => doc
            .get("features")
            .and_then(Value::as_array)
            .ok_or_else(|| ShoreError::Config("FeatureCollection without features".to_string()))?
            .iter()
            .collect(),
        Some("Feature") => vec![&doc],
        other => {
            return Err(ShoreError::Config(format!(
                "Expected a GeoJSON Feature or FeatureCollection, found {:?}",
                other
            )))
        }
    };

    let mut lines = Vec::new();
    for (idx, feature) in features.iter().enumerate() {
        let name = feature
            .get("properties")
            .and_then(|p| p.get("name"))
            .and_then(|n| match n {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            });
        let geometry = feature
            .get("geometry")
            .ok_or_else(|| ShoreError::Config(format!("Feature {} has no geometry", idx)))?;
        let coords = geometry.get("coordinates").unwrap_or(&Value::Null);
        match geometry.get("type").and_then(Value::as_str) {
            Some("LineString") => lines.push(LineFeature { name, points: parse_coords(coords, idx)? }),
            Some("MultiLineString") => {
                let parts = coords
                    .as_array()
                    .ok_or_else(|| ShoreError::Config(format!("Feature {} has malformed coordinates", idx)))?;
                for part in parts {
                    lines.push(LineFeature { name: name.clone(), points: parse_coords(part, idx)? });
                }
            }
            other => {
                return Err(ShoreError::Config(format!(
                    "Feature {} is a {:?}, expected a LineString",
                    idx, other
                )))
            }
        }
    }
    Ok(lines)
}

fn parse_coords(coords: &Value, idx: usize) -> ShoreResult<Vec<Point>> {
    let malformed = || ShoreError::Config(format!("Feature {} has malformed coordinates", idx));
    coords
        .as_array()
        .ok_or_else(malformed)?
        .iter()
        .map(|c| {
            let pair = c.as_array().filter(|a| a.len() >= 2).ok_or_else(malformed)?;
            let x = pair[0].as_f64().ok_or_else(malformed)?;
            let y = pair[1].as_f64().ok_or_else(malformed)?;
            Ok(Point::new(x, y))
        })
        .collect()
}

pub(crate) fn coords_json(points: &[Point]) -> Value {
    Value::Array(points.iter().map(|p| json!([p.x, p.y])).collect())
}

/// Single LineString feature
pub fn line_feature(points: &[Point], properties: Value) -> Value {
    json!({
        "type": "Feature",
        "properties": properties,
        "geometry": { "type": "LineString", "coordinates": coords_json(points) },
    })
}

pub fn feature_collection(features: Vec<Value>) -> Value {
    json!({ "type": "FeatureCollection", "features": features })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_collection() {
        let text = r#"{
            "type": "FeatureCollection",
            "features": [
                {"type": "Feature", "properties": {"name": "NA1"},
                 "geometry": {"type": "LineString", "coordinates": [[0, 0], [10, 5], [20, 10]]}},
                {"type": "Feature", "properties": {},
                 "geometry": {"type": "LineString", "coordinates": [[1.5, 2.5], [3, 4]]}}
            ]
        }"#;
        let lines = parse_line_features(text).unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].name.as_deref(), Some("NA1"));
        assert_eq!(lines[0].points[2], Point::new(20.0, 10.0));
        assert!(lines[1].name.is_none());
    }

    #[test]
    fn test_rejects_polygon() {
        let text = r#"{"type": "Feature", "properties": {},
            "geometry": {"type": "Point", "coordinates": [0, 0]}}"#;
        assert!(matches!(parse_line_features(text), Err(ShoreError::Config(_))));
    }

    #[test]
    fn test_line_feature_shape() {
        let f = line_feature(&[Point::new(1.0, 2.0), Point::new(3.0, 4.0)], json!({"name": "a"}));
        assert_eq!(f["geometry"]["coordinates"][1][0], json!(3.0));
    }
}
