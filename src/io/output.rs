use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::json;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::core::crs;
use crate::core::intersect::CrossDistanceSeries;
use crate::core::pipeline::SiteResults;
use crate::io::geojson;
use crate::types::{OutputCollection, ShoreResult};

fn is_gzip(path: &Path) -> bool {
    path.extension().map_or(false, |e| e.eq_ignore_ascii_case("gz"))
}

/// Save the collection as JSON, gzip-compressed when the path ends in `.gz`
pub fn save_collection(collection: &OutputCollection, path: &Path) -> ShoreResult<()> {
    let file = BufWriter::new(File::create(path)?);
    if is_gzip(path) {
        let mut encoder = GzEncoder::new(file, Compression::default());
        serde_json::to_writer(&mut encoder, collection)?;
        encoder.finish()?.flush()?;
    } else {
        let mut file = file;
        serde_json::to_writer_pretty(&mut file, collection)?;
        file.flush()?;
    }
    log::info!("Saved {} shorelines to {}", collection.len(), path.display());
    Ok(())
}

pub fn load_collection(path: &Path) -> ShoreResult<OutputCollection> {
    let mut text = String::new();
    let reader = BufReader::new(File::open(path)?);
    if is_gzip(path) {
        GzDecoder::new(reader).read_to_string(&mut text)?;
    } else {
        let mut reader = reader;
        reader.read_to_string(&mut text)?;
    }
    Ok(serde_json::from_str(&text)?)
}

/// GeoJSON FeatureCollection with one MultiLineString per date.
///
/// Coordinates stay in `epsg` unless `geographic` is set, in which case they
/// are converted to lon/lat.
pub fn export_geojson(collection: &OutputCollection, epsg: u32, geographic: bool, path: &Path) -> ShoreResult<()> {
    let mut features = Vec::with_capacity(collection.len());
    for record in collection {
        let mut lines = Vec::with_capacity(record.shoreline.segments.len());
        for segment in &record.shoreline.segments {
            let points = if geographic {
                crs::transform_points(&segment.points, epsg, 4326)?
            } else {
                segment.points.clone()
            };
            lines.push(geojson::coords_json(&points));
        }
        features.push(json!({
            "type": "Feature",
            "properties": {
                "date": record.date.to_rfc3339(),
                "satellite": record.satellite.to_string(),
                "scene_id": record.scene_id,
                "geoaccuracy": record.geoaccuracy.to_string(),
                "cloud_cover": record.cloud_cover,
            },
            "geometry": { "type": "MultiLineString", "coordinates": lines },
        }));
    }

    let file = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(file, &geojson::feature_collection(features))?;
    log::info!("Exported {} shorelines to {}", collection.len(), path.display());
    Ok(())
}

/// Delimited table: `dates,<transect names>`, one row per date, empty cell for NaN
pub fn write_time_series<W: Write>(series: &CrossDistanceSeries, mut writer: W) -> ShoreResult<()> {
    let mut header = vec!["dates".to_string()];
    header.extend(series.series.iter().map(|s| s.name.clone()));
    writeln!(writer, "{}", header.join(","))?;

    for (row, date) in series.dates.iter().enumerate() {
        let mut cells = vec![date.to_rfc3339()];
        for s in &series.series {
            let v = s.distances[row];
            cells.push(if v.is_nan() { String::new() } else { format!("{:.4}", v) });
        }
        writeln!(writer, "{}", cells.join(","))?;
    }
    Ok(())
}

pub fn save_time_series(series: &CrossDistanceSeries, path: &Path) -> ShoreResult<()> {
    let mut file = BufWriter::new(File::create(path)?);
    write_time_series(series, &mut file)?;
    file.flush()?;
    log::info!("Wrote {} dates x {} transects to {}", series.dates.len(), series.series.len(), path.display());
    Ok(())
}

/// Write every product of a site run into `directory`; returns the written paths
pub fn write_site_outputs(
    results: &SiteResults,
    site: &str,
    epsg: u32,
    compress: bool,
    directory: &Path,
) -> ShoreResult<Vec<PathBuf>> {
    std::fs::create_dir_all(directory)?;
    let mut written = Vec::new();

    let collection_name = if compress {
        format!("{}_output.json.gz", site)
    } else {
        format!("{}_output.json", site)
    };
    let path = directory.join(collection_name);
    save_collection(&results.run.collection, &path)?;
    written.push(path);

    let path = directory.join(format!("{}_output.geojson", site));
    export_geojson(&results.run.collection, epsg, false, &path)?;
    written.push(path);

    let path = directory.join("transect_time_series.csv");
    save_time_series(&results.raw, &path)?;
    written.push(path);

    if let Some(corrected) = &results.corrected {
        let path = directory.join("transect_time_series_tidally_corrected.csv");
        save_time_series(corrected, &path)?;
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::intersect::TransectSeries;
    use crate::types::{GeoAccuracy, Point, Polyline, Satellite, Shoreline, ShorelineRecord};
    use chrono::{TimeZone, Utc};

    fn collection() -> OutputCollection {
        let mut c = OutputCollection::new();
        c.insert(ShorelineRecord {
            date: Utc.with_ymd_and_hms(2018, 4, 2, 23, 50, 0).unwrap(),
            satellite: Satellite::S2,
            scene_id: "S2_2018".to_string(),
            shoreline: Shoreline::new(vec![Polyline::new(
                vec![Point::new(342000.0, 6267000.0), Point::new(342300.0, 6267400.0)],
                false,
            )]),
            geoaccuracy: GeoAccuracy::Passed,
            cloud_cover: 0.12,
        });
        c
    }

    #[test]
    fn test_collection_round_trip_gzip() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["out.json", "out.json.gz"] {
            let path = dir.path().join(name);
            save_collection(&collection(), &path).unwrap();
            assert_eq!(load_collection(&path).unwrap(), collection());
        }
    }

    #[test]
    fn test_time_series_csv() {
        let series = CrossDistanceSeries {
            dates: vec![
                Utc.with_ymd_and_hms(2018, 4, 2, 0, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2018, 5, 2, 0, 0, 0).unwrap(),
            ],
            satellites: vec![Satellite::S2, Satellite::L8],
            series: vec![
                TransectSeries { name: "NA1".into(), distances: vec![12.5, f64::NAN], point_counts: vec![3, 0] },
                TransectSeries { name: "NA2".into(), distances: vec![-1.0, 2.0], point_counts: vec![1, 1] },
            ],
        };
        let mut buf = Vec::new();
        write_time_series(&series, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "dates,NA1,NA2");
        assert_eq!(lines[1], "2018-04-02T00:00:00+00:00,12.5000,-1.0000");
        assert_eq!(lines[2], "2018-05-02T00:00:00+00:00,,2.0000");
    }

    #[test]
    fn test_geojson_export_geographic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sl.geojson");
        export_geojson(&collection(), 32756, true, &path).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let feature = &doc["features"][0];
        assert_eq!(feature["geometry"]["type"], "MultiLineString");
        assert_eq!(feature["properties"]["satellite"], "S2");
        let lon = feature["geometry"]["coordinates"][0][0][0].as_f64().unwrap();
        assert!((151.0..152.0).contains(&lon));
    }
}
