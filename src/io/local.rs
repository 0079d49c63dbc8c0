use chrono::{DateTime, NaiveDateTime, Utc};
use ndarray::Array2;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::io::catalog::{sort_scene_refs, SceneCatalog};
use crate::types::{
    Band, BandRaster, BoundingBox, DateRange, GeoAccuracy, GeoTransform, Mask, RasterTile, Region, Satellite,
    SceneRef, ShoreError, ShoreResult,
};

/// Raw little-endian array stored next to a sidecar
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArrayFile {
    pub file: String,
    pub rows: usize,
    pub cols: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BandFile {
    pub band: Band,
    #[serde(flatten)]
    pub array: ArrayFile,
}

/// JSON sidecar describing one stored scene
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneSidecar {
    pub cloud_cover: f64,
    pub geoaccuracy: GeoAccuracy,
    pub epsg: u32,
    pub geo_transform: [f64; 6],
    #[serde(default)]
    pub footprint: Option<BoundingBox>,
    pub bands: Vec<BandFile>,
    pub cloud_mask: ArrayFile,
    #[serde(default)]
    pub nodata_mask: Option<ArrayFile>,
}

/// Scenes stored on disk as `<stem>.json` sidecars plus raw band files.
///
/// Stems follow `YYYY-MM-DD-HH-MM-SS_<SAT>_<site>`; band files hold f32 values
/// and mask files one byte per pixel (non-zero = set).
pub struct LocalSceneCatalog {
    directory: PathBuf,
    pattern: Regex,
}

impl LocalSceneCatalog {
    pub fn new(directory: impl Into<PathBuf>) -> ShoreResult<Self> {
        let directory = directory.into();
        if !directory.is_dir() {
            return Err(ShoreError::Config(format!(
                "Scene directory {} does not exist",
                directory.display()
            )));
        }
        Ok(Self { directory, pattern: stem_pattern()? })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn parse_stem(&self, stem: &str) -> Option<(DateTime<Utc>, Satellite)> {
        let caps = self.pattern.captures(stem)?;
        let acquired = NaiveDateTime::parse_from_str(&caps[1], "%Y-%m-%d-%H-%M-%S").ok()?.and_utc();
        let satellite = caps[2].parse().ok()?;
        Some((acquired, satellite))
    }

    fn read_sidecar(&self, stem: &str) -> ShoreResult<SceneSidecar> {
        let path = self.directory.join(format!("{}.json", stem));
        let text = std::fs::read_to_string(&path)?;
        serde_json::from_str(&text).map_err(|e| ShoreError::Catalog(format!("{}: {}", path.display(), e)))
    }

    fn read_f32(&self, array: &ArrayFile) -> ShoreResult<Array2<f32>> {
        let bytes = std::fs::read(self.directory.join(&array.file))?;
        if bytes.len() != array.rows * array.cols * 4 {
            return Err(ShoreError::Raster(format!(
                "{} holds {} bytes, expected {}x{} f32 values",
                array.file,
                bytes.len(),
                array.rows,
                array.cols
            )));
        }
        let values: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Array2::from_shape_vec((array.rows, array.cols), values)
            .map_err(|e| ShoreError::Raster(format!("{}: {}", array.file, e)))
    }

    fn read_mask(&self, array: &ArrayFile) -> ShoreResult<Mask> {
        let bytes = std::fs::read(self.directory.join(&array.file))?;
        if bytes.len() != array.rows * array.cols {
            return Err(ShoreError::Raster(format!(
                "{} holds {} bytes, expected {}x{} mask",
                array.file,
                bytes.len(),
                array.rows,
                array.cols
            )));
        }
        Array2::from_shape_vec((array.rows, array.cols), bytes.into_iter().map(|b| b != 0).collect())
            .map_err(|e| ShoreError::Raster(format!("{}: {}", array.file, e)))
    }
}

fn stem_pattern() -> ShoreResult<Regex> {
    Regex::new(r"^(\d{4}-\d{2}-\d{2}-\d{2}-\d{2}-\d{2})_(L5|L7|L8|L9|S2)_(.+)$")
        .map_err(|e| ShoreError::Config(format!("Invalid scene name pattern: {}", e)))
}

impl SceneCatalog for LocalSceneCatalog {
    fn list_scenes(
        &self,
        region: &Region,
        dates: &DateRange,
        satellites: &[Satellite],
    ) -> ShoreResult<Vec<SceneRef>> {
        let bbox = region.bounding_box();
        let mut scenes = Vec::new();

        for entry in std::fs::read_dir(&self.directory)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let Some((acquired, satellite)) = self.parse_stem(stem) else {
                log::debug!("Ignoring {}: not a scene file name", path.display());
                continue;
            };
            if !dates.contains(&acquired) || !satellites.contains(&satellite) {
                continue;
            }
            let sidecar = self.read_sidecar(stem)?;
            if let Some(footprint) = &sidecar.footprint {
                if !footprint.intersects(&bbox) {
                    continue;
                }
            }
            scenes.push(SceneRef {
                id: stem.to_string(),
                satellite,
                acquired,
                cloud_cover: sidecar.cloud_cover,
                geoaccuracy: sidecar.geoaccuracy,
            });
        }

        sort_scene_refs(&mut scenes);
        log::info!("Found {} scenes in {}", scenes.len(), self.directory.display());
        Ok(scenes)
    }

    fn fetch_raster(&self, scene: &SceneRef) -> ShoreResult<RasterTile> {
        let sidecar = self.read_sidecar(&scene.id)?;
        let bands = sidecar
            .bands
            .iter()
            .map(|b| Ok(BandRaster { band: b.band, data: self.read_f32(&b.array)? }))
            .collect::<ShoreResult<Vec<_>>>()?;
        let cloud_mask = self.read_mask(&sidecar.cloud_mask)?;
        let nodata_mask = sidecar.nodata_mask.as_ref().map(|m| self.read_mask(m)).transpose()?;

        Ok(RasterTile {
            scene: scene.clone(),
            bands,
            cloud_mask,
            nodata_mask,
            geo_transform: GeoTransform::from_gdal(sidecar.geo_transform),
            epsg: sidecar.epsg,
        })
    }
}

/// Store `tile` under `directory`, returning the scene as it will be listed
pub fn write_tile(directory: &Path, site: &str, tile: &RasterTile) -> ShoreResult<SceneRef> {
    std::fs::create_dir_all(directory)?;
    let stem = format!(
        "{}_{}_{}",
        tile.scene.acquired.format("%Y-%m-%d-%H-%M-%S"),
        tile.scene.satellite,
        site
    );

    let mut bands = Vec::with_capacity(tile.bands.len());
    for band in &tile.bands {
        let file = format!("{}_{:?}.f32", stem, band.band).to_lowercase();
        let bytes: Vec<u8> = band.data.iter().flat_map(|v| v.to_le_bytes()).collect();
        std::fs::write(directory.join(&file), bytes)?;
        let (rows, cols) = band.data.dim();
        bands.push(BandFile { band: band.band, array: ArrayFile { file, rows, cols } });
    }

    let write_mask = |mask: &Mask, suffix: &str| -> ShoreResult<ArrayFile> {
        let file = format!("{}_{}.u8", stem, suffix).to_lowercase();
        let bytes: Vec<u8> = mask.iter().map(|&m| m as u8).collect();
        std::fs::write(directory.join(&file), bytes)?;
        let (rows, cols) = mask.dim();
        Ok(ArrayFile { file, rows, cols })
    };
    let cloud_mask = write_mask(&tile.cloud_mask, "cloud")?;
    let nodata_mask = tile.nodata_mask.as_ref().map(|m| write_mask(m, "nodata")).transpose()?;

    let gt = tile.geo_transform;
    let sidecar = SceneSidecar {
        cloud_cover: tile.scene.cloud_cover,
        geoaccuracy: tile.scene.geoaccuracy,
        epsg: tile.epsg,
        geo_transform: [
            gt.top_left_x,
            gt.pixel_width,
            gt.rotation_x,
            gt.top_left_y,
            gt.rotation_y,
            gt.pixel_height,
        ],
        footprint: None,
        bands,
        cloud_mask,
        nodata_mask,
    };
    let file = std::fs::File::create(directory.join(format!("{}.json", stem)))?;
    serde_json::to_writer_pretty(file, &sidecar)?;
    log::debug!("Stored scene {} in {}", stem, directory.display());

    Ok(SceneRef { id: stem, ..tile.scene.clone() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn tile(satellite: Satellite, day: u32) -> RasterTile {
        let bands = Band::MULTISPECTRAL
            .iter()
            .enumerate()
            .map(|(i, &band)| BandRaster { band, data: Array2::from_elem((3, 4), 0.1 * i as f32) })
            .collect();
        let mut cloud_mask = Array2::from_elem((3, 4), false);
        cloud_mask[[2, 3]] = true;
        RasterTile {
            scene: SceneRef {
                id: "pending".to_string(),
                satellite,
                acquired: Utc.with_ymd_and_hms(2019, 7, day, 0, 4, 5).unwrap(),
                cloud_cover: 0.05,
                geoaccuracy: GeoAccuracy::Rmse(6.5),
            },
            bands,
            cloud_mask,
            nodata_mask: None,
            geo_transform: GeoTransform::from_gdal([342000.0, 30.0, 0.0, 6268000.0, 0.0, -30.0]),
            epsg: 32756,
        }
    }

    #[test]
    fn test_write_list_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let stored = write_tile(dir.path(), "NARRA", &tile(Satellite::L8, 3)).unwrap();
        write_tile(dir.path(), "NARRA", &tile(Satellite::S2, 1)).unwrap();
        std::fs::write(dir.path().join("notes.json"), "{}").unwrap();
        assert_eq!(stored.id, "2019-07-03-00-04-05_L8_NARRA");

        let catalog = LocalSceneCatalog::new(dir.path()).unwrap();
        let region = Region::new(
            vec![[151.30, -33.74], [151.32, -33.74], [151.32, -33.72], [151.30, -33.72]],
            100.0,
        )
        .unwrap();
        let dates = DateRange::from_dates(
            chrono::NaiveDate::from_ymd_opt(2019, 7, 1).unwrap(),
            chrono::NaiveDate::from_ymd_opt(2019, 7, 31).unwrap(),
        )
        .unwrap();

        let scenes = catalog.list_scenes(&region, &dates, &[Satellite::L8, Satellite::S2]).unwrap();
        assert_eq!(scenes.len(), 2);
        assert_eq!(scenes[0].satellite, Satellite::S2);
        assert_eq!(scenes[1], stored);

        let only_l8 = catalog.list_scenes(&region, &dates, &[Satellite::L8]).unwrap();
        assert_eq!(only_l8.len(), 1);

        let fetched = catalog.fetch_raster(&stored).unwrap();
        assert_eq!(fetched.bands.len(), 5);
        assert_eq!(fetched.band(Band::Red).unwrap()[[1, 1]], 0.2);
        assert!(fetched.cloud_mask[[2, 3]]);
        assert_eq!(fetched.geo_transform.pixel_width, 30.0);
    }

    #[test]
    fn test_truncated_band_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let stored = write_tile(dir.path(), "SITE", &tile(Satellite::L8, 3)).unwrap();
        let band_file = dir.path().join(format!("{}_blue.f32", stored.id).to_lowercase());
        std::fs::write(band_file, [0u8; 7]).unwrap();
        let catalog = LocalSceneCatalog::new(dir.path()).unwrap();
        assert!(matches!(catalog.fetch_raster(&stored), Err(ShoreError::Raster(_))));
    }
}
