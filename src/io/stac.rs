use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use crate::io::catalog::{sort_scene_refs, SceneCatalog};
use crate::types::{
    Band, DateRange, GeoAccuracy, Mask, Raster, RasterTile, Region, Satellite, SceneRef, ShoreError, ShoreResult,
};

const LANDSAT_COLLECTION: &str = "landsat-c2-l2";
const SENTINEL2_COLLECTION: &str = "sentinel-2-l2a";

/// Asset hrefs of one listed item
#[derive(Debug, Clone, PartialEq)]
pub struct ItemAssets {
    pub bands: Vec<(Band, String)>,
    pub quality: Option<String>,
}

/// One page of a `/search` response
#[derive(Debug, Clone)]
pub struct SearchPage {
    pub items: Vec<(SceneRef, ItemAssets)>,
    pub next: Option<NextRequest>,
}

/// How to request the following page
#[derive(Debug, Clone, PartialEq)]
pub enum NextRequest {
    Get(String),
    Post { href: String, body: Value },
}

fn platform(satellite: Satellite) -> &'static str {
    match satellite {
        Satellite::L5 => "landsat-5",
        Satellite::L7 => "landsat-7",
        Satellite::L8 => "landsat-8",
        Satellite::L9 => "landsat-9",
        Satellite::S2 => "sentinel-2",
    }
}

fn satellite_from_platform(platform: &str) -> Option<Satellite> {
    match platform.to_lowercase().as_str() {
        "landsat-5" => Some(Satellite::L5),
        "landsat-7" => Some(Satellite::L7),
        "landsat-8" => Some(Satellite::L8),
        "landsat-9" => Some(Satellite::L9),
        p if p.starts_with("sentinel-2") => Some(Satellite::S2),
        _ => None,
    }
}

fn asset_keys(satellite: Satellite) -> ([(Band, &'static str); 5], &'static str) {
    match satellite {
        Satellite::S2 => (
            [
                (Band::Blue, "B02"),
                (Band::Green, "B03"),
                (Band::Red, "B04"),
                (Band::Nir, "B08"),
                (Band::Swir1, "B11"),
            ],
            "SCL",
        ),
        _ => (
            [
                (Band::Blue, "blue"),
                (Band::Green, "green"),
                (Band::Red, "red"),
                (Band::Nir, "nir08"),
                (Band::Swir1, "swir16"),
            ],
            "qa_pixel",
        ),
    }
}

/// Request body of a STAC item search
pub fn search_body(region: &Region, dates: &DateRange, satellites: &[Satellite], limit: usize) -> Value {
    let mut collections = Vec::new();
    if satellites.iter().any(|s| *s != Satellite::S2) {
        collections.push(LANDSAT_COLLECTION);
    }
    if satellites.contains(&Satellite::S2) {
        collections.push(SENTINEL2_COLLECTION);
    }
    let platforms: Vec<&str> = satellites
        .iter()
        .flat_map(|&s| match s {
            Satellite::S2 => vec!["Sentinel-2A", "Sentinel-2B", "sentinel-2a", "sentinel-2b"],
            other => vec![platform(other)],
        })
        .collect();

    json!({
        "collections": collections,
        "intersects": { "type": "Polygon", "coordinates": [region.vertices()] },
        "datetime": format!("{}/{}", dates.start.to_rfc3339(), dates.end.to_rfc3339()),
        "limit": limit,
        "query": { "platform": { "in": platforms } },
    })
}

/// Parse one `/search` FeatureCollection page.
///
/// Items from unknown platforms or without a valid datetime are skipped.
pub fn parse_search_page(page: &Value) -> ShoreResult<SearchPage> {
    let features = page
        .get("features")
        .and_then(Value::as_array)
        .ok_or_else(|| ShoreError::Catalog("STAC response has no features".to_string()))?;

    let mut items = Vec::with_capacity(features.len());
    for feature in features {
        let Some(id) = feature.get("id").and_then(Value::as_str) else {
            continue;
        };
        let props = feature.get("properties").unwrap_or(&Value::Null);
        let Some(satellite) = props.get("platform").and_then(Value::as_str).and_then(satellite_from_platform) else {
            log::debug!("Skipping STAC item {}: unknown platform", id);
            continue;
        };
        let Some(acquired) = props
            .get("datetime")
            .and_then(Value::as_str)
            .and_then(|d| DateTime::parse_from_rfc3339(d).ok())
            .map(|d| d.with_timezone(&Utc))
        else {
            log::debug!("Skipping STAC item {}: no datetime", id);
            continue;
        };
        let cloud_cover = props
            .get("eo:cloud_cover")
            .and_then(Value::as_f64)
            .map_or(0.0, |c| c / 100.0);
        let geoaccuracy = match satellite {
            Satellite::S2 => match props.get("s2:geometric_quality").and_then(Value::as_str) {
                Some(q) if q.eq_ignore_ascii_case("passed") => GeoAccuracy::Passed,
                Some(q) if q.eq_ignore_ascii_case("failed") => GeoAccuracy::Failed,
                _ => GeoAccuracy::Unknown,
            },
            _ => props
                .get("landsat:geometric_rmse_model")
                .and_then(Value::as_f64)
                .map_or(GeoAccuracy::Unknown, GeoAccuracy::Rmse),
        };

        let assets = feature.get("assets").unwrap_or(&Value::Null);
        let href = |key: &str| assets.get(key).and_then(|a| a.get("href")).and_then(Value::as_str).map(str::to_string);
        let (band_keys, quality_key) = asset_keys(satellite);
        let bands = band_keys
            .iter()
            .filter_map(|(band, key)| href(key).map(|h| (*band, h)))
            .collect();

        items.push((
            SceneRef { id: id.to_string(), satellite, acquired, cloud_cover, geoaccuracy },
            ItemAssets { bands, quality: href(quality_key) },
        ));
    }

    let next = page
        .get("links")
        .and_then(Value::as_array)
        .and_then(|links| links.iter().find(|l| l.get("rel").and_then(Value::as_str) == Some("next")))
        .and_then(|link| {
            let href = link.get("href").and_then(Value::as_str)?.to_string();
            let is_post = link
                .get("method")
                .and_then(Value::as_str)
                .map_or(false, |m| m.eq_ignore_ascii_case("POST"));
            Some(match link.get("body") {
                Some(body) if is_post => NextRequest::Post { href, body: body.clone() },
                _ => NextRequest::Get(href),
            })
        });

    Ok(SearchPage { items, next })
}

/// Cloud mask from a quality band.
///
/// Landsat Collection 2 QA_PIXEL: dilated cloud, cloud and shadow bits.
/// Sentinel-2 scene classification: shadow, medium/high cloud and cirrus classes.
pub fn cloud_mask_from_quality(quality: &Raster, satellite: Satellite) -> Mask {
    quality.mapv(|v| {
        if !v.is_finite() {
            return false;
        }
        let code = v as u32;
        match satellite {
            Satellite::S2 => matches!(code, 3 | 8 | 9 | 10),
            _ => code & ((1 << 1) | (1 << 3) | (1 << 4)) != 0,
        }
    })
}

/// Scale digital numbers to surface reflectance
pub fn to_reflectance(raw: &Raster, satellite: Satellite) -> Raster {
    match satellite {
        Satellite::S2 => raw.mapv(|v| if v == 0.0 { f32::NAN } else { v / 10_000.0 }),
        _ => raw.mapv(|v| if v == 0.0 { f32::NAN } else { v * 2.75e-5 - 0.2 }),
    }
}

/// STAC API scene catalog (item search over HTTP)
pub struct StacCatalog {
    endpoint: String,
    client: reqwest::blocking::Client,
    page_limit: usize,
    assets: RwLock<HashMap<String, ItemAssets>>,
}

impl StacCatalog {
    pub fn new(endpoint: &str, timeout_secs: u64, page_limit: usize) -> ShoreResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(concat!("shoresat/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ShoreError::Config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client,
            page_limit: page_limit.max(1),
            assets: RwLock::new(HashMap::new()),
        })
    }

    fn send(&self, request: &NextRequest) -> ShoreResult<Value> {
        let builder = match request {
            NextRequest::Get(href) => self.client.get(href),
            NextRequest::Post { href, body } => self.client.post(href).json(body),
        };
        let response = builder
            .send()
            .map_err(|e| ShoreError::Catalog(format!("STAC request failed: {}", e)))?;
        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(ShoreError::Catalog(format!("STAC server returned HTTP {}", status.as_u16())));
        }
        if !status.is_success() {
            return Err(ShoreError::Config(format!("STAC search rejected with HTTP {}", status.as_u16())));
        }
        response
            .json()
            .map_err(|e| ShoreError::Catalog(format!("Invalid STAC response: {}", e)))
    }

    fn assets_for(&self, id: &str) -> ShoreResult<ItemAssets> {
        let assets = self
            .assets
            .read()
            .map_err(|_| ShoreError::Processing("STAC asset index poisoned".to_string()))?;
        assets
            .get(id)
            .cloned()
            .ok_or_else(|| ShoreError::Config(format!("Scene {} was not listed by this catalog", id)))
    }
}

impl SceneCatalog for StacCatalog {
    fn list_scenes(
        &self,
        region: &Region,
        dates: &DateRange,
        satellites: &[Satellite],
    ) -> ShoreResult<Vec<SceneRef>> {
        let mut request = Some(NextRequest::Post {
            href: format!("{}/search", self.endpoint),
            body: search_body(region, dates, satellites, self.page_limit),
        });
        let mut scenes = Vec::new();
        let mut found = HashMap::new();
        let mut pages = 0;

        while let Some(req) = request {
            let page = parse_search_page(&self.send(&req)?)?;
            pages += 1;
            for (scene, assets) in page.items {
                if satellites.contains(&scene.satellite) && dates.contains(&scene.acquired) {
                    found.insert(scene.id.clone(), assets);
                    scenes.push(scene);
                }
            }
            request = page.next;
        }

        self.assets
            .write()
            .map_err(|_| ShoreError::Processing("STAC asset index poisoned".to_string()))?
            .extend(found);
        sort_scene_refs(&mut scenes);
        log::info!("STAC search returned {} scenes in {} pages", scenes.len(), pages);
        Ok(scenes)
    }

    #[cfg(feature = "gdal")]
    fn fetch_raster(&self, scene: &SceneRef) -> ShoreResult<RasterTile> {
        use crate::io::geotiff::read_raster;
        use crate::types::{BandRaster, GeoTransform};

        let assets = self.assets_for(&scene.id)?;
        let mut bands = Vec::with_capacity(assets.bands.len());
        let mut grid: Option<(GeoTransform, u32, usize)> = None;
        for (band, href) in &assets.bands {
            let raster = read_raster(&format!("/vsicurl/{}", href))?;
            let cells = raster.data.len();
            if grid.as_ref().map_or(true, |g| cells > g.2) {
                grid = Some((raster.geo_transform, raster.epsg, cells));
            }
            bands.push(BandRaster { band: *band, data: to_reflectance(&raster.data, scene.satellite) });
        }
        let (geo_transform, epsg, _) =
            grid.ok_or_else(|| ShoreError::Raster(format!("Scene {} has no band assets", scene.id)))?;

        let cloud_mask = match &assets.quality {
            Some(href) => cloud_mask_from_quality(&read_raster(&format!("/vsicurl/{}", href))?.data, scene.satellite),
            None => {
                log::warn!("Scene {} has no quality band, assuming clear sky", scene.id);
                Mask::from_elem(bands[0].data.dim(), false)
            }
        };

        Ok(RasterTile { scene: scene.clone(), bands, cloud_mask, nodata_mask: None, geo_transform, epsg })
    }

    #[cfg(not(feature = "gdal"))]
    fn fetch_raster(&self, scene: &SceneRef) -> ShoreResult<RasterTile> {
        self.assets_for(&scene.id)?;
        Err(ShoreError::Config(format!(
            "Fetching {} from STAC needs the gdal feature",
            scene.id
        )))
    }
}
