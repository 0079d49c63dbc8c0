use chrono::{DateTime, NaiveDate, Utc};
use ndarray::{Array2, Array3, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::core::crs::Crs;
use crate::core::geometry;

/// Single-band raster (rows x cols)
pub type Raster = Array2<f32>;

/// Per-pixel boolean mask (rows x cols)
pub type Mask = Array2<bool>;

/// Point in a projected (or geographic, x = lon, y = lat) coordinate system
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

impl From<[f64; 2]> for Point {
    fn from(xy: [f64; 2]) -> Self {
        Self { x: xy[0], y: xy[1] }
    }
}

/// Supported optical missions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Satellite {
    L5,
    L7,
    L8,
    L9,
    S2,
}

impl Satellite {
    /// Nominal multispectral pixel size in metres
    pub fn ms_pixel_size(&self) -> f64 {
        match self {
            Satellite::L5 | Satellite::L7 | Satellite::L8 | Satellite::L9 => 30.0,
            Satellite::S2 => 10.0,
        }
    }

    /// Panchromatic pixel size in metres, if the mission carries a pan band
    pub fn pan_pixel_size(&self) -> Option<f64> {
        match self {
            Satellite::L7 | Satellite::L8 | Satellite::L9 => Some(15.0),
            Satellite::L5 | Satellite::S2 => None,
        }
    }
}

impl std::fmt::Display for Satellite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Satellite::L5 => write!(f, "L5"),
            Satellite::L7 => write!(f, "L7"),
            Satellite::L8 => write!(f, "L8"),
            Satellite::L9 => write!(f, "L9"),
            Satellite::S2 => write!(f, "S2"),
        }
    }
}

impl std::str::FromStr for Satellite {
    type Err = ShoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "L5" => Ok(Satellite::L5),
            "L7" => Ok(Satellite::L7),
            "L8" => Ok(Satellite::L8),
            "L9" => Ok(Satellite::L9),
            "S2" => Ok(Satellite::S2),
            other => Err(ShoreError::Config(format!("Unknown satellite: {}", other))),
        }
    }
}

/// Spectral bands used by the extractor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Band {
    Blue,
    Green,
    Red,
    Nir,
    Swir1,
    Pan,
}

impl Band {
    /// Multispectral bands, in the order they are stacked in a [`Scene`]
    pub const MULTISPECTRAL: [Band; 5] = [Band::Blue, Band::Green, Band::Red, Band::Nir, Band::Swir1];

    /// Index into the scene band stack (`None` for the panchromatic band)
    pub fn stack_index(&self) -> Option<usize> {
        Band::MULTISPECTRAL.iter().position(|b| b == self)
    }
}

/// Geospatial bounding box
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_lon <= other.max_lon
            && other.min_lon <= self.max_lon
            && self.min_lat <= other.max_lat
            && other.min_lat <= self.max_lat
    }
}

/// Affine transformation from pixel (row, col) to map coordinates.
///
/// Same layout as a GDAL geotransform: the origin is the outer corner of the
/// top-left pixel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }

    /// Map coordinates of a fractional pixel position, measured from pixel centres
    pub fn pixel_to_world(&self, row: f64, col: f64) -> Point {
        let c = col + 0.5;
        let r = row + 0.5;
        Point {
            x: self.top_left_x + c * self.pixel_width + r * self.rotation_x,
            y: self.top_left_y + c * self.rotation_y + r * self.pixel_height,
        }
    }

    /// Ground size of one pixel side (metres for projected grids)
    pub fn pixel_size(&self) -> f64 {
        self.pixel_width.hypot(self.rotation_y)
    }

    /// Same extent sampled `factor` times coarser (factor < 1 refines)
    pub fn rescaled(&self, factor: f64) -> Self {
        Self {
            top_left_x: self.top_left_x,
            pixel_width: self.pixel_width * factor,
            rotation_x: self.rotation_x * factor,
            top_left_y: self.top_left_y,
            rotation_y: self.rotation_y * factor,
            pixel_height: self.pixel_height * factor,
        }
    }
}

/// Georeferencing accuracy reported with a scene
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum GeoAccuracy {
    /// Landsat-style RMSE of the geometric model, metres
    Rmse(f64),
    /// Sentinel-2 geometric quality flag passed
    Passed,
    /// Sentinel-2 geometric quality flag failed
    Failed,
    Unknown,
}

impl GeoAccuracy {
    /// Ranking score, lower is better
    pub fn score(&self) -> f64 {
        match self {
            GeoAccuracy::Passed => 0.0,
            GeoAccuracy::Rmse(rmse) if rmse.is_finite() => *rmse,
            GeoAccuracy::Rmse(_) | GeoAccuracy::Failed | GeoAccuracy::Unknown => f64::INFINITY,
        }
    }
}

impl std::fmt::Display for GeoAccuracy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GeoAccuracy::Rmse(v) => write!(f, "{:.2}", v),
            GeoAccuracy::Passed => write!(f, "PASSED"),
            GeoAccuracy::Failed => write!(f, "FAILED"),
            GeoAccuracy::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Inclusive UTC time window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> ShoreResult<Self> {
        if end < start {
            return Err(ShoreError::Config(format!(
                "Date range ends ({}) before it starts ({})",
                end, start
            )));
        }
        Ok(Self { start, end })
    }

    /// Whole calendar days, both ends included
    pub fn from_dates(start: NaiveDate, end: NaiveDate) -> ShoreResult<Self> {
        let start = start
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| ShoreError::Config("Invalid start date".to_string()))?
            .and_utc();
        let end = end
            .and_hms_opt(23, 59, 59)
            .ok_or_else(|| ShoreError::Config("Invalid end date".to_string()))?
            .and_utc();
        Self::new(start, end)
    }

    pub fn contains(&self, t: &DateTime<Utc>) -> bool {
        *t >= self.start && *t <= self.end
    }
}

/// Closed region-of-interest polygon in (lon, lat)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Region {
    vertices: Vec<[f64; 2]>,
}

impl Region {
    /// Build a region, closing the ring if needed and enforcing the area bound
    pub fn new(mut vertices: Vec<[f64; 2]>, max_area_km2: f64) -> ShoreResult<Self> {
        if let (Some(first), Some(last)) = (vertices.first().copied(), vertices.last().copied()) {
            if first != last {
                vertices.push(first);
            }
        }

        let mut distinct: Vec<[f64; 2]> = Vec::new();
        for v in &vertices {
            if !(-180.0..=180.0).contains(&v[0]) || !(-90.0..=90.0).contains(&v[1]) {
                return Err(ShoreError::InvalidGeometry(format!(
                    "Polygon vertex ({}, {}) is not a valid lon/lat pair",
                    v[0], v[1]
                )));
            }
            if !distinct.contains(v) {
                distinct.push(*v);
            }
        }
        if distinct.len() < 3 {
            return Err(ShoreError::InvalidGeometry(
                "Region polygon needs at least 3 distinct vertices".to_string(),
            ));
        }

        let region = Self { vertices };
        let area = region.area_km2();
        if area <= 0.0 {
            return Err(ShoreError::InvalidGeometry("Region polygon has zero area".to_string()));
        }
        if area > max_area_km2 {
            return Err(ShoreError::InvalidGeometry(format!(
                "Region area {:.1} km2 exceeds the {:.1} km2 limit",
                area, max_area_km2
            )));
        }
        Ok(region)
    }

    /// Closed ring (first vertex repeated at the end)
    pub fn vertices(&self) -> &[[f64; 2]] {
        &self.vertices
    }

    pub fn centroid(&self) -> (f64, f64) {
        let ring = &self.vertices[..self.vertices.len() - 1];
        let n = ring.len() as f64;
        let lon = ring.iter().map(|v| v[0]).sum::<f64>() / n;
        let lat = ring.iter().map(|v| v[1]).sum::<f64>() / n;
        (lon, lat)
    }

    pub fn bounding_box(&self) -> BoundingBox {
        let mut bbox = BoundingBox {
            min_lon: f64::INFINITY,
            max_lon: f64::NEG_INFINITY,
            min_lat: f64::INFINITY,
            max_lat: f64::NEG_INFINITY,
        };
        for v in &self.vertices {
            bbox.min_lon = bbox.min_lon.min(v[0]);
            bbox.max_lon = bbox.max_lon.max(v[0]);
            bbox.min_lat = bbox.min_lat.min(v[1]);
            bbox.max_lat = bbox.max_lat.max(v[1]);
        }
        bbox
    }

    /// Area in square kilometres, measured in the UTM zone of the centroid
    pub fn area_km2(&self) -> f64 {
        let (lon, lat) = self.centroid();
        let utm = Crs::utm_for(lon, lat);
        let projected: Vec<Point> = self
            .vertices
            .iter()
            .map(|v| utm.from_geographic(Point::new(v[0], v[1])))
            .collect();
        geometry::polygon_area(&projected) / 1.0e6
    }
}

/// Catalog entry for one satellite overpass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneRef {
    pub id: String,
    pub satellite: Satellite,
    pub acquired: DateTime<Utc>,
    /// Cloud cover over the whole tile as reported by the catalog (0..1)
    pub cloud_cover: f64,
    pub geoaccuracy: GeoAccuracy,
}

/// One band of a fetched tile at its native resolution
#[derive(Debug, Clone)]
pub struct BandRaster {
    pub band: Band,
    pub data: Raster,
}

/// Raw tile as delivered by a scene catalog.
///
/// `geo_transform` describes the grid of the largest band (the panchromatic
/// band when present); coarser bands cover the same extent.
#[derive(Debug, Clone)]
pub struct RasterTile {
    pub scene: SceneRef,
    pub bands: Vec<BandRaster>,
    pub cloud_mask: Mask,
    pub nodata_mask: Option<Mask>,
    pub geo_transform: GeoTransform,
    pub epsg: u32,
}

impl RasterTile {
    pub fn band(&self, band: Band) -> Option<&Raster> {
        self.bands.iter().find(|b| b.band == band).map(|b| &b.data)
    }
}

/// Preprocessed scene: co-registered multispectral stack plus masks
#[derive(Debug, Clone)]
pub struct Scene {
    pub meta: SceneRef,
    /// Bands x rows x cols, in [`Band::MULTISPECTRAL`] order
    pub bands: Array3<f32>,
    pub cloud_mask: Mask,
    pub validity: Mask,
    /// Cloudy fraction of the non-nodata pixels
    pub cloud_cover: f64,
    pub nodata_fraction: f64,
    pub geo_transform: GeoTransform,
    pub epsg: u32,
}

impl Scene {
    pub fn band(&self, band: Band) -> ShoreResult<ArrayView2<'_, f32>> {
        let idx = band
            .stack_index()
            .ok_or_else(|| ShoreError::Raster(format!("{:?} is not part of the scene stack", band)))?;
        Ok(self.bands.index_axis(ndarray::Axis(0), idx))
    }

    pub fn dim(&self) -> (usize, usize) {
        self.validity.dim()
    }

    pub fn pixel_size(&self) -> f64 {
        self.geo_transform.pixel_size()
    }
}

/// Ordered sequence of projected points
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polyline {
    pub points: Vec<Point>,
    /// True when the last point connects back to the first
    pub closed: bool,
}

impl Polyline {
    pub fn new(points: Vec<Point>, closed: bool) -> Self {
        Self { points, closed }
    }

    /// Perimeter length, including the closing segment of closed contours
    pub fn length(&self) -> f64 {
        geometry::polyline_length(&self.points, self.closed)
    }
}

/// Shoreline detected in one scene
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Shoreline {
    pub segments: Vec<Polyline>,
}

impl Shoreline {
    pub fn new(segments: Vec<Polyline>) -> Self {
        Self { segments }
    }

    pub fn is_empty(&self) -> bool {
        self.segments.iter().all(|s| s.points.is_empty())
    }

    pub fn points(&self) -> impl Iterator<Item = &Point> + '_ {
        self.segments.iter().flat_map(|s| s.points.iter())
    }

    pub fn point_count(&self) -> usize {
        self.segments.iter().map(|s| s.points.len()).sum()
    }

    pub fn length(&self) -> f64 {
        self.segments.iter().map(Polyline::length).sum()
    }
}

/// One dated shoreline detection with its scene metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShorelineRecord {
    pub date: DateTime<Utc>,
    pub satellite: Satellite,
    pub scene_id: String,
    pub shoreline: Shoreline,
    pub geoaccuracy: GeoAccuracy,
    pub cloud_cover: f64,
}

/// Chronologically ordered shoreline detections
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputCollection {
    records: Vec<ShorelineRecord>,
}

impl OutputCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert keeping chronological order; equal dates keep insertion order
    pub fn insert(&mut self, record: ShorelineRecord) {
        let idx = self.records.partition_point(|r| r.date <= record.date);
        self.records.insert(idx, record);
    }

    pub fn records(&self) -> &[ShorelineRecord] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ShorelineRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn dates(&self) -> Vec<DateTime<Utc>> {
        self.records.iter().map(|r| r.date).collect()
    }

    /// Remove records failing `keep`; returns how many were removed
    pub fn retain<F>(&mut self, keep: F) -> usize
    where
        F: FnMut(&ShorelineRecord) -> bool,
    {
        let before = self.records.len();
        self.records.retain(keep);
        before - self.records.len()
    }

    /// Remove the records at `indices` (positions in the current order)
    pub(crate) fn remove_indices(&mut self, indices: &std::collections::HashSet<usize>) -> usize {
        let before = self.records.len();
        let mut idx = 0;
        self.records.retain(|_| {
            let keep = !indices.contains(&idx);
            idx += 1;
            keep
        });
        before - self.records.len()
    }
}

impl<'a> IntoIterator for &'a OutputCollection {
    type Item = &'a ShorelineRecord;
    type IntoIter = std::slice::Iter<'a, ShorelineRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

/// Error types for shoreline processing
#[derive(Debug, thiserror::Error)]
pub enum ShoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("Raster error: {0}")]
    Raster(String),

    #[error("No scenes available for the requested region, dates and satellites")]
    NoScenes,

    #[error("No valid shoreline detections: {0}")]
    NoValidDetections(String),

    #[error("Tide series does not cover {0}")]
    TideCoverage(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[cfg(feature = "gdal")]
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),
}

impl ShoreError {
    /// Errors worth retrying at the catalog boundary
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ShoreError::Catalog(_) | ShoreError::Io(_))
    }
}

/// Result type for shoreline operations
pub type ShoreResult<T> = Result<T, ShoreError>;
