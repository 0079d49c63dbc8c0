use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use approx::assert_abs_diff_eq;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use ndarray::Array2;

use shoresat::config::PipelineConfig;
use shoresat::core::extract::ExtractionParams;
use shoresat::core::intersect::{IntersectionParams, Transect, TransectIntersector};
use shoresat::core::pipeline::{process_site, CancelToken, ShorelinePipeline};
use shoresat::core::preprocess::Preprocessor;
use shoresat::core::reference::{digitize_reference, FirstDetection};
use shoresat::core::tide::{TidalCorrector, TidalParams, TideSample, TideSeries};
use shoresat::core::ShorelineExtractor;
use shoresat::io::catalog::{MemoryCatalog, SceneCatalog};
use shoresat::io::local::write_tile;
use shoresat::types::{
    Band, BandRaster, DateRange, GeoAccuracy, GeoTransform, OutputCollection, Point, Polyline, RasterTile, Region,
    Satellite, SceneRef, ShoreError, ShoreResult, Shoreline, ShorelineRecord,
};

const NARRA: [[f64; 2]; 4] = [
    [151.2957, -33.7390],
    [151.3160, -33.7390],
    [151.3160, -33.7012],
    [151.2957, -33.7012],
];

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn region() -> Region {
    Region::new(NARRA.to_vec(), 100.0).unwrap()
}

fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
}

/// 40x40 tile at 10 m: sand west of `shore_col`, water east of it
fn beach_tile(id: &str, satellite: Satellite, acquired: DateTime<Utc>, shore_col: usize, cloudy: bool) -> RasterTile {
    let values = |sand: (f32, f32)| {
        Array2::from_shape_fn((40, 40), |(_, j)| if j < shore_col { sand.0 } else { sand.1 })
    };
    let bands = vec![
        BandRaster { band: Band::Blue, data: values((0.25, 0.08)) },
        BandRaster { band: Band::Green, data: values((0.28, 0.07)) },
        BandRaster { band: Band::Red, data: values((0.30, 0.05)) },
        BandRaster { band: Band::Nir, data: values((0.32, 0.02)) },
        BandRaster { band: Band::Swir1, data: values((0.40, 0.01)) },
    ];
    RasterTile {
        scene: SceneRef {
            id: id.to_string(),
            satellite,
            acquired,
            cloud_cover: if cloudy { 0.9 } else { 0.0 },
            geoaccuracy: GeoAccuracy::Rmse(5.0),
        },
        bands,
        cloud_mask: Array2::from_elem((40, 40), cloudy),
        nodata_mask: None,
        geo_transform: GeoTransform::from_gdal([340_000.0, 10.0, 0.0, 6_270_000.0, 0.0, -10.0]),
        epsg: 32756,
    }
}

fn extraction_params() -> ExtractionParams {
    ExtractionParams {
        min_beach_area: 1000.0,
        buffer_size: 50.0,
        min_length_sl: 200.0,
        ..ExtractionParams::default()
    }
}

fn pipeline(catalog: MemoryCatalog, dates: DateRange, satellites: Vec<Satellite>) -> ShorelinePipeline {
    ShorelinePipeline::new(
        Arc::new(catalog),
        region(),
        dates,
        satellites,
        Preprocessor::standard(),
        ShorelineExtractor::new(extraction_params()).unwrap(),
    )
    .unwrap()
}

/// Memory catalog that counts raster fetches
struct CountingCatalog {
    inner: MemoryCatalog,
    fetches: AtomicUsize,
}

impl CountingCatalog {
    fn new(tiles: Vec<RasterTile>) -> Self {
        Self { inner: MemoryCatalog::with_tiles(tiles), fetches: AtomicUsize::new(0) }
    }

    fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl SceneCatalog for CountingCatalog {
    fn list_scenes(&self, region: &Region, dates: &DateRange, satellites: &[Satellite]) -> ShoreResult<Vec<SceneRef>> {
        self.inner.list_scenes(region, dates, satellites)
    }

    fn fetch_raster(&self, scene: &SceneRef) -> ShoreResult<RasterTile> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.inner.fetch_raster(scene)
    }
}

fn mixed_tiles() -> Vec<RasterTile> {
    vec![
        beach_tile("s2-a", Satellite::S2, at(2020, 1, 5, 0), 20, false),
        beach_tile("l8-a", Satellite::L8, at(2020, 1, 5, 1), 21, false),
        beach_tile("s2-b", Satellite::S2, at(2020, 1, 9, 0), 18, true),
        beach_tile("s2-c", Satellite::S2, at(2020, 1, 13, 0), 22, false),
        beach_tile("l8-b", Satellite::L8, at(2020, 1, 21, 0), 19, false),
        beach_tile("s2-d", Satellite::S2, at(2020, 1, 25, 0), 23, true),
        beach_tile("s2-e", Satellite::S2, at(2020, 1, 29, 0), 20, false),
    ]
}

/// Config for the NARRA tile grid with scenes supplied by the caller
fn site_config(tide_file: &std::path::Path) -> PipelineConfig {
    let toml = format!(
        r#"
        [site]
        name = "NARRA"
        polygon = {polygon:?}
        start_date = "2019-01-01"
        end_date = "2019-12-31"
        satellites = ["S2"]

        [extraction]
        min_beach_area = 1000.0
        buffer_size = 50.0

        [transects.coordinates]
        T1 = [[340000.0, 6269800.0], [340400.0, 6269800.0]]

        [tide]
        file = {tide:?}
        "#,
        polygon = NARRA.to_vec(),
        tide = tide_file.display().to_string(),
    );
    PipelineConfig::from_toml_str(&toml).unwrap()
}

#[test]
fn test_scene_counts_are_deterministic() {
    init_logging();
    let mut catalog = MemoryCatalog::new();
    let mut day = at(2004, 11, 15, 0);
    let mut i = 0;
    while day < at(2009, 1, 30, 0) {
        let satellite = if i % 3 == 0 { Satellite::L7 } else { Satellite::L5 };
        catalog.add(beach_tile(&format!("scene-{}", i), satellite, day, 20, false));
        day = day + Duration::days(16);
        i += 1;
    }
    // Outside the window and from an unselected mission
    catalog.add(beach_tile("late", Satellite::L5, at(2009, 2, 1, 0), 20, false));
    catalog.add(beach_tile("s2", Satellite::S2, at(2006, 1, 1, 0), 20, false));

    let dates = DateRange::from_dates(
        NaiveDate::from_ymd_opt(2004, 11, 15).unwrap(),
        NaiveDate::from_ymd_opt(2009, 1, 30).unwrap(),
    )
    .unwrap();
    let satellites = [Satellite::L5, Satellite::L7];

    let first = catalog.count_by_satellite(&region(), &dates, &satellites).unwrap();
    let second = catalog.count_by_satellite(&region(), &dates, &satellites).unwrap();
    assert_eq!(first, second);
    assert_eq!(first[&Satellite::L7] + first[&Satellite::L5], i);
    assert_eq!(first[&Satellite::L7], (i + 2) / 3);
    assert!(!first.contains_key(&Satellite::S2));

    let listed = catalog.list_scenes(&region(), &dates, &satellites).unwrap();
    assert!(listed.windows(2).all(|w| w[0].acquired <= w[1].acquired));
}

#[test]
fn test_six_transects_against_straight_shoreline() {
    // Shoreline along x = 1000, transects pointing east from x = 800
    let points: Vec<Point> = (0..=120).map(|k| Point::new(1000.0, k as f64 * 5.0)).collect();
    let mut collection = OutputCollection::new();
    collection.insert(ShorelineRecord {
        date: at(2019, 3, 1, 0),
        satellite: Satellite::S2,
        scene_id: "synthetic".to_string(),
        shoreline: Shoreline::new(vec![Polyline::new(points, false)]),
        geoaccuracy: GeoAccuracy::Passed,
        cloud_cover: 0.0,
    });

    let transects: Vec<Transect> = (1..=6)
        .map(|k| {
            let y = k as f64 * 80.0;
            Transect::new(format!("NA{}", k), Point::new(800.0, y), Point::new(1300.0, y)).unwrap()
        })
        .collect();

    let series = TransectIntersector::new(IntersectionParams { along_dist: 25.0 })
        .unwrap()
        .intersect(&collection, &transects)
        .unwrap();

    assert_eq!(series.transect_names(), vec!["NA1", "NA2", "NA3", "NA4", "NA5", "NA6"]);
    for s in &series.series {
        assert_abs_diff_eq!(s.distances[0], 200.0, epsilon = 1e-9);
        assert!(s.point_counts[0] > 0);
    }
}

#[test]
fn test_tide_offset_shifts_flat_series() {
    let dates: Vec<DateTime<Utc>> = (0..6).map(|d| at(2020, 6, 1 + d, 0)).collect();
    let samples = dates
        .iter()
        .enumerate()
        .map(|(k, &time)| TideSample { time, level: if k < 3 { 0.0 } else { 0.25 } })
        .collect();
    let tides = TideSeries::new(samples).unwrap();

    let raw = shoresat::core::intersect::CrossDistanceSeries {
        dates: dates.clone(),
        satellites: vec![Satellite::L8; 6],
        series: vec![shoresat::core::intersect::TransectSeries {
            name: "NA1".to_string(),
            distances: vec![100.0; 6],
            point_counts: vec![10; 6],
        }],
    };

    let corrector = TidalCorrector::new(TidalParams::default()).unwrap();
    let corrected = corrector.correct(&raw, &tides).unwrap();
    let values = &corrected.series[0].distances;
    for v in &values[..3] {
        assert_abs_diff_eq!(*v, 100.0, epsilon = 1e-9);
    }
    for v in &values[3..] {
        assert_abs_diff_eq!(*v, 100.0 + 0.25 / 0.1, epsilon = 1e-9);
    }
}

#[test]
fn test_memory_catalog_end_to_end() {
    init_logging();
    let catalog = MemoryCatalog::with_tiles(vec![
        beach_tile("a", Satellite::S2, at(2020, 1, 5, 0), 20, false),
        beach_tile("b", Satellite::S2, at(2020, 1, 10, 0), 22, false),
        beach_tile("c", Satellite::S2, at(2020, 1, 15, 0), 20, true),
    ]);
    let dates = DateRange::new(at(2020, 1, 1, 0), at(2020, 1, 31, 0)).unwrap();
    let run = pipeline(catalog, dates, vec![Satellite::S2]).run(&CancelToken::new()).unwrap();

    assert_eq!(run.summary.scenes_listed, 3);
    assert_eq!(run.summary.detections, 2);
    assert_eq!(run.summary.discards.get("too_cloudy"), Some(&1));
    assert_eq!(run.collection.len(), 2);

    let transect = Transect::new("T", Point::new(340_000.0, 6_269_800.0), Point::new(340_400.0, 6_269_800.0)).unwrap();
    let series = TransectIntersector::standard().intersect(&run.collection, &[transect]).unwrap();
    let d = &series.series[0].distances;
    assert!((d[0] - 200.0).abs() < 5.0, "first distance {}", d[0]);
    assert!((d[1] - d[0] - 20.0).abs() < 1.0, "shoreline moved {} m", d[1] - d[0]);
}

#[test]
fn test_cancelled_run_returns_partial_result() {
    let catalog = MemoryCatalog::with_tiles(vec![beach_tile("a", Satellite::S2, at(2020, 1, 5, 0), 20, false)]);
    let dates = DateRange::new(at(2020, 1, 1, 0), at(2020, 1, 31, 0)).unwrap();
    let token = CancelToken::new();
    token.cancel();

    let run = pipeline(catalog, dates, vec![Satellite::S2]).run(&token).unwrap();
    assert!(run.summary.cancelled);
    assert_eq!(run.summary.processed, 0);
    assert!(run.collection.is_empty());
}

#[test]
fn test_parallel_run_matches_sequential() {
    init_logging();
    let dates = DateRange::new(at(2020, 1, 1, 0), at(2020, 1, 31, 0)).unwrap();
    let satellites = vec![Satellite::S2, Satellite::L8];

    let sequential = pipeline(MemoryCatalog::with_tiles(mixed_tiles()), dates, satellites.clone())
        .with_parallel(false)
        .run(&CancelToken::new())
        .unwrap();
    let parallel = pipeline(MemoryCatalog::with_tiles(mixed_tiles()), dates, satellites)
        .with_parallel(true)
        .run(&CancelToken::new())
        .unwrap();

    assert_eq!(sequential.summary.scenes_listed, 7);
    assert_eq!(sequential.summary.detections, 5);
    assert_eq!(sequential.summary.discards.get("too_cloudy"), Some(&2));
    assert_eq!(parallel.summary, sequential.summary);
    assert_eq!(parallel.collection, sequential.collection);
    assert!(parallel.collection.records().windows(2).all(|w| w[0].date <= w[1].date));
}

#[test]
fn test_cancelled_parallel_run() {
    let dates = DateRange::new(at(2020, 1, 1, 0), at(2020, 1, 31, 0)).unwrap();
    let token = CancelToken::new();
    token.cancel();

    let run = pipeline(MemoryCatalog::with_tiles(mixed_tiles()), dates, vec![Satellite::S2, Satellite::L8])
        .with_parallel(true)
        .run(&token)
        .unwrap();
    assert!(run.summary.cancelled);
    assert_eq!(run.summary.scenes_listed, 7);
    assert_eq!(run.summary.processed, 0);
    assert!(run.collection.is_empty());
}

#[test]
fn test_bad_tide_file_fails_before_fetching() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let tide_file = dir.path().join("tides.csv");
    std::fs::write(&tide_file, "dates,tide\n2019-02-01 00:00:00,0.3\n").unwrap();
    let config = site_config(&tide_file);

    let catalog = Arc::new(CountingCatalog::new(vec![
        beach_tile("a", Satellite::S2, at(2019, 2, 1, 0), 20, false),
        beach_tile("b", Satellite::S2, at(2019, 3, 1, 0), 21, false),
    ]));
    let result = process_site(&config, catalog.clone(), &CancelToken::new());

    match result {
        Err(ShoreError::Config(msg)) => assert!(msg.contains("tides.csv"), "{}", msg),
        other => panic!("expected a configuration error, got {:?}", other.map(|r| r.raw)),
    }
    assert_eq!(catalog.fetches(), 0);
}

#[test]
fn test_tide_gap_keeps_raw_series() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let tide_file = dir.path().join("tides.csv");
    std::fs::write(&tide_file, "dates,tide\n2019-01-31T00:00:00Z,0.0\n2019-02-02T00:00:00Z,0.2\n").unwrap();
    let config = site_config(&tide_file);

    let catalog = Arc::new(CountingCatalog::new(vec![
        beach_tile("a", Satellite::S2, at(2019, 2, 1, 0), 20, false),
        beach_tile("b", Satellite::S2, at(2019, 3, 1, 0), 21, false),
    ]));
    let results = process_site(&config, catalog.clone(), &CancelToken::new()).unwrap();

    assert_eq!(catalog.fetches(), 2);
    assert_eq!(results.run.collection.len(), 2);
    assert_eq!(results.raw.series[0].distances.len(), 2);
    assert!(results.raw.series[0].distances.iter().all(|d| d.is_finite()));
    assert!(results.corrected.is_none());
    let reason = results.correction_error.unwrap();
    assert!(reason.contains("2019-03-01"), "{}", reason);
}

#[test]
fn test_digitize_reference_errors() {
    let dates = DateRange::new(at(2020, 1, 1, 0), at(2020, 1, 31, 0)).unwrap();
    let preprocessor = Preprocessor::standard();
    let extractor = ShorelineExtractor::new(extraction_params()).unwrap();

    let empty = MemoryCatalog::new();
    let result = digitize_reference(
        &empty,
        &region(),
        &dates,
        &[Satellite::S2],
        &preprocessor,
        &extractor,
        &mut FirstDetection,
    );
    assert!(matches!(result, Err(ShoreError::NoScenes)));

    let cloudy = MemoryCatalog::with_tiles(vec![beach_tile("c", Satellite::S2, at(2020, 1, 15, 0), 20, true)]);
    let result = digitize_reference(
        &cloudy,
        &region(),
        &dates,
        &[Satellite::S2],
        &preprocessor,
        &extractor,
        &mut FirstDetection,
    );
    assert!(matches!(result, Err(ShoreError::NoValidDetections(_))));

    let clear = MemoryCatalog::with_tiles(vec![beach_tile("a", Satellite::S2, at(2020, 1, 5, 0), 20, false)]);
    let reference = digitize_reference(
        &clear,
        &region(),
        &dates,
        &[Satellite::S2],
        &preprocessor,
        &extractor,
        &mut FirstDetection,
    )
    .unwrap();
    assert!(reference.iter().all(|p| (p.x - 340_200.0).abs() < 10.0));
}

#[test]
fn test_process_site_from_local_directory() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let scenes = dir.path().join("scenes");

    let first = write_tile(&scenes, "NARRA", &beach_tile("x", Satellite::S2, at(2019, 2, 1, 0), 20, false)).unwrap();
    // Same satellite and day, worse georeferencing: removed as a duplicate
    let mut duplicate = beach_tile("y", Satellite::S2, at(2019, 2, 1, 3), 20, false);
    duplicate.scene.geoaccuracy = GeoAccuracy::Rmse(8.0);
    write_tile(&scenes, "NARRA", &duplicate).unwrap();
    write_tile(&scenes, "NARRA", &beach_tile("z", Satellite::S2, at(2019, 3, 1, 0), 21, false)).unwrap();

    let tide_file = dir.path().join("tides.csv");
    std::fs::write(
        &tide_file,
        "dates,tide\n2019-01-31T00:00:00Z,0.0\n2019-02-01T00:00:00Z,0.3\n2019-03-01T00:00:00Z,0.5\n2019-03-02T00:00:00Z,0.0\n",
    )
    .unwrap();

    let toml = format!(
        r#"
        [site]
        name = "NARRA"
        polygon = {polygon:?}
        start_date = "2019-01-01"
        end_date = "2019-12-31"
        satellites = ["S2"]

        [catalog]
        kind = "local"
        directory = {scenes:?}

        [retry]
        max_attempts = 1

        [extraction]
        min_beach_area = 1000.0
        buffer_size = 50.0

        [transects.coordinates]
        T1 = [[340000.0, 6269800.0], [340400.0, 6269800.0]]

        [tide]
        file = {tide:?}

        [output]
        directory = {out:?}
        "#,
        polygon = NARRA.to_vec(),
        scenes = scenes.display().to_string(),
        tide = tide_file.display().to_string(),
        out = dir.path().join("out").display().to_string(),
    );
    let config = PipelineConfig::from_toml_str(&toml).unwrap();
    let catalog = config.build_catalog().unwrap();
    let results = process_site(&config, catalog, &CancelToken::new()).unwrap();

    assert_eq!(results.filter_report.duplicates_removed, 1);
    assert_eq!(results.run.collection.records()[0].scene_id, first.id);

    assert!(results.correction_error.is_none());
    let raw = &results.raw.series[0].distances;
    let corrected = &results.corrected.as_ref().unwrap().series[0].distances;
    assert_eq!(raw.len(), 2);
    assert_abs_diff_eq!(corrected[0] - raw[0], 3.0, epsilon = 1e-9);
    assert_abs_diff_eq!(corrected[1] - raw[1], 5.0, epsilon = 1e-9);

    let written = shoresat::io::output::write_site_outputs(
        &results,
        "NARRA",
        32756,
        true,
        &config.output_directory(),
    )
    .unwrap();
    assert_eq!(written.len(), 4);
    let csv = std::fs::read_to_string(config.output_directory().join("transect_time_series.csv")).unwrap();
    assert!(csv.starts_with("dates,T1\n"));
    let reloaded = shoresat::io::output::load_collection(&written[0]).unwrap();
    assert_eq!(reloaded, results.run.collection);
}
