//! Scene catalogs, input readers and output writers

pub mod catalog;
pub mod geojson;
pub mod local;
pub mod output;
pub mod stac;
pub mod tide;
pub mod transects;

#[cfg(feature = "gdal")]
pub mod geotiff;

// Re-export main types
pub use catalog::{MemoryCatalog, RetryPolicy, RetryingCatalog, SceneCatalog};
pub use local::LocalSceneCatalog;
pub use output::{export_geojson, load_collection, save_collection, save_time_series, write_time_series};
pub use stac::StacCatalog;
pub use tide::load_tide_series;
pub use transects::{load_transects, transects_from_map, transects_from_pairs};
