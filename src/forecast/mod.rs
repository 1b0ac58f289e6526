//! Forecast Rasterizer.
//!
//! One NetCDF file per forecast issue holds a cumulative precipitation
//! field on a curvilinear lat/lon grid, stacked over lead hours. For every
//! consecutive pair of layers the increment is reprojected, interpolated
//! onto the fixed output grid and written as one GeoTIFF.

pub mod interpolate;
pub mod naming;
pub mod rasterize;
pub mod reproject;
pub mod source;

use thiserror::Error;

use crate::raster::RasterError;

pub use interpolate::TriangleMesh;
pub use naming::{RasterName, issue_time_from_path, load_time_zone, utc_to_local};
pub use rasterize::{RasterSettings, RasterizeSummary, rasterize_file, rasterize_product};
pub use reproject::Reprojector;
pub use source::{ForecastSource, ForecastStack, NetcdfSource, decode_cf_times};

#[derive(Error, Debug)]
pub enum ForecastError {
    #[error("NetCDF error in {path}: {message}")]
    Netcdf { path: String, message: String },

    #[error("variable '{variable}' not found in {path}")]
    MissingVariable { path: String, variable: String },

    #[error("unsupported layout in {path}: {message}")]
    Layout { path: String, message: String },

    #[error("cannot parse time '{0}'")]
    Time(String),

    #[error("cannot parse raster name '{0}'")]
    Name(String),

    #[error("unknown time zone '{0}'")]
    TimeZone(String),

    #[error("projection error: {0}")]
    Projection(String),

    #[error("raster error: {0}")]
    Raster(#[from] RasterError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bad source file pattern: {0}")]
    Pattern(#[from] glob::PatternError),
}
