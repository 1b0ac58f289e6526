//! Precipitation forecast verification.
//!
//! Four batch stages compare gridded precipitation forecasts with rain
//! gauge observations:
//!
//! - `ingest` extracts gauge locations and hourly series from PostgreSQL,
//! - `forecast` turns forecast NetCDF files into per-lead GeoTIFFs,
//! - `join` samples those rasters at the gauges,
//! - `analysis` derives percentage errors and skill statistics.
//!
//! `pipeline` drives the stages from a `config::PipelineConfig`.

pub mod analysis;
pub mod config;
pub mod forecast;
pub mod ingest;
pub mod join;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod raster;
pub mod stations;
