//! Skill Analyzer.
//!
//! Reads a product's join table and derives percentage-error tables,
//! accumulated series and regression statistics, both per station and per
//! catchment average.

pub mod accumulate;
pub mod catchments;
pub mod percent_error;
pub mod regression;
pub mod skill;

use thiserror::Error;

use crate::stations::TableError;

pub use accumulate::{AccumulatedRow, accumulate_stations, average_accumulations};
pub use catchments::{Catchment, read_catchments};
pub use percent_error::{ErrorRecord, ErrorTable, average_rows, rows_in_range, write_error_table};
pub use regression::{LinearFit, RegressionError};
pub use skill::{catchment_statistics, station_statistics, write_statistics};

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("catchment geometry: {0}")]
    Geometry(String),

    #[error("catchment file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Table(#[from] TableError),
}
