//! Station–Forecast Joiner: one wide table per product pairing each
//! station's observed value with the forecasts for the same valid hour.

pub mod combine;
pub mod sampler;
pub mod table;

use thiserror::Error;

pub use combine::{JoinSummary, join_product, list_rasters};
pub use sampler::{GdalLocationInfo, NativeSampler, RasterSampler, SampleError};
pub use table::{read_joined_table, write_joined_table};

#[derive(Error, Debug)]
pub enum JoinError {
    #[error("bad raster file pattern: {0}")]
    Pattern(#[from] glob::PatternError),
}
