//! Station data extraction from the time-series database.
//!
//! - `repository` holds the read-only table query interface and an in-memory
//!   implementation.
//! - `postgres` holds the PostgreSQL-backed repository.
//! - `extract` pulls station coordinates and quality-filtered hourly
//!   series through any `Repository`.

pub mod extract;
pub mod postgres;
pub mod repository;

pub use extract::{Extracted, extract_stations};
pub use repository::{Cell, FilterValue, MemoryRepository, Repository, RepositoryError, Table, TableQuery};
