/// Station reference table and observation series.
///
/// `station_xy.csv` is the single source of truth for which gauges take
/// part in a run and where they are; `station_ts.csv` holds their hourly
/// series. Both are written by the extractor and read by every later stage.

use chrono::NaiveDateTime;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use thiserror::Error;

use crate::config::parse_timestamp;
use crate::model::{Observation, Station, TIMESTAMP_FORMAT};

pub const COL_SITE_ID: &str = "ExtSiteID";
pub const COL_X: &str = "NZTMX";
pub const COL_Y: &str = "NZTMY";
pub const COL_DATETIME: &str = "DateTime";
pub const COL_VALUE: &str = "Value";

#[derive(Error, Debug)]
pub enum TableError {
    #[error("CSV error in {path}: {source}")]
    Csv { path: String, source: csv::Error },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error in {path} line {line}: {message}")]
    Parse {
        path: String,
        line: u64,
        message: String,
    },
}

impl TableError {
    pub(crate) fn csv(path: &Path, source: csv::Error) -> Self {
        TableError::Csv {
            path: path.display().to_string(),
            source,
        }
    }
}

// ---------------------------------------------------------------------------
// Station registry
// ---------------------------------------------------------------------------

/// All stations of a run, in file order, unique by id.
#[derive(Debug, Clone, Default)]
pub struct StationRegistry {
    stations: Vec<Station>,
}

impl StationRegistry {
    /// Builds a registry, keeping the first occurrence of each id.
    pub fn new(stations: Vec<Station>) -> Self {
        let mut seen = HashSet::new();
        let stations = stations
            .into_iter()
            .filter(|s| seen.insert(s.id.clone()))
            .collect();
        Self { stations }
    }

    pub fn stations(&self) -> &[Station] {
        &self.stations
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct StationRecord {
    #[serde(rename = "ExtSiteID")]
    id: String,
    #[serde(rename = "NZTMX")]
    x: f64,
    #[serde(rename = "NZTMY")]
    y: f64,
}

#[derive(Debug, Deserialize)]
struct ObservationRecord {
    #[serde(rename = "ExtSiteID")]
    id: String,
    #[serde(rename = "DateTime")]
    datetime: String,
    #[serde(rename = "Value")]
    value: Option<f64>,
}

pub fn read_stations(path: &Path) -> Result<StationRegistry, TableError> {
    let mut rdr = csv::Reader::from_path(path).map_err(|e| TableError::csv(path, e))?;
    let mut stations = Vec::new();
    for record in rdr.deserialize::<StationRecord>() {
        let r = record.map_err(|e| TableError::csv(path, e))?;
        stations.push(Station {
            id: r.id.trim().to_string(),
            x: r.x,
            y: r.y,
        });
    }
    Ok(StationRegistry::new(stations))
}

pub fn write_stations(path: &Path, stations: &[Station]) -> Result<(), TableError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut wtr = csv::Writer::from_path(path).map_err(|e| TableError::csv(path, e))?;
    wtr.write_record([COL_SITE_ID, COL_X, COL_Y])
        .map_err(|e| TableError::csv(path, e))?;
    for s in stations {
        wtr.write_record([s.id.clone(), s.x.to_string(), s.y.to_string()])
            .map_err(|e| TableError::csv(path, e))?;
    }
    wtr.flush()?;
    Ok(())
}

/// Reads the hourly series. Rows with an empty value are skipped.
pub fn read_observations(path: &Path) -> Result<Vec<Observation>, TableError> {
    let mut rdr = csv::Reader::from_path(path).map_err(|e| TableError::csv(path, e))?;
    let mut observations = Vec::new();
    for record in rdr.deserialize::<ObservationRecord>() {
        let r = record.map_err(|e| TableError::csv(path, e))?;
        let Some(value) = r.value else { continue };
        let timestamp = parse_timestamp(&r.datetime).ok_or_else(|| TableError::Parse {
            path: path.display().to_string(),
            line: observations.len() as u64 + 2,
            message: format!("bad timestamp '{}'", r.datetime),
        })?;
        observations.push(Observation {
            station_id: r.id.trim().to_string(),
            timestamp,
            value,
        });
    }
    Ok(observations)
}

pub fn write_observations(path: &Path, observations: &[Observation]) -> Result<(), TableError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut wtr = csv::Writer::from_path(path).map_err(|e| TableError::csv(path, e))?;
    wtr.write_record([COL_SITE_ID, COL_DATETIME, COL_VALUE])
        .map_err(|e| TableError::csv(path, e))?;
    for o in observations {
        wtr.write_record([
            o.station_id.clone(),
            o.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            o.value.to_string(),
        ])
        .map_err(|e| TableError::csv(path, e))?;
    }
    wtr.flush()?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Observation lookup
// ---------------------------------------------------------------------------

/// Result of an exact (station, timestamp) lookup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Lookup {
    Found(f64),
    NotFound,
}

/// Exact-match index over the observation series. There is no interpolation
/// across time: an hour without a record is `NotFound`.
#[derive(Debug, Default)]
pub struct ObservationIndex {
    values: HashMap<(String, NaiveDateTime), f64>,
}

impl ObservationIndex {
    pub fn new(observations: &[Observation]) -> Self {
        let mut values = HashMap::with_capacity(observations.len());
        for o in observations {
            if o.value.is_finite() {
                values
                    .entry((o.station_id.clone(), o.timestamp))
                    .or_insert(o.value);
            }
        }
        Self { values }
    }

    pub fn lookup(&self, station_id: &str, timestamp: NaiveDateTime) -> Lookup {
        match self.values.get(&(station_id.to_string(), timestamp)) {
            Some(v) => Lookup::Found(*v),
            None => Lookup::NotFound,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
