/// Per-timestamp percentage error tables.
///
/// For each lead hour `h`: `(forecast[h] - observed) / observed * 100`,
/// `undefined` when nothing was observed. Computed for every station, for
/// every station of each catchment, and for catchment averages.

use chrono::{Datelike, NaiveDateTime};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use crate::config::DateRange;
use crate::join::table::{COL_DATETIME, COL_OBSERVED, COL_PRODUCT, COL_SITE_ID};
use crate::model::{JoinedRow, MAX_LEAD_HOUR, Ratio, TIMESTAMP_FORMAT};
use crate::stations::TableError;

pub const COL_CATCHMENT: &str = "Catchment";
pub const COL_MONTH: &str = "Month";
pub const COL_CATCHMENT_OBSERVED: &str = "Catchment precipitation [mm]";

/// Rows whose valid time falls inside `range`.
pub fn rows_in_range<'a>(rows: &'a [JoinedRow], range: &DateRange) -> Vec<&'a JoinedRow> {
    rows.iter().filter(|r| range.contains(&r.timestamp)).collect()
}

/// Percentage error per lead hour; `None` where there is no forecast.
pub fn percent_errors(row: &JoinedRow) -> Vec<Option<Ratio>> {
    (1..=MAX_LEAD_HOUR)
        .map(|h| row.forecast(h).map(|f| Ratio::percent_difference(f, row.observed)))
        .collect()
}

/// Averages member rows per timestamp. The observed value is the mean over
/// all members; each lead hour is the mean over the members that have it.
/// The returned rows carry `label` as their station id.
pub fn average_rows(rows: &[&JoinedRow], members: &HashSet<String>, label: &str) -> Vec<JoinedRow> {
    let mut groups: BTreeMap<NaiveDateTime, Vec<&JoinedRow>> = BTreeMap::new();
    for row in rows.iter().copied().filter(|r| members.contains(&r.station_id)) {
        groups.entry(row.timestamp).or_default().push(row);
    }

    groups
        .into_iter()
        .map(|(timestamp, group)| {
            let observed = group.iter().map(|r| r.observed).sum::<f64>() / group.len() as f64;
            let mut avg = JoinedRow::new(label, timestamp, &group[0].product, observed);
            for h in 1..=MAX_LEAD_HOUR {
                let values: Vec<f64> = group.iter().filter_map(|r| r.forecast(h)).collect();
                if !values.is_empty() {
                    avg.set_forecast(h, values.iter().sum::<f64>() / values.len() as f64);
                }
            }
            avg
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Which of the three percentage-error layouts to write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorTable {
    /// `all_stations_<product>.csv`
    Stations,
    /// `all_stations_catchments_<product>.csv`
    StationsByCatchment,
    /// `catchments_avg_<product>.csv`
    CatchmentAverages,
}

impl ErrorTable {
    pub fn file_prefix(&self) -> &'static str {
        match self {
            ErrorTable::Stations => "all_stations",
            ErrorTable::StationsByCatchment => "all_stations_catchments",
            ErrorTable::CatchmentAverages => "catchments_avg",
        }
    }

    fn header(&self) -> Vec<String> {
        let fixed: &[&str] = match self {
            ErrorTable::Stations => &[COL_SITE_ID, COL_DATETIME, COL_PRODUCT, COL_OBSERVED, COL_MONTH],
            ErrorTable::StationsByCatchment => &[
                COL_CATCHMENT,
                COL_SITE_ID,
                COL_DATETIME,
                COL_PRODUCT,
                COL_OBSERVED,
                COL_MONTH,
            ],
            ErrorTable::CatchmentAverages => &[
                COL_CATCHMENT,
                COL_DATETIME,
                COL_PRODUCT,
                COL_CATCHMENT_OBSERVED,
                COL_MONTH,
            ],
        };
        let mut header: Vec<String> = fixed.iter().map(|c| c.to_string()).collect();
        header.extend((1..=MAX_LEAD_HOUR).map(|h| h.to_string()));
        header
    }
}

/// One output line: a joined (or averaged) row and, for catchment layouts,
/// the catchment it belongs to.
pub struct ErrorRecord<'a> {
    pub catchment: Option<&'a str>,
    pub row: &'a JoinedRow,
}

pub fn write_error_table(path: &Path, layout: ErrorTable, records: &[ErrorRecord<'_>]) -> Result<usize, TableError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut wtr = csv::Writer::from_path(path).map_err(|e| TableError::csv(path, e))?;
    wtr.write_record(layout.header())
        .map_err(|e| TableError::csv(path, e))?;

    for record in records {
        let row = record.row;
        let catchment = record.catchment.unwrap_or_default().to_string();
        let mut line = match layout {
            ErrorTable::Stations => vec![row.station_id.clone()],
            ErrorTable::StationsByCatchment => vec![catchment, row.station_id.clone()],
            ErrorTable::CatchmentAverages => vec![catchment],
        };
        line.extend([
            row.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            row.product.clone(),
            row.observed.to_string(),
            row.timestamp.month().to_string(),
        ]);
        line.extend(
            percent_errors(row)
                .into_iter()
                .map(|e| e.map(|r| r.to_string()).unwrap_or_default()),
        );
        wtr.write_record(&line)
            .map_err(|e| TableError::csv(path, e))?;
    }
    wtr.flush()?;
    Ok(records.len())
}
