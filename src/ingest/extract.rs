/// Station Data Extractor.
///
/// Three queries against the time-series store:
///   1. which sites carry one of the requested dataset types,
///   2. their hourly series with the required quality code,
///   3. the planar coordinates of every site that actually has data.
///
/// Any repository error aborts the extraction: a partial station set is
/// not usable by the later stages.

use crate::config::{DatabaseConfig, DateRange};
use crate::model::{Observation, Station};
use crate::stations::StationRegistry;

use super::repository::{Repository, RepositoryError, TableQuery};

pub const COL_SITE_ID: &str = "ExtSiteID";
pub const COL_DATASET_TYPE: &str = "DatasetTypeID";
pub const COL_DATETIME: &str = "DateTime";
pub const COL_VALUE: &str = "Value";
pub const COL_QUALITY: &str = "QualityCode";
pub const COL_X: &str = "NZTMX";
pub const COL_Y: &str = "NZTMY";

/// Both reference tables produced by one extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct Extracted {
    /// Unique by id, in first-seen order.
    pub stations: Vec<Station>,
    /// Sorted by station id then timestamp, restricted to the date range.
    pub observations: Vec<Observation>,
}

fn unique_in_order(ids: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}

pub fn extract_stations(
    repo: &mut dyn Repository,
    db: &DatabaseConfig,
    range: &DateRange,
) -> Result<Extracted, RepositoryError> {
    // 1. Sites carrying the requested dataset types
    let query = TableQuery::new(&db.site_table, &[COL_SITE_ID, COL_DATASET_TYPE])
        .where_in(COL_DATASET_TYPE, db.dataset_types.iter().copied());
    let sites = repo.read_table(&query)?;
    let id_col = sites.column_index(&db.site_table, COL_SITE_ID)?;
    let site_ids = unique_in_order(sites.rows.iter().filter_map(|r| r[id_col].as_text()));

    // 2. Quality-filtered hourly series for those sites
    let query = TableQuery::new(&db.series_table, &[COL_SITE_ID, COL_DATETIME, COL_VALUE])
        .where_in(COL_DATASET_TYPE, db.dataset_types.iter().copied())
        .where_in(COL_SITE_ID, site_ids.iter().cloned())
        .where_in(COL_QUALITY, db.quality_codes.iter().copied());
    let series = repo.read_table(&query)?;
    let id_col = series.column_index(&db.series_table, COL_SITE_ID)?;
    let t_col = series.column_index(&db.series_table, COL_DATETIME)?;
    let v_col = series.column_index(&db.series_table, COL_VALUE)?;

    let mut observations: Vec<Observation> = series
        .rows
        .iter()
        .filter_map(|r| {
            Some(Observation {
                station_id: r[id_col].as_text()?,
                timestamp: r[t_col].as_timestamp()?,
                value: r[v_col].as_f64()?,
            })
        })
        .filter(|o| range.contains(&o.timestamp))
        .collect();
    observations.sort_by(|a, b| {
        a.station_id
            .cmp(&b.station_id)
            .then(a.timestamp.cmp(&b.timestamp))
    });

    // 3. Coordinates of the sites that have data
    let series_ids = unique_in_order(observations.iter().map(|o| o.station_id.clone()));
    let query = TableQuery::new(&db.location_table, &[COL_SITE_ID, COL_X, COL_Y])
        .where_in(COL_SITE_ID, series_ids);
    let locations = repo.read_table(&query)?;
    let id_col = locations.column_index(&db.location_table, COL_SITE_ID)?;
    let x_col = locations.column_index(&db.location_table, COL_X)?;
    let y_col = locations.column_index(&db.location_table, COL_Y)?;

    let stations = locations
        .rows
        .iter()
        .filter_map(|r| {
            Some(Station {
                id: r[id_col].as_text()?,
                x: r[x_col].as_f64()?,
                y: r[y_col].as_f64()?,
            })
        })
        .collect();

    Ok(Extracted {
        stations: StationRegistry::new(stations).stations().to_vec(),
        observations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::repository::{Cell, MemoryRepository, Table};
    use chrono::{NaiveDate, NaiveDateTime};

    fn at(day: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2019, 1, day)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn text(s: &str) -> Cell {
        Cell::Text(s.to_string())
    }

    fn repo() -> MemoryRepository {
        let mut repo = MemoryRepository::new();
        repo.insert_table(
            "TSDataNumericHourlySumm",
            Table {
                columns: vec![COL_SITE_ID.into(), COL_DATASET_TYPE.into()],
                rows: vec![
                    vec![text("A"), Cell::Int(38)],
                    vec![text("B"), Cell::Int(15)],
                    vec![text("C"), Cell::Int(7)],
                    vec![text("D"), Cell::Int(38)],
                ],
            },
        );
        let series_row = |id: &str, t: NaiveDateTime, v: f64, ds: i64, q: i64| {
            vec![text(id), Cell::Timestamp(t), Cell::Float(v), Cell::Int(ds), Cell::Int(q)]
        };
        repo.insert_table(
            "TSDataNumericHourly",
            Table {
                columns: vec![
                    COL_SITE_ID.into(),
                    COL_DATETIME.into(),
                    COL_VALUE.into(),
                    COL_DATASET_TYPE.into(),
                    COL_QUALITY.into(),
                ],
                rows: vec![
                    series_row("B", at(2, 1), 0.5, 15, 600),
                    series_row("A", at(2, 0), 1.0, 38, 600),
                    series_row("A", at(2, 1), 2.0, 38, 500), // bad quality
                    series_row("A", at(9, 0), 3.0, 38, 600), // out of range
                    series_row("C", at(2, 0), 4.0, 7, 600),  // wrong dataset
                    vec![text("A"), Cell::Timestamp(at(2, 2)), Cell::Null, Cell::Int(38), Cell::Int(600)],
                ],
            },
        );
        repo.insert_table(
            "ExternalSite",
            Table {
                columns: vec![COL_SITE_ID.into(), COL_X.into(), COL_Y.into()],
                rows: vec![
                    vec![text("A"), Cell::Float(1.0), Cell::Float(2.0)],
                    vec![text("A"), Cell::Float(1.0), Cell::Float(2.0)],
                    vec![text("B"), Cell::Float(3.0), Cell::Float(4.0)],
                    vec![text("D"), Cell::Float(5.0), Cell::Float(6.0)],
                ],
            },
        );
        repo
    }

    fn range() -> DateRange {
        DateRange {
            from: at(1, 0),
            to: at(5, 0),
        }
    }

    #[test]
    fn test_extract_filters_by_dataset_quality_and_range() {
        let mut repo = repo();
        let out = extract_stations(&mut repo, &DatabaseConfig::default(), &range()).unwrap();

        let obs: Vec<_> = out
            .observations
            .iter()
            .map(|o| (o.station_id.as_str(), o.timestamp, o.value))
            .collect();
        assert_eq!(obs, vec![("A", at(2, 0), 1.0), ("B", at(2, 1), 0.5)]);
    }

    #[test]
    fn test_extract_keeps_only_stations_with_data_deduplicated() {
        let mut repo = repo();
        let out = extract_stations(&mut repo, &DatabaseConfig::default(), &range()).unwrap();
        let ids: Vec<_> = out.stations.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B"], "D has no series, A is listed twice");
    }

    #[test]
    fn test_missing_table_is_fatal() {
        let mut repo = MemoryRepository::new();
        let result = extract_stations(&mut repo, &DatabaseConfig::default(), &range());
        assert!(matches!(result, Err(RepositoryError::UnknownTable(_))));
    }
}
