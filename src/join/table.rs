/// The wide join table, one file per product.
///
/// `ExtSiteID,DateTime of forecast,MetService product,Station precipitation [mm],1,...,85`
/// with empty cells for lead hours that have no forecast value.

use std::path::Path;

use crate::config::parse_timestamp;
use crate::model::{JoinedRow, MAX_LEAD_HOUR, TIMESTAMP_FORMAT};
use crate::stations::TableError;

pub const COL_SITE_ID: &str = "ExtSiteID";
pub const COL_DATETIME: &str = "DateTime of forecast";
pub const COL_PRODUCT: &str = "MetService product";
pub const COL_OBSERVED: &str = "Station precipitation [mm]";

const FIXED_COLUMNS: usize = 4;

/// Header of the join table.
pub fn joined_header() -> Vec<String> {
    let mut header: Vec<String> = [COL_SITE_ID, COL_DATETIME, COL_PRODUCT, COL_OBSERVED]
        .iter()
        .map(|c| c.to_string())
        .collect();
    header.extend((1..=MAX_LEAD_HOUR).map(|h| h.to_string()));
    header
}

fn format_optional(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

pub fn write_joined_table(path: &Path, rows: &[JoinedRow]) -> Result<(), TableError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut wtr = csv::Writer::from_path(path).map_err(|e| TableError::csv(path, e))?;
    wtr.write_record(joined_header())
        .map_err(|e| TableError::csv(path, e))?;
    for row in rows {
        let mut record = vec![
            row.station_id.clone(),
            row.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            row.product.clone(),
            row.observed.to_string(),
        ];
        record.extend((1..=MAX_LEAD_HOUR).map(|h| format_optional(row.forecast(h))));
        wtr.write_record(&record)
            .map_err(|e| TableError::csv(path, e))?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn read_joined_table(path: &Path) -> Result<Vec<JoinedRow>, TableError> {
    let mut rdr = csv::Reader::from_path(path).map_err(|e| TableError::csv(path, e))?;
    let parse_error = |line: u64, message: String| TableError::Parse {
        path: path.display().to_string(),
        line,
        message,
    };

    let header = rdr.headers().map_err(|e| TableError::csv(path, e))?.clone();
    let expected = joined_header();
    if header.iter().ne(expected.iter().map(String::as_str)) {
        return Err(parse_error(1, "unexpected header".to_string()));
    }

    let mut rows = Vec::new();
    for (i, record) in rdr.records().enumerate() {
        let record = record.map_err(|e| TableError::csv(path, e))?;
        let line = i as u64 + 2;
        let field = |idx: usize| record.get(idx).unwrap_or_default().trim();
        let number = |idx: usize| {
            field(idx)
                .parse::<f64>()
                .map_err(|_| parse_error(line, format!("bad number '{}' in column {}", field(idx), idx + 1)))
        };

        let timestamp = parse_timestamp(field(1))
            .ok_or_else(|| parse_error(line, format!("bad timestamp '{}'", field(1))))?;
        let mut row = JoinedRow::new(field(0), timestamp, field(2), number(3)?);
        for lead in 1..=MAX_LEAD_HOUR {
            let idx = FIXED_COLUMNS + lead as usize - 1;
            if !field(idx).is_empty() {
                row.set_forecast(lead, number(idx)?);
            }
        }
        rows.push(row);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime};

    fn at(h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2019, 1, 1)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn rows() -> Vec<JoinedRow> {
        let mut a = JoinedRow::new("312810", at(14), "ECMWF_8km", 0.0);
        a.set_forecast(1, 0.1);
        a.set_forecast(85, 1.0 / 3.0);
        let mut b = JoinedRow::new("I68182", at(15), "ECMWF_8km", 2.4);
        b.set_forecast(12, 0.0);
        vec![a, b]
    }

    #[test]
    fn test_header_layout() {
        let header = joined_header();
        assert_eq!(header.len(), 4 + 85);
        assert_eq!(header[3], "Station precipitation [mm]");
        assert_eq!(header[4], "1");
        assert_eq!(header[88], "85");
    }

    #[test]
    fn test_round_trip_preserves_every_cell() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ECMWF_8km.csv");
        write_joined_table(&path, &rows()).unwrap();
        let back = read_joined_table(&path).unwrap();
        assert_eq!(back, rows(), "values, empties and zeros survive the round trip");
    }

    #[test]
    fn test_empty_cells_are_written_blank() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.csv");
        write_joined_table(&path, &rows()[1..]).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let line = text.lines().nth(1).unwrap();
        assert!(line.starts_with("I68182,2019-01-01 15:00:00,ECMWF_8km,2.4,,,"));
        assert_eq!(line.split(',').count(), 89);
    }

    #[test]
    fn test_wrong_header_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.csv");
        std::fs::write(&path, "site,time\nA,2019-01-01 00:00:00\n").unwrap();
        assert!(matches!(read_joined_table(&path), Err(TableError::Parse { line: 1, .. })));
    }
}
