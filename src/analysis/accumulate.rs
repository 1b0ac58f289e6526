/// Accumulation of hourly pairs into fixed windows.
///
/// Windows of `w` hours are aligned to midnight (`[k·w, (k+1)·w)` counted
/// in whole hours from the epoch, which for the usual divisors of 24 is the
/// same as counting from each midnight) and labelled with their end time.
/// Only hours where both the observation and the forecast exist contribute;
/// `Hcount` is the number of such hours, and windows without any are left
/// out.

use chrono::{DateTime, Datelike, NaiveDateTime};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use super::percent_error::{COL_CATCHMENT, COL_MONTH};
use crate::join::table::{COL_DATETIME, COL_PRODUCT, COL_SITE_ID};
use crate::model::{JoinedRow, TIMESTAMP_FORMAT};
use crate::stations::TableError;

pub const COL_LEAD: &str = "Forecasted hours";
pub const COL_WINDOW: &str = "Accum. hours";
pub const COL_ACC_STATION: &str = "Accum. station precipitation [mm]";
pub const COL_ACC_CATCHMENT: &str = "Accum. catchment precipitation [mm]";
pub const COL_ACC_FORECAST: &str = "Accum. forecasted precipitation [mm]";
pub const COL_HCOUNT: &str = "Hcount";

/// One accumulated window for a station (or a catchment average).
#[derive(Debug, Clone, PartialEq)]
pub struct AccumulatedRow {
    /// Station id, or catchment name for averages.
    pub key: String,
    /// End of the window.
    pub timestamp: NaiveDateTime,
    pub lead_hour: u32,
    pub window_hours: u32,
    pub observed: f64,
    pub forecast: f64,
    /// Contributing hours; a mean for catchment averages.
    pub hcount: f64,
}

#[derive(Debug, Default, Clone, Copy)]
struct Bin {
    observed: f64,
    forecast: f64,
    hours: usize,
}

/// End of the `window`-hour bin containing `t`. For windows dividing 24
/// the bins start at midnight.
pub fn window_end(t: NaiveDateTime, window: u32) -> NaiveDateTime {
    let hour = t.and_utc().timestamp().div_euclid(3600);
    let w = window.max(1) as i64;
    let start = hour.div_euclid(w) * w;
    DateTime::from_timestamp((start + w) * 3600, 0)
        .map(|d| d.naive_utc())
        .unwrap_or(t)
}

/// Sums `(timestamp, observed, forecast)` samples into windows, in time
/// order.
pub fn accumulate(samples: &[(NaiveDateTime, f64, f64)], window: u32) -> Vec<(NaiveDateTime, f64, f64, usize)> {
    let mut bins: BTreeMap<NaiveDateTime, Bin> = BTreeMap::new();
    for (t, o, f) in samples {
        if !o.is_finite() || !f.is_finite() {
            continue;
        }
        let bin = bins.entry(window_end(*t, window)).or_default();
        bin.observed += o;
        bin.forecast += f;
        bin.hours += 1;
    }
    bins.into_iter()
        .map(|(t, b)| (t, b.observed, b.forecast, b.hours))
        .collect()
}

/// Accumulates every station for lead hours `1..=max_lead` and each window.
///
/// Output is ordered by station (first appearance), lead, window, time.
pub fn accumulate_stations(rows: &[&JoinedRow], max_lead: u32, windows: &[u32]) -> Vec<AccumulatedRow> {
    let mut order: Vec<&str> = Vec::new();
    let mut by_station: BTreeMap<&str, Vec<&JoinedRow>> = BTreeMap::new();
    for row in rows {
        let entry = by_station.entry(row.station_id.as_str()).or_default();
        if entry.is_empty() {
            order.push(row.station_id.as_str());
        }
        entry.push(row);
    }

    let mut out = Vec::new();
    for station in order {
        let station_rows = &by_station[station];
        for lead in 1..=max_lead {
            let samples: Vec<(NaiveDateTime, f64, f64)> = station_rows
                .iter()
                .filter_map(|r| r.forecast(lead).map(|f| (r.timestamp, r.observed, f)))
                .collect();
            if samples.is_empty() {
                continue;
            }
            for &window in windows {
                out.extend(accumulate(&samples, window).into_iter().map(|(t, o, f, n)| AccumulatedRow {
                    key: station.to_string(),
                    timestamp: t,
                    lead_hour: lead,
                    window_hours: window,
                    observed: o,
                    forecast: f,
                    hcount: n as f64,
                }));
            }
        }
    }
    out
}

/// Means of member-station accumulations per (time, lead, window).
pub fn average_accumulations(rows: &[AccumulatedRow], members: &HashSet<String>, label: &str) -> Vec<AccumulatedRow> {
    let mut groups: BTreeMap<(u32, u32, NaiveDateTime), (f64, f64, f64, usize)> = BTreeMap::new();
    for r in rows.iter().filter(|r| members.contains(&r.key)) {
        let g = groups
            .entry((r.lead_hour, r.window_hours, r.timestamp))
            .or_insert((0.0, 0.0, 0.0, 0));
        g.0 += r.observed;
        g.1 += r.forecast;
        g.2 += r.hcount;
        g.3 += 1;
    }
    groups
        .into_iter()
        .map(|((lead, window, t), (o, f, h, n))| {
            let n = n as f64;
            AccumulatedRow {
                key: label.to_string(),
                timestamp: t,
                lead_hour: lead,
                window_hours: window,
                observed: o / n,
                forecast: f / n,
                hcount: h / n,
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

pub fn write_station_accumulations(path: &Path, product: &str, rows: &[AccumulatedRow]) -> Result<(), TableError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut wtr = csv::Writer::from_path(path).map_err(|e| TableError::csv(path, e))?;
    wtr.write_record([
        COL_DATETIME,
        COL_MONTH,
        COL_LEAD,
        COL_WINDOW,
        COL_SITE_ID,
        COL_PRODUCT,
        COL_ACC_STATION,
        COL_ACC_FORECAST,
        COL_HCOUNT,
    ])
    .map_err(|e| TableError::csv(path, e))?;
    for r in rows {
        wtr.write_record([
            r.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            r.timestamp.month().to_string(),
            r.lead_hour.to_string(),
            r.window_hours.to_string(),
            r.key.clone(),
            product.to_string(),
            r.observed.to_string(),
            r.forecast.to_string(),
            r.hcount.to_string(),
        ])
        .map_err(|e| TableError::csv(path, e))?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_catchment_accumulations(path: &Path, product: &str, rows: &[AccumulatedRow]) -> Result<(), TableError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut wtr = csv::Writer::from_path(path).map_err(|e| TableError::csv(path, e))?;
    wtr.write_record([
        COL_CATCHMENT,
        COL_DATETIME,
        COL_MONTH,
        COL_PRODUCT,
        COL_LEAD,
        COL_WINDOW,
        COL_ACC_CATCHMENT,
        COL_ACC_FORECAST,
        COL_HCOUNT,
    ])
    .map_err(|e| TableError::csv(path, e))?;
    for r in rows {
        wtr.write_record([
            r.key.clone(),
            r.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            r.timestamp.month().to_string(),
            product.to_string(),
            r.lead_hour.to_string(),
            r.window_hours.to_string(),
            r.observed.to_string(),
            r.forecast.to_string(),
            r.hcount.to_string(),
        ])
        .map_err(|e| TableError::csv(path, e))?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2019, 1, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_window_end_labels() {
        assert_eq!(window_end(at(1, 5), 1), at(1, 6));
        assert_eq!(window_end(at(1, 5), 3), at(1, 6));
        assert_eq!(window_end(at(1, 6), 3), at(1, 9));
        assert_eq!(window_end(at(1, 23), 24), at(2, 0));
        assert_eq!(window_end(at(1, 7), 6), at(1, 12));
    }

    #[test]
    fn test_one_hour_window_keeps_hourly_values() {
        let samples = vec![(at(1, 0), 1.0, 1.5), (at(1, 1), 0.0, 0.2)];
        let acc = accumulate(&samples, 1);
        assert_eq!(acc, vec![(at(1, 1), 1.0, 1.5, 1), (at(1, 2), 0.0, 0.2, 1)]);
    }

    #[test]
    fn test_daily_window_sums_all_contributing_hours() {
        let mut samples: Vec<_> = (0..24).map(|h| (at(1, h), 1.0, 2.0)).collect();
        samples.remove(7); // a missing hour
        samples.push((at(2, 0), 5.0, 5.0));
        let acc = accumulate(&samples, 24);
        assert_eq!(acc.len(), 2);
        assert_eq!(acc[0], (at(2, 0), 23.0, 46.0, 23));
        assert_eq!(acc[1], (at(3, 0), 5.0, 5.0, 1));
    }

    #[test]
    fn test_stations_use_only_hours_with_forecast() {
        let mut a1 = JoinedRow::new("A", at(1, 0), "p", 1.0);
        a1.set_forecast(1, 2.0);
        let mut a2 = JoinedRow::new("A", at(1, 1), "p", 3.0);
        a2.set_forecast(2, 9.0);
        let rows = vec![&a1, &a2];

        let acc = accumulate_stations(&rows, 2, &[3]);
        assert_eq!(acc.len(), 2);
        assert_eq!((acc[0].lead_hour, acc[0].observed, acc[0].forecast, acc[0].hcount), (1, 1.0, 2.0, 1.0));
        assert_eq!((acc[1].lead_hour, acc[1].observed, acc[1].forecast), (2, 3.0, 9.0));
        assert_eq!(acc[1].timestamp, at(1, 3));
    }

    #[test]
    fn test_catchment_average_of_station_accumulations() {
        let acc = |key: &str, o: f64, f: f64, h: f64| AccumulatedRow {
            key: key.to_string(),
            timestamp: at(1, 3),
            lead_hour: 1,
            window_hours: 3,
            observed: o,
            forecast: f,
            hcount: h,
        };
        let rows = vec![acc("A", 1.0, 2.0, 3.0), acc("B", 3.0, 4.0, 2.0), acc("Z", 100.0, 100.0, 1.0)];
        let members: HashSet<String> = ["A".to_string(), "B".to_string()].into();
        let avg = average_accumulations(&rows, &members, "Selwyn");
        assert_eq!(avg, vec![AccumulatedRow { key: "Selwyn".into(), ..acc("", 2.0, 3.0, 2.5) }]);
    }

    #[test]
    fn test_station_accumulation_file_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cumsum_all_stations_p.csv");
        let row = AccumulatedRow {
            key: "A".into(),
            timestamp: at(1, 3),
            lead_hour: 2,
            window_hours: 3,
            observed: 1.5,
            forecast: 0.0,
            hcount: 3.0,
        };
        write_station_accumulations(&path, "ECMWF_8km", &[row]).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "DateTime of forecast,Month,Forecasted hours,Accum. hours,ExtSiteID,MetService product,\
             Accum. station precipitation [mm],Accum. forecasted precipitation [mm],Hcount"
        );
        assert_eq!(lines.next().unwrap(), "2019-01-01 03:00:00,1,2,3,A,ECMWF_8km,1.5,0,3");
    }
}
