/// Skill statistics per (lead hour, accumulation window) stratum.

use std::collections::BTreeMap;
use std::path::Path;

use super::accumulate::{AccumulatedRow, COL_LEAD, COL_WINDOW};
use super::percent_error::COL_CATCHMENT;
use super::regression;
use crate::logging::{FailureLog, FailureType};
use crate::model::{Ratio, SkillStatistic};
use crate::stations::TableError;

pub const COL_R_SQUARED: &str = "R-squared [-]";
pub const COL_RMSE: &str = "RMSE [mm]";
pub const COL_BIAS: &str = "Bias [%]";
pub const COL_COUNT: &str = "Nr. of observations";

const MIN_SAMPLES: usize = 2;

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 { f64::NAN } else { sum / n as f64 }
}

/// Statistics for one stratum, or `None` when it cannot be fit.
///
/// The regression is accumulated forecast on accumulated observed. RMSE is
/// divided by the mean `Hcount` of the windows, giving a per-hour figure.
pub fn stratum_statistic(
    catchment: Option<&str>,
    lead_hour: u32,
    window_hours: u32,
    rows: &[&AccumulatedRow],
    failures: &mut FailureLog,
) -> Option<SkillStatistic> {
    let unit = match catchment {
        Some(c) => format!("{}/{}h/{}h", c, lead_hour, window_hours),
        None => format!("{}h/{}h", lead_hour, window_hours),
    };
    if rows.len() < MIN_SAMPLES {
        failures.record_as(
            &unit,
            "regression",
            FailureType::Expected,
            &format!("only {} accumulated sample(s)", rows.len()),
        );
        return None;
    }

    let observed: Vec<f64> = rows.iter().map(|r| r.observed).collect();
    let forecast: Vec<f64> = rows.iter().map(|r| r.forecast).collect();
    let fit = match regression::fit(&observed, &forecast) {
        Ok(fit) => fit,
        Err(e) => {
            failures.record_as(&unit, "regression", FailureType::Expected, &e.to_string());
            return None;
        }
    };

    let mse = mean(observed.iter().zip(&forecast).map(|(o, f)| (f - o).powi(2)));
    let hours = mean(rows.iter().map(|r| r.hcount));

    Some(SkillStatistic {
        catchment: catchment.map(str::to_string),
        lead_hour,
        accumulation_hours: window_hours,
        r_squared_adj: fit.adjusted_r_squared(),
        rmse: mse.sqrt() / hours,
        bias_percent: Ratio::percent_difference(mean(forecast.iter().copied()), mean(observed.iter().copied())),
        observations: rows.len(),
    })
}

/// Statistics over pooled station accumulations, one per (lead, window).
pub fn station_statistics(rows: &[AccumulatedRow], failures: &mut FailureLog) -> Vec<SkillStatistic> {
    let mut strata: BTreeMap<(u32, u32), Vec<&AccumulatedRow>> = BTreeMap::new();
    for r in rows {
        strata.entry((r.lead_hour, r.window_hours)).or_default().push(r);
    }
    strata
        .into_iter()
        .filter_map(|((lead, window), group)| stratum_statistic(None, lead, window, &group, failures))
        .collect()
}

/// Statistics per catchment average, one per (catchment, lead, window).
pub fn catchment_statistics(rows: &[AccumulatedRow], failures: &mut FailureLog) -> Vec<SkillStatistic> {
    let mut strata: BTreeMap<(&str, u32, u32), Vec<&AccumulatedRow>> = BTreeMap::new();
    for r in rows {
        strata
            .entry((r.key.as_str(), r.lead_hour, r.window_hours))
            .or_default()
            .push(r);
    }
    strata
        .into_iter()
        .filter_map(|((name, lead, window), group)| stratum_statistic(Some(name), lead, window, &group, failures))
        .collect()
}

pub fn write_statistics(path: &Path, with_catchment: bool, stats: &[SkillStatistic]) -> Result<(), TableError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut wtr = csv::Writer::from_path(path).map_err(|e| TableError::csv(path, e))?;

    let mut header = Vec::with_capacity(7);
    if with_catchment {
        header.push(COL_CATCHMENT);
    }
    header.extend([COL_LEAD, COL_WINDOW, COL_R_SQUARED, COL_RMSE, COL_BIAS, COL_COUNT]);
    wtr.write_record(&header)
        .map_err(|e| TableError::csv(path, e))?;

    for s in stats {
        let mut line = Vec::with_capacity(7);
        if with_catchment {
            line.push(s.catchment.clone().unwrap_or_default());
        }
        line.extend([
            s.lead_hour.to_string(),
            s.accumulation_hours.to_string(),
            s.r_squared_adj.map(|r| r.to_string()).unwrap_or_default(),
            s.rmse.to_string(),
            s.bias_percent.to_string(),
            s.observations.to_string(),
        ]);
        wtr.write_record(&line)
            .map_err(|e| TableError::csv(path, e))?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::Stage;
    use chrono::{NaiveDate, NaiveDateTime};

    fn at(h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2019, 1, 1)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn acc(key: &str, h: u32, lead: u32, window: u32, observed: f64, forecast: f64, hcount: f64) -> AccumulatedRow {
        AccumulatedRow {
            key: key.to_string(),
            timestamp: at(h),
            lead_hour: lead,
            window_hours: window,
            observed,
            forecast,
            hcount,
        }
    }

    #[test]
    fn test_five_percent_overforecast() {
        let rows = vec![
            acc("A", 1, 1, 1, 1.0, 1.05, 1.0),
            acc("A", 2, 1, 1, 2.0, 2.1, 1.0),
            acc("B", 1, 1, 1, 3.0, 3.15, 1.0),
        ];
        let mut log = FailureLog::new(Stage::Analyze);
        let stats = station_statistics(&rows, &mut log);
        assert_eq!(stats.len(), 1);
        let s = &stats[0];
        assert_eq!((s.lead_hour, s.accumulation_hours, s.observations), (1, 1, 3));
        assert!((s.bias_percent.value().unwrap() - 5.0).abs() < 1e-9, "mean forecast is 5% above mean observed");
        assert!((s.r_squared_adj.unwrap() - 1.0).abs() < 1e-9, "forecast is an exact linear function");
        let expected_rmse = ((0.05f64.powi(2) + 0.1f64.powi(2) + 0.15f64.powi(2)) / 3.0).sqrt();
        assert!((s.rmse - expected_rmse).abs() < 1e-9);
        assert!(log.is_empty());
    }

    #[test]
    fn test_rmse_is_scaled_by_mean_hour_count() {
        let rows = vec![acc("A", 3, 2, 3, 0.0, 3.0, 3.0), acc("A", 6, 2, 3, 3.0, 0.0, 1.0)];
        let mut log = FailureLog::new(Stage::Analyze);
        let stats = station_statistics(&rows, &mut log);
        assert_eq!(stats[0].rmse, 1.5, "rmse 3 over mean Hcount 2");
        assert_eq!(stats[0].r_squared_adj, None, "two samples have no adjusted R²");
    }

    #[test]
    fn test_zero_mean_observed_gives_undefined_bias() {
        let rows = vec![acc("A", 1, 1, 1, 0.0, 0.5, 1.0), acc("A", 2, 1, 1, 0.0, 0.0, 1.0)];
        let mut log = FailureLog::new(Stage::Analyze);
        // constant observed is a degenerate predictor
        assert!(station_statistics(&rows, &mut log).is_empty());
        assert_eq!(log.count(FailureType::Expected), 1);

        let rows = vec![acc("A", 1, 1, 1, 1.0, 0.5, 1.0), acc("A", 2, 1, 1, -1.0, 0.0, 1.0)];
        let stats = station_statistics(&rows, &mut log);
        assert_eq!(stats[0].bias_percent, Ratio::Undefined);
    }

    #[test]
    fn test_degenerate_strata_are_skipped_not_fatal() {
        let rows = vec![
            acc("A", 1, 1, 1, 1.0, 1.0, 1.0),
            acc("A", 1, 1, 3, 1.0, 1.0, 1.0),
            acc("A", 2, 1, 3, 2.0, 2.5, 1.0),
        ];
        let mut log = FailureLog::new(Stage::Analyze);
        let stats = station_statistics(&rows, &mut log);
        assert_eq!(stats.len(), 1, "the single-sample stratum is omitted");
        assert_eq!(stats[0].accumulation_hours, 3);
        assert_eq!(log.len(), 1);
        assert_eq!(log.records()[0].unit, "1h/1h");
    }

    #[test]
    fn test_constant_zero_forecast_keeps_the_row() {
        let rows = vec![
            acc("A", 1, 1, 1, 1.0, 0.0, 1.0),
            acc("A", 2, 1, 1, 2.0, 0.0, 1.0),
            acc("A", 3, 1, 1, 3.0, 0.0, 1.0),
            acc("A", 4, 1, 1, 0.5, 0.0, 1.0),
        ];
        let mut log = FailureLog::new(Stage::Analyze);
        let stats = station_statistics(&rows, &mut log);
        assert_eq!(stats.len(), 1, "a dry forecast is still scored");
        let s = &stats[0];
        assert_eq!(s.r_squared_adj, None);
        assert_eq!(s.bias_percent.value(), Some(-100.0));
        let expected_rmse = ((1.0 + 4.0 + 9.0 + 0.25) / 4.0f64).sqrt();
        assert!((s.rmse - expected_rmse).abs() < 1e-9);
        assert_eq!(s.observations, 4);
        assert!(log.is_empty());
    }

    #[test]
    fn test_catchment_strata_are_keyed_by_name() {
        let rows = vec![
            acc("Selwyn", 1, 1, 1, 1.0, 2.0, 1.0),
            acc("Selwyn", 2, 1, 1, 2.0, 3.0, 1.0),
            acc("Ashley", 1, 1, 1, 1.0, 1.0, 1.0),
            acc("Ashley", 2, 1, 1, 3.0, 4.0, 1.0),
        ];
        let mut log = FailureLog::new(Stage::Analyze);
        let stats = catchment_statistics(&rows, &mut log);
        let names: Vec<_> = stats.iter().map(|s| s.catchment.as_deref().unwrap()).collect();
        assert_eq!(names, vec!["Ashley", "Selwyn"]);
    }

    #[test]
    fn test_statistics_file_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cumsum_statistics_catchments_avg_p.csv");
        let stat = SkillStatistic {
            catchment: Some("Selwyn".into()),
            lead_hour: 4,
            accumulation_hours: 6,
            r_squared_adj: None,
            rmse: 0.25,
            bias_percent: Ratio::Undefined,
            observations: 2,
        };
        write_statistics(&path, true, &[stat]).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "Catchment,Forecasted hours,Accum. hours,R-squared [-],RMSE [mm],Bias [%],Nr. of observations"
        );
        assert_eq!(lines.next().unwrap(), "Selwyn,4,6,,0.25,undefined,2");
    }
}
