/// Station–forecast joiner.
///
/// For every raster of a product and every station: look up the observed
/// value at the raster's valid time, and only if there is one, sample the
/// raster at the station. Rows are keyed by (station, valid time) and
/// collect one forecast per lead hour.

use chrono::NaiveDateTime;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::sampler::RasterSampler;
use super::JoinError;
use crate::config::JoinConfig;
use crate::forecast::RasterName;
use crate::logging::{self, FailureLog, FailureType, Stage};
use crate::model::JoinedRow;
use crate::stations::{Lookup, ObservationIndex, StationRegistry};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinSummary {
    /// `*.tif` files found for the product.
    pub rasters: usize,
    /// Rasters inside the date range and lead limit that were sampled.
    pub rasters_used: usize,
    pub samples: usize,
    pub rows: usize,
}

/// Rasters of one product directory in name order.
pub fn list_rasters(tif_dir: &Path) -> Result<Vec<PathBuf>, JoinError> {
    let pattern = tif_dir.join("*.tif");
    let mut files: Vec<PathBuf> = glob::glob(&pattern.to_string_lossy())?
        .filter_map(Result::ok)
        .collect();
    files.sort();
    Ok(files)
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

pub fn join_product(
    product: &str,
    rasters: &[PathBuf],
    registry: &StationRegistry,
    observations: &ObservationIndex,
    sampler: &mut dyn RasterSampler,
    config: &JoinConfig,
    failures: &mut FailureLog,
) -> (Vec<JoinedRow>, JoinSummary) {
    let mut summary = JoinSummary {
        rasters: rasters.len(),
        ..JoinSummary::default()
    };
    // (registry position, valid time) orders rows by station then time
    let mut rows: BTreeMap<(usize, NaiveDateTime), JoinedRow> = BTreeMap::new();
    // missing observations per registry position, summarised after the loop
    let mut missing = vec![0usize; registry.len()];

    for path in rasters {
        let label = file_label(path);
        let name = match RasterName::parse(&label) {
            Ok(name) => name,
            Err(e) => {
                failures.record(&label, "parse raster name", &e);
                continue;
            }
        };
        if name.lead_hour == 0 || name.lead_hour > config.max_lead_hours {
            failures.record_as(
                &label,
                "select raster",
                FailureType::Expected,
                &format!("lead hour {} outside 1..={}", name.lead_hour, config.max_lead_hours),
            );
            continue;
        }
        if !config.range.contains(&name.valid) {
            continue;
        }
        summary.rasters_used += 1;

        for (position, station) in registry.stations().iter().enumerate() {
            let observed = match observations.lookup(&station.id, name.valid) {
                Lookup::Found(v) => v,
                Lookup::NotFound => {
                    missing[position] += 1;
                    continue;
                }
            };
            match sampler.sample(path, station.x, station.y) {
                Ok(value) => {
                    summary.samples += 1;
                    rows.entry((position, name.valid))
                        .or_insert_with(|| JoinedRow::new(&station.id, name.valid, product, observed))
                        .set_forecast(name.lead_hour, value);
                }
                Err(e) => failures.record(&station.id, &format!("sample {}", label), &e),
            }
        }
    }

    for (station, count) in registry.stations().iter().zip(&missing) {
        if *count > 0 {
            failures.record_as(
                &station.id,
                &format!("lookup observations for {}", product),
                FailureType::Expected,
                &format!("observation not found for {} of {} rasters in range", count, summary.rasters_used),
            );
        }
    }

    let rows: Vec<JoinedRow> = rows
        .into_values()
        .filter(JoinedRow::has_any_forecast)
        .collect();
    summary.rows = rows.len();
    logging::debug(
        Stage::Join,
        Some(product),
        &format!(
            "{} of {} rasters in range, {} samples, {} rows",
            summary.rasters_used, summary.rasters, summary.samples, summary.rows
        ),
    );
    (rows, summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DateRange;
    use crate::join::sampler::NativeSampler;
    use crate::model::{Observation, Station};
    use crate::raster::{GridSpec, Raster, write_geotiff};
    use chrono::NaiveDate;

    fn at(d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2019, 1, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    // 2x2 km grid; station A in the top-left pixel, B in the bottom-right,
    // C outside the extent.
    fn registry() -> StationRegistry {
        StationRegistry::new(vec![
            Station { id: "B".into(), x: 1_501_500.0, y: 5_198_500.0 },
            Station { id: "A".into(), x: 1_500_500.0, y: 5_199_500.0 },
            Station { id: "C".into(), x: 1_400_000.0, y: 5_199_500.0 },
        ])
    }

    fn write_raster(dir: &Path, lead: u32, valid: NaiveDateTime, top_left: f32, bottom_right: f32) -> PathBuf {
        let grid = GridSpec {
            origin_x: 1_500_000.0,
            origin_y: 5_200_000.0,
            resolution: 1000.0,
            cols: 2,
            rows: 2,
        };
        let mut raster = Raster::empty(grid, -9999.0, Some(2193));
        raster.set(0, 0, top_left);
        raster.set(1, 1, bottom_right);
        let name = RasterName {
            lead_hour: lead,
            valid,
            issue: valid - chrono::Duration::hours(lead as i64),
        };
        let path = dir.join(name.file_name());
        write_geotiff(&path, &raster).unwrap();
        path
    }

    fn observations() -> ObservationIndex {
        let obs = |id: &str, t, value| Observation {
            station_id: id.to_string(),
            timestamp: t,
            value,
        };
        ObservationIndex::new(&[
            obs("A", at(2, 5), 0.0),
            obs("B", at(2, 5), 1.2),
            obs("C", at(2, 5), 3.0),
            obs("A", at(2, 6), 0.4),
        ])
    }

    fn config() -> JoinConfig {
        JoinConfig {
            range: DateRange { from: at(2, 0), to: at(2, 23) },
            max_lead_hours: 48,
            sampler: Default::default(),
        }
    }

    #[test]
    fn test_rows_collect_leads_per_station_and_valid_time() {
        let dir = tempfile::tempdir().unwrap();
        write_raster(dir.path(), 1, at(2, 5), 0.5, 1.0);
        write_raster(dir.path(), 2, at(2, 5), 0.7, 1.1);
        write_raster(dir.path(), 1, at(2, 6), 0.2, 9.0);
        let rasters = list_rasters(dir.path()).unwrap();

        let mut failures = FailureLog::new(Stage::Join);
        let (rows, summary) = join_product(
            "ECMWF_8km",
            &rasters,
            &registry(),
            &observations(),
            &mut NativeSampler::new(),
            &config(),
            &mut failures,
        );

        let keys: Vec<_> = rows.iter().map(|r| (r.station_id.as_str(), r.timestamp)).collect();
        assert_eq!(keys, vec![("B", at(2, 5)), ("A", at(2, 5)), ("A", at(2, 6))], "registry order, then time");

        let a5 = &rows[1];
        assert_eq!(a5.observed, 0.0, "zero observations are kept");
        assert_eq!(a5.forecast(1), Some(0.5));
        assert_eq!(a5.forecast(2), Some(0.7f32 as f64), "f32 pixel widened to f64");
        assert_eq!(rows[0].forecast(2), Some(1.1f32 as f64));
        assert_eq!(summary.rasters_used, 3);
        assert_eq!(summary.rows, 3);
    }

    #[test]
    fn test_failures_are_recorded_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write_raster(dir.path(), 1, at(2, 6), 0.2, 9.0);
        std::fs::write(dir.path().join("mask.tif"), b"").unwrap();
        let rasters = list_rasters(dir.path()).unwrap();

        let mut failures = FailureLog::new(Stage::Join);
        let (rows, _) = join_product(
            "ECMWF_8km",
            &rasters,
            &registry(),
            &observations(),
            &mut NativeSampler::new(),
            &config(),
            &mut failures,
        );

        assert_eq!(rows.len(), 1, "only A has an observation at 06:00");
        let units: Vec<_> = failures.records().iter().map(|r| r.unit.as_str()).collect();
        // mask.tif is not a raster name; B and C have no 06:00 observation
        assert_eq!(units, vec!["mask.tif", "B", "C"]);
        assert_eq!(failures.count(FailureType::Expected), 2);
    }

    #[test]
    fn test_missing_observations_are_summarised_per_station() {
        let dir = tempfile::tempdir().unwrap();
        for h in [6, 7, 8] {
            write_raster(dir.path(), 1, at(2, h), 0.2, 9.0);
            write_raster(dir.path(), 2, at(2, h), 0.3, 9.0);
        }
        let rasters = list_rasters(dir.path()).unwrap();

        let mut failures = FailureLog::new(Stage::Join);
        join_product(
            "ECMWF_8km",
            &rasters,
            &registry(),
            &observations(),
            &mut NativeSampler::new(),
            &config(),
            &mut failures,
        );

        let units: Vec<_> = failures.records().iter().map(|r| r.unit.as_str()).collect();
        assert_eq!(units, vec!["B", "A", "C"], "one entry per station, in registry order");
        assert_eq!(
            failures.records()[0].message,
            "observation not found for 6 of 6 rasters in range"
        );
        assert_eq!(
            failures.records()[1].message,
            "observation not found for 4 of 6 rasters in range",
            "A only has 06:00"
        );
        assert_eq!(failures.count(FailureType::Expected), 3);
    }

    #[test]
    fn test_out_of_extent_sample_leaves_no_row() {
        let dir = tempfile::tempdir().unwrap();
        write_raster(dir.path(), 1, at(2, 5), 0.5, 1.0);
        let rasters = list_rasters(dir.path()).unwrap();
        let mut failures = FailureLog::new(Stage::Join);
        let (rows, _) = join_product(
            "p",
            &rasters,
            &registry(),
            &observations(),
            &mut NativeSampler::new(),
            &config(),
            &mut failures,
        );
        assert!(rows.iter().all(|r| r.station_id != "C"));
        assert!(failures.records().iter().any(|r| r.unit == "C" && r.message.contains("outside")));
    }

    #[test]
    fn test_range_and_lead_limit_select_rasters() {
        let dir = tempfile::tempdir().unwrap();
        write_raster(dir.path(), 1, at(3, 5), 0.5, 1.0); // after range
        write_raster(dir.path(), 60, at(2, 5), 0.5, 1.0); // beyond max lead
        let rasters = list_rasters(dir.path()).unwrap();
        let mut failures = FailureLog::new(Stage::Join);
        let (rows, summary) = join_product(
            "p",
            &rasters,
            &registry(),
            &observations(),
            &mut NativeSampler::new(),
            &config(),
            &mut failures,
        );
        assert!(rows.is_empty());
        assert_eq!(summary.rasters, 2);
        assert_eq!(summary.rasters_used, 0);
        assert_eq!(failures.len(), 1, "lead 60 is recorded");
    }
}
