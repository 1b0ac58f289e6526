/// Raster file naming and forecast time stamps.
///
/// A raster is named `{lead}h_{valid}_{issue}.tif` with both stamps in local
/// time as `%Y%m%d_%H%M`, e.g. `3h_20190101_1600_20190101_1300.tif`. The
/// issue stamp of a source file is the trailing `YYYYMMDDHH` (UTC) of its
/// file stem.

use chrono::{NaiveDate, NaiveDateTime};
use jiff::tz::TimeZone;
use std::path::Path;

use super::ForecastError;

const STAMP_FORMAT: &str = "%Y%m%d_%H%M";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RasterName {
    pub lead_hour: u32,
    /// Local time the forecast applies to.
    pub valid: NaiveDateTime,
    /// Local issue time of the source file.
    pub issue: NaiveDateTime,
}

impl RasterName {
    pub fn file_name(&self) -> String {
        format!(
            "{}h_{}_{}.tif",
            self.lead_hour,
            self.valid.format(STAMP_FORMAT),
            self.issue.format(STAMP_FORMAT)
        )
    }

    /// Parses a file name (or a path's file name) produced by `file_name`.
    pub fn parse(name: &str) -> Result<Self, ForecastError> {
        let bad = || ForecastError::Name(name.to_string());
        let file = Path::new(name)
            .file_name()
            .and_then(|f| f.to_str())
            .ok_or_else(bad)?;
        let stem = file.strip_suffix(".tif").ok_or_else(bad)?;

        let parts: Vec<&str> = stem.split('_').collect();
        let [lead, valid_day, valid_time, issue_day, issue_time] = parts.as_slice() else {
            return Err(bad());
        };
        let lead_hour = lead
            .strip_suffix('h')
            .and_then(|h| h.parse::<u32>().ok())
            .ok_or_else(bad)?;
        let stamp = |day: &str, time: &str| {
            NaiveDateTime::parse_from_str(&format!("{}_{}", day, time), STAMP_FORMAT).map_err(|_| bad())
        };
        Ok(Self {
            lead_hour,
            valid: stamp(*valid_day, *valid_time)?,
            issue: stamp(*issue_day, *issue_time)?,
        })
    }
}

/// UTC issue time from the trailing ten digits of a source file stem.
pub fn issue_time_from_path(path: &Path) -> Result<NaiveDateTime, ForecastError> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| ForecastError::Time(path.display().to_string()))?;
    let bad = || ForecastError::Time(stem.to_string());

    let digits: Vec<u32> = stem
        .chars()
        .rev()
        .take(10)
        .map(|c| c.to_digit(10))
        .collect::<Option<Vec<_>>>()
        .ok_or_else(bad)?
        .into_iter()
        .rev()
        .collect();
    if digits.len() != 10 {
        return Err(bad());
    }
    let number = |range: std::ops::Range<usize>| digits[range].iter().fold(0, |acc, d| acc * 10 + d);

    NaiveDate::from_ymd_opt(number(0..4) as i32, number(4..6), number(6..8))
        .and_then(|d| d.and_hms_opt(number(8..10), 0, 0))
        .ok_or_else(bad)
}

pub fn load_time_zone(name: &str) -> Result<TimeZone, ForecastError> {
    TimeZone::get(name).map_err(|_| ForecastError::TimeZone(name.to_string()))
}

/// Converts a naive UTC time to naive wall-clock time in `tz`.
pub fn utc_to_local(utc: NaiveDateTime, tz: &TimeZone) -> Result<NaiveDateTime, ForecastError> {
    let bad = || ForecastError::Time(utc.to_string());
    let instant = jiff::Timestamp::from_second(utc.and_utc().timestamp()).map_err(|_| bad())?;
    let local = instant.to_zoned(tz.clone()).datetime();
    NaiveDate::from_ymd_opt(local.year() as i32, local.month() as u32, local.day() as u32)
        .and_then(|d| d.and_hms_opt(local.hour() as u32, local.minute() as u32, local.second() as u32))
        .ok_or_else(bad)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_file_name_layout() {
        let name = RasterName {
            lead_hour: 3,
            valid: at(2019, 1, 1, 16),
            issue: at(2019, 1, 1, 13),
        };
        assert_eq!(name.file_name(), "3h_20190101_1600_20190101_1300.tif");
        assert_eq!(RasterName::parse(&name.file_name()).unwrap(), name);
    }

    #[test]
    fn test_parse_accepts_full_path() {
        let name = RasterName::parse("/data/tif/ECMWF_8km/85h_20190104_0200_20181231_0900.tif").unwrap();
        assert_eq!(name.lead_hour, 85);
        assert_eq!(name.valid, at(2019, 1, 4, 2));
    }

    #[test]
    fn test_parse_rejects_foreign_names() {
        for bad in [
            "3_20190101_1600_20190101_1300.tif",
            "3h_20190101_1600.tif",
            "notes.txt",
            "xh_20190101_1600_20190101_1300.tif",
        ] {
            assert!(RasterName::parse(bad).is_err(), "{} should not parse", bad);
        }
    }

    #[test]
    fn test_issue_time_from_trailing_digits() {
        let t = issue_time_from_path(Path::new("/nc/ECMWF_8km/ecmwf_8km_2019010112.nc")).unwrap();
        assert_eq!(t, at(2019, 1, 1, 12));
    }

    #[test]
    fn test_issue_time_rejects_short_or_invalid_stamp() {
        assert!(issue_time_from_path(Path::new("forecast_20190101.nc")).is_err());
        assert!(issue_time_from_path(Path::new("forecast_2019133112.nc")).is_err(), "month 13");
    }

    #[test]
    fn test_utc_to_local_follows_daylight_saving() {
        let tz = load_time_zone("Pacific/Auckland").unwrap();
        // NZST (+12) in winter, NZDT (+13) in summer
        assert_eq!(utc_to_local(at(2019, 7, 1, 0), &tz).unwrap(), at(2019, 7, 1, 12));
        assert_eq!(utc_to_local(at(2019, 1, 1, 0), &tz).unwrap(), at(2019, 1, 1, 13));
    }

    #[test]
    fn test_unknown_time_zone() {
        assert!(matches!(load_time_zone("Mars/Olympus"), Err(ForecastError::TimeZone(_))));
    }
}
