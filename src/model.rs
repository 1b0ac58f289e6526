/// Core data types for the precipitation forecast verification pipeline.
///
/// This module defines the shared domain model imported by all other modules.
/// It contains no I/O; every stage reads and writes these types through its
/// own table module.

use chrono::NaiveDateTime;
use std::fmt;

// ---------------------------------------------------------------------------
// Lead hours and formats
// ---------------------------------------------------------------------------

/// First lead hour emitted for a forecast issue. Lead 0 has no baseline
/// layer to difference against and is never rasterized.
pub const MIN_LEAD_HOUR: u32 = 1;

/// Last lead hour carried in the joined tables (one column per hour).
pub const MAX_LEAD_HOUR: u32 = 85;

/// Timestamp layout used in every CSV this crate reads or writes.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Returns `true` for lead hours that have a column in the joined table.
pub fn is_valid_lead_hour(lead: u32) -> bool {
    (MIN_LEAD_HOUR..=MAX_LEAD_HOUR).contains(&lead)
}

// ---------------------------------------------------------------------------
// Reference data
// ---------------------------------------------------------------------------

/// A rain gauge with planar coordinates in the target projected system.
#[derive(Debug, Clone, PartialEq)]
pub struct Station {
    pub id: String,
    pub x: f64,
    pub y: f64,
}

/// One hourly precipitation measurement, in local time.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub station_id: String,
    pub timestamp: NaiveDateTime,
    pub value: f64,
}

// ---------------------------------------------------------------------------
// Joined forecast/observation rows
// ---------------------------------------------------------------------------

/// One row of the wide join table: a station at one valid timestamp, with the
/// observed value and the forecast made for that timestamp at every lead.
///
/// `forecasts[i]` holds lead hour `i + 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinedRow {
    pub station_id: String,
    pub timestamp: NaiveDateTime,
    pub product: String,
    pub observed: f64,
    pub forecasts: Vec<Option<f64>>,
}

impl JoinedRow {
    pub fn new(station_id: &str, timestamp: NaiveDateTime, product: &str, observed: f64) -> Self {
        Self {
            station_id: station_id.to_string(),
            timestamp,
            product: product.to_string(),
            observed,
            forecasts: vec![None; MAX_LEAD_HOUR as usize],
        }
    }

    /// Forecast value at `lead`, or `None` when empty or out of range.
    pub fn forecast(&self, lead: u32) -> Option<f64> {
        if !is_valid_lead_hour(lead) {
            return None;
        }
        self.forecasts[(lead - 1) as usize]
    }

    /// Stores a forecast value. Returns `false` if `lead` has no column.
    pub fn set_forecast(&mut self, lead: u32, value: f64) -> bool {
        if !is_valid_lead_hour(lead) {
            return false;
        }
        self.forecasts[(lead - 1) as usize] = Some(value);
        true
    }

    /// A row is worth keeping only if at least one lead hour was filled.
    pub fn has_any_forecast(&self) -> bool {
        self.forecasts.iter().any(Option::is_some)
    }
}

// ---------------------------------------------------------------------------
// Ratios
// ---------------------------------------------------------------------------

/// A percentage that may be undefined because its denominator was zero.
///
/// Written to CSV as the number or the literal `undefined`, never as `inf`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Ratio {
    Value(f64),
    Undefined,
}

impl Ratio {
    /// `(value - reference) / reference * 100`.
    pub fn percent_difference(value: f64, reference: f64) -> Ratio {
        if reference == 0.0 || !reference.is_finite() || !value.is_finite() {
            return Ratio::Undefined;
        }
        Ratio::Value((value - reference) / reference * 100.0)
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            Ratio::Value(v) => Some(*v),
            Ratio::Undefined => None,
        }
    }
}

impl fmt::Display for Ratio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ratio::Value(v) => write!(f, "{}", v),
            Ratio::Undefined => write!(f, "undefined"),
        }
    }
}

// ---------------------------------------------------------------------------
// Skill statistics
// ---------------------------------------------------------------------------

/// Regression-based skill for one (lead hour, accumulation window) stratum,
/// optionally restricted to one catchment average.
#[derive(Debug, Clone, PartialEq)]
pub struct SkillStatistic {
    pub catchment: Option<String>,
    pub lead_hour: u32,
    pub accumulation_hours: u32,
    /// `None` when fewer than three samples were available.
    pub r_squared_adj: Option<f64>,
    pub rmse: f64,
    pub bias_percent: Ratio,
    pub observations: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2019, 3, 1)
            .unwrap()
            .and_hms_opt(6, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_lead_hour_bounds() {
        assert!(!is_valid_lead_hour(0));
        assert!(is_valid_lead_hour(1));
        assert!(is_valid_lead_hour(85));
        assert!(!is_valid_lead_hour(86));
    }

    #[test]
    fn test_joined_row_forecast_slots() {
        let mut row = JoinedRow::new("312810", ts(), "ECMWF_8km", 1.5);
        assert!(!row.has_any_forecast());
        assert!(row.set_forecast(85, 2.0));
        assert!(!row.set_forecast(0, 2.0), "lead 0 has no column");
        assert_eq!(row.forecast(85), Some(2.0));
        assert_eq!(row.forecast(1), None);
        assert!(row.has_any_forecast());
    }

    #[test]
    fn test_percent_difference_with_zero_reference_is_undefined() {
        assert_eq!(Ratio::percent_difference(1.0, 0.0), Ratio::Undefined);
        assert_eq!(Ratio::percent_difference(0.0, 0.0), Ratio::Undefined);
        assert_eq!(Ratio::Undefined.to_string(), "undefined");
    }

    #[test]
    fn test_percent_difference_value() {
        let r = Ratio::percent_difference(2.1, 2.0);
        assert!((r.value().unwrap() - 5.0).abs() < 1e-9);
    }
}
