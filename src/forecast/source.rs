//! Forecast source files.
//!
//! A source file holds `variable(time, south_north, west_east)` as a
//! cumulative field, a CF `time` axis, and `latitude`/`longitude` either as
//! 1-D axes or as 2-D curvilinear fields. `ForecastSource` hides the file
//! format so the rasterizer can be driven with synthetic stacks.

use chrono::{Duration, NaiveDateTime};
use netcdf::AttributeValue;
use std::path::Path;

use super::ForecastError;
use crate::config::parse_timestamp;

const LATITUDE_NAMES: [&str; 3] = ["latitude", "lat", "XLAT"];
const LONGITUDE_NAMES: [&str; 3] = ["longitude", "lon", "XLONG"];
const TIME_NAME: &str = "time";

/// One issue's cumulative forecast, decoded into plain vectors.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastStack {
    /// Layer times in UTC.
    pub times: Vec<NaiveDateTime>,
    pub rows: usize,
    pub cols: usize,
    /// Row-major `rows * cols` coordinates in degrees.
    pub lat: Vec<f64>,
    pub lon: Vec<f64>,
    /// `times.len()` consecutive layers of `rows * cols` values; fill
    /// values are NaN.
    pub values: Vec<f64>,
}

impl ForecastStack {
    pub fn layer_count(&self) -> usize {
        self.times.len()
    }

    pub fn layer(&self, index: usize) -> &[f64] {
        let n = self.rows * self.cols;
        &self.values[index * n..(index + 1) * n]
    }

    /// Precipitation that fell between layer `index - 1` and `index`.
    pub fn increment(&self, index: usize) -> Vec<f64> {
        if index == 0 || index >= self.layer_count() {
            return Vec::new();
        }
        self.layer(index)
            .iter()
            .zip(self.layer(index - 1))
            .map(|(now, before)| now - before)
            .collect()
    }

    /// Checks that every vector matches the declared shape.
    pub fn validate(&self, path: &Path) -> Result<(), ForecastError> {
        let n = self.rows * self.cols;
        let problem = if self.lat.len() != n || self.lon.len() != n {
            Some(format!(
                "coordinates have {}/{} points for a {}x{} grid",
                self.lat.len(),
                self.lon.len(),
                self.rows,
                self.cols
            ))
        } else if self.values.len() != n * self.times.len() {
            Some(format!(
                "{} values for {} layers of {} points",
                self.values.len(),
                self.times.len(),
                n
            ))
        } else {
            None
        };
        match problem {
            Some(message) => Err(ForecastError::Layout {
                path: path.display().to_string(),
                message,
            }),
            None => Ok(()),
        }
    }
}

pub trait ForecastSource {
    fn load(&self, path: &Path) -> Result<ForecastStack, ForecastError>;
}

// ---------------------------------------------------------------------------
// NetCDF
// ---------------------------------------------------------------------------

pub struct NetcdfSource {
    variable: String,
}

impl NetcdfSource {
    pub fn new(variable: &str) -> Self {
        Self {
            variable: variable.to_string(),
        }
    }
}

fn nc_error(path: &Path, e: netcdf::Error) -> ForecastError {
    ForecastError::Netcdf {
        path: path.display().to_string(),
        message: e.to_string(),
    }
}

fn layout_error(path: &Path, message: String) -> ForecastError {
    ForecastError::Layout {
        path: path.display().to_string(),
        message,
    }
}

fn attr_f64(var: &netcdf::Variable, name: &str) -> Option<f64> {
    var.attribute_value(name)
        .and_then(|r| r.ok())
        .and_then(|v| match v {
            AttributeValue::Double(d) => Some(d),
            AttributeValue::Float(f) => Some(f as f64),
            AttributeValue::Int(i) => Some(i as f64),
            AttributeValue::Short(s) => Some(s as f64),
            _ => None,
        })
}

fn attr_string(var: &netcdf::Variable, name: &str) -> Option<String> {
    var.attribute_value(name)
        .and_then(|r| r.ok())
        .and_then(|v| match v {
            AttributeValue::Str(s) => Some(s),
            _ => None,
        })
}

/// Raw values widened to f64. Packed files store short or int data.
fn read_raw(var: &netcdf::Variable, path: &Path) -> Result<Vec<f64>, ForecastError> {
    match var.get_values::<f64, _>(..) {
        Ok(values) => Ok(values),
        Err(e) => var
            .get_values::<f32, _>(..)
            .map(|v| v.into_iter().map(f64::from).collect())
            .or_else(|_| var.get_values::<i16, _>(..).map(|v| v.into_iter().map(f64::from).collect()))
            .or_else(|_| var.get_values::<i32, _>(..).map(|v| v.into_iter().map(f64::from).collect()))
            .map_err(|_| nc_error(path, e)),
    }
}

/// Reads a variable as f64, unpacking `scale_factor`/`add_offset` and
/// turning `_FillValue`/`missing_value` into NaN.
fn read_unpacked(var: &netcdf::Variable, path: &Path) -> Result<Vec<f64>, ForecastError> {
    let raw = read_raw(var, path)?;
    let fill = attr_f64(var, "_FillValue");
    let missing = attr_f64(var, "missing_value");
    let scale = attr_f64(var, "scale_factor").unwrap_or(1.0);
    let offset = attr_f64(var, "add_offset").unwrap_or(0.0);
    Ok(raw
        .into_iter()
        .map(|v| {
            if Some(v) == fill || Some(v) == missing || !v.is_finite() {
                f64::NAN
            } else {
                v * scale + offset
            }
        })
        .collect())
}

fn find_variable<'f>(file: &'f netcdf::File, names: &[&str]) -> Option<netcdf::Variable<'f>> {
    names.iter().find_map(|n| file.variable(n))
}

/// Latitude/longitude as row-major `rows x cols` fields. 1-D axes are
/// expanded to a mesh; fields with a leading time axis use the first layer.
fn read_coordinates(
    file: &netcdf::File,
    rows: usize,
    cols: usize,
    path: &Path,
) -> Result<(Vec<f64>, Vec<f64>), ForecastError> {
    let missing = |names: &[&str]| ForecastError::MissingVariable {
        path: path.display().to_string(),
        variable: names.join("|"),
    };
    let lat_var = find_variable(file, &LATITUDE_NAMES).ok_or_else(|| missing(&LATITUDE_NAMES))?;
    let lon_var = find_variable(file, &LONGITUDE_NAMES).ok_or_else(|| missing(&LONGITUDE_NAMES))?;
    let lat = read_unpacked(&lat_var, path)?;
    let lon = read_unpacked(&lon_var, path)?;
    let n = rows * cols;

    if lat_var.dimensions().len() == 1 && lon_var.dimensions().len() == 1 {
        if lat.len() != rows || lon.len() != cols {
            return Err(layout_error(
                path,
                format!("1-D axes of {}/{} for a {}x{} grid", lat.len(), lon.len(), rows, cols),
            ));
        }
        let mesh_lat = lat.iter().flat_map(|y| std::iter::repeat_n(*y, cols)).collect();
        let mesh_lon = (0..rows).flat_map(|_| lon.iter().copied()).collect();
        return Ok((mesh_lat, mesh_lon));
    }

    if n == 0 || lat.len() < n || lon.len() < n || lat.len() % n != 0 || lon.len() % n != 0 {
        return Err(layout_error(
            path,
            format!("coordinate fields of {}/{} for a {}x{} grid", lat.len(), lon.len(), rows, cols),
        ));
    }
    Ok((lat[..n].to_vec(), lon[..n].to_vec()))
}

impl ForecastSource for NetcdfSource {
    fn load(&self, path: &Path) -> Result<ForecastStack, ForecastError> {
        let file = netcdf::open(path).map_err(|e| nc_error(path, e))?;

        let var = file
            .variable(&self.variable)
            .ok_or_else(|| ForecastError::MissingVariable {
                path: path.display().to_string(),
                variable: self.variable.clone(),
            })?;
        let dims: Vec<usize> = var.dimensions().iter().map(|d| d.len()).collect();
        let [layers, rows, cols] = dims.as_slice() else {
            return Err(layout_error(
                path,
                format!("'{}' has {} dimensions, expected (time, y, x)", self.variable, dims.len()),
            ));
        };
        let (layers, rows, cols) = (*layers, *rows, *cols);
        let values = read_unpacked(&var, path)?;

        let time_var = file
            .variable(TIME_NAME)
            .ok_or_else(|| ForecastError::MissingVariable {
                path: path.display().to_string(),
                variable: TIME_NAME.to_string(),
            })?;
        let units = attr_string(&time_var, "units")
            .ok_or_else(|| layout_error(path, "time axis has no units".to_string()))?;
        let offsets = time_var.get_values::<f64, _>(..).map_err(|e| nc_error(path, e))?;
        let times = decode_cf_times(&units, &offsets)?;
        if times.len() != layers {
            return Err(layout_error(
                path,
                format!("{} time steps for {} layers", times.len(), layers),
            ));
        }

        let (lat, lon) = read_coordinates(&file, rows, cols, path)?;
        let stack = ForecastStack {
            times,
            rows,
            cols,
            lat,
            lon,
            values,
        };
        stack.validate(path)?;
        Ok(stack)
    }
}

// ---------------------------------------------------------------------------
// CF time axis
// ---------------------------------------------------------------------------

fn unit_seconds(unit: &str) -> Option<f64> {
    match unit.trim().to_lowercase().as_str() {
        "seconds" | "second" | "secs" | "sec" | "s" => Some(1.0),
        "minutes" | "minute" | "mins" | "min" => Some(60.0),
        "hours" | "hour" | "hrs" | "hr" | "h" => Some(3600.0),
        "days" | "day" | "d" => Some(86_400.0),
        _ => None,
    }
}

fn parse_reference_time(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim().trim_end_matches("UTC").trim().trim_end_matches('Z');
    let s = s.strip_suffix("+00:00").unwrap_or(s);
    // drop fractional seconds
    let s = match s.rfind('.') {
        Some(dot) if s[..dot].contains(':') => &s[..dot],
        _ => s,
    };
    let s = s.replacen('T', " ", 1);
    parse_timestamp(&s).or_else(|| NaiveDateTime::parse_from_str(&format!("{}:00", s), "%Y-%m-%d %H:%M").ok())
}

/// Decodes `"<unit> since <reference>"` offsets into UTC timestamps.
pub fn decode_cf_times(units: &str, offsets: &[f64]) -> Result<Vec<NaiveDateTime>, ForecastError> {
    let bad = || ForecastError::Time(units.to_string());
    let (unit, reference) = units.split_once(" since ").ok_or_else(bad)?;
    let step = unit_seconds(unit).ok_or_else(bad)?;
    let reference = parse_reference_time(reference).ok_or_else(bad)?;

    offsets
        .iter()
        .map(|v| {
            if !v.is_finite() {
                return Err(ForecastError::Time(format!("{} (offset {})", units, v)));
            }
            let millis = (v * step * 1000.0).round() as i64;
            Ok(reference + Duration::milliseconds(millis))
        })
        .collect()
}
