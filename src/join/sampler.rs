//! Point sampling of forecast rasters.
//!
//! `NativeSampler` decodes the GeoTIFFs in-process and keeps the most
//! recently opened raster, since the joiner samples every station against
//! one raster before moving to the next. `GdalLocationInfo` asks the GDAL
//! command-line tool instead, for rasters written by other software.

use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

use crate::raster::{Raster, RasterError, read_geotiff};

#[derive(Error, Debug)]
pub enum SampleError {
    #[error("point ({x}, {y}) is outside the raster extent")]
    OutsideExtent { x: f64, y: f64 },

    #[error("pixel at ({x}, {y}) is nodata")]
    NoData { x: f64, y: f64 },

    #[error("raster error: {0}")]
    Raster(#[from] RasterError),

    #[error("command {command} failed: {message}")]
    Command { command: String, message: String },

    #[error("cannot parse sampler output '{0}'")]
    Parse(String),
}

pub trait RasterSampler {
    /// Value of the pixel containing planar point `(x, y)`.
    fn sample(&mut self, path: &Path, x: f64, y: f64) -> Result<f64, SampleError>;
}

// ---------------------------------------------------------------------------
// In-process GeoTIFF sampling
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct NativeSampler {
    current: Option<(PathBuf, Raster)>,
}

impl NativeSampler {
    pub fn new() -> Self {
        Self::default()
    }

    fn raster(&mut self, path: &Path) -> Result<&Raster, SampleError> {
        let cached = matches!(&self.current, Some((p, _)) if p == path);
        if !cached {
            self.current = None;
            let raster = read_geotiff(path)?;
            self.current = Some((path.to_path_buf(), raster));
        }
        match &self.current {
            Some((_, raster)) => Ok(raster),
            None => Err(SampleError::Parse(path.display().to_string())),
        }
    }
}

impl RasterSampler for NativeSampler {
    fn sample(&mut self, path: &Path, x: f64, y: f64) -> Result<f64, SampleError> {
        let raster = self.raster(path)?;
        let (row, col) = raster
            .grid
            .pixel_at(x, y)
            .ok_or(SampleError::OutsideExtent { x, y })?;
        raster
            .get(row, col)
            .map(f64::from)
            .ok_or(SampleError::NoData { x, y })
    }
}

// ---------------------------------------------------------------------------
// gdallocationinfo
// ---------------------------------------------------------------------------

/// Runs `gdallocationinfo <raster> -valonly -geoloc <x> <y>` per sample.
#[derive(Debug, Clone)]
pub struct GdalLocationInfo {
    program: String,
    nodata: f64,
}

impl GdalLocationInfo {
    pub fn new(nodata: f64) -> Self {
        Self::with_program("gdallocationinfo", nodata)
    }

    pub fn with_program(program: &str, nodata: f64) -> Self {
        Self {
            program: program.to_string(),
            nodata,
        }
    }
}

/// Interprets the tool's `-valonly` output.
fn parse_location_output(stdout: &str, stderr: &str, x: f64, y: f64, nodata: f64) -> Result<f64, SampleError> {
    if stderr.contains("off this file") {
        return Err(SampleError::OutsideExtent { x, y });
    }
    let text = stdout.trim();
    if text.is_empty() {
        return Err(SampleError::OutsideExtent { x, y });
    }
    let value: f64 = text
        .lines()
        .next()
        .unwrap_or_default()
        .trim()
        .parse()
        .map_err(|_| SampleError::Parse(text.to_string()))?;
    if value.is_nan() || value == nodata {
        return Err(SampleError::NoData { x, y });
    }
    Ok(value)
}

impl RasterSampler for GdalLocationInfo {
    fn sample(&mut self, path: &Path, x: f64, y: f64) -> Result<f64, SampleError> {
        let output = Command::new(&self.program)
            .arg(path)
            .arg("-valonly")
            .arg("-geoloc")
            .arg(x.to_string())
            .arg(y.to_string())
            .output()
            .map_err(|e| SampleError::Command {
                command: self.program.clone(),
                message: e.to_string(),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() && !stderr.contains("off this file") {
            return Err(SampleError::Command {
                command: self.program.clone(),
                message: stderr.trim().to_string(),
            });
        }
        parse_location_output(&stdout, &stderr, x, y, self.nodata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::{GridSpec, write_geotiff};

    fn write_test_raster(dir: &Path, name: &str, fill: f32) -> PathBuf {
        let grid = GridSpec {
            origin_x: 1_500_000.0,
            origin_y: 5_200_000.0,
            resolution: 1000.0,
            cols: 3,
            rows: 2,
        };
        let mut raster = Raster::empty(grid, -9999.0, Some(2193));
        raster.set(0, 0, fill);
        raster.set(1, 2, 0.0);
        let path = dir.join(name);
        write_geotiff(&path, &raster).unwrap();
        path
    }

    #[test]
    fn test_native_sampler_reads_pixel_containing_point() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_test_raster(dir.path(), "1h_20190101_1400_20190101_1300.tif", 2.5);
        let mut sampler = NativeSampler::new();
        assert_eq!(sampler.sample(&path, 1_500_400.0, 5_199_900.0).unwrap(), 2.5);
        assert_eq!(sampler.sample(&path, 1_502_999.0, 5_198_001.0).unwrap(), 0.0);
    }

    #[test]
    fn test_native_sampler_nodata_and_outside_are_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_test_raster(dir.path(), "a.tif", 2.5);
        let mut sampler = NativeSampler::new();
        assert!(matches!(
            sampler.sample(&path, 1_501_500.0, 5_199_500.0),
            Err(SampleError::NoData { .. })
        ));
        assert!(matches!(
            sampler.sample(&path, 1_400_000.0, 5_199_500.0),
            Err(SampleError::OutsideExtent { .. })
        ));
    }

    #[test]
    fn test_native_sampler_switches_rasters() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_test_raster(dir.path(), "a.tif", 1.0);
        let b = write_test_raster(dir.path(), "b.tif", 7.0);
        let mut sampler = NativeSampler::new();
        assert_eq!(sampler.sample(&a, 1_500_500.0, 5_199_500.0).unwrap(), 1.0);
        assert_eq!(sampler.sample(&b, 1_500_500.0, 5_199_500.0).unwrap(), 7.0);
        assert_eq!(sampler.sample(&a, 1_500_500.0, 5_199_500.0).unwrap(), 1.0);
    }

    #[test]
    fn test_native_sampler_missing_file_is_raster_error() {
        let mut sampler = NativeSampler::new();
        let result = sampler.sample(Path::new("/nonexistent/a.tif"), 0.0, 0.0);
        assert!(matches!(result, Err(SampleError::Raster(_))));
    }

    #[test]
    fn test_location_output_parsing() {
        assert_eq!(parse_location_output("1.25\n", "", 0.0, 0.0, -9999.0).unwrap(), 1.25);
        assert!(matches!(
            parse_location_output("-9999\n", "", 0.0, 0.0, -9999.0),
            Err(SampleError::NoData { .. })
        ));
        assert!(matches!(
            parse_location_output("", "ERROR 1: Location is off this file!", 0.0, 0.0, -9999.0),
            Err(SampleError::OutsideExtent { .. })
        ));
        assert!(matches!(
            parse_location_output("Report:\n", "", 0.0, 0.0, -9999.0),
            Err(SampleError::Parse(_))
        ));
    }

    #[test]
    fn test_missing_tool_is_command_error() {
        let mut sampler = GdalLocationInfo::with_program("/nonexistent/gdallocationinfo", -9999.0);
        let result = sampler.sample(Path::new("a.tif"), 0.0, 0.0);
        assert!(matches!(result, Err(SampleError::Command { .. })));
    }
}
