/// Rasterizer stage driver.
///
/// Per source file: parse the issue stamp, load the stack, project the
/// coordinates once, then for every lead index 1..n-1 interpolate the
/// increment and write `{lead}h_{valid}_{issue}.tif`. A file that fails at
/// any step is recorded and the batch moves on.

use jiff::tz::TimeZone;
use std::path::{Path, PathBuf};

use super::interpolate::TriangleMesh;
use super::naming::{RasterName, issue_time_from_path, load_time_zone, utc_to_local};
use super::reproject::Reprojector;
use super::source::ForecastSource;
use super::ForecastError;
use crate::config::RasterConfig;
use crate::logging::{self, FailureLog, Stage};
use crate::raster::{GridSpec, write_geotiff};

/// Everything about the output grid that is fixed for a run.
pub struct RasterSettings {
    pub grid: GridSpec,
    pub reprojector: Reprojector,
    pub time_zone: TimeZone,
    pub nodata: f32,
    pub epsg: Option<u16>,
}

impl RasterSettings {
    pub fn from_config(config: &RasterConfig) -> Result<Self, ForecastError> {
        Ok(Self {
            grid: GridSpec::from_config(config),
            reprojector: Reprojector::new(&config.source_crs, &config.target_crs)?,
            time_zone: load_time_zone(&config.time_zone)?,
            nodata: config.nodata as f32,
            epsg: config.target_epsg,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RasterizeSummary {
    pub files: usize,
    pub files_ok: usize,
    pub rasters: usize,
}

/// Rasterizes one source file, returning the paths written in lead order.
pub fn rasterize_file(
    source: &dyn ForecastSource,
    path: &Path,
    settings: &RasterSettings,
    out_dir: &Path,
) -> Result<Vec<PathBuf>, ForecastError> {
    let issue_utc = issue_time_from_path(path)?;
    let stack = source.load(path)?;
    let issue = utc_to_local(issue_utc, &settings.time_zone)?;

    let points = settings.reprojector.project_all(&stack.lon, &stack.lat);
    let mesh = TriangleMesh::new(&points, stack.rows, stack.cols, settings.grid);
    if mesh.coverage() == 0 {
        logging::warn(
            Stage::Rasterize,
            Some(&path.display().to_string()),
            "source grid does not overlap the output extent, rasters will be empty",
        );
    }

    let mut written = Vec::with_capacity(stack.layer_count().saturating_sub(1));
    for lead in 1..stack.layer_count() {
        let name = RasterName {
            lead_hour: lead as u32,
            valid: utc_to_local(stack.times[lead], &settings.time_zone)?,
            issue,
        };
        let raster = mesh.interpolate(&stack.increment(lead), settings.nodata, settings.epsg);
        let out = out_dir.join(name.file_name());
        write_geotiff(&out, &raster)?;
        written.push(out);
    }
    Ok(written)
}

/// Rasterizes every `*.nc` file of one product directory, in name order.
///
/// Only an output directory that cannot be created (or a bad glob pattern)
/// is fatal; per-file failures go to `failures`.
pub fn rasterize_product(
    source: &dyn ForecastSource,
    nc_dir: &Path,
    out_dir: &Path,
    settings: &RasterSettings,
    failures: &mut FailureLog,
) -> Result<RasterizeSummary, ForecastError> {
    std::fs::create_dir_all(out_dir)?;

    let pattern = nc_dir.join("*.nc");
    let mut files: Vec<PathBuf> = glob::glob(&pattern.to_string_lossy())?
        .filter_map(Result::ok)
        .collect();
    files.sort();

    let mut summary = RasterizeSummary {
        files: files.len(),
        ..RasterizeSummary::default()
    };
    if files.is_empty() {
        logging::warn(
            Stage::Rasterize,
            Some(&nc_dir.display().to_string()),
            "no source files found",
        );
    }

    for file in &files {
        let unit = file
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| file.display().to_string());
        match rasterize_file(source, file, settings, out_dir) {
            Ok(written) => {
                logging::debug(
                    Stage::Rasterize,
                    Some(&unit),
                    &format!("wrote {} rasters", written.len()),
                );
                summary.files_ok += 1;
                summary.rasters += written.len();
            }
            Err(e) => failures.record(&unit, "rasterize", &e),
        }
    }
    Ok(summary)
}
