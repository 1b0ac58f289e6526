//! Pipeline configuration.
//!
//! Every stage is a fixed batch run over paths and date ranges. Those are
//! read from a single TOML document (see `precip_verify.toml`) instead of
//! being hard-coded, and validated before any stage touches the disk.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::model::{MAX_LEAD_HOUR, MIN_LEAD_HOUR};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("no database url: set database.url or DATABASE_URL")]
    MissingDatabaseUrl,
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Forecast products, one sub-directory each under the NetCDF and
    /// raster roots.
    pub products: Vec<String>,
    pub paths: PathsConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    pub extract: DateRange,
    #[serde(default)]
    pub raster: RasterConfig,
    pub join: JoinConfig,
    pub analysis: AnalysisConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
    pub nc_root: PathBuf,
    pub tif_root: PathBuf,
    pub result_dir: PathBuf,
    pub station_xy: PathBuf,
    pub station_ts: PathBuf,
    /// GeoJSON FeatureCollection of (already buffered) catchment polygons.
    pub catchments: PathBuf,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_site_table")]
    pub site_table: String,
    #[serde(default = "default_series_table")]
    pub series_table: String,
    #[serde(default = "default_location_table")]
    pub location_table: String,
    #[serde(default = "default_dataset_types")]
    pub dataset_types: Vec<i32>,
    #[serde(default = "default_quality_codes")]
    pub quality_codes: Vec<i32>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            site_table: default_site_table(),
            series_table: default_series_table(),
            location_table: default_location_table(),
            dataset_types: default_dataset_types(),
            quality_codes: default_quality_codes(),
        }
    }
}

impl DatabaseConfig {
    /// Connection string from the config, else from `DATABASE_URL`
    /// (a `.env` file is honoured).
    pub fn resolve_url(&self) -> Result<String, ConfigError> {
        if let Some(url) = &self.url {
            return Ok(url.clone());
        }
        dotenv::dotenv().ok();
        std::env::var("DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl)
    }
}

/// Output raster geometry and coordinate handling.
#[derive(Debug, Clone, Deserialize)]
pub struct RasterConfig {
    #[serde(default = "default_variable")]
    pub variable: String,
    #[serde(default = "default_source_crs")]
    pub source_crs: String,
    #[serde(default = "default_target_crs")]
    pub target_crs: String,
    /// EPSG code written into the GeoTIFF key directory.
    #[serde(default = "default_target_epsg")]
    pub target_epsg: Option<u16>,
    #[serde(default)]
    pub extent: Extent,
    #[serde(default = "default_margin")]
    pub margin: f64,
    #[serde(default = "default_resolution")]
    pub resolution: f64,
    #[serde(default = "default_time_zone")]
    pub time_zone: String,
    #[serde(default = "default_nodata")]
    pub nodata: f64,
}

impl Default for RasterConfig {
    fn default() -> Self {
        Self {
            variable: default_variable(),
            source_crs: default_source_crs(),
            target_crs: default_target_crs(),
            target_epsg: default_target_epsg(),
            extent: Extent::default(),
            margin: default_margin(),
            resolution: default_resolution(),
            time_zone: default_time_zone(),
            nodata: default_nodata(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Extent {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
}

/// Canterbury region, NZTM2000.
impl Default for Extent {
    fn default() -> Self {
        Self {
            xmin: 1_323_766.5234,
            ymin: 5_004_696.7684,
            xmax: 1_692_368.8068,
            ymax: 5_361_879.5687,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplerKind {
    /// Decode the GeoTIFF in-process.
    #[default]
    Native,
    /// Shell out to `gdallocationinfo`.
    Gdal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JoinConfig {
    #[serde(flatten)]
    pub range: DateRange,
    #[serde(default = "default_join_max_lead")]
    pub max_lead_hours: u32,
    #[serde(default)]
    pub sampler: SamplerKind,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisConfig {
    #[serde(flatten)]
    pub range: DateRange,
    #[serde(default = "default_accumulation_hours")]
    pub accumulation_hours: Vec<u32>,
    #[serde(default = "default_analysis_max_lead")]
    pub max_lead_hours: u32,
    #[serde(default = "default_catchment_name_field")]
    pub catchment_name_field: String,
    #[serde(default)]
    pub catchment_buffer_m: f64,
}

/// Inclusive timestamp range. Accepts `YYYY-MM-DD`, `YYYY-MM-DD HH:MM` or
/// `YYYY-MM-DD HH:MM:SS`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct DateRange {
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub from: NaiveDateTime,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub to: NaiveDateTime,
}

impl DateRange {
    pub fn contains(&self, t: &NaiveDateTime) -> bool {
        *t >= self.from && *t <= self.to
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

fn default_site_table() -> String {
    "TSDataNumericHourlySumm".to_string()
}
fn default_series_table() -> String {
    "TSDataNumericHourly".to_string()
}
fn default_location_table() -> String {
    "ExternalSite".to_string()
}
fn default_dataset_types() -> Vec<i32> {
    vec![38, 15]
}
fn default_quality_codes() -> Vec<i32> {
    vec![600]
}
fn default_variable() -> String {
    "precipitation_amount".to_string()
}
fn default_source_crs() -> String {
    "+proj=longlat +datum=WGS84 +no_defs".to_string()
}
fn default_target_crs() -> String {
    // NZGD2000 / New Zealand Transverse Mercator 2000
    "+proj=tmerc +lat_0=0 +lon_0=173 +k=0.9996 +x_0=1600000 +y_0=10000000 \
     +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +units=m +no_defs"
        .to_string()
}
fn default_target_epsg() -> Option<u16> {
    Some(2193)
}
fn default_margin() -> f64 {
    5000.0
}
fn default_resolution() -> f64 {
    1000.0
}
fn default_time_zone() -> String {
    "Pacific/Auckland".to_string()
}
fn default_nodata() -> f64 {
    -9999.0
}
fn default_join_max_lead() -> u32 {
    MAX_LEAD_HOUR
}
fn default_accumulation_hours() -> Vec<u32> {
    vec![1, 3, 6, 12, 24]
}
fn default_analysis_max_lead() -> u32 {
    24
}
fn default_catchment_name_field() -> String {
    "CATCH_NAME".to_string()
}

/// Parses the timestamp layouts accepted in config files and date filters.
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M"))
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("unrecognised timestamp '{}'", raw)))
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Reads and validates a pipeline config file.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<PipelineConfig, ConfigError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&text)
}

pub fn parse_config(text: &str) -> Result<PipelineConfig, ConfigError> {
    let config: PipelineConfig = toml::from_str(text)?;
    config.validate()?;
    Ok(config)
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.products.is_empty() {
            return Err(ConfigError::Invalid("products must not be empty".into()));
        }
        if let Some(p) = self.products.iter().find(|p| p.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!("blank product name '{}'", p)));
        }
        if !(self.raster.resolution > 0.0) {
            return Err(ConfigError::Invalid("raster.resolution must be positive".into()));
        }
        let e = &self.raster.extent;
        if e.xmax <= e.xmin || e.ymax <= e.ymin {
            return Err(ConfigError::Invalid("raster.extent is empty".into()));
        }
        for (name, range) in [
            ("extract", &self.extract),
            ("join", &self.join.range),
            ("analysis", &self.analysis.range),
        ] {
            if range.from > range.to {
                return Err(ConfigError::Invalid(format!("{}.from is after {}.to", name, name)));
            }
        }
        if self.analysis.accumulation_hours.is_empty()
            || self.analysis.accumulation_hours.contains(&0)
        {
            return Err(ConfigError::Invalid(
                "analysis.accumulation_hours must be non-empty and positive".into(),
            ));
        }
        // windows are anchored at midnight
        if let Some(w) = self.analysis.accumulation_hours.iter().find(|w| 24 % **w != 0) {
            return Err(ConfigError::Invalid(format!(
                "analysis.accumulation_hours: {} does not divide a day",
                w
            )));
        }
        for (name, lead) in [
            ("join", self.join.max_lead_hours),
            ("analysis", self.analysis.max_lead_hours),
        ] {
            if !(MIN_LEAD_HOUR..=MAX_LEAD_HOUR).contains(&lead) {
                return Err(ConfigError::Invalid(format!(
                    "{}.max_lead_hours must be within {}..={}",
                    name, MIN_LEAD_HOUR, MAX_LEAD_HOUR
                )));
            }
        }
        if self.analysis.catchment_buffer_m < 0.0 {
            return Err(ConfigError::Invalid("analysis.catchment_buffer_m is negative".into()));
        }
        Ok(())
    }

    pub fn nc_dir(&self, product: &str) -> PathBuf {
        self.paths.nc_root.join(product)
    }

    pub fn tif_dir(&self, product: &str) -> PathBuf {
        self.paths.tif_root.join(product)
    }

    /// Wide join table for one product.
    pub fn joined_table(&self, product: &str) -> PathBuf {
        self.paths.result_dir.join(format!("{}.csv", product))
    }

    pub fn result_file(&self, prefix: &str, product: &str) -> PathBuf {
        self.paths.result_dir.join(format!("{}_{}.csv", prefix, product))
    }
}
