//! Stage drivers.
//!
//! Each `run_*` function executes one stage over every configured product,
//! writes `<stage>_failures.csv` to the result directory and logs a stage
//! summary. Only failures that make the whole stage meaningless (missing
//! reference tables, an unreachable database, an unwritable output
//! directory) are returned as errors.

use std::collections::HashSet;
use thiserror::Error;

use crate::analysis::{
    self, AccumulatedRow, AnalysisError, Catchment, ErrorRecord, ErrorTable, accumulate_stations,
    average_accumulations, average_rows, catchment_statistics, read_catchments, rows_in_range,
    station_statistics, write_error_table, write_statistics,
};
use crate::config::{ConfigError, PipelineConfig, SamplerKind};
use crate::forecast::{ForecastError, NetcdfSource, RasterSettings, rasterize_product};
use crate::ingest::postgres::PostgresRepository;
use crate::ingest::{RepositoryError, extract_stations};
use crate::join::{
    GdalLocationInfo, JoinError, NativeSampler, RasterSampler, join_product, list_rasters,
    read_joined_table, write_joined_table,
};
use crate::logging::{self, FailureLog, Stage, log_stage_summary};
use crate::model::JoinedRow;
use crate::stations::{
    ObservationIndex, StationRegistry, TableError, read_observations, read_stations,
    write_observations, write_stations,
};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("extraction failed: {0}")]
    Repository(#[from] RepositoryError),

    #[error("rasterization failed: {0}")]
    Forecast(#[from] ForecastError),

    #[error("join failed: {0}")]
    Join(#[from] JoinError),

    #[error("analysis failed: {0}")]
    Analysis(#[from] AnalysisError),

    #[error(transparent)]
    Table(#[from] TableError),

    #[error("cannot write failure log: {0}")]
    FailureLog(#[from] csv::Error),
}

/// Outcome of one stage run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageReport {
    pub units: usize,
    pub succeeded: usize,
    pub failed: usize,
}

fn finish(
    config: &PipelineConfig,
    failures: &FailureLog,
    units: usize,
    succeeded: usize,
) -> Result<StageReport, PipelineError> {
    let path = failures.write_csv(&config.paths.result_dir)?;
    if !failures.is_empty() {
        logging::info(
            failures.stage(),
            None,
            &format!("{} failure(s) recorded in {}", failures.len(), path.display()),
        );
    }
    let report = StageReport {
        units,
        succeeded,
        failed: units.saturating_sub(succeeded),
    };
    log_stage_summary(failures.stage(), report.units, report.succeeded, report.failed);
    Ok(report)
}

// ---------------------------------------------------------------------------
// Extract
// ---------------------------------------------------------------------------

/// Pulls stations and their hourly series from PostgreSQL and writes the
/// two reference tables. Units are extracted stations.
pub fn run_extract(config: &PipelineConfig) -> Result<StageReport, PipelineError> {
    let failures = FailureLog::new(Stage::Extract);
    let url = config.database.resolve_url()?;
    let mut repo = PostgresRepository::connect(&url)?;
    let extracted = extract_stations(&mut repo, &config.database, &config.extract)?;

    write_stations(&config.paths.station_xy, &extracted.stations)?;
    write_observations(&config.paths.station_ts, &extracted.observations)?;
    logging::info(
        Stage::Extract,
        None,
        &format!(
            "{} stations, {} observations written",
            extracted.stations.len(),
            extracted.observations.len()
        ),
    );

    let n = extracted.stations.len();
    finish(config, &failures, n, n)
}

// ---------------------------------------------------------------------------
// Rasterize
// ---------------------------------------------------------------------------

/// Converts every product's NetCDF files into per-lead GeoTIFFs. Units are
/// source files.
pub fn run_rasterize(config: &PipelineConfig) -> Result<StageReport, PipelineError> {
    let mut failures = FailureLog::new(Stage::Rasterize);
    let settings = RasterSettings::from_config(&config.raster)?;
    let source = NetcdfSource::new(&config.raster.variable);

    let (mut files, mut files_ok) = (0, 0);
    for product in &config.products {
        let summary = rasterize_product(
            &source,
            &config.nc_dir(product),
            &config.tif_dir(product),
            &settings,
            &mut failures,
        )?;
        logging::info(
            Stage::Rasterize,
            Some(product),
            &format!(
                "{}/{} files rasterized, {} rasters",
                summary.files_ok, summary.files, summary.rasters
            ),
        );
        files += summary.files;
        files_ok += summary.files_ok;
    }
    finish(config, &failures, files, files_ok)
}

// ---------------------------------------------------------------------------
// Join
// ---------------------------------------------------------------------------

fn sampler_for(config: &PipelineConfig) -> Box<dyn RasterSampler> {
    match config.join.sampler {
        SamplerKind::Native => Box::new(NativeSampler::new()),
        SamplerKind::Gdal => Box::new(GdalLocationInfo::new(config.raster.nodata)),
    }
}

/// Samples every product's rasters at the stations and writes one join
/// table per product. Units are products.
pub fn run_join(config: &PipelineConfig) -> Result<StageReport, PipelineError> {
    let mut failures = FailureLog::new(Stage::Join);
    let registry = read_stations(&config.paths.station_xy)?;
    let observations = ObservationIndex::new(&read_observations(&config.paths.station_ts)?);
    logging::info(
        Stage::Join,
        None,
        &format!("{} stations, {} observations", registry.len(), observations.len()),
    );

    let mut sampler = sampler_for(config);
    let mut written = 0;
    for product in &config.products {
        let rasters = list_rasters(&config.tif_dir(product))?;
        if rasters.is_empty() {
            failures.record_as(
                product,
                "list rasters",
                logging::FailureType::Expected,
                &format!("no rasters found in {}", config.tif_dir(product).display()),
            );
            continue;
        }
        let (rows, summary) = join_product(
            product,
            &rasters,
            &registry,
            &observations,
            sampler.as_mut(),
            &config.join,
            &mut failures,
        );
        let path = config.joined_table(product);
        write_joined_table(&path, &rows)?;
        logging::info(
            Stage::Join,
            Some(product),
            &format!("{} rows written to {}", summary.rows, path.display()),
        );
        written += 1;
    }
    finish(config, &failures, config.products.len(), written)
}

// ---------------------------------------------------------------------------
// Analyze
// ---------------------------------------------------------------------------

struct Membership<'a> {
    catchment: &'a Catchment,
    members: HashSet<String>,
}

fn catchment_members<'a>(catchments: &'a [Catchment], registry: &StationRegistry, buffer_m: f64) -> Vec<Membership<'a>> {
    catchments
        .iter()
        .map(|c| {
            let members: HashSet<String> = c.member_ids(registry.stations(), buffer_m).into_iter().collect();
            if members.is_empty() {
                logging::warn(Stage::System, Some(&c.name), "catchment contains no stations");
            }
            Membership { catchment: c, members }
        })
        .collect()
}

fn analyze_product(
    config: &PipelineConfig,
    product: &str,
    rows: &[JoinedRow],
    catchments: &[Membership<'_>],
    failures: &mut FailureLog,
) -> Result<(), PipelineError> {
    let settings = &config.analysis;
    let rows = rows_in_range(rows, &settings.range);

    // Percentage errors
    let records: Vec<ErrorRecord<'_>> = rows.iter().map(|r| ErrorRecord { catchment: None, row: *r }).collect();
    write_error_table(
        &config.result_file(ErrorTable::Stations.file_prefix(), product),
        ErrorTable::Stations,
        &records,
    )?;

    let records: Vec<ErrorRecord<'_>> = catchments
        .iter()
        .flat_map(|m| {
            rows.iter()
                .filter(move |r| m.members.contains(&r.station_id))
                .map(move |r| ErrorRecord {
                    catchment: Some(m.catchment.name.as_str()),
                    row: *r,
                })
        })
        .collect();
    write_error_table(
        &config.result_file(ErrorTable::StationsByCatchment.file_prefix(), product),
        ErrorTable::StationsByCatchment,
        &records,
    )?;

    let averages: Vec<(&str, Vec<JoinedRow>)> = catchments
        .iter()
        .map(|m| (m.catchment.name.as_str(), average_rows(&rows, &m.members, &m.catchment.name)))
        .collect();
    let records: Vec<ErrorRecord<'_>> = averages
        .iter()
        .flat_map(|(name, avg)| avg.iter().map(move |r| ErrorRecord { catchment: Some(*name), row: r }))
        .collect();
    write_error_table(
        &config.result_file(ErrorTable::CatchmentAverages.file_prefix(), product),
        ErrorTable::CatchmentAverages,
        &records,
    )?;

    // Accumulations
    let stations = accumulate_stations(&rows, settings.max_lead_hours, &settings.accumulation_hours);
    analysis::accumulate::write_station_accumulations(
        &config.result_file("cumsum_all_stations", product),
        product,
        &stations,
    )?;
    let catchment_acc: Vec<AccumulatedRow> = catchments
        .iter()
        .flat_map(|m| average_accumulations(&stations, &m.members, &m.catchment.name))
        .collect();
    analysis::accumulate::write_catchment_accumulations(
        &config.result_file("cumsum_catchments_avg", product),
        product,
        &catchment_acc,
    )?;

    // Skill statistics
    let station_stats = station_statistics(&stations, failures);
    write_statistics(
        &config.result_file("cumsum_statistics_all_stations", product),
        false,
        &station_stats,
    )?;
    let catchment_stats = catchment_statistics(&catchment_acc, failures);
    write_statistics(
        &config.result_file("cumsum_statistics_catchments_avg", product),
        true,
        &catchment_stats,
    )?;

    logging::info(
        Stage::Analyze,
        Some(product),
        &format!(
            "{} rows, {} station strata, {} catchment strata",
            rows.len(),
            station_stats.len(),
            catchment_stats.len()
        ),
    );
    Ok(())
}

/// Derives percentage-error tables, accumulations and skill statistics
/// from each product's join table. Units are products.
pub fn run_analyze(config: &PipelineConfig) -> Result<StageReport, PipelineError> {
    let mut failures = FailureLog::new(Stage::Analyze);
    let registry = read_stations(&config.paths.station_xy)?;
    let catchments = read_catchments(&config.paths.catchments, &config.analysis.catchment_name_field)?;
    let memberships = catchment_members(&catchments, &registry, config.analysis.catchment_buffer_m);
    logging::info(
        Stage::System,
        Some(&config.paths.catchments.display().to_string()),
        &format!("{} catchments over {} stations", memberships.len(), registry.len()),
    );

    let mut analyzed = 0;
    for product in &config.products {
        let rows = match read_joined_table(&config.joined_table(product)) {
            Ok(rows) => rows,
            Err(e) => {
                failures.record(product, "read join table", &e);
                continue;
            }
        };
        analyze_product(config, product, &rows, &memberships, &mut failures)?;
        analyzed += 1;
    }
    finish(config, &failures, config.products.len(), analyzed)
}

/// Runs all four stages in order, stopping at the first fatal error.
pub fn run_all(config: &PipelineConfig) -> Result<Vec<(Stage, StageReport)>, PipelineError> {
    Ok(vec![
        (Stage::Extract, run_extract(config)?),
        (Stage::Rasterize, run_rasterize(config)?),
        (Stage::Join, run_join(config)?),
        (Stage::Analyze, run_analyze(config)?),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    fn config_in(dir: &std::path::Path) -> PipelineConfig {
        let text = format!(
            r#"
products = ["P"]

[paths]
nc_root = "{d}/nc"
tif_root = "{d}/tif"
result_dir = "{d}/results"
station_xy = "{d}/station_xy.csv"
station_ts = "{d}/station_ts.csv"
catchments = "{d}/catchments.geojson"

[extract]
from = "2019-01-01"
to = "2019-01-31"

[join]
from = "2019-01-01"
to = "2019-01-31"

[analysis]
from = "2019-01-01"
to = "2019-01-31"
"#,
            d = dir.display()
        );
        parse_config(&text).unwrap()
    }

    #[test]
    fn test_rasterize_with_no_sources_writes_empty_failure_log() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let report = run_rasterize(&config).unwrap();
        assert_eq!(report, StageReport::default());
        let log = std::fs::read_to_string(dir.path().join("results/rasterize_failures.csv")).unwrap();
        assert_eq!(log.lines().count(), 1, "header only");
    }

    #[test]
    fn test_join_without_station_table_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        assert!(matches!(run_join(&config), Err(PipelineError::Table(_))));
    }

    #[test]
    fn test_analyze_records_missing_join_table() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        std::fs::write(&config.paths.station_xy, "ExtSiteID,NZTMX,NZTMY\nA,1,1\n").unwrap();
        std::fs::write(
            &config.paths.catchments,
            r#"{"type":"FeatureCollection","features":[]}"#,
        )
        .unwrap();
        let report = run_analyze(&config).unwrap();
        assert_eq!(report, StageReport { units: 1, succeeded: 0, failed: 1 });
    }
}
