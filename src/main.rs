use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use precip_verify::config::load_config;
use precip_verify::logging::{self, LogLevel, Stage};
use precip_verify::pipeline::{self, StageReport};

#[derive(Parser)]
#[command(version, about = "Verify precipitation forecasts against rain gauges", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct RunArgs {
    /// Pipeline configuration file
    #[arg(short, long, default_value = "precip_verify.toml")]
    config: PathBuf,
    /// Log debug messages
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract station locations and series from the database
    Extract(RunArgs),
    /// Convert forecast NetCDF files into GeoTIFF rasters
    Rasterize(RunArgs),
    /// Sample rasters at the stations and build the join tables
    Join(RunArgs),
    /// Compute percentage errors and skill statistics
    Analyze(RunArgs),
    /// Run every stage in order
    All(RunArgs),
}

fn report(stage: Stage, r: &StageReport) {
    println!("{}: {}/{} units succeeded, {} failed", stage, r.succeeded, r.units, r.failed);
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let args = match &cli.command {
        Commands::Extract(a)
        | Commands::Rasterize(a)
        | Commands::Join(a)
        | Commands::Analyze(a)
        | Commands::All(a) => a,
    };

    let level = if args.verbose { LogLevel::Debug } else { LogLevel::Info };
    let config_unit = args.config.display().to_string();
    let config = match load_config(&args.config) {
        Ok(config) => config,
        Err(e) => {
            logging::init_logger(level, None);
            logging::error(Stage::System, Some(&config_unit), &e.to_string());
            return Err(e).with_context(|| format!("loading {}", config_unit));
        }
    };
    logging::init_logger(level, config.paths.log_file.as_deref());
    logging::info(
        Stage::System,
        Some(&config_unit),
        &format!("configuration loaded, {} product(s)", config.products.len()),
    );

    let result = match &cli.command {
        Commands::Extract(_) => pipeline::run_extract(&config).map(|r| vec![(Stage::Extract, r)]),
        Commands::Rasterize(_) => pipeline::run_rasterize(&config).map(|r| vec![(Stage::Rasterize, r)]),
        Commands::Join(_) => pipeline::run_join(&config).map(|r| vec![(Stage::Join, r)]),
        Commands::Analyze(_) => pipeline::run_analyze(&config).map(|r| vec![(Stage::Analyze, r)]),
        Commands::All(_) => pipeline::run_all(&config),
    };
    let reports = match result {
        Ok(reports) => reports,
        Err(e) => {
            logging::error(Stage::System, None, &format!("run aborted: {}", e));
            return Err(e.into());
        }
    };
    for (stage, r) in &reports {
        report(*stage, r);
    }
    Ok(())
}
