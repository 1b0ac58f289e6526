/// Structured logging for the verification pipeline
///
/// Every message carries the stage that produced it and, where there is
/// one, the unit of work it concerns (a source file, a station, a
/// statistics stratum). Console and optional file output go through
/// `tracing`; non-fatal failures are additionally kept in a per-run
/// `FailureLog` that is written next to the stage outputs for auditing.

use chrono::Utc;
use std::fmt;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::{Mutex, Once};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt as tracing_fmt;
use tracing_subscriber::prelude::*;

// ---------------------------------------------------------------------------
// Log Levels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warning => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

impl LogLevel {
    fn directive(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error => "error",
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline Stages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Extract,
    Rasterize,
    Join,
    Analyze,
    System,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Extract => write!(f, "extract"),
            Stage::Rasterize => write!(f, "rasterize"),
            Stage::Join => write!(f, "join"),
            Stage::Analyze => write!(f, "analyze"),
            Stage::System => write!(f, "system"),
        }
    }
}

// ---------------------------------------------------------------------------
// Failure Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Expected gap in the data - no observation for that hour, nodata pixel
    Expected,
    /// Unexpected failure - unreadable file, malformed layout, tool error
    Unexpected,
    /// Unknown - cannot determine if this is expected or not
    Unknown,
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureType::Expected => write!(f, "EXPECTED"),
            FailureType::Unexpected => write!(f, "UNEXPECTED"),
            FailureType::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Classify a failure from its message.
pub fn classify_failure(error_message: &str) -> FailureType {
    let msg = error_message.to_lowercase();
    if msg.contains("not found") || msg.contains("nodata") || msg.contains("outside") {
        FailureType::Expected
    } else if msg.contains("i/o")
        || msg.contains("parse")
        || msg.contains("netcdf")
        || msg.contains("tiff")
        || msg.contains("command")
    {
        FailureType::Unexpected
    } else {
        FailureType::Unknown
    }
}

// ---------------------------------------------------------------------------
// Logger Configuration
// ---------------------------------------------------------------------------

static INIT: Once = Once::new();

/// Initialize the global subscriber.
///
/// `RUST_LOG` overrides `min_level` when set. When `log_file` is given every
/// event is also appended to it without ANSI colouring. Calling this more
/// than once is a no-op.
pub fn init_logger(min_level: LogLevel, log_file: Option<&Path>) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(min_level.directive()));

        let file_layer = log_file.and_then(|path| {
            match OpenOptions::new().create(true).append(true).open(path) {
                Ok(file) => Some(
                    tracing_fmt::layer()
                        .with_ansi(false)
                        .with_writer(Mutex::new(file)),
                ),
                Err(e) => {
                    eprintln!("Failed to open log file {}: {}", path.display(), e);
                    None
                }
            }
        });

        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_fmt::layer().with_target(false))
            .with(file_layer)
            .try_init();
    });
}

// ---------------------------------------------------------------------------
// Public Logging Functions
// ---------------------------------------------------------------------------

/// Log a general informational message
pub fn info(stage: Stage, unit: Option<&str>, message: &str) {
    tracing::info!(stage = %stage, unit = unit.unwrap_or("-"), "{}", message);
}

/// Log a warning message
pub fn warn(stage: Stage, unit: Option<&str>, message: &str) {
    tracing::warn!(stage = %stage, unit = unit.unwrap_or("-"), "{}", message);
}

/// Log an error message
pub fn error(stage: Stage, unit: Option<&str>, message: &str) {
    tracing::error!(stage = %stage, unit = unit.unwrap_or("-"), "{}", message);
}

/// Log a debug message
pub fn debug(stage: Stage, unit: Option<&str>, message: &str) {
    tracing::debug!(stage = %stage, unit = unit.unwrap_or("-"), "{}", message);
}

// ---------------------------------------------------------------------------
// Structured Failure Log
// ---------------------------------------------------------------------------

/// One non-fatal failure, keyed by the unit of work that failed.
#[derive(Debug, Clone, PartialEq)]
pub struct FailureRecord {
    pub logged_at: String,
    pub stage: Stage,
    pub unit: String,
    pub failure_type: FailureType,
    pub operation: String,
    pub message: String,
}

/// Accumulates non-fatal failures for one stage run so they can be audited
/// after the batch finishes instead of disappearing into the console.
#[derive(Debug)]
pub struct FailureLog {
    stage: Stage,
    records: Vec<FailureRecord>,
}

impl FailureLog {
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            records: Vec::new(),
        }
    }

    /// Record a failure, classify it, and emit it at the matching level.
    pub fn record(&mut self, unit: &str, operation: &str, err: &dyn std::error::Error) {
        let message = err.to_string();
        let failure_type = classify_failure(&message);
        self.push(unit, operation, failure_type, message);
    }

    /// Record a failure whose class is already known to the caller.
    pub fn record_as(&mut self, unit: &str, operation: &str, failure_type: FailureType, message: &str) {
        self.push(unit, operation, failure_type, message.to_string());
    }

    fn push(&mut self, unit: &str, operation: &str, failure_type: FailureType, message: String) {
        let line = format!("{} failed [{}]: {}", operation, failure_type, message);
        match failure_type {
            FailureType::Expected => debug(self.stage, Some(unit), &line),
            FailureType::Unexpected => error(self.stage, Some(unit), &line),
            FailureType::Unknown => warn(self.stage, Some(unit), &line),
        }

        self.records.push(FailureRecord {
            logged_at: Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            stage: self.stage,
            unit: unit.to_string(),
            failure_type,
            operation: operation.to_string(),
            message,
        });
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn records(&self) -> &[FailureRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn count(&self, failure_type: FailureType) -> usize {
        self.records
            .iter()
            .filter(|r| r.failure_type == failure_type)
            .count()
    }

    /// Write `<dir>/<stage>_failures.csv`. The header is written even when
    /// nothing failed so an empty audit is distinguishable from a missing one.
    pub fn write_csv(&self, dir: &Path) -> Result<std::path::PathBuf, csv::Error> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}_failures.csv", self.stage));
        let mut wtr = csv::Writer::from_path(&path)?;
        wtr.write_record(["logged_at", "stage", "unit", "failure_type", "operation", "message"])?;
        for r in &self.records {
            wtr.write_record([
                r.logged_at.as_str(),
                &r.stage.to_string(),
                r.unit.as_str(),
                &r.failure_type.to_string(),
                r.operation.as_str(),
                r.message.as_str(),
            ])?;
        }
        wtr.flush()?;
        Ok(path)
    }
}

// ---------------------------------------------------------------------------
// Stage Summary Logging
// ---------------------------------------------------------------------------

/// Log a summary of a stage run
pub fn log_stage_summary(stage: Stage, total: usize, successful: usize, failed: usize) {
    let message = format!(
        "Stage complete: {}/{} units successful, {} failed",
        successful, total, failed
    );

    if failed == 0 {
        info(stage, None, &message);
    } else if successful == 0 && total > 0 {
        error(stage, None, &message);
    } else {
        warn(stage, None, &message);
    }
}
