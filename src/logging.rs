/// Structured logging for the flow unification service
///
/// Provides context-rich logging with source and station identifiers on top
/// of `tracing`. Console output always; an optional append-only log file
/// for batch runs.

use crate::model::{FlowError, SourceKind};
use std::fmt;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing::Level;
use tracing_subscriber::EnvFilter;

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
    /// Filter directive understood by `EnvFilter`.
    pub fn directive(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Level {
        match level {
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warning => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

// ---------------------------------------------------------------------------
// Data Source Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    Archive,
    Auxiliary,
    Realtime,
    OpenMeteo,
    OpenWeatherMap,
    Aemet,
    Pipeline,
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSource::Archive => write!(f, "ARCHIVE"),
            DataSource::Auxiliary => write!(f, "AUX"),
            DataSource::Realtime => write!(f, "RT"),
            DataSource::OpenMeteo => write!(f, "OMETEO"),
            DataSource::OpenWeatherMap => write!(f, "OWM"),
            DataSource::Aemet => write!(f, "AEMET"),
            DataSource::Pipeline => write!(f, "PIPE"),
        }
    }
}

impl From<SourceKind> for DataSource {
    fn from(kind: SourceKind) -> DataSource {
        match kind {
            SourceKind::Archive => DataSource::Archive,
            SourceKind::Auxiliary => DataSource::Auxiliary,
            SourceKind::Realtime => DataSource::Realtime,
        }
    }
}

// ---------------------------------------------------------------------------
// Failure Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureType {
    /// Expected failure - archive year not published yet, placeholder content
    Expected,
    /// Unexpected failure - service degradation, format change or configuration issue
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

/// Classify a per-source failure.
///
/// Sentinel content and missing archive years (404) are routine for these
/// providers; HTTP 5xx, parse and JSON failures point at an upstream change.
pub fn classify_failure(err: &FlowError) -> FailureType {
    match err {
        FlowError::SentinelData { .. } => FailureType::Expected,
        FlowError::Http(404) => FailureType::Expected,
        FlowError::NoData { .. } => FailureType::Unknown,
        FlowError::Http(_) | FlowError::Parse(_) | FlowError::Json(_) => FailureType::Unexpected,
        FlowError::Config(_) => FailureType::Unexpected,
        FlowError::Request(_) | FlowError::Io(_) => FailureType::Unknown,
        FlowError::UnificationImpossible { .. } => FailureType::Unknown,
    }
}

/// Level a failure of the given classification is reported at.
pub fn failure_level(failure: &FailureType) -> LogLevel {
    match failure {
        FailureType::Expected => LogLevel::Debug,
        FailureType::Unexpected => LogLevel::Error,
        FailureType::Unknown => LogLevel::Warning,
    }
}

// ---------------------------------------------------------------------------
// Logger Configuration
// ---------------------------------------------------------------------------

/// Initialize the global subscriber.
///
/// `RUST_LOG` takes precedence over `min_level` when set. When `log_file` is
/// given, entries are appended there instead of stderr. Calling this more
/// than once is harmless; later calls are ignored.
pub fn init_logger(
    min_level: LogLevel,
    log_file: Option<&Path>,
    console_timestamps: bool,
) -> std::io::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(min_level.directive()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let result = match (log_file, console_timestamps) {
        (Some(path), _) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
        (None, true) => builder.with_writer(std::io::stderr).try_init(),
        (None, false) => builder
            .without_time()
            .with_writer(std::io::stderr)
            .try_init(),
    };

    if result.is_err() {
        tracing::debug!("global subscriber already installed");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Public Logging Functions
// ---------------------------------------------------------------------------

/// Emit a message at `level` tagged with source and station.
pub fn log(level: LogLevel, source: DataSource, station: Option<&str>, message: &str) {
    let station = station.unwrap_or("-");
    match level {
        LogLevel::Debug => tracing::debug!(source = %source, station, "{}", message),
        LogLevel::Info => tracing::info!(source = %source, station, "{}", message),
        LogLevel::Warning => tracing::warn!(source = %source, station, "{}", message),
        LogLevel::Error => tracing::error!(source = %source, station, "{}", message),
    }
}

/// Log a general informational message
pub fn info(source: DataSource, station: Option<&str>, message: &str) {
    log(LogLevel::Info, source, station, message);
}

/// Log a warning message
pub fn warn(source: DataSource, station: Option<&str>, message: &str) {
    log(LogLevel::Warning, source, station, message);
}

/// Log an error message
pub fn error(source: DataSource, station: Option<&str>, message: &str) {
    log(LogLevel::Error, source, station, message);
}

/// Log a debug message
pub fn debug(source: DataSource, station: Option<&str>, message: &str) {
    log(LogLevel::Debug, source, station, message);
}

// ---------------------------------------------------------------------------
// Structured Failure Logging
// ---------------------------------------------------------------------------

/// Log a per-source failure with automatic classification.
pub fn log_source_failure(
    source: DataSource,
    station: Option<&str>,
    operation: &str,
    err: &FlowError,
) -> FailureType {
    let failure_type = classify_failure(err);
    let message = format!("{} failed [{}]: {}", operation, failure_type, err);
    log(failure_level(&failure_type), source, station, &message);
    failure_type
}

/// Log how many of a station's sources contributed rows.
pub fn log_source_summary(source: DataSource, station: &str, total: usize, used: usize) {
    let skipped = total.saturating_sub(used);
    let message = format!(
        "Sources complete: {}/{} usable, {} skipped",
        used, total, skipped
    );

    if skipped == 0 {
        info(source, Some(station), &message);
    } else if used == 0 {
        error(source, Some(station), &message);
    } else {
        warn(source, Some(station), &message);
    }
}

/// Log columns whose null share on the regular grid exceeds the alert level.
pub fn log_missingness(station: Option<&str>, columns: &[(String, f64)]) {
    if columns.is_empty() {
        return;
    }
    let listing = columns
        .iter()
        .map(|(name, pct)| format!("{} {:.2}%", name, pct))
        .collect::<Vec<_>>()
        .join(", ");
    warn(
        DataSource::Pipeline,
        station,
        &format!("columns with elevated missingness: {}", listing),
    );
}
