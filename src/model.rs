/// Core data types for the flow unification service.
///
/// This module defines the shared time-series model imported by every stage
/// of the pipeline: cell values, row-oriented frames, grid frequencies,
/// boundary gaps, source identifiers and the crate error type.
/// It performs no I/O.

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Column names
// ---------------------------------------------------------------------------

/// Name used for the timestamp column when a frame is written out.
pub const DATE_COLUMN: &str = "date";

/// Name of the single value column of a canonical river-flow series.
pub const FLOW_COLUMN: &str = "flow";

// ---------------------------------------------------------------------------
// Values and rows
// ---------------------------------------------------------------------------

/// A single observed cell: either a measurement or a categorical label
/// (weather description, station name, wind sector, ...).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Category(String),
}

impl Value {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Category(_) => None,
        }
    }

    pub fn as_category(&self) -> Option<&str> {
        match self {
            Value::Number(_) => None,
            Value::Category(s) => Some(s),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{}", n),
            Value::Category(s) => write!(f, "{}", s),
        }
    }
}

/// One timestamped row. `values` is parallel to the owning frame's `columns`.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub timestamp: NaiveDateTime,
    pub values: Vec<Option<Value>>,
}

impl Row {
    /// Number of non-null cells, counting the timestamp (never null).
    pub fn non_null_count(&self) -> usize {
        1 + self.values.iter().filter(|v| v.is_some()).count()
    }
}

// ---------------------------------------------------------------------------
// Frames
// ---------------------------------------------------------------------------

/// A timestamped table with named value columns.
///
/// A canonical series is a frame with a single value column; weather feeds
/// produce frames with one column per variable. Every stage of the pipeline
/// takes a frame and produces a new one.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TimeFrame {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl TimeFrame {
    /// Creates an empty frame with the given value columns.
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        TimeFrame {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Builds a one-column numeric series from `(timestamp, value)` pairs.
    pub fn from_points(
        column: &str,
        points: impl IntoIterator<Item = (NaiveDateTime, f64)>,
    ) -> Self {
        let mut frame = TimeFrame::new([column]);
        for (timestamp, value) in points {
            frame.push(timestamp, vec![Some(Value::Number(value))]);
        }
        frame
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn push(&mut self, timestamp: NaiveDateTime, values: Vec<Option<Value>>) {
        debug_assert_eq!(values.len(), self.columns.len());
        self.rows.push(Row { timestamp, values });
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn timestamps(&self) -> Vec<NaiveDateTime> {
        self.rows.iter().map(|r| r.timestamp).collect()
    }

    /// Numeric view of a column; categorical cells read as `None`.
    /// Returns an empty vector if the column does not exist.
    pub fn numbers(&self, column: &str) -> Vec<Option<f64>> {
        match self.column_index(column) {
            Some(idx) => self
                .rows
                .iter()
                .map(|r| r.values[idx].as_ref().and_then(Value::as_number))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Cell lookup by timestamp and column name (first matching row).
    pub fn value_at(&self, timestamp: NaiveDateTime, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows
            .iter()
            .find(|r| r.timestamp == timestamp)
            .and_then(|r| r.values[idx].as_ref())
    }

    pub fn null_count(&self, column_idx: usize) -> usize {
        self.rows
            .iter()
            .filter(|r| r.values[column_idx].is_none())
            .count()
    }

    /// Total number of null cells across all value columns.
    pub fn total_nulls(&self) -> usize {
        (0..self.columns.len()).map(|c| self.null_count(c)).sum()
    }

    pub fn first_timestamp(&self) -> Option<NaiveDateTime> {
        self.rows.iter().map(|r| r.timestamp).min()
    }

    pub fn last_timestamp(&self) -> Option<NaiveDateTime> {
        self.rows.iter().map(|r| r.timestamp).max()
    }

    /// Earliest and latest timestamp, or `None` for an empty frame.
    pub fn range(&self) -> Option<(NaiveDateTime, NaiveDateTime)> {
        Some((self.first_timestamp()?, self.last_timestamp()?))
    }

    /// Stable ascending sort; rows sharing a timestamp keep their order.
    pub fn sort_by_time(&mut self) {
        self.rows.sort_by_key(|r| r.timestamp);
    }

    /// Stacks frames vertically. Columns are aligned by name: the result has
    /// the union of all column names in first-seen order, and cells for
    /// columns a frame does not carry are null.
    pub fn concat(frames: &[&TimeFrame]) -> TimeFrame {
        let mut columns: Vec<String> = Vec::new();
        for frame in frames {
            for name in &frame.columns {
                if !columns.contains(name) {
                    columns.push(name.clone());
                }
            }
        }

        let mut out = TimeFrame {
            columns,
            rows: Vec::with_capacity(frames.iter().map(|f| f.len()).sum()),
        };

        for frame in frames {
            let mapping: Vec<usize> = frame
                .columns
                .iter()
                .map(|name| out.column_index(name).unwrap_or_default())
                .collect();
            for row in &frame.rows {
                let mut values = vec![None; out.columns.len()];
                for (src, cell) in row.values.iter().enumerate() {
                    values[mapping[src]] = cell.clone();
                }
                out.rows.push(Row {
                    timestamp: row.timestamp,
                    values,
                });
            }
        }
        out
    }

    /// Removes rows identical to an earlier row (same timestamp and same
    /// cells), keeping the first occurrence.
    pub fn dedup_identical(&mut self) {
        let mut seen: HashMap<NaiveDateTime, Vec<usize>> = HashMap::new();
        let mut kept: Vec<Row> = Vec::with_capacity(self.rows.len());
        for row in self.rows.drain(..) {
            let same_time = seen.entry(row.timestamp).or_default();
            if same_time.iter().any(|&i| kept[i] == row) {
                continue;
            }
            same_time.push(kept.len());
            kept.push(row);
        }
        self.rows = kept;
    }
}

// ---------------------------------------------------------------------------
// Grid frequency
// ---------------------------------------------------------------------------

/// Spacing of a regular grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    #[default]
    #[serde(alias = "H", alias = "h")]
    Hourly,
    #[serde(alias = "D", alias = "d")]
    Daily,
}

impl Frequency {
    pub fn step(self) -> Duration {
        match self {
            Frequency::Hourly => Duration::hours(1),
            Frequency::Daily => Duration::days(1),
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frequency::Hourly => write!(f, "hourly"),
            Frequency::Daily => write!(f, "daily"),
        }
    }
}

impl FromStr for Frequency {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "h" | "hourly" => Ok(Frequency::Hourly),
            "d" | "daily" => Ok(Frequency::Daily),
            other => Err(FlowError::Config(format!("unknown frequency '{}'", other))),
        }
    }
}

// ---------------------------------------------------------------------------
// Gaps
// ---------------------------------------------------------------------------

/// A run of missing grid cells between two known instants.
///
/// Between a historical and a real-time source this is the boundary pair
/// (last historical timestamp, first real-time timestamp).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Gap {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl Gap {
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// True if `t` lies strictly inside the gap.
    pub fn contains(&self, t: NaiveDateTime) -> bool {
        self.start < t && t < self.end
    }

    /// The same gap shifted back by `lookback`.
    pub fn shifted_back(&self, lookback: Duration) -> Gap {
        Gap {
            start: self.start - lookback,
            end: self.end - lookback,
        }
    }
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// Identifier of a tabular river-flow source. Selects the parsing schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Yearly published CSV archive.
    Archive,
    /// Locally maintained backfill file.
    Auxiliary,
    /// Scraped real-time values table.
    Realtime,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Archive => write!(f, "archive"),
            SourceKind::Auxiliary => write!(f, "auxiliary"),
            SourceKind::Realtime => write!(f, "realtime"),
        }
    }
}

impl FromStr for SourceKind {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "archive" | "csv" => Ok(SourceKind::Archive),
            "auxiliary" | "aux" => Ok(SourceKind::Auxiliary),
            "realtime" | "real-time" => Ok(SourceKind::Realtime),
            other => Err(FlowError::Config(format!("unknown source '{}'", other))),
        }
    }
}

/// Raw fetch result for one source, before extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct RawCapture {
    pub kind: SourceKind,
    /// Human-readable origin, e.g. the archive year or a file path.
    pub label: String,
    pub body: String,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can arise when acquiring, parsing or unifying series.
///
/// `NoData`, `SentinelData` and `Parse` are per-source and non-fatal to a
/// station run; `UnificationImpossible` ends that station's run only.
#[derive(Debug, Error)]
pub enum FlowError {
    /// The source produced no usable rows.
    #[error("No data available from {feed}: {detail}")]
    NoData { feed: String, detail: String },

    /// Every row carried the same value (placeholder content).
    #[error("No data available from {feed}: every value is the sentinel '{value}'")]
    SentinelData { feed: String, value: String },

    #[error("Parse error: {0}")]
    Parse(String),

    /// Fewer than two historical rows; nothing to unify against.
    #[error("No historical data to unify for station {station}: {rows} usable row(s)")]
    UnificationImpossible { station: String, rows: usize },

    /// Non-2xx HTTP response.
    #[error("HTTP error: {0}")]
    Http(u16),

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl FlowError {
    /// True for failures that only mean "this source had nothing usable".
    pub fn is_no_data(&self) -> bool {
        matches!(self, FlowError::NoData { .. } | FlowError::SentinelData { .. })
    }
}

pub type Result<T> = std::result::Result<T, FlowError>;
