//! Regular-grid cleaning.
//!
//! Sort, drop mostly-empty rows, deduplicate by timestamp, re-index onto a
//! regular grid, report missingness, then forward-fill. The output has
//! exactly one row per grid instant. Daily grids sit on midnight: rows are
//! collapsed onto their calendar day before the grid join.

use crate::analysis::resample::resample_daily;
use crate::logging;
use crate::model::{Frequency, Row, TimeFrame};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::HashMap;

/// Null share (percent of grid rows) above which a column is reported.
pub const MISSINGNESS_ALERT_PERCENT: f64 = 1.0;

/// Null share of one column on the regular grid.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnMissingness {
    pub column: String,
    pub null_percent: f64,
}

/// A cleaned frame plus the columns that were materially incomplete
/// before forward-filling.
#[derive(Debug, Clone, PartialEq)]
pub struct Cleaned {
    pub frame: TimeFrame,
    pub missing: Vec<ColumnMissingness>,
}

/// Instants from `start` to `end` inclusive at `freq`, anchored on `start`.
pub fn regular_grid(start: NaiveDateTime, end: NaiveDateTime, freq: Frequency) -> Vec<NaiveDateTime> {
    let step = freq.step();
    let mut grid = Vec::new();
    let mut t = start;
    while t <= end {
        grid.push(t);
        t += step;
    }
    grid
}

/// Minimum non-null cells a row needs to be kept: `ceil(0.3 * columns)`,
/// where the timestamp counts as a column.
pub fn min_non_null(value_columns: usize) -> usize {
    let columns = value_columns + 1;
    (columns * 3).div_ceil(10)
}

/// Keeps the first row of every timestamp. Input need not be sorted.
pub fn dedup_by_timestamp(rows: Vec<Row>) -> Vec<Row> {
    let mut seen = std::collections::HashSet::new();
    rows.into_iter().filter(|r| seen.insert(r.timestamp)).collect()
}

/// Left-joins `frame` onto `grid`. Each grid instant takes the first row
/// with that timestamp; instants without one get an all-null row and rows
/// off the grid are dropped.
pub fn reindex(frame: &TimeFrame, grid: &[NaiveDateTime]) -> TimeFrame {
    let mut by_time: HashMap<NaiveDateTime, &Row> = HashMap::with_capacity(frame.len());
    for row in &frame.rows {
        by_time.entry(row.timestamp).or_insert(row);
    }

    let width = frame.columns.len();
    let rows = grid
        .iter()
        .map(|&timestamp| Row {
            timestamp,
            values: by_time
                .get(&timestamp)
                .map(|r| r.values.clone())
                .unwrap_or_else(|| vec![None; width]),
        })
        .collect();

    TimeFrame {
        columns: frame.columns.clone(),
        rows,
    }
}

/// Per-column null percentage for columns above the alert level.
pub fn missingness(frame: &TimeFrame) -> Vec<ColumnMissingness> {
    if frame.is_empty() {
        return Vec::new();
    }
    frame
        .columns
        .iter()
        .enumerate()
        .map(|(idx, name)| ColumnMissingness {
            column: name.clone(),
            null_percent: frame.null_count(idx) as f64 * 100.0 / frame.len() as f64,
        })
        .filter(|m| m.null_percent > MISSINGNESS_ALERT_PERCENT)
        .collect()
}

/// Propagates the last valid value of each column forward. Leading nulls
/// have nothing to propagate and remain null.
pub fn forward_fill(frame: &mut TimeFrame) {
    for col in 0..frame.columns.len() {
        let mut last = None;
        for row in &mut frame.rows {
            match &row.values[col] {
                Some(v) => last = Some(v.clone()),
                None => row.values[col] = last.clone(),
            }
        }
    }
}

/// Propagates the next valid value of each column backward.
pub fn backward_fill(frame: &mut TimeFrame) {
    for col in 0..frame.columns.len() {
        let mut next = None;
        for row in frame.rows.iter_mut().rev() {
            match &row.values[col] {
                Some(v) => next = Some(v.clone()),
                None => row.values[col] = next.clone(),
            }
        }
    }
}

/// Cleans `frame` onto a regular grid at `freq` and reports missingness.
pub fn clean_with_report(frame: &TimeFrame, freq: Frequency) -> Cleaned {
    let mut sorted = frame.clone();
    sorted.sort_by_time();

    let threshold = min_non_null(sorted.columns.len());
    let rows: Vec<Row> = sorted
        .rows
        .into_iter()
        .filter(|r| r.non_null_count() >= threshold)
        .collect();
    let rows = match freq {
        Frequency::Hourly => dedup_by_timestamp(rows),
        Frequency::Daily => {
            resample_daily(&TimeFrame {
                columns: sorted.columns.clone(),
                rows,
            })
            .rows
        }
    };

    let (Some(first), Some(last)) = (rows.first(), rows.last()) else {
        return Cleaned {
            frame: TimeFrame::new(sorted.columns),
            missing: Vec::new(),
        };
    };
    let grid = regular_grid(first.timestamp, last.timestamp, freq);

    let survivors = TimeFrame {
        columns: sorted.columns,
        rows,
    };
    let mut gridded = reindex(&survivors, &grid);

    let missing = missingness(&gridded);
    let listing: Vec<(String, f64)> = missing
        .iter()
        .map(|m| (m.column.clone(), m.null_percent))
        .collect();
    logging::log_missingness(None, &listing);

    forward_fill(&mut gridded);

    Cleaned {
        frame: gridded,
        missing,
    }
}

/// Cleans `frame` onto a regular grid at `freq`.
pub fn clean(frame: &TimeFrame, freq: Frequency) -> TimeFrame {
    clean_with_report(frame, freq).frame
}
