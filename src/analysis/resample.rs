//! Weather-frame finishing: joins, column pruning, daily aggregation.

use crate::analysis::clean::{backward_fill, clean};
use crate::model::{Frequency, Row, TimeFrame, Value};
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};

/// Left join on timestamp. Right-hand columns whose names already exist on
/// the left are skipped; the first right row per timestamp is used.
pub fn join_on_timestamp(left: &TimeFrame, right: &TimeFrame) -> TimeFrame {
    let extra: Vec<usize> = right
        .columns
        .iter()
        .enumerate()
        .filter(|(_, name)| !left.columns.contains(name))
        .map(|(idx, _)| idx)
        .collect();

    let mut by_time: HashMap<_, &Row> = HashMap::with_capacity(right.len());
    for row in &right.rows {
        by_time.entry(row.timestamp).or_insert(row);
    }

    let mut columns = left.columns.clone();
    columns.extend(extra.iter().map(|&i| right.columns[i].clone()));

    let rows = left
        .rows
        .iter()
        .map(|row| {
            let mut values = row.values.clone();
            let matched = by_time.get(&row.timestamp);
            values.extend(
                extra
                    .iter()
                    .map(|&i| matched.and_then(|r| r.values[i].clone())),
            );
            Row {
                timestamp: row.timestamp,
                values,
            }
        })
        .collect();

    TimeFrame { columns, rows }
}

/// Removes columns that hold no value at all.
pub fn drop_empty_columns(frame: &TimeFrame) -> TimeFrame {
    let keep: Vec<usize> = (0..frame.columns.len())
        .filter(|&c| frame.null_count(c) < frame.len())
        .collect();

    TimeFrame {
        columns: keep.iter().map(|&c| frame.columns[c].clone()).collect(),
        rows: frame
            .rows
            .iter()
            .map(|row| Row {
                timestamp: row.timestamp,
                values: keep.iter().map(|&c| row.values[c].clone()).collect(),
            })
            .collect(),
    }
}

fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

/// Aggregates to one row per calendar day (midnight timestamps).
///
/// A column is numeric unless it holds any categorical cell. Numeric
/// columns take the daily median, categorical ones the last non-null label.
pub fn resample_daily(frame: &TimeFrame) -> TimeFrame {
    let categorical: Vec<bool> = (0..frame.columns.len())
        .map(|c| {
            frame
                .rows
                .iter()
                .any(|r| matches!(r.values[c], Some(Value::Category(_))))
        })
        .collect();

    let mut days: BTreeMap<NaiveDate, Vec<&Row>> = BTreeMap::new();
    for row in &frame.rows {
        days.entry(row.timestamp.date()).or_default().push(row);
    }

    let mut out = TimeFrame::new(frame.columns.clone());
    for (day, rows) in days {
        let values = categorical
            .iter()
            .enumerate()
            .map(|(c, &is_category)| {
                if is_category {
                    rows.iter().rev().find_map(|r| r.values[c].clone())
                } else {
                    let mut numbers: Vec<f64> = rows
                        .iter()
                        .filter_map(|r| r.values[c].as_ref().and_then(Value::as_number))
                        .collect();
                    median(&mut numbers).map(Value::Number)
                }
            })
            .collect();
        out.push(day.and_time(chrono::NaiveTime::MIN), values);
    }
    out
}

/// Finishes an hourly weather frame: hourly clean, back-fill of leading
/// nulls, removal of empty columns, and daily aggregation when `target`
/// is daily.
pub fn prepare_weather(frame: &TimeFrame, target: Frequency) -> TimeFrame {
    let mut cleaned = clean(frame, Frequency::Hourly);
    if cleaned.total_nulls() > 0 {
        backward_fill(&mut cleaned);
    }
    let pruned = drop_empty_columns(&cleaned);
    match target {
        Frequency::Hourly => pruned,
        Frequency::Daily => resample_daily(&pruned),
    }
}
