//! Per-source normalization into canonical `{timestamp, flow}` series.
//!
//! Each provider layout is described by a `SourceSchema` value selected by
//! `SourceKind`; a single `normalize` routine interprets any schema.

use crate::ingest::table::{extract, extract_rows, html_table_rows};
use crate::logging::{self, DataSource};
use crate::model::{FlowError, RawCapture, Result, SourceKind, TimeFrame, Value, FLOW_COLUMN};
use chrono::NaiveDateTime;
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

static ISO_MINUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d{4}-\d{2}-\d{2} \d{2}:\d{2}").expect("valid archive date pattern")
});
static DMY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{2}/\d{2}/\d{4}").expect("valid auxiliary date pattern"));
static DMY_MINUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d{2}/\d{2}/\d{4} \d{2}:\d{2}").expect("valid realtime date pattern")
});

// ---------------------------------------------------------------------------
// Schemas
// ---------------------------------------------------------------------------

/// How one provider lays out its rows.
#[derive(Debug, Clone, Copy)]
pub struct SourceSchema {
    pub kind: SourceKind,
    /// Field separator for line-oriented sources; `None` for HTML tables.
    pub delimiter: Option<char>,
    /// Positional field names.
    pub fields: &'static [&'static str],
    /// Fields joined with a space to form the timestamp text.
    pub date_fields: &'static [&'static str],
    pub value_field: &'static str,
    /// Accepted timestamp formats, tried in order.
    pub date_formats: &'static [&'static str],
    pub date_pattern: &'static LazyLock<Regex>,
}

impl SourceKind {
    pub fn schema(self) -> SourceSchema {
        match self {
            SourceKind::Archive => SourceSchema {
                kind: self,
                delimiter: Some('\t'),
                fields: &["date", "flag", "value"],
                date_fields: &["date"],
                value_field: "value",
                date_formats: &["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"],
                date_pattern: &ISO_MINUTE,
            },
            SourceKind::Auxiliary => SourceSchema {
                kind: self,
                delimiter: Some('\t'),
                fields: &["date", "time", "value"],
                date_fields: &["date", "time"],
                value_field: "value",
                date_formats: &["%d/%m/%Y %H:%M:%S", "%d/%m/%Y %H:%M"],
                date_pattern: &DMY,
            },
            SourceKind::Realtime => SourceSchema {
                kind: self,
                delimiter: None,
                fields: &["date", "value"],
                date_fields: &["date"],
                value_field: "value",
                date_formats: &["%d/%m/%Y %H:%M", "%d/%m/%Y %H:%M:%S"],
                date_pattern: &DMY_MINUTE,
            },
        }
    }
}

impl SourceSchema {
    pub fn date_pattern(&self) -> &Regex {
        self.date_pattern
    }

    fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| *f == name)
    }

    /// Splits extracted lines into fields. Table sources are already split.
    pub fn split_lines(&self, lines: &[&str]) -> Vec<Vec<String>> {
        let delimiter = self.delimiter.unwrap_or('\t');
        lines
            .iter()
            .map(|line| line.split(delimiter).map(|f| f.trim().to_string()).collect())
            .collect()
    }

    fn parse_timestamp(&self, text: &str) -> Option<NaiveDateTime> {
        self.date_formats
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
    }
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Result of normalizing one source.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub series: TimeFrame,
    /// Rows inside the dated block that could not be coerced.
    pub dropped_rows: usize,
}

/// Converts a provider's decimal text into a float. Accepts comma decimals.
pub fn parse_decimal(text: &str) -> Option<f64> {
    let cleaned = text.trim().replace(',', ".");
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Builds a canonical one-column series from split rows.
///
/// Rows whose timestamp or value cannot be coerced are dropped and counted.
/// The whole source is rejected with `SentinelData` when every row carries
/// the same value text, and with `NoData` when nothing survives.
pub fn normalize(rows: &[Vec<String>], schema: &SourceSchema) -> Result<Normalized> {
    let feed = schema.kind.to_string();
    if rows.is_empty() {
        return Err(FlowError::NoData {
            feed,
            detail: "no dated rows found".to_string(),
        });
    }

    let value_idx = schema
        .field_index(schema.value_field)
        .ok_or_else(|| FlowError::Config(format!("{} schema lacks its value field", feed)))?;
    let date_idx: Vec<usize> = schema
        .date_fields
        .iter()
        .filter_map(|name| schema.field_index(name))
        .collect();

    let raw_values: Vec<String> = rows
        .iter()
        .map(|row| {
            row.get(value_idx)
                .map(|v| v.trim().replace(',', "."))
                .unwrap_or_default()
        })
        .collect();

    let distinct: HashSet<&str> = raw_values.iter().map(String::as_str).collect();
    if distinct.len() == 1 {
        return Err(FlowError::SentinelData {
            feed,
            value: raw_values[0].clone(),
        });
    }

    let mut series = TimeFrame::new([FLOW_COLUMN]);
    let mut dropped_rows = 0;

    for (row, raw_value) in rows.iter().zip(&raw_values) {
        let date_text = date_idx
            .iter()
            .filter_map(|&i| row.get(i).map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");

        let parsed = schema
            .parse_timestamp(date_text.trim())
            .zip(parse_decimal(raw_value));

        match parsed {
            Some((timestamp, value)) => {
                series.push(timestamp, vec![Some(Value::Number(value))]);
            }
            None => {
                dropped_rows += 1;
                logging::debug(
                    DataSource::from(schema.kind),
                    None,
                    &format!("dropping unparseable row: {:?}", row),
                );
            }
        }
    }

    if series.is_empty() {
        return Err(FlowError::NoData {
            feed,
            detail: format!("all {} dated rows failed to parse", dropped_rows),
        });
    }

    Ok(Normalized {
        series,
        dropped_rows,
    })
}

/// Extracts the dated block from a raw capture and normalizes it with the
/// capture's schema.
pub fn normalize_capture(capture: &RawCapture) -> Result<Normalized> {
    let schema = capture.kind.schema();
    let rows: Vec<Vec<String>> = match schema.delimiter {
        Some(_) => {
            let lines = extract(&capture.body, schema.date_pattern());
            schema.split_lines(&lines)
        }
        None => {
            let table = html_table_rows(&capture.body);
            extract_rows(&table, schema.date_pattern()).to_vec()
        }
    };

    normalize(&rows, &schema).map_err(|err| match err {
        FlowError::NoData { detail, .. } => FlowError::NoData {
            feed: format!("{} {}", capture.kind, capture.label),
            detail,
        },
        FlowError::SentinelData { value, .. } => FlowError::SentinelData {
            feed: format!("{} {}", capture.kind, capture.label),
            value,
        },
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn capture(kind: SourceKind, body: &str) -> RawCapture {
        RawCapture {
            kind,
            label: "test".to_string(),
            body: body.to_string(),
        }
    }

    #[test]
    fn test_archive_rows_parse_into_canonical_series() {
        let body = "Estacion 2087\nFecha\tCalidad\tCaudal\n\
                    2023-01-01 00:00\tV\t10.5\n\
                    2023-01-01 01:00\tV\t11.0\n\
                    2023-01-01 02:00\tV\t11.25\n\
                    Fin";
        let out = normalize_capture(&capture(SourceKind::Archive, body)).expect("valid archive");
        assert_eq!(out.series.columns, vec![FLOW_COLUMN]);
        assert_eq!(out.series.len(), 3);
        assert_eq!(out.series.numbers(FLOW_COLUMN), vec![Some(10.5), Some(11.0), Some(11.25)]);
        assert_eq!(out.dropped_rows, 0);
    }

    #[test]
    fn test_auxiliary_rows_join_date_and_time_and_accept_decimal_commas() {
        let body = "Datos auxiliares;;\n\
                    31/12/2022\t23:00:00\t7,25\n\
                    01/01/2023\t00:00:00\t7,5\n";
        let out = normalize_capture(&capture(SourceKind::Auxiliary, body)).expect("valid aux");
        let expected_first = NaiveDate::from_ymd_opt(2022, 12, 31)
            .unwrap()
            .and_hms_opt(23, 0, 0)
            .unwrap();
        assert_eq!(out.series.rows[0].timestamp, expected_first);
        assert_eq!(out.series.numbers(FLOW_COLUMN), vec![Some(7.25), Some(7.5)]);
    }

    #[test]
    fn test_realtime_table_rows_parse() {
        let html = "<table><tr><th>Fecha</th><th>Valor</th></tr>\
                    <tr><td>03/06/2023 00:00</td><td>12,5</td></tr>\
                    <tr><td>03/06/2023 01:00</td><td>12,7</td></tr></table>";
        let out = normalize_capture(&capture(SourceKind::Realtime, html)).expect("valid table");
        assert_eq!(out.series.len(), 2);
        assert_eq!(out.series.numbers(FLOW_COLUMN), vec![Some(12.5), Some(12.7)]);
    }

    #[test]
    fn test_constant_value_column_is_rejected_as_sentinel() {
        let body = "2023-01-01 00:00\tV\t0\n2023-01-01 01:00\tV\t0\n2023-01-01 02:00\tV\t0\n";
        let result = normalize_capture(&capture(SourceKind::Archive, body));
        assert!(
            matches!(result, Err(FlowError::SentinelData { ref value, .. }) if value == "0"),
            "constant value column must never produce a series, got {:?}",
            result
        );
    }

    #[test]
    fn test_unparseable_rows_are_dropped_not_fatal() {
        let body = "2023-01-01 00:00\tV\t1.0\n\
                    2023-01-01 01:00\tV\t--\n\
                    2023-01-01 02:00\tV\t3.0\n";
        let out = normalize_capture(&capture(SourceKind::Archive, body)).expect("source survives");
        assert_eq!(out.series.len(), 2);
        assert_eq!(out.dropped_rows, 1);
    }

    #[test]
    fn test_all_rows_unparseable_is_no_data() {
        let body = "2023-01-01 00:00\tV\tn/a\n2023-01-01 01:00\tV\t--\n";
        let result = normalize_capture(&capture(SourceKind::Archive, body));
        assert!(matches!(result, Err(FlowError::NoData { .. })));
    }

    #[test]
    fn test_text_without_dated_rows_is_no_data() {
        let result = normalize_capture(&capture(SourceKind::Archive, "<html>404</html>"));
        match result {
            Err(FlowError::NoData { feed, .. }) => assert_eq!(feed, "archive test"),
            other => panic!("expected NoData, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_decimal_variants() {
        assert_eq!(parse_decimal("12,5"), Some(12.5));
        assert_eq!(parse_decimal(" 3.25 "), Some(3.25));
        assert_eq!(parse_decimal(""), None);
        assert_eq!(parse_decimal("Ip"), None);
        assert_eq!(parse_decimal("NaN"), None);
    }
}
