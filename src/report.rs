//! Station Run Report
//!
//! Serializable summary of one station run: which sources contributed,
//! which were unavailable or rejected and why, the boundary between
//! historical and real-time data, and what the repairer did.

use crate::analysis::clean::ColumnMissingness;
use crate::analysis::repair::RepairAction;
use crate::model::{Frequency, Gap, Result, SourceKind};
use chrono::{NaiveDateTime, Utc};
use serde::Serialize;

// ============================================================================
// Source Status
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceOutcome {
    /// Contributed rows to the run.
    Used,
    /// Not published or not captured for this station.
    Unavailable,
    /// Fetched, but produced no usable series.
    Rejected,
    /// Could not be fetched.
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    /// e.g. "archive 2022", "realtime".
    pub source: String,
    pub kind: SourceKind,
    pub outcome: SourceOutcome,
    pub rows: usize,
    pub dropped_rows: usize,
    pub error_message: Option<String>,
}

impl SourceStatus {
    pub fn new(source: impl Into<String>, kind: SourceKind, outcome: SourceOutcome) -> Self {
        SourceStatus {
            source: source.into(),
            kind,
            outcome,
            rows: 0,
            dropped_rows: 0,
            error_message: None,
        }
    }
}

/// Outcome of one weather feed joined onto the run.
#[derive(Debug, Clone, Serialize)]
pub struct WeatherStatus {
    pub feed: String,
    pub outcome: SourceOutcome,
    /// Columns the feed added to the output.
    pub columns: usize,
    pub error_message: Option<String>,
}

// ============================================================================
// Run Report
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub station: String,
    pub name: String,
    pub generated_at: String,
    pub frequency: Frequency,
    pub sources: Vec<SourceStatus>,
    pub historical_rows: usize,
    pub realtime_rows: usize,
    pub boundary: Option<Gap>,
    /// `None` when no real-time series reached the merge.
    pub repair: Option<RepairAction>,
    /// Columns above the missingness alert level before filling.
    pub missing: Vec<ColumnMissingness>,
    pub output_rows: usize,
    pub first_timestamp: Option<NaiveDateTime>,
    pub last_timestamp: Option<NaiveDateTime>,
    pub weather: Vec<WeatherStatus>,
}

impl RunReport {
    pub fn new(station: &str, name: &str, frequency: Frequency) -> Self {
        RunReport {
            station: station.to_string(),
            name: name.to_string(),
            generated_at: Utc::now().to_rfc3339(),
            frequency,
            sources: Vec::new(),
            historical_rows: 0,
            realtime_rows: 0,
            boundary: None,
            repair: None,
            missing: Vec::new(),
            output_rows: 0,
            first_timestamp: None,
            last_timestamp: None,
            weather: Vec::new(),
        }
    }

    pub fn sources_used(&self) -> usize {
        self.sources
            .iter()
            .filter(|s| s.outcome == SourceOutcome::Used)
            .count()
    }

    pub fn status_of(&self, source: &str) -> Option<&SourceStatus> {
        self.sources.iter().find(|s| s.source == source)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::repair::SkipReason;

    #[test]
    fn test_report_counts_used_sources() {
        let mut report = RunReport::new("2087", "Test gauge", Frequency::Hourly);
        report.sources.push(SourceStatus::new("archive 2022", SourceKind::Archive, SourceOutcome::Used));
        report.sources.push(SourceStatus::new("archive 2023", SourceKind::Archive, SourceOutcome::Rejected));
        report.sources.push(SourceStatus::new("realtime", SourceKind::Realtime, SourceOutcome::Used));

        assert_eq!(report.sources_used(), 2);
        assert_eq!(
            report.status_of("archive 2023").map(|s| s.outcome),
            Some(SourceOutcome::Rejected)
        );
    }

    #[test]
    fn test_report_serializes_repair_and_outcomes() {
        let mut report = RunReport::new("2087", "Test gauge", Frequency::Daily);
        report.repair = Some(RepairAction::ForwardFillOnly { reason: SkipReason::ShortGap });
        report.sources.push(SourceStatus::new("realtime", SourceKind::Realtime, SourceOutcome::Unavailable));

        let json = report.to_json().expect("report serializes");
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["frequency"], "daily");
        assert_eq!(parsed["repair"]["action"], "forward_fill_only");
        assert_eq!(parsed["repair"]["reason"], "short_gap");
        assert_eq!(parsed["sources"][0]["outcome"], "unavailable");
        assert_eq!(parsed["sources"][0]["kind"], "realtime");
    }
}
