//! Seasonal repair of the historical / real-time boundary gap.
//!
//! Short outages are covered by persistence (forward-fill). Multi-day
//! outages are filled from the same calendar window one year earlier,
//! copied position by position, then forward-filled.
//!
//! The copy is positional: it does not re-align by weekday, and when the
//! prior window is shorter than the gap (data starting inside it, or a leap
//! day in between) the tail of the gap is left to forward-fill.

use crate::analysis::clean::clean;
use crate::logging::{self, DataSource};
use crate::model::{Frequency, Gap, TimeFrame};
use chrono::Duration;
use serde::Serialize;

/// Controls whether and when seasonal substitution runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepairPolicy {
    pub replace_missing: bool,
    /// Gaps strictly longer than this get seasonal substitution.
    pub min_gap: Duration,
    /// How far back the analog window lies.
    pub lookback: Duration,
}

impl Default for RepairPolicy {
    fn default() -> Self {
        RepairPolicy {
            replace_missing: true,
            min_gap: Duration::days(1),
            lookback: Duration::days(365),
        }
    }
}

impl RepairPolicy {
    pub fn forward_fill_only() -> Self {
        RepairPolicy {
            replace_missing: false,
            ..RepairPolicy::default()
        }
    }
}

/// What the repairer did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RepairAction {
    SeasonalSubstitution {
        /// Grid cells strictly inside the boundary gap.
        window_cells: usize,
        /// Grid cells found in the prior-year window.
        prior_cells: usize,
        /// Null cells that received a prior-year value.
        filled_cells: usize,
    },
    ForwardFillOnly {
        reason: SkipReason,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Disabled,
    NoBoundary,
    ShortGap,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Repaired {
    pub frame: TimeFrame,
    pub action: RepairAction,
}

/// Repairs a merged frame around `boundary` according to `policy`, then
/// sorts and forward-fills at `freq`.
pub fn repair(
    merged: &TimeFrame,
    boundary: Option<Gap>,
    policy: &RepairPolicy,
    freq: Frequency,
) -> Repaired {
    let skip = |reason| Repaired {
        frame: clean(merged, freq),
        action: RepairAction::ForwardFillOnly { reason },
    };

    if !policy.replace_missing {
        return skip(SkipReason::Disabled);
    }
    let Some(gap) = boundary else {
        return skip(SkipReason::NoBoundary);
    };
    if gap.duration() <= policy.min_gap {
        return skip(SkipReason::ShortGap);
    }

    let mut frame = merged.clone();
    let action = seasonal_fill(&mut frame, gap, policy.lookback);
    frame.sort_by_time();

    Repaired {
        frame: clean(&frame, freq),
        action,
    }
}

/// Copies the prior-year window into the null cells of the gap window,
/// element for element by grid offset.
fn seasonal_fill(frame: &mut TimeFrame, gap: Gap, lookback: Duration) -> RepairAction {
    let prior = gap.shifted_back(lookback);

    let window: Vec<usize> = (0..frame.rows.len())
        .filter(|&i| gap.contains(frame.rows[i].timestamp))
        .collect();
    let analog: Vec<usize> = (0..frame.rows.len())
        .filter(|&i| prior.contains(frame.rows[i].timestamp))
        .collect();

    if analog.len() < window.len() {
        logging::warn(
            DataSource::Pipeline,
            None,
            &format!(
                "prior-year window {} .. {} has {} of {} cells; copying by position",
                prior.start,
                prior.end,
                analog.len(),
                window.len()
            ),
        );
    }

    let mut filled_cells = 0;
    for (&target, &source) in window.iter().zip(&analog) {
        for col in 0..frame.columns.len() {
            if frame.rows[target].values[col].is_some() {
                continue;
            }
            if let Some(value) = frame.rows[source].values[col].clone() {
                frame.rows[target].values[col] = Some(value);
                filled_cells += 1;
            }
        }
    }

    logging::debug(
        DataSource::Pipeline,
        None,
        &format!(
            "seasonal substitution filled {} cells of gap {} .. {}",
            filled_cells, gap.start, gap.end
        ),
    );

    RepairAction::SeasonalSubstitution {
        window_cells: window.len(),
        prior_cells: analog.len(),
        filled_cells,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::merge::merge;
    use crate::model::FLOW_COLUMN;
    use chrono::{NaiveDate, NaiveDateTime};

    fn t(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    /// A distinct, recognisable value per instant: hours since 2022-01-01.
    fn signal(ts: NaiveDateTime) -> f64 {
        (ts - t(2022, 1, 1, 0)).num_hours() as f64
    }

    fn hourly_between(from: NaiveDateTime, to: NaiveDateTime) -> TimeFrame {
        let hours = (to - from).num_hours();
        TimeFrame::from_points(
            FLOW_COLUMN,
            (0..=hours).map(|h| {
                let ts = from + Duration::hours(h);
                (ts, signal(ts))
            }),
        )
    }

    #[test]
    fn test_five_day_gap_is_filled_from_prior_year() {
        let hist = hourly_between(t(2022, 6, 1, 0), t(2023, 6, 10, 0));
        let rt = hourly_between(t(2023, 6, 15, 0), t(2023, 6, 20, 0));
        let merged = merge(&hist, &rt);

        let out = repair(&merged.frame, merged.boundary, &RepairPolicy::default(), Frequency::Hourly);

        match out.action {
            RepairAction::SeasonalSubstitution { window_cells, prior_cells, filled_cells } => {
                assert_eq!(window_cells, 119);
                assert_eq!(prior_cells, 119);
                assert_eq!(filled_cells, 119);
            }
            other => panic!("expected seasonal substitution, got {:?}", other),
        }

        for sample in [t(2023, 6, 10, 1), t(2023, 6, 12, 5), t(2023, 6, 14, 23)] {
            let year_before = sample - Duration::days(365);
            assert_eq!(
                out.frame.value_at(sample, FLOW_COLUMN).and_then(|v| v.as_number()),
                Some(signal(year_before)),
                "{} should carry the value observed at {}",
                sample,
                year_before
            );
        }
        assert_eq!(out.frame.total_nulls(), 0);
    }

    #[test]
    fn test_short_gap_is_forward_filled_only() {
        let hist = hourly_between(t(2022, 6, 1, 0), t(2023, 6, 10, 0));
        let rt = hourly_between(t(2023, 6, 10, 18), t(2023, 6, 12, 0));
        let merged = merge(&hist, &rt);
        assert_eq!(merged.boundary.map(|g| g.duration()), Some(Duration::hours(18)));

        let out = repair(&merged.frame, merged.boundary, &RepairPolicy::default(), Frequency::Hourly);
        assert_eq!(out.action, RepairAction::ForwardFillOnly { reason: SkipReason::ShortGap });

        let last_hist = signal(t(2023, 6, 10, 0));
        for h in 1..18 {
            let sample = t(2023, 6, 10, 0) + Duration::hours(h);
            assert_eq!(
                out.frame.value_at(sample, FLOW_COLUMN).and_then(|v| v.as_number()),
                Some(last_hist),
                "short gaps carry the last historical value"
            );
        }
    }

    #[test]
    fn test_disabled_policy_only_forward_fills() {
        let hist = hourly_between(t(2022, 6, 1, 0), t(2023, 6, 10, 0));
        let rt = hourly_between(t(2023, 6, 15, 0), t(2023, 6, 16, 0));
        let merged = merge(&hist, &rt);

        let out = repair(&merged.frame, merged.boundary, &RepairPolicy::forward_fill_only(), Frequency::Hourly);
        assert_eq!(out.action, RepairAction::ForwardFillOnly { reason: SkipReason::Disabled });
        assert_eq!(
            out.frame.value_at(t(2023, 6, 12, 5), FLOW_COLUMN).and_then(|v| v.as_number()),
            Some(signal(t(2023, 6, 10, 0)))
        );
    }

    #[test]
    fn test_missing_prior_year_falls_back_to_forward_fill() {
        // History starts after the prior-year window, so nothing can be copied.
        let hist = hourly_between(t(2023, 1, 1, 0), t(2023, 6, 1, 0));
        let rt = hourly_between(t(2023, 6, 3, 0), t(2023, 6, 10, 0));
        let merged = merge(&hist, &rt);

        let out = repair(&merged.frame, merged.boundary, &RepairPolicy::default(), Frequency::Hourly);
        match out.action {
            RepairAction::SeasonalSubstitution { prior_cells, filled_cells, .. } => {
                assert_eq!(prior_cells, 0);
                assert_eq!(filled_cells, 0);
            }
            other => panic!("expected a substitution attempt, got {:?}", other),
        }
        assert_eq!(out.frame.total_nulls(), 0, "forward-fill must mop up the gap");
    }

    #[test]
    fn test_partial_prior_window_copies_by_position() {
        // History starts 2022-06-12 00:00, two days into the prior window.
        let hist = hourly_between(t(2022, 6, 12, 0), t(2023, 6, 10, 0));
        let rt = hourly_between(t(2023, 6, 15, 0), t(2023, 6, 16, 0));
        let merged = merge(&hist, &rt);

        let out = repair(&merged.frame, merged.boundary, &RepairPolicy::default(), Frequency::Hourly);
        match out.action {
            RepairAction::SeasonalSubstitution { window_cells, prior_cells, filled_cells } => {
                assert_eq!(window_cells, 119);
                assert_eq!(prior_cells, 72, "2022-06-12 00:00 .. 2022-06-14 23:00");
                assert_eq!(filled_cells, 72);
            }
            other => panic!("expected seasonal substitution, got {:?}", other),
        }
        // Offset 0 of the gap takes offset 0 of what the prior window holds.
        assert_eq!(
            out.frame.value_at(t(2023, 6, 10, 1), FLOW_COLUMN).and_then(|v| v.as_number()),
            Some(signal(t(2022, 6, 12, 0)))
        );
        assert_eq!(out.frame.total_nulls(), 0);
    }
}
