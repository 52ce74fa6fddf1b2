//! Historical + real-time merge onto one grid.
//!
//! Unlike the cleaner, the merge leaves uncovered grid instants null so the
//! repairer can decide how to fill the boundary gap.

use crate::analysis::clean::{regular_grid, reindex};
use crate::model::{Frequency, Gap, TimeFrame};

/// Merged frame plus the boundary between the two sources.
#[derive(Debug, Clone, PartialEq)]
pub struct Merged {
    pub frame: TimeFrame,
    /// (last historical timestamp, first real-time timestamp); `None` when
    /// either side is empty.
    pub boundary: Option<Gap>,
}

/// Merges on an hourly grid.
pub fn merge(historical: &TimeFrame, realtime: &TimeFrame) -> Merged {
    merge_at(historical, realtime, Frequency::Hourly)
}

/// Concatenates both frames, drops fully identical rows, and left-joins the
/// result onto a grid spanning the union of both ranges.
///
/// When the sources disagree on a timestamp the historical row wins.
pub fn merge_at(historical: &TimeFrame, realtime: &TimeFrame, freq: Frequency) -> Merged {
    let boundary = match (historical.last_timestamp(), realtime.first_timestamp()) {
        (Some(start), Some(end)) => Some(Gap { start, end }),
        _ => None,
    };

    let mut combined = TimeFrame::concat(&[historical, realtime]);
    combined.dedup_identical();

    let frame = match combined.range() {
        Some((start, end)) => reindex(&combined, &regular_grid(start, end, freq)),
        None => combined,
    };

    Merged { frame, boundary }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FLOW_COLUMN;
    use chrono::{NaiveDate, NaiveDateTime};

    fn t(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2023, 6, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    fn hourly(from: NaiveDateTime, hours: i64, base: f64) -> TimeFrame {
        TimeFrame::from_points(
            FLOW_COLUMN,
            (0..hours).map(|h| (from + chrono::Duration::hours(h), base + h as f64)),
        )
    }

    #[test]
    fn test_disjoint_sources_leave_the_gap_null() {
        let hist = hourly(t(1, 0), 24, 0.0); // 01 00:00 .. 01 23:00
        let rt = hourly(t(2, 6), 6, 100.0); // 02 06:00 .. 02 11:00
        let merged = merge(&hist, &rt);

        assert_eq!(merged.frame.first_timestamp(), Some(t(1, 0)));
        assert_eq!(merged.frame.last_timestamp(), Some(t(2, 11)));
        assert_eq!(merged.frame.len(), 36);

        let flow = merged.frame.numbers(FLOW_COLUMN);
        let nulls = flow.iter().filter(|v| v.is_none()).count();
        assert_eq!(nulls, 6, "00:00..05:00 on day 2 must stay null for the repairer");
        assert_eq!(merged.boundary, Some(Gap { start: t(1, 23), end: t(2, 6) }));
    }

    #[test]
    fn test_overlapping_identical_rows_are_deduplicated() {
        let hist = hourly(t(1, 0), 10, 0.0);
        let rt = hourly(t(1, 5), 10, 5.0); // identical values over 05:00..09:00
        let merged = merge(&hist, &rt);
        assert_eq!(merged.frame.len(), 15);
        assert!(merged.frame.numbers(FLOW_COLUMN).iter().all(Option::is_some));
    }

    #[test]
    fn test_conflicting_overlap_prefers_historical() {
        let hist = TimeFrame::from_points(FLOW_COLUMN, [(t(1, 0), 1.0), (t(1, 1), 2.0)]);
        let rt = TimeFrame::from_points(FLOW_COLUMN, [(t(1, 1), 20.0), (t(1, 2), 30.0)]);
        let merged = merge(&hist, &rt);
        assert_eq!(merged.frame.numbers(FLOW_COLUMN), vec![Some(1.0), Some(2.0), Some(30.0)]);
    }

    #[test]
    fn test_missing_realtime_has_no_boundary() {
        let hist = hourly(t(1, 0), 3, 0.0);
        let merged = merge(&hist, &TimeFrame::new([FLOW_COLUMN]));
        assert_eq!(merged.boundary, None);
        assert_eq!(merged.frame.len(), 3);
    }
}
