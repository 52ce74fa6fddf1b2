/// Station runs: every source of one station, unified into one series.
///
/// A run fetches each yearly archive, the auxiliary backfill and the
/// real-time table through a `SourceFetcher`, normalizes and cleans them,
/// and hands the historical and real-time series to the merger and repairer.
/// A source that fails is logged and recorded in the report; only a run
/// without usable historical data fails as a whole. Weather feeds are
/// joined afterwards with `attach_weather`.

use crate::analysis::clean::{clean, clean_with_report, dedup_by_timestamp};
use crate::analysis::merge::merge_at;
use crate::analysis::repair::{repair, RepairAction, RepairPolicy};
use crate::analysis::resample::join_on_timestamp;
use crate::ingest::normalize::{normalize_capture, Normalized};
use crate::ingest::{SourceFetcher, SourceRequest, WeatherFeed};
use crate::logging::{self, DataSource};
use crate::model::{FlowError, Frequency, Gap, Result, TimeFrame};
use crate::report::{RunReport, SourceOutcome, SourceStatus, WeatherStatus};
use crate::stations::StationConfig;

/// Rows a historical series needs before there is anything to unify.
pub const MIN_HISTORICAL_ROWS: usize = 2;

#[derive(Debug, Clone)]
pub struct StationRun {
    pub frame: TimeFrame,
    pub report: RunReport,
}

/// Output of merging and repairing two cleaned series.
#[derive(Debug, Clone, PartialEq)]
pub struct Unified {
    pub frame: TimeFrame,
    pub boundary: Option<Gap>,
    pub action: RepairAction,
}

/// Merges a cleaned historical and real-time series and repairs the gap
/// between them.
pub fn unify_frames(
    historical: &TimeFrame,
    realtime: &TimeFrame,
    policy: &RepairPolicy,
    freq: Frequency,
) -> Unified {
    let merged = merge_at(historical, realtime, freq);
    let repaired = repair(&merged.frame, merged.boundary, policy, freq);
    Unified {
        frame: repaired.frame,
        boundary: merged.boundary,
        action: repaired.action,
    }
}

/// Fetches and normalizes one source, recording its outcome. Returns the
/// normalized series when the source is usable.
fn acquire(
    fetcher: &dyn SourceFetcher,
    station: &StationConfig,
    request: SourceRequest,
    report: &mut RunReport,
) -> Option<Normalized> {
    let source = DataSource::from(request.kind());
    let mut status = SourceStatus::new(request.to_string(), request.kind(), SourceOutcome::Unavailable);

    let normalized = match fetcher.fetch(station, request) {
        Ok(None) => {
            logging::debug(source, Some(&station.code), &format!("{} unavailable", request));
            None
        }
        Err(err) => {
            logging::log_source_failure(source, Some(&station.code), &format!("fetch {}", request), &err);
            status.outcome = SourceOutcome::Failed;
            status.error_message = Some(err.to_string());
            None
        }
        Ok(Some(capture)) => match normalize_capture(&capture) {
            Ok(normalized) => {
                status.outcome = SourceOutcome::Used;
                status.rows = normalized.series.len();
                status.dropped_rows = normalized.dropped_rows;
                Some(normalized)
            }
            Err(err) => {
                logging::log_source_failure(source, Some(&station.code), &format!("normalize {}", request), &err);
                status.outcome = SourceOutcome::Rejected;
                status.error_message = Some(err.to_string());
                None
            }
        },
    };

    report.sources.push(status);
    normalized
}

/// Builds the cleaned historical series: every archive year and the
/// auxiliary backfill cleaned on their own, then deduplicated (archives
/// first) and cleaned again as one series.
fn historical_series(
    fetcher: &dyn SourceFetcher,
    station: &StationConfig,
    report: &mut RunReport,
) -> TimeFrame {
    let freq = station.frequency;
    let mut parts: Vec<TimeFrame> = station
        .years
        .iter()
        .filter_map(|&year| acquire(fetcher, station, SourceRequest::Archive { year }, report))
        .map(|n| clean(&n.series, freq))
        .collect();

    if let Some(aux) = acquire(fetcher, station, SourceRequest::Auxiliary, report) {
        parts.push(clean(&aux.series, freq));
    }

    let refs: Vec<&TimeFrame> = parts.iter().collect();
    let mut combined = TimeFrame::concat(&refs);
    combined.sort_by_time();
    combined.rows = dedup_by_timestamp(std::mem::take(&mut combined.rows));

    let cleaned = clean_with_report(&combined, freq);
    report.missing.extend(cleaned.missing);
    cleaned.frame
}

/// Runs the full unification for one station.
///
/// Fails with `UnificationImpossible` when fewer than two historical rows
/// survive. A missing or unusable real-time source degrades to the cleaned
/// historical series.
pub fn run_station(station: &StationConfig, fetcher: &dyn SourceFetcher) -> Result<StationRun> {
    let freq = station.frequency;
    let mut report = RunReport::new(&station.code, &station.name, freq);

    let historical = historical_series(fetcher, station, &mut report);
    report.historical_rows = historical.len();
    if historical.len() < MIN_HISTORICAL_ROWS {
        logging::log_source_summary(DataSource::Pipeline, &station.code, report.sources.len(), report.sources_used());
        return Err(FlowError::UnificationImpossible {
            station: station.code.clone(),
            rows: historical.len(),
        });
    }

    let realtime = acquire(fetcher, station, SourceRequest::Realtime, &mut report).map(|n| {
        let cleaned = clean_with_report(&n.series, freq);
        report.missing.extend(cleaned.missing);
        cleaned.frame
    });

    let frame = match realtime.filter(|rt| !rt.is_empty()) {
        Some(rt) => {
            report.realtime_rows = rt.len();
            let unified = unify_frames(&historical, &rt, &station.repair_policy(), freq);
            report.boundary = unified.boundary;
            report.repair = Some(unified.action);
            unified.frame
        }
        None => {
            logging::warn(
                DataSource::Pipeline,
                Some(&station.code),
                "no real-time series; returning historical data only",
            );
            historical
        }
    };

    report.output_rows = frame.len();
    report.first_timestamp = frame.first_timestamp();
    report.last_timestamp = frame.last_timestamp();
    logging::log_source_summary(DataSource::Pipeline, &station.code, report.sources.len(), report.sources_used());

    Ok(StationRun { frame, report })
}

/// Left-joins every applicable weather feed onto the run's frame over its
/// time range. Feed failures are logged and recorded in the report; the
/// flow columns and timestamps never change.
pub fn attach_weather(run: &mut StationRun, station: &StationConfig, feeds: &[&dyn WeatherFeed]) {
    let Some((start, end)) = run.frame.range() else {
        return;
    };

    for feed in feeds {
        let mut status = WeatherStatus {
            feed: feed.name().to_string(),
            outcome: SourceOutcome::Unavailable,
            columns: 0,
            error_message: None,
        };
        match feed.history(station, start, end) {
            Ok(Some(weather)) => {
                let before = run.frame.columns.len();
                run.frame = join_on_timestamp(&run.frame, &weather);
                status.columns = run.frame.columns.len() - before;
                status.outcome = SourceOutcome::Used;
            }
            Ok(None) => logging::debug(feed.source(), Some(&station.code), "not configured for this station"),
            Err(err) => {
                logging::log_source_failure(feed.source(), Some(&station.code), "history", &err);
                status.outcome = if err.is_no_data() {
                    SourceOutcome::Rejected
                } else {
                    SourceOutcome::Failed
                };
                status.error_message = Some(err.to_string());
            }
        }
        run.report.weather.push(status);
    }
}

/// Forecast frames of every applicable feed, joined onto the first one
/// that answers. `None` when no feed produced a forecast.
pub fn forecast_weather(station: &StationConfig, feeds: &[&dyn WeatherFeed]) -> Option<TimeFrame> {
    let mut joined: Option<TimeFrame> = None;
    for feed in feeds {
        match feed.forecast(station) {
            Ok(Some(frame)) => {
                joined = Some(match joined {
                    Some(base) => join_on_timestamp(&base, &frame),
                    None => frame,
                });
            }
            Ok(None) => {}
            Err(err) => {
                logging::log_source_failure(feed.source(), Some(&station.code), "forecast", &err);
            }
        }
    }
    joined
}
