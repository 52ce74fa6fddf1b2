//! Source acquisition.
//!
//! River-flow sources are fetched as raw text through a `SourceFetcher`,
//! either live (`saih::HttpFetcher`) or from cached captures
//! (`replay::ReplayFetcher`), then extracted and normalized. Weather feeds
//! (`openmeteo`, `owm`, `aemet`) produce multi-column frames directly.

pub mod aemet;
pub mod normalize;
pub mod openmeteo;
pub mod owm;
pub mod replay;
pub mod saih;
pub mod table;

use crate::logging::{self, DataSource};
use crate::model::{FlowError, RawCapture, Result, SourceKind, TimeFrame};
use crate::stations::{RetrySettings, StationConfig};
use chrono::NaiveDateTime;
use std::fmt;
use std::time::Duration;

/// One raw source a station run asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceRequest {
    Archive { year: i32 },
    Auxiliary,
    Realtime,
}

impl SourceRequest {
    pub fn kind(&self) -> SourceKind {
        match self {
            SourceRequest::Archive { .. } => SourceKind::Archive,
            SourceRequest::Auxiliary => SourceKind::Auxiliary,
            SourceRequest::Realtime => SourceKind::Realtime,
        }
    }
}

impl fmt::Display for SourceRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceRequest::Archive { year } => write!(f, "archive {}", year),
            SourceRequest::Auxiliary => write!(f, "auxiliary"),
            SourceRequest::Realtime => write!(f, "realtime"),
        }
    }
}

/// Produces the raw text of a river-flow source.
///
/// `Ok(None)` means the source does not exist for this station (no
/// auxiliary file configured, archive year not published). Errors are
/// reserved for sources that exist but could not be read.
pub trait SourceFetcher: Sync {
    fn fetch(&self, station: &StationConfig, request: SourceRequest) -> Result<Option<RawCapture>>;
}

/// A weather provider whose frames are joined onto a station's series.
///
/// Frames come back finished at the station's frequency. `Ok(None)` means
/// the feed does not apply to the station (no coordinates, no AEMET
/// indicator, no forecast product).
pub trait WeatherFeed: Sync {
    /// Short name used in run reports, e.g. "open-meteo".
    fn name(&self) -> &'static str;

    fn source(&self) -> DataSource;

    /// Observations covering `start..=end`.
    fn history(
        &self,
        station: &StationConfig,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Option<TimeFrame>>;

    fn forecast(&self, _station: &StationConfig) -> Result<Option<TimeFrame>> {
        Ok(None)
    }
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub wait: Duration,
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        RetryPolicy {
            max_attempts: settings.max_attempts.max(1),
            wait: Duration::from_secs(settings.wait_secs),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::from(&RetrySettings::default())
    }
}

/// Transport failures, rate limiting and server errors are worth another try.
fn is_transient(err: &FlowError) -> bool {
    match err {
        FlowError::Request(_) => true,
        FlowError::Http(code) => *code == 429 || *code >= 500,
        _ => false,
    }
}

/// Runs `op` until it succeeds, fails permanently, or attempts run out.
pub fn with_retry<T>(
    policy: &RetryPolicy,
    source: DataSource,
    station: Option<&str>,
    mut op: impl FnMut() -> Result<T>,
) -> Result<T> {
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if attempt < policy.max_attempts && is_transient(&err) => {
                logging::warn(
                    source,
                    station,
                    &format!(
                        "attempt {}/{} failed ({}); retrying in {}s",
                        attempt,
                        policy.max_attempts,
                        err,
                        policy.wait.as_secs()
                    ),
                );
                std::thread::sleep(policy.wait);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

// ---------------------------------------------------------------------------
// Text decoding
// ---------------------------------------------------------------------------

/// Decodes ISO-8859-15 (Latin-9) bytes.
///
/// Latin-9 is Latin-1 with eight code points replaced, the euro sign among
/// them. Every byte maps to exactly one character, so decoding cannot fail.
pub fn decode_latin9(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| match b {
            0xA4 => '€',
            0xA6 => 'Š',
            0xA8 => 'š',
            0xB4 => 'Ž',
            0xB8 => 'ž',
            0xBC => 'Œ',
            0xBD => 'œ',
            0xBE => 'Ÿ',
            other => char::from(other),
        })
        .collect()
}

/// UTF-8 if valid, otherwise Latin-9.
pub fn decode_text(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => decode_latin9(err.as_bytes()),
    }
}
