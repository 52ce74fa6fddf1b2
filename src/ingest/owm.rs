/// OpenWeatherMap client
///
/// Hourly history comes from the `history/city` endpoint, which serves a
/// bounded window per call, so long ranges are fetched in consecutive
/// intervals and concatenated. The hourly forecast is a single call.
///
/// Each list entry nests its measurements in `main`, `wind`, `clouds`,
/// `rain` and `snow` objects plus a `weather` array whose first element
/// carries the categorical condition labels. Timestamps are Unix seconds
/// in UTC.
///
/// API Documentation: https://openweathermap.org/history

use crate::analysis::resample::prepare_weather;
use crate::ingest::{with_retry, RetryPolicy, WeatherFeed};
use crate::logging::{self, DataSource};
use crate::model::{FlowError, Frequency, Result, TimeFrame, Value};
use crate::stations::{Endpoints, StationConfig};
use chrono::{DateTime, Duration, NaiveDateTime};
use serde::Deserialize;
use std::collections::BTreeMap;

// ============================================================================
// Response Structures
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct OwmResponse {
    #[serde(default)]
    pub list: Vec<OwmEntry>,
}

/// One hourly observation or forecast step.
#[derive(Debug, Deserialize)]
pub struct OwmEntry {
    pub dt: i64,
    #[serde(default)]
    pub main: BTreeMap<String, f64>,
    #[serde(default)]
    pub wind: BTreeMap<String, f64>,
    #[serde(default)]
    pub clouds: BTreeMap<String, f64>,
    #[serde(default)]
    pub rain: BTreeMap<String, f64>,
    #[serde(default)]
    pub snow: BTreeMap<String, f64>,
    #[serde(default)]
    pub weather: Vec<OwmCondition>,
}

#[derive(Debug, Deserialize)]
pub struct OwmCondition {
    pub id: Option<f64>,
    pub main: Option<String>,
    pub description: Option<String>,
    pub icon: Option<String>,
}

// ============================================================================
// URL Builders
// ============================================================================

pub fn build_history_url(base: &str, latitude: f64, longitude: f64, start: i64, end: i64, api_key: &str) -> String {
    format!(
        "{}?lat={}&lon={}&type=hour&start={}&end={}&appid={}",
        base, latitude, longitude, start, end, api_key
    )
}

pub fn build_forecast_url(base: &str, latitude: f64, longitude: f64, api_key: &str) -> String {
    format!("{}?lat={}&lon={}&appid={}", base, latitude, longitude, api_key)
}

/// Splits `[start, end)` into consecutive windows of at most `interval`.
pub fn chunk_ranges(
    start: NaiveDateTime,
    end: NaiveDateTime,
    interval: Duration,
) -> Vec<(NaiveDateTime, NaiveDateTime)> {
    let mut ranges = Vec::new();
    if interval <= Duration::zero() {
        return ranges;
    }
    let mut current = start;
    while current < end {
        let next = (current + interval).min(end);
        ranges.push((current, next));
        current = next;
    }
    ranges
}

// ============================================================================
// Parsing
// ============================================================================

/// Flattens the nested entry objects into one row per entry.
///
/// `main` and `wind` keys keep their names; `clouds`, `rain` and `snow`
/// keys are prefixed with the object name (`rain_1h`, `snow_1h`). The
/// condition becomes `weather_id` plus the categorical `weather_main`,
/// `weather_description` and `weather_icon`. Columns appear in order of
/// first occurrence.
pub fn parse_owm_response(response: &OwmResponse) -> Result<TimeFrame> {
    if response.list.is_empty() {
        return Err(FlowError::NoData {
            feed: "openweathermap".to_string(),
            detail: "response list is empty".to_string(),
        });
    }

    let mut columns: Vec<String> = Vec::new();
    let mut cells: Vec<(NaiveDateTime, BTreeMap<usize, Value>)> = Vec::with_capacity(response.list.len());

    for entry in &response.list {
        let timestamp = DateTime::from_timestamp(entry.dt, 0)
            .ok_or_else(|| FlowError::Parse(format!("openweathermap timestamp {} out of range", entry.dt)))?
            .naive_utc();

        let mut fields: Vec<(String, Value)> = Vec::new();
        let numeric = |prefix: Option<&str>, map: &BTreeMap<String, f64>| {
            map.iter()
                .map(|(key, v)| {
                    let name = match prefix {
                        Some(p) => format!("{}_{}", p, key),
                        None => key.clone(),
                    };
                    (name, Value::Number(*v))
                })
                .collect::<Vec<_>>()
        };
        fields.extend(numeric(None, &entry.main));
        fields.extend(numeric(None, &entry.wind));
        fields.extend(numeric(Some("clouds"), &entry.clouds));
        fields.extend(numeric(Some("rain"), &entry.rain));
        fields.extend(numeric(Some("snow"), &entry.snow));

        if let Some(condition) = entry.weather.first() {
            if let Some(id) = condition.id {
                fields.push(("weather_id".to_string(), Value::Number(id)));
            }
            for (name, label) in [
                ("weather_main", &condition.main),
                ("weather_description", &condition.description),
                ("weather_icon", &condition.icon),
            ] {
                if let Some(label) = label {
                    fields.push((name.to_string(), Value::Category(label.clone())));
                }
            }
        }

        let mut row = BTreeMap::new();
        for (name, value) in fields {
            let idx = match columns.iter().position(|c| *c == name) {
                Some(idx) => idx,
                None => {
                    columns.push(name);
                    columns.len() - 1
                }
            };
            row.insert(idx, value);
        }
        cells.push((timestamp, row));
    }

    let mut frame = TimeFrame::new(columns.iter().cloned());
    for (timestamp, mut row) in cells {
        let values = (0..columns.len()).map(|idx| row.remove(&idx)).collect();
        frame.push(timestamp, values);
    }
    Ok(frame)
}

pub fn parse_owm_json(body: &str) -> Result<TimeFrame> {
    let response: OwmResponse = serde_json::from_str(body)?;
    parse_owm_response(&response)
}

// ============================================================================
// API Client
// ============================================================================

pub struct OwmClient<'a> {
    client: &'a reqwest::blocking::Client,
    endpoints: &'a Endpoints,
    api_key: String,
    retry: RetryPolicy,
    interval: Duration,
}

impl<'a> OwmClient<'a> {
    pub fn new(
        client: &'a reqwest::blocking::Client,
        endpoints: &'a Endpoints,
        api_key: String,
        retry: RetryPolicy,
        interval_days: u32,
    ) -> Self {
        OwmClient {
            client,
            endpoints,
            api_key,
            retry,
            interval: Duration::days(i64::from(interval_days.max(1))),
        }
    }

    fn get(&self, url: &str, station: Option<&str>) -> Result<TimeFrame> {
        let response: OwmResponse = with_retry(&self.retry, DataSource::OpenWeatherMap, station, || {
            // The key travels in the query string; keep it out of error text.
            let response = self.client.get(url).send().map_err(|e| e.without_url())?;
            if !response.status().is_success() {
                return Err(FlowError::Http(response.status().as_u16()));
            }
            Ok(response.json::<OwmResponse>().map_err(|e| e.without_url())?)
        })?;
        parse_owm_response(&response)
    }

    /// Hourly history between two UTC instants, fetched one interval at a
    /// time and finished at `freq`. Intervals without data are skipped; the
    /// call fails only when none of them returns rows.
    pub fn history(
        &self,
        latitude: f64,
        longitude: f64,
        start: NaiveDateTime,
        end: NaiveDateTime,
        freq: Frequency,
        station: Option<&str>,
    ) -> Result<TimeFrame> {
        let ranges = chunk_ranges(start, end, self.interval);
        let mut parts = Vec::with_capacity(ranges.len());
        for (from, to) in &ranges {
            let url = build_history_url(
                &self.endpoints.owm_history_url,
                latitude,
                longitude,
                from.and_utc().timestamp(),
                to.and_utc().timestamp(),
                &self.api_key,
            );
            match self.get(&url, station) {
                Ok(frame) => parts.push(frame),
                Err(err) if err.is_no_data() => {
                    logging::debug(DataSource::OpenWeatherMap, station, &format!("no rows {} .. {}", from, to));
                }
                Err(err) => return Err(err),
            }
        }

        logging::info(
            DataSource::OpenWeatherMap,
            station,
            &format!("{} of {} intervals returned rows", parts.len(), ranges.len()),
        );
        if parts.is_empty() {
            return Err(FlowError::NoData {
                feed: "openweathermap".to_string(),
                detail: format!("no history between {} and {}", start, end),
            });
        }

        let refs: Vec<&TimeFrame> = parts.iter().collect();
        Ok(prepare_weather(&TimeFrame::concat(&refs), freq))
    }

    /// Hourly forecast finished at `freq`.
    pub fn forecast(&self, latitude: f64, longitude: f64, freq: Frequency, station: Option<&str>) -> Result<TimeFrame> {
        let url = build_forecast_url(&self.endpoints.owm_forecast_url, latitude, longitude, &self.api_key);
        let frame = self.get(&url, station)?;
        Ok(prepare_weather(&frame, freq))
    }
}

impl WeatherFeed for OwmClient<'_> {
    fn name(&self) -> &'static str {
        "openweathermap"
    }

    fn source(&self) -> DataSource {
        DataSource::OpenWeatherMap
    }

    fn history(
        &self,
        station: &StationConfig,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Option<TimeFrame>> {
        let Some((lat, lon)) = station.coordinates() else {
            return Ok(None);
        };
        // The request window is half-open; one more hour keeps `end`.
        OwmClient::history(self, lat, lon, start, end + Duration::hours(1), station.frequency, Some(&station.code))
            .map(Some)
    }

    fn forecast(&self, station: &StationConfig) -> Result<Option<TimeFrame>> {
        let Some((lat, lon)) = station.coordinates() else {
            return Ok(None);
        };
        OwmClient::forecast(self, lat, lon, station.frequency, Some(&station.code)).map(Some)
    }
}
