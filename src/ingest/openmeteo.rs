/// Open-Meteo Weather API client
///
/// Retrieves hourly meteorological variables for a station's coordinates:
/// the reanalysis archive for historical periods and the forecast endpoints
/// (a permanent set of surface variables plus an alternative model that
/// carries the soil variables) for the days ahead.
///
/// API Documentation: https://open-meteo.com/en/docs

use crate::analysis::resample::{join_on_timestamp, prepare_weather};
use crate::ingest::{with_retry, RetryPolicy, WeatherFeed};
use crate::logging::{self, DataSource};
use crate::model::{FlowError, Frequency, Result, TimeFrame, Value};
use crate::stations::{Endpoints, StationConfig};
use chrono::{NaiveDate, NaiveDateTime};
use serde::Deserialize;
use std::collections::BTreeMap;

/// Hourly variables requested from the historical archive.
pub const HISTORY_VARIABLES: &[&str] = &[
    "temperature_2m",
    "relative_humidity_2m",
    "dew_point_2m",
    "apparent_temperature",
    "rain",
    "snowfall",
    "snow_depth",
    "pressure_msl",
    "surface_pressure",
    "cloud_cover",
    "cloud_cover_low",
    "cloud_cover_mid",
    "cloud_cover_high",
    "et0_fao_evapotranspiration",
    "vapour_pressure_deficit",
    "wind_speed_10m",
    "wind_direction_10m",
    "wind_gusts_10m",
    "sunshine_duration",
    "shortwave_radiation",
    "direct_radiation",
    "diffuse_radiation",
    "direct_normal_irradiance",
    "global_tilted_irradiance",
    "terrestrial_radiation",
    "shortwave_radiation_instant",
    "direct_radiation_instant",
    "diffuse_radiation_instant",
    "direct_normal_irradiance_instant",
    "global_tilted_irradiance_instant",
    "terrestrial_radiation_instant",
    "soil_temperature_0_to_7cm",
    "soil_moisture_7_to_28cm",
];

/// Soil variables only the alternative forecast model provides.
pub const SOIL_VARIABLES: &[&str] = &["soil_temperature_0_to_7cm", "soil_moisture_7_to_28cm"];

/// Forecast variables: the historical set without the soil variables.
pub fn forecast_variables() -> Vec<&'static str> {
    HISTORY_VARIABLES
        .iter()
        .copied()
        .filter(|v| !SOIL_VARIABLES.contains(v))
        .collect()
}

const FORECAST_PAST_DAYS: u32 = 2;
const FORECAST_DAYS: u32 = 14;
const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M";

// ============================================================================
// Response Structures
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct OpenMeteoResponse {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub elevation: Option<f64>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub timezone_abbreviation: Option<String>,
    #[serde(default)]
    pub utc_offset_seconds: i64,
    #[serde(default)]
    pub hourly: Option<HourlyBlock>,
}

/// `hourly.time` plus one array per requested variable.
#[derive(Debug, Deserialize)]
pub struct HourlyBlock {
    pub time: Vec<String>,
    #[serde(flatten)]
    pub variables: BTreeMap<String, Vec<Option<f64>>>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    reason: String,
}

// ============================================================================
// URL Builders
// ============================================================================

pub fn build_history_url(
    base: &str,
    latitude: f64,
    longitude: f64,
    start: NaiveDate,
    end: NaiveDate,
    variables: &[&str],
) -> String {
    format!(
        "{}?latitude={}&longitude={}&start_date={}&end_date={}&hourly={}&timezone=auto&models=best_match",
        base,
        latitude,
        longitude,
        start.format("%Y-%m-%d"),
        end.format("%Y-%m-%d"),
        variables.join(",")
    )
}

pub fn build_forecast_url(base: &str, latitude: f64, longitude: f64, variables: &[&str]) -> String {
    format!(
        "{}?latitude={}&longitude={}&hourly={}&timezone=auto&past_days={}&forecast_days={}&models=best_match",
        base,
        latitude,
        longitude,
        variables.join(","),
        FORECAST_PAST_DAYS,
        FORECAST_DAYS
    )
}

// ============================================================================
// Parsing
// ============================================================================

/// Builds a frame with one column per requested variable present in the
/// response, in request order. Timestamps are local to the station
/// (`timezone=auto`).
pub fn parse_hourly_response(response: &OpenMeteoResponse, variables: &[&str]) -> Result<TimeFrame> {
    let hourly = response.hourly.as_ref().ok_or_else(|| FlowError::NoData {
        feed: "open-meteo".to_string(),
        detail: "response has no hourly block".to_string(),
    })?;

    let timestamps = hourly
        .time
        .iter()
        .map(|t| {
            NaiveDateTime::parse_from_str(t, TIME_FORMAT)
                .map_err(|e| FlowError::Parse(format!("open-meteo time '{}': {}", t, e)))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut columns: Vec<(&str, &Vec<Option<f64>>)> = Vec::new();
    for &name in variables {
        match hourly.variables.get(name) {
            Some(series) if series.len() == timestamps.len() => columns.push((name, series)),
            Some(series) => {
                return Err(FlowError::Parse(format!(
                    "open-meteo variable {} has {} values for {} timestamps",
                    name,
                    series.len(),
                    timestamps.len()
                )));
            }
            None => logging::debug(
                DataSource::OpenMeteo,
                None,
                &format!("variable {} missing from response", name),
            ),
        }
    }

    let mut frame = TimeFrame::new(columns.iter().map(|(name, _)| *name));
    for (i, timestamp) in timestamps.into_iter().enumerate() {
        let values = columns
            .iter()
            .map(|(_, series)| series[i].map(Value::Number))
            .collect();
        frame.push(timestamp, values);
    }
    Ok(frame)
}

pub fn parse_hourly_json(body: &str, variables: &[&str]) -> Result<TimeFrame> {
    let response: OpenMeteoResponse = serde_json::from_str(body)?;
    parse_hourly_response(&response, variables)
}

fn log_metadata(response: &OpenMeteoResponse, station: Option<&str>) {
    logging::info(
        DataSource::OpenMeteo,
        station,
        &format!(
            "coordinates {}°N {}°E, elevation {} m asl, timezone {} {} ({} s from GMT)",
            response.latitude,
            response.longitude,
            response.elevation.map(|e| e.to_string()).unwrap_or_else(|| "?".into()),
            response.timezone.as_deref().unwrap_or("?"),
            response.timezone_abbreviation.as_deref().unwrap_or(""),
            response.utc_offset_seconds
        ),
    );
}

// ============================================================================
// API Client
// ============================================================================

pub struct OpenMeteoClient<'a> {
    client: &'a reqwest::blocking::Client,
    endpoints: &'a Endpoints,
    retry: RetryPolicy,
}

impl<'a> OpenMeteoClient<'a> {
    pub fn new(client: &'a reqwest::blocking::Client, endpoints: &'a Endpoints, retry: RetryPolicy) -> Self {
        OpenMeteoClient {
            client,
            endpoints,
            retry,
        }
    }

    fn get(&self, url: &str, station: Option<&str>) -> Result<OpenMeteoResponse> {
        with_retry(&self.retry, DataSource::OpenMeteo, station, || {
            let response = self.client.get(url).send()?;
            let status = response.status();
            if !status.is_success() {
                if let Ok(body) = response.json::<ErrorBody>() {
                    logging::warn(DataSource::OpenMeteo, station, &format!("API error: {}", body.reason));
                }
                return Err(FlowError::Http(status.as_u16()));
            }
            Ok(response.json::<OpenMeteoResponse>()?)
        })
    }

    /// Hourly reanalysis between two dates (inclusive), finished at `freq`.
    pub fn history(
        &self,
        latitude: f64,
        longitude: f64,
        start: NaiveDate,
        end: NaiveDate,
        freq: Frequency,
        station: Option<&str>,
    ) -> Result<TimeFrame> {
        let url = build_history_url(
            &self.endpoints.openmeteo_archive_url,
            latitude,
            longitude,
            start,
            end,
            HISTORY_VARIABLES,
        );
        let response = self.get(&url, station)?;
        log_metadata(&response, station);
        let frame = parse_hourly_response(&response, HISTORY_VARIABLES)?;
        Ok(prepare_weather(&frame, freq))
    }

    /// Forecast from two days back to fourteen ahead. Soil variables come
    /// from the alternative model and are joined on timestamp; if that
    /// request fails the surface variables are returned alone.
    pub fn forecast(
        &self,
        latitude: f64,
        longitude: f64,
        freq: Frequency,
        station: Option<&str>,
    ) -> Result<TimeFrame> {
        let surface_vars = forecast_variables();
        let url = build_forecast_url(&self.endpoints.openmeteo_forecast_url, latitude, longitude, &surface_vars);
        let response = self.get(&url, station)?;
        log_metadata(&response, station);
        let surface = parse_hourly_response(&response, &surface_vars)?;

        let alt_url = build_forecast_url(&self.endpoints.openmeteo_forecast_alt_url, latitude, longitude, SOIL_VARIABLES);
        let joined = match self
            .get(&alt_url, station)
            .and_then(|alt| parse_hourly_response(&alt, SOIL_VARIABLES))
        {
            Ok(soil) => join_on_timestamp(&surface, &soil),
            Err(err) => {
                logging::log_source_failure(DataSource::OpenMeteo, station, "soil forecast", &err);
                surface
            }
        };

        Ok(prepare_weather(&joined, freq))
    }
}

impl WeatherFeed for OpenMeteoClient<'_> {
    fn name(&self) -> &'static str {
        "open-meteo"
    }

    fn source(&self) -> DataSource {
        DataSource::OpenMeteo
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
        OpenMeteoClient::history(self, lat, lon, start.date(), end.date(), station.frequency, Some(&station.code))
            .map(Some)
    }

    fn forecast(&self, station: &StationConfig) -> Result<Option<TimeFrame>> {
        let Some((lat, lon)) = station.coordinates() else {
            return Ok(None);
        };
        OpenMeteoClient::forecast(self, lat, lon, station.frequency, Some(&station.code)).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = r#"{
        "latitude": 42.66,
        "longitude": -4.31,
        "elevation": 842.0,
        "timezone": "Europe/Madrid",
        "timezone_abbreviation": "CEST",
        "utc_offset_seconds": 7200,
        "hourly_units": {"time": "iso8601", "rain": "mm"},
        "hourly": {
            "time": ["2023-06-01T00:00", "2023-06-01T01:00", "2023-06-01T02:00"],
            "temperature_2m": [14.2, 13.8, null],
            "rain": [0.0, 0.4, 1.1]
        }
    }"#;

    #[test]
    fn test_parse_hourly_fixture() {
        let frame = parse_hourly_json(FIXTURE, &["temperature_2m", "rain", "snow_depth"])
            .expect("fixture should parse");
        assert_eq!(frame.columns, vec!["temperature_2m", "rain"], "absent variables are skipped");
        assert_eq!(frame.len(), 3);
        assert_eq!(frame.numbers("temperature_2m"), vec![Some(14.2), Some(13.8), None]);
        assert_eq!(frame.numbers("rain"), vec![Some(0.0), Some(0.4), Some(1.1)]);
    }

    #[test]
    fn test_missing_hourly_block_is_no_data() {
        let body = r#"{"latitude": 1.0, "longitude": 2.0}"#;
        let result = parse_hourly_json(body, HISTORY_VARIABLES);
        assert!(matches!(result, Err(FlowError::NoData { .. })));
    }

    #[test]
    fn test_ragged_variable_is_a_parse_error() {
        let body = r#"{"latitude": 1.0, "longitude": 2.0,
            "hourly": {"time": ["2023-06-01T00:00", "2023-06-01T01:00"], "rain": [0.1]}}"#;
        assert!(matches!(parse_hourly_json(body, &["rain"]), Err(FlowError::Parse(_))));
    }

    #[test]
    fn test_history_url_contains_range_and_variables() {
        let url = build_history_url(
            "https://archive-api.open-meteo.com/v1/archive",
            42.5,
            -4.25,
            NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2023, 6, 1).unwrap(),
            &["rain", "snow_depth"],
        );
        assert!(url.contains("latitude=42.5&longitude=-4.25"));
        assert!(url.contains("start_date=2023-01-01&end_date=2023-06-01"));
        assert!(url.contains("hourly=rain,snow_depth"));
        assert!(url.contains("timezone=auto"));
    }

    #[test]
    fn test_soil_forecast_joins_onto_surface_forecast() {
        let surface = parse_hourly_json(FIXTURE, &["temperature_2m", "rain"]).unwrap();
        let alternative = r#"{"latitude": 42.66, "longitude": -4.31,
            "hourly": {"time": ["2023-06-01T01:00", "2023-06-01T02:00", "2023-06-01T03:00"],
                       "soil_temperature_0_to_7cm": [11.0, 10.8, 10.5],
                       "soil_moisture_7_to_28cm": [0.31, 0.31, 0.30]}}"#;
        let soil = parse_hourly_json(alternative, SOIL_VARIABLES).unwrap();

        let joined = join_on_timestamp(&surface, &soil);
        assert_eq!(
            joined.columns,
            vec!["temperature_2m", "rain", "soil_temperature_0_to_7cm", "soil_moisture_7_to_28cm"]
        );
        assert_eq!(joined.len(), 3, "the surface forecast fixes the timestamps");
        assert_eq!(joined.numbers("soil_temperature_0_to_7cm"), vec![None, Some(11.0), Some(10.8)]);

        let finished = prepare_weather(&joined, Frequency::Hourly);
        assert_eq!(finished.total_nulls(), 0, "leading gaps are back-filled");
        assert_eq!(finished.numbers("soil_temperature_0_to_7cm")[0], Some(11.0));
    }

    #[test]
    fn test_forecast_variables_exclude_soil() {
        let vars = forecast_variables();
        assert_eq!(vars.len(), HISTORY_VARIABLES.len() - SOIL_VARIABLES.len());
        assert!(!vars.contains(&"soil_moisture_7_to_28cm"));
        let url = build_forecast_url("https://api.open-meteo.com/v1/forecast", 1.0, 2.0, &vars);
        assert!(url.contains("past_days=2&forecast_days=14"));
    }
}
