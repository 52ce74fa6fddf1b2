/// AEMET OpenData daily climatology client
///
/// Daily station summaries are served in two steps: the first request
/// (authenticated with an `api_key` header) returns a small envelope whose
/// `datos` field is the URL of the actual JSON payload.
///
/// Every field in the payload is a string. Numbers use decimal commas,
/// time-of-day fields are `HH:MM` (or `Varias` when several times tie).
///
/// API Documentation: https://opendata.aemet.es/dist/index.html

use crate::analysis::clean::clean;
use crate::ingest::{decode_text, with_retry, RetryPolicy, WeatherFeed};
use crate::ingest::normalize::parse_decimal;
use crate::logging::{self, DataSource};
use crate::model::{FlowError, Frequency, Result, TimeFrame, Value};
use crate::stations::{Endpoints, StationConfig};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Deserialize;

pub const TEXT_COLUMNS: &[&str] = &["indicativo", "nombre", "provincia", "dir"];

pub const NUMERIC_COLUMNS: &[&str] = &[
    "altitud", "tmed", "prec", "tmin", "tmax", "velmedia", "racha", "hrMedia", "hrMax", "hrMin",
];

pub const HOUR_COLUMNS: &[&str] = &["horatmin", "horatmax", "horaracha", "horaHrMax", "horaHrMin"];

// ============================================================================
// Response Structures
// ============================================================================

/// First-step response.
#[derive(Debug, Deserialize)]
pub struct AemetEnvelope {
    #[serde(default)]
    pub descripcion: String,
    pub estado: u16,
    #[serde(default)]
    pub datos: Option<String>,
}

/// One day at one station.
#[derive(Debug, Deserialize)]
#[allow(non_snake_case)]
pub struct AemetDaily {
    pub fecha: String,
    pub indicativo: Option<String>,
    pub nombre: Option<String>,
    pub provincia: Option<String>,
    pub dir: Option<String>,
    pub altitud: Option<String>,
    pub tmed: Option<String>,
    pub prec: Option<String>,
    pub tmin: Option<String>,
    pub tmax: Option<String>,
    pub velmedia: Option<String>,
    pub racha: Option<String>,
    pub hrMedia: Option<String>,
    pub hrMax: Option<String>,
    pub hrMin: Option<String>,
    pub horatmin: Option<String>,
    pub horatmax: Option<String>,
    pub horaracha: Option<String>,
    pub horaHrMax: Option<String>,
    pub horaHrMin: Option<String>,
}

impl AemetDaily {
    fn field(&self, name: &str) -> Option<&str> {
        let value = match name {
            "indicativo" => &self.indicativo,
            "nombre" => &self.nombre,
            "provincia" => &self.provincia,
            "dir" => &self.dir,
            "altitud" => &self.altitud,
            "tmed" => &self.tmed,
            "prec" => &self.prec,
            "tmin" => &self.tmin,
            "tmax" => &self.tmax,
            "velmedia" => &self.velmedia,
            "racha" => &self.racha,
            "hrMedia" => &self.hrMedia,
            "hrMax" => &self.hrMax,
            "hrMin" => &self.hrMin,
            "horatmin" => &self.horatmin,
            "horatmax" => &self.horatmax,
            "horaracha" => &self.horaracha,
            "horaHrMax" => &self.horaHrMax,
            "horaHrMin" => &self.horaHrMin,
            _ => &None,
        };
        value.as_deref()
    }
}

// ============================================================================
// Parsing
// ============================================================================

/// `HH:MM` as a fractional hour. `24:00` and `Varias` read as 0.
pub fn parse_hour_of_day(text: &str) -> Option<f64> {
    let text = text.trim();
    if text == "24:00" || text.eq_ignore_ascii_case("varias") {
        return Some(0.0);
    }
    let time = NaiveTime::parse_from_str(text, "%H:%M").ok()?;
    Some(f64::from(chrono::Timelike::hour(&time)) + f64::from(chrono::Timelike::minute(&time)) / 60.0)
}

fn text_cell(raw: Option<&str>) -> Option<Value> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| Value::Category(s.to_string()))
}

/// Builds a daily frame from the payload JSON.
///
/// Column order is text, numeric, then hour columns. Days whose `fecha`
/// cannot be parsed are skipped.
pub fn parse_aemet_daily(body: &str) -> Result<TimeFrame> {
    let days: Vec<AemetDaily> = serde_json::from_str(body)?;
    if days.is_empty() {
        return Err(FlowError::NoData {
            feed: "aemet".to_string(),
            detail: "empty payload".to_string(),
        });
    }

    let columns = TEXT_COLUMNS
        .iter()
        .chain(NUMERIC_COLUMNS)
        .chain(HOUR_COLUMNS)
        .copied();
    let mut frame = TimeFrame::new(columns);

    for day in &days {
        let Ok(date) = NaiveDate::parse_from_str(day.fecha.trim(), "%Y-%m-%d") else {
            logging::debug(DataSource::Aemet, None, &format!("skipping day with date '{}'", day.fecha));
            continue;
        };

        let mut values: Vec<Option<Value>> = Vec::with_capacity(frame.columns.len());
        values.extend(TEXT_COLUMNS.iter().map(|c| text_cell(day.field(c))));
        values.extend(
            NUMERIC_COLUMNS
                .iter()
                .map(|c| day.field(c).and_then(parse_decimal).map(Value::Number)),
        );
        values.extend(
            HOUR_COLUMNS
                .iter()
                .map(|c| day.field(c).and_then(parse_hour_of_day).map(Value::Number)),
        );
        frame.push(date.and_time(NaiveTime::MIN), values);
    }

    if frame.is_empty() {
        return Err(FlowError::NoData {
            feed: "aemet".to_string(),
            detail: "no day carried a valid date".to_string(),
        });
    }
    Ok(frame)
}

// ============================================================================
// API Client
// ============================================================================

/// Percent-encoded colons match what the service expects in path segments.
pub fn build_daily_url(base: &str, start: NaiveDate, end: NaiveDate, station: &str) -> String {
    format!(
        "{}/valores/climatologicos/diarios/datos/fechaini/{}T00%3A00%3A00UTC/fechafin/{}T23%3A59%3A59UTC/estacion/{}",
        base,
        start.format("%Y-%m-%d"),
        end.format("%Y-%m-%d"),
        station
    )
}

pub struct AemetClient<'a> {
    client: &'a reqwest::blocking::Client,
    endpoints: &'a Endpoints,
    api_key: String,
    retry: RetryPolicy,
}

impl<'a> AemetClient<'a> {
    pub fn new(
        client: &'a reqwest::blocking::Client,
        endpoints: &'a Endpoints,
        api_key: String,
        retry: RetryPolicy,
    ) -> Self {
        AemetClient {
            client,
            endpoints,
            api_key,
            retry,
        }
    }

    fn get_bytes(&self, url: &str, authenticated: bool) -> Result<Vec<u8>> {
        let mut request = self.client.get(url);
        if authenticated {
            request = request.header("api_key", &self.api_key);
        }
        let response = request.send()?;
        if !response.status().is_success() {
            return Err(FlowError::Http(response.status().as_u16()));
        }
        Ok(response.bytes()?.to_vec())
    }

    /// Daily climatology for `station` between two dates, cleaned on a
    /// daily grid.
    pub fn daily_history(&self, station: &str, start: NaiveDate, end: NaiveDate) -> Result<TimeFrame> {
        let url = build_daily_url(&self.endpoints.aemet_base_url, start, end, station);

        let envelope: AemetEnvelope = with_retry(&self.retry, DataSource::Aemet, Some(station), || {
            let bytes = self.get_bytes(&url, true)?;
            Ok(serde_json::from_slice(&bytes)?)
        })?;

        let datos = match (envelope.estado, envelope.datos) {
            (200, Some(datos)) => datos,
            (404, _) => {
                return Err(FlowError::NoData {
                    feed: "aemet".to_string(),
                    detail: envelope.descripcion,
                });
            }
            (estado, _) => return Err(FlowError::Http(estado)),
        };

        let body = with_retry(&self.retry, DataSource::Aemet, Some(station), || {
            self.get_bytes(&datos, false)
        })?;
        let frame = parse_aemet_daily(&decode_text(body))?;

        logging::info(
            DataSource::Aemet,
            Some(station),
            &format!("{} daily rows {} .. {}", frame.len(), start, end),
        );
        Ok(clean(&frame, Frequency::Daily))
    }
}

impl WeatherFeed for AemetClient<'_> {
    fn name(&self) -> &'static str {
        "aemet"
    }

    fn source(&self) -> DataSource {
        DataSource::Aemet
    }

    fn history(
        &self,
        station: &StationConfig,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Option<TimeFrame>> {
        match (&station.aemet_station, station.frequency) {
            (Some(indicator), Frequency::Daily) => self.daily_history(indicator, start.date(), end.date()).map(Some),
            _ => Ok(None),
        }
    }
}
