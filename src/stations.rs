/// Station and endpoint configuration for the flow unification service.
///
/// Configuration is an explicitly constructed value loaded from a TOML file
/// and passed into every pipeline run; nothing here is process-wide state.
/// The bundled `stations.toml` is the default station list.

use crate::analysis::repair::RepairPolicy;
use crate::model::{FlowError, Frequency, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "HYDRO_UNIFY_CONFIG";

/// Environment variable holding the AEMET OpenData API key.
pub const AEMET_KEY_ENV: &str = "AEMET_API_KEY";

/// Environment variable holding the OpenWeatherMap API key.
pub const OWM_KEY_ENV: &str = "OWM_API_KEY";

/// Used when `HYDRO_UNIFY_CONFIG` is not set.
pub const DEFAULT_CONFIG_PATH: &str = "stations.toml";

// ---------------------------------------------------------------------------
// Endpoints and retry settings
// ---------------------------------------------------------------------------

/// Upstream base URLs. Defaults point at the public services.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub archive_base_url: String,
    pub realtime_base_url: String,
    pub openmeteo_archive_url: String,
    pub openmeteo_forecast_url: String,
    pub openmeteo_forecast_alt_url: String,
    pub aemet_base_url: String,
    pub owm_history_url: String,
    pub owm_forecast_url: String,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for Endpoints {
    fn default() -> Self {
        Endpoints {
            archive_base_url: "https://www.saihduero.es/historico-risr-csv".to_string(),
            realtime_base_url: "https://www.saihduero.es/ficha-risr".to_string(),
            openmeteo_archive_url: "https://archive-api.open-meteo.com/v1/archive".to_string(),
            openmeteo_forecast_url: "https://api.open-meteo.com/v1/forecast".to_string(),
            openmeteo_forecast_alt_url: "https://api.open-meteo.com/v1/ecmwf".to_string(),
            aemet_base_url: "https://opendata.aemet.es/opendata/api".to_string(),
            owm_history_url: "https://history.openweathermap.org/data/2.5/history/city".to_string(),
            owm_forecast_url: "https://pro.openweathermap.org/data/2.5/forecast/hourly".to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// Bounded retry for rate-limited weather APIs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub wait_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            max_attempts: 5,
            wait_secs: 70,
        }
    }
}

/// Weather feed settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WeatherSettings {
    /// Days covered by one OpenWeatherMap history request.
    pub owm_interval_days: u32,
}

impl Default for WeatherSettings {
    fn default() -> Self {
        WeatherSettings { owm_interval_days: 7 }
    }
}

// ---------------------------------------------------------------------------
// Station metadata
// ---------------------------------------------------------------------------

fn default_true() -> bool {
    true
}

/// Per-station settings.
#[derive(Debug, Clone, Deserialize)]
pub struct StationConfig {
    /// Numeric gauging-station code, e.g. "2087".
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Years of published archive CSVs to ingest.
    pub years: Vec<i32>,
    /// Locally maintained backfill CSV, if any.
    #[serde(default)]
    pub aux_file: Option<PathBuf>,
    #[serde(default)]
    pub frequency: Frequency,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    /// Seasonal repair of the boundary gap; forward-fill only when false.
    #[serde(default = "default_true")]
    pub replace_missing: bool,
    /// AEMET climatological station used for daily weather, if any. AEMET
    /// only publishes daily summaries, so this needs a daily station.
    #[serde(default)]
    pub aemet_station: Option<String>,
}

impl StationConfig {
    pub fn repair_policy(&self) -> RepairPolicy {
        if self.replace_missing {
            RepairPolicy::default()
        } else {
            RepairPolicy::forward_fill_only()
        }
    }

    /// Coordinates for the weather feeds, when both are configured.
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        self.latitude.zip(self.longitude)
    }
}

// ---------------------------------------------------------------------------
// Configuration root
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub endpoints: Endpoints,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub weather: WeatherSettings,
    pub stations: Vec<StationConfig>,
}

impl Config {
    /// Looks up a station by code. Returns `None` if not found.
    pub fn find_station(&self, code: &str) -> Option<&StationConfig> {
        self.stations.iter().find(|s| s.code == code)
    }

    /// Rejects configurations the pipeline cannot run against.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for station in &self.stations {
            if station.code.is_empty() || !station.code.chars().all(|c| c.is_ascii_digit()) {
                return Err(FlowError::Config(format!(
                    "station code for '{}' must be numeric, got '{}'",
                    station.name, station.code
                )));
            }
            if !seen.insert(station.code.as_str()) {
                return Err(FlowError::Config(format!(
                    "duplicate station code '{}'",
                    station.code
                )));
            }
            if station.years.is_empty() {
                return Err(FlowError::Config(format!(
                    "station '{}' lists no archive years",
                    station.code
                )));
            }
            if station.aemet_station.is_some() && station.frequency != Frequency::Daily {
                return Err(FlowError::Config(format!(
                    "station '{}' sets aemet_station but is not daily",
                    station.code
                )));
            }
        }
        if self.retry.max_attempts == 0 {
            return Err(FlowError::Config("retry.max_attempts must be at least 1".into()));
        }
        Ok(())
    }
}

/// Parses and validates configuration text.
pub fn parse_config(text: &str) -> Result<Config> {
    let config: Config =
        toml::from_str(text).map_err(|e| FlowError::Config(e.to_string()))?;
    config.validate()?;
    Ok(config)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        FlowError::Config(format!("cannot read {}: {}", path.display(), e))
    })?;
    parse_config(&text)
}

/// Loads `.env` (if present), then the file named by `HYDRO_UNIFY_CONFIG`
/// or `stations.toml`.
pub fn load_default_config() -> Result<Config> {
    dotenv::dotenv().ok();
    let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    load_config(Path::new(&path))
}

fn api_key(var: &str) -> Option<String> {
    std::env::var(var)
        .ok()
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
}

/// AEMET key from the environment (after `.env` has been loaded).
pub fn aemet_api_key() -> Option<String> {
    api_key(AEMET_KEY_ENV)
}

pub fn owm_api_key() -> Option<String> {
    api_key(OWM_KEY_ENV)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
