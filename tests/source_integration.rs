/// Live checks against the upstream services.
///
/// These tests make real network requests and are ignored by default:
/// - archive CSV and real-time page reachability for a configured station
/// - Open-Meteo archive response shape
/// - AEMET daily climatology (needs AEMET_API_KEY in the environment or .env)
/// - OpenWeatherMap hourly history (needs OWM_API_KEY)
///
/// Run with: cargo test --test source_integration -- --ignored --test-threads=1
///
/// Failures may mean the service is down or rate-limiting rather than a bug.

use hydro_unify::ingest::aemet::AemetClient;
use hydro_unify::ingest::normalize::normalize_capture;
use hydro_unify::ingest::openmeteo::OpenMeteoClient;
use hydro_unify::ingest::owm::OwmClient;
use hydro_unify::ingest::saih::HttpFetcher;
use hydro_unify::ingest::{RetryPolicy, SourceFetcher, SourceRequest};
use hydro_unify::model::{FlowError, Frequency};
use hydro_unify::stations::{aemet_api_key, owm_api_key, parse_config, Config};

use chrono::NaiveDate;
use std::time::Duration;

fn bundled() -> Config {
    parse_config(include_str!("../stations.toml")).expect("bundled config")
}

fn quick_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 2,
        wait: Duration::from_secs(5),
    }
}

#[test]
#[ignore]
fn test_archive_csv_is_published_for_first_station() {
    let config = bundled();
    let station = &config.stations[0];
    let fetcher = HttpFetcher::new(&config.endpoints).expect("client");
    let year = station.years[0];

    let capture = fetcher
        .fetch(station, SourceRequest::Archive { year })
        .expect("archive request should not fail")
        .unwrap_or_else(|| panic!("archive {} for {} not published", year, station.code));

    match normalize_capture(&capture) {
        Ok(normalized) => assert!(normalized.series.len() > 1000, "a year of hourly data"),
        Err(e) if e.is_no_data() => eprintln!("archive reachable but empty: {}", e),
        Err(e) => panic!("archive did not normalize: {}", e),
    }
}

#[test]
#[ignore]
fn test_realtime_page_is_reachable() {
    let config = bundled();
    let fetcher = HttpFetcher::new(&config.endpoints).expect("client");
    let page = fetcher
        .fetch(&config.stations[0], SourceRequest::Realtime)
        .expect("real-time request should not fail");
    assert!(page.is_some(), "real-time page should exist");
}

#[test]
#[ignore]
fn test_openmeteo_history_returns_hourly_frame() {
    let config = bundled();
    let fetcher = HttpFetcher::new(&config.endpoints).expect("client");
    let station = config
        .stations
        .iter()
        .find(|s| s.coordinates().is_some())
        .expect("a station with coordinates");
    let (lat, lon) = station.coordinates().unwrap();

    let meteo = OpenMeteoClient::new(fetcher.client(), &config.endpoints, quick_retry());
    let frame = meteo
        .history(
            lat,
            lon,
            NaiveDate::from_ymd_opt(2023, 6, 1).unwrap(),
            NaiveDate::from_ymd_opt(2023, 6, 3).unwrap(),
            Frequency::Hourly,
            Some(&station.code),
        )
        .expect("open-meteo history");

    assert_eq!(frame.len(), 72, "three days of hourly rows");
    assert!(frame.column_index("temperature_2m").is_some());
    assert_eq!(frame.total_nulls(), 0);
}

#[test]
#[ignore]
fn test_aemet_daily_history() {
    dotenv::dotenv().ok();
    let Some(key) = aemet_api_key() else {
        eprintln!("AEMET_API_KEY not set; skipping");
        return;
    };
    let config = bundled();
    let fetcher = HttpFetcher::new(&config.endpoints).expect("client");
    let station = config
        .stations
        .iter()
        .find_map(|s| s.aemet_station.clone())
        .expect("a station with an AEMET indicator");

    let aemet = AemetClient::new(fetcher.client(), &config.endpoints, key, quick_retry());
    match aemet.daily_history(
        &station,
        NaiveDate::from_ymd_opt(2023, 3, 1).unwrap(),
        NaiveDate::from_ymd_opt(2023, 3, 31).unwrap(),
    ) {
        Ok(frame) => assert!(frame.len() <= 31),
        Err(FlowError::NoData { detail, .. }) => eprintln!("no AEMET data: {}", detail),
        Err(e) => panic!("AEMET request failed: {}", e),
    }
}

#[test]
#[ignore]
fn test_owm_history_spans_several_intervals() {
    dotenv::dotenv().ok();
    let Some(key) = owm_api_key() else {
        eprintln!("OWM_API_KEY not set; skipping");
        return;
    };
    let config = bundled();
    let fetcher = HttpFetcher::new(&config.endpoints).expect("client");
    let station = config
        .stations
        .iter()
        .find(|s| s.coordinates().is_some())
        .expect("a station with coordinates");
    let (lat, lon) = station.coordinates().unwrap();

    let owm = OwmClient::new(fetcher.client(), &config.endpoints, key, quick_retry(), 1);
    let start = NaiveDate::from_ymd_opt(2023, 6, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
    let end = NaiveDate::from_ymd_opt(2023, 6, 3).unwrap().and_hms_opt(0, 0, 0).unwrap();
    match owm.history(lat, lon, start, end, Frequency::Hourly, Some(&station.code)) {
        Ok(frame) => {
            assert!(frame.len() <= 49);
            assert!(frame.column_index("temp").is_some());
        }
        Err(FlowError::Http(401)) => eprintln!("key lacks history access"),
        Err(e) => panic!("OpenWeatherMap request failed: {}", e),
    }
}
