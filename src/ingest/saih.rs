/// Live river-flow sources.
///
/// Yearly archives are published as tab-separated CSVs keyed by station
/// code and year; the real-time values table lives on a per-station page
/// addressed by the last three digits of the code. The auxiliary backfill
/// file is local and encoded as ISO-8859-15.
///
/// The real-time page builds its table client-side. Where it is rendered
/// by an external browser, point the run at a replay capture instead.

use crate::ingest::{decode_latin9, decode_text, SourceFetcher, SourceRequest};
use crate::logging::{self, DataSource};
use crate::model::{FlowError, RawCapture, Result, SourceKind};
use crate::stations::{Endpoints, StationConfig};
use std::io::ErrorKind;
use std::time::Duration;

/// `{base}?f={code}_AH{year}_HQ.csv`
pub fn build_archive_url(base: &str, code: &str, year: i32) -> String {
    format!("{}?f={}_AH{}_HQ.csv", base, code, year)
}

/// `{base}?r=EA{last three digits of code}`
pub fn build_realtime_url(base: &str, code: &str) -> String {
    let skip = code.chars().count().saturating_sub(3);
    let tail: String = code.chars().skip(skip).collect();
    format!("{}?r=EA{}", base, tail)
}

/// Fetches sources over HTTP (reqwest blocking client).
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
    endpoints: Endpoints,
}

impl HttpFetcher {
    pub fn new(endpoints: &Endpoints) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(endpoints.request_timeout_secs))
            .build()?;
        Ok(HttpFetcher {
            client,
            endpoints: endpoints.clone(),
        })
    }

    pub fn client(&self) -> &reqwest::blocking::Client {
        &self.client
    }

    /// GET returning the decoded body, `None` on 404.
    fn get_text(&self, url: &str) -> Result<Option<String>> {
        let response = self.client.get(url).send()?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(FlowError::Http(status.as_u16()));
        }
        let bytes = response.bytes()?;
        Ok(Some(decode_text(bytes.to_vec())))
    }
}

/// Reads the configured auxiliary file. A station without one, or whose
/// file does not exist, has no auxiliary source.
pub fn read_auxiliary(station: &StationConfig) -> Result<Option<RawCapture>> {
    let Some(path) = station.aux_file.as_ref() else {
        return Ok(None);
    };
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(RawCapture {
            kind: SourceKind::Auxiliary,
            label: path.display().to_string(),
            body: decode_latin9(&bytes),
        })),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            logging::warn(
                DataSource::Auxiliary,
                Some(&station.code),
                &format!("auxiliary file {} not found", path.display()),
            );
            Ok(None)
        }
        Err(err) => Err(err.into()),
    }
}

impl SourceFetcher for HttpFetcher {
    fn fetch(&self, station: &StationConfig, request: SourceRequest) -> Result<Option<RawCapture>> {
        let (url, label) = match request {
            SourceRequest::Archive { year } => (
                build_archive_url(&self.endpoints.archive_base_url, &station.code, year),
                year.to_string(),
            ),
            SourceRequest::Auxiliary => return read_auxiliary(station),
            SourceRequest::Realtime => (
                build_realtime_url(&self.endpoints.realtime_base_url, &station.code),
                "page".to_string(),
            ),
        };

        logging::debug(
            DataSource::from(request.kind()),
            Some(&station.code),
            &format!("GET {}", url),
        );

        Ok(self.get_text(&url)?.map(|body| RawCapture {
            kind: request.kind(),
            label,
            body,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    fn station(aux_file: Option<PathBuf>) -> StationConfig {
        StationConfig {
            code: "2087".to_string(),
            name: "Test gauge".to_string(),
            description: String::new(),
            years: vec![2023],
            aux_file,
            frequency: Default::default(),
            latitude: None,
            longitude: None,
            replace_missing: true,
            aemet_station: None,
        }
    }

    #[test]
    fn test_archive_url_format() {
        let url = build_archive_url("https://www.saihduero.es/historico-risr-csv", "2087", 2022);
        assert_eq!(
            url,
            "https://www.saihduero.es/historico-risr-csv?f=2087_AH2022_HQ.csv"
        );
    }

    #[test]
    fn test_realtime_url_uses_last_three_digits() {
        assert_eq!(
            build_realtime_url("https://www.saihduero.es/ficha-risr", "2087"),
            "https://www.saihduero.es/ficha-risr?r=EA087"
        );
        assert_eq!(build_realtime_url("base", "12"), "base?r=EA12");
    }

    #[test]
    fn test_station_without_aux_file_has_no_auxiliary_source() {
        assert!(read_auxiliary(&station(None)).unwrap().is_none());
        let dir = tempfile::tempdir().expect("temp dir");
        let missing = dir.path().join("no_such_aux_file.csv");
        assert!(read_auxiliary(&station(Some(missing))).unwrap().is_none());
    }

    #[test]
    fn test_aux_file_is_decoded_as_latin9() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(&[b'R', 0xED, b'o', b'\n']).unwrap();
        let capture = read_auxiliary(&station(Some(file.path().to_path_buf())))
            .unwrap()
            .expect("file exists");
        assert_eq!(capture.kind, SourceKind::Auxiliary);
        assert_eq!(capture.body, "Río\n");
    }
}
