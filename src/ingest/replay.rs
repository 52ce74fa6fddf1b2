/// Offline replay of captured sources.
///
/// When the live services are unavailable (or for reproducible runs and
/// tests), captures saved earlier are read back from a directory tree:
///
/// ```text
/// <root>/<code>/archive_<year>.csv
/// <root>/<code>/aux.csv
/// <root>/<code>/realtime.html
/// ```
///
/// A capture that is not on disk reads as an unavailable source.

use crate::ingest::{decode_text, SourceFetcher, SourceRequest};
use crate::model::{RawCapture, Result};
use crate::stations::StationConfig;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub struct ReplayFetcher {
    pub root: PathBuf,
}

impl ReplayFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        ReplayFetcher { root: root.into() }
    }

    pub fn capture_path(&self, code: &str, request: SourceRequest) -> PathBuf {
        let file = match request {
            SourceRequest::Archive { year } => format!("archive_{}.csv", year),
            SourceRequest::Auxiliary => "aux.csv".to_string(),
            SourceRequest::Realtime => "realtime.html".to_string(),
        };
        self.root.join(code).join(file)
    }

    /// Archive years captured for a station, ascending.
    pub fn available_years(&self, code: &str) -> Result<Vec<i32>> {
        let dir = self.root.join(code);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut years = Vec::new();
        for entry in entries {
            let name = entry?.file_name();
            let year = name
                .to_str()
                .and_then(|n| n.strip_prefix("archive_"))
                .and_then(|n| n.strip_suffix(".csv"))
                .and_then(|y| y.parse::<i32>().ok());
            if let Some(year) = year {
                years.push(year);
            }
        }
        years.sort_unstable();
        Ok(years)
    }

    /// Writes a capture where `fetch` will look for it.
    pub fn save_capture(&self, code: &str, request: SourceRequest, body: &str) -> Result<PathBuf> {
        let path = self.capture_path(code, request);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, body)?;
        Ok(path)
    }
}

fn read_if_present(path: &Path) -> Result<Option<Vec<u8>>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

impl SourceFetcher for ReplayFetcher {
    fn fetch(&self, station: &StationConfig, request: SourceRequest) -> Result<Option<RawCapture>> {
        let path = self.capture_path(&station.code, request);
        Ok(read_if_present(&path)?.map(|bytes| RawCapture {
            kind: request.kind(),
            label: path.display().to_string(),
            body: decode_text(bytes),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SourceKind;
    use tempfile::tempdir;

    fn station() -> StationConfig {
        StationConfig {
            code: "2087".to_string(),
            name: "Replay gauge".to_string(),
            description: String::new(),
            years: vec![2022, 2023],
            aux_file: None,
            frequency: Default::default(),
            latitude: None,
            longitude: None,
            replace_missing: true,
            aemet_station: None,
        }
    }

    #[test]
    fn test_capture_paths() {
        let replay = ReplayFetcher::new("/data/captures");
        assert_eq!(
            replay.capture_path("2087", SourceRequest::Archive { year: 2021 }),
            PathBuf::from("/data/captures/2087/archive_2021.csv")
        );
        assert_eq!(
            replay.capture_path("2087", SourceRequest::Realtime),
            PathBuf::from("/data/captures/2087/realtime.html")
        );
    }

    #[test]
    fn test_saved_capture_is_fetched_back() {
        let root = tempdir().expect("temp dir");
        let replay = ReplayFetcher::new(root.path());
        replay
            .save_capture("2087", SourceRequest::Archive { year: 2023 }, "2023-01-01 00:00\tV\t1\n")
            .unwrap();

        let capture = replay
            .fetch(&station(), SourceRequest::Archive { year: 2023 })
            .unwrap()
            .expect("capture was saved");
        assert_eq!(capture.kind, SourceKind::Archive);
        assert!(capture.body.starts_with("2023-01-01"));

        let missing = replay.fetch(&station(), SourceRequest::Realtime).unwrap();
        assert!(missing.is_none(), "absent captures are unavailable, not errors");
    }

    #[test]
    fn test_available_years_lists_archive_captures_only() {
        let root = tempdir().expect("temp dir");
        let replay = ReplayFetcher::new(root.path());
        for year in [2023, 2021, 2022] {
            replay
                .save_capture("2087", SourceRequest::Archive { year }, "x")
                .unwrap();
        }
        replay.save_capture("2087", SourceRequest::Auxiliary, "x").unwrap();

        assert_eq!(replay.available_years("2087").unwrap(), vec![2021, 2022, 2023]);
        assert!(replay.available_years("9999").unwrap().is_empty());
    }
}
