use clap::Parser;
use hydro_unify::ingest::aemet::AemetClient;
use hydro_unify::ingest::openmeteo::OpenMeteoClient;
use hydro_unify::ingest::owm::OwmClient;
use hydro_unify::ingest::replay::ReplayFetcher;
use hydro_unify::ingest::saih::HttpFetcher;
use hydro_unify::ingest::{RetryPolicy, SourceFetcher, WeatherFeed};
use hydro_unify::logging::{self, DataSource, LogLevel};
use hydro_unify::model::{FlowError, Result, TimeFrame};
use hydro_unify::output::{write_csv, write_station_csv};
use hydro_unify::pipeline::{attach_weather, forecast_weather, run_station, StationRun};
use hydro_unify::stations::{self, Config, StationConfig};
use std::path::PathBuf;
use std::process::ExitCode;

/// Unifies the flow sources of each station into one regular, gap-repaired
/// series written as CSV.
#[derive(Debug, Parser)]
#[command(name = "hydro_unify", version)]
struct Cli {
    /// Station codes to run (all configured stations when none are given).
    stations: Vec<String>,

    /// Configuration file (default: $HYDRO_UNIFY_CONFIG or stations.toml).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Read captured sources from DIR instead of the network.
    #[arg(long, value_name = "DIR")]
    replay: Option<PathBuf>,

    /// Write <DIR>/<code>.csv instead of printing to stdout.
    #[arg(long, value_name = "DIR")]
    out: Option<PathBuf>,

    /// Forward-fill the boundary gap instead of seasonal substitution.
    #[arg(long)]
    no_repair: bool,

    /// Also emit the JSON run report.
    #[arg(long)]
    report: bool,

    /// Join Open-Meteo, OpenWeatherMap (OWM_API_KEY) and, for daily
    /// stations, AEMET (AEMET_API_KEY) weather onto the series.
    #[arg(long)]
    weather: bool,

    /// Write the weather forecast to <DIR>/<code>.forecast.csv (needs --out).
    #[arg(long, requires = "out")]
    forecast: bool,

    /// Append log lines to PATH.
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Debug logging.
    #[arg(short, long)]
    verbose: bool,
}

fn load_config(cli: &Cli) -> Result<Config> {
    match &cli.config {
        Some(path) => {
            dotenv::dotenv().ok();
            stations::load_config(path)
        }
        None => stations::load_default_config(),
    }
}

/// Stations named on the command line, or all of them.
fn select_stations<'a>(config: &'a Config, codes: &[String]) -> Result<Vec<&'a StationConfig>> {
    if codes.is_empty() {
        return Ok(config.stations.iter().collect());
    }
    codes
        .iter()
        .map(|code| {
            config
                .find_station(code)
                .ok_or_else(|| FlowError::Config(format!("station '{}' is not configured", code)))
        })
        .collect()
}

fn any_aemet_station(stations: &[&StationConfig]) -> bool {
    stations.iter().any(|s| s.aemet_station.is_some())
}

/// Weather clients available with the current environment. Keyed services
/// are left out when their key is not set.
struct WeatherClients<'a> {
    meteo: OpenMeteoClient<'a>,
    owm: Option<OwmClient<'a>>,
    aemet: Option<AemetClient<'a>>,
}

impl<'a> WeatherClients<'a> {
    fn new(client: &'a reqwest::blocking::Client, config: &'a Config) -> Self {
        let retry = RetryPolicy::from(&config.retry);
        let owm = stations::owm_api_key().map(|key| {
            OwmClient::new(client, &config.endpoints, key, retry, config.weather.owm_interval_days)
        });
        let aemet = stations::aemet_api_key().map(|key| AemetClient::new(client, &config.endpoints, key, retry));
        WeatherClients {
            meteo: OpenMeteoClient::new(client, &config.endpoints, retry),
            owm,
            aemet,
        }
    }

    fn feeds(&self) -> Vec<&dyn WeatherFeed> {
        let mut feeds: Vec<&dyn WeatherFeed> = vec![&self.meteo];
        if let Some(owm) = &self.owm {
            feeds.push(owm);
        }
        if let Some(aemet) = &self.aemet {
            feeds.push(aemet);
        }
        feeds
    }
}

fn emit(cli: &Cli, code: &str, run: &StationRun, forecast: Option<&TimeFrame>) -> Result<()> {
    match &cli.out {
        Some(dir) => {
            let path = write_station_csv(dir, code, &run.frame)?;
            logging::info(DataSource::Pipeline, Some(code), &format!("wrote {}", path.display()));
            if let Some(forecast) = forecast {
                let path = write_station_csv(dir, &format!("{}.forecast", code), forecast)?;
                logging::info(DataSource::Pipeline, Some(code), &format!("wrote {}", path.display()));
            }
            if cli.report {
                std::fs::write(dir.join(format!("{}.report.json", code)), run.report.to_json()?)?;
            }
        }
        None => {
            write_csv(&run.frame, std::io::stdout().lock())?;
            if cli.report {
                eprintln!("{}", run.report.to_json()?);
            }
        }
    }
    Ok(())
}

fn frame_summary(frame: &TimeFrame) -> String {
    match frame.range() {
        Some((first, last)) => format!("{} rows, {} .. {}", frame.len(), first, last),
        None => "no rows".to_string(),
    }
}

/// One station's result plus its forecast frame, if requested.
type StationOutcome = (String, Result<(StationRun, Option<TimeFrame>)>);

fn run(cli: Cli) -> Result<bool> {
    let config = load_config(&cli)?;
    let selected = select_stations(&config, &cli.stations)?;

    let http = HttpFetcher::new(&config.endpoints)?;
    let replay = cli.replay.as_ref().map(ReplayFetcher::new);
    let fetcher: &dyn SourceFetcher = match &replay {
        Some(replay) => replay,
        None => &http,
    };
    let live = replay.is_none();
    let clients = WeatherClients::new(http.client(), &config);
    if (cli.weather || cli.forecast) && !live {
        logging::warn(DataSource::Pipeline, None, "--weather/--forecast need live access; ignored in replay mode");
    } else if cli.weather || cli.forecast {
        if clients.owm.is_none() {
            logging::info(DataSource::OpenWeatherMap, None, "OWM_API_KEY not set; skipping OpenWeatherMap");
        }
        if clients.aemet.is_none() && any_aemet_station(&selected) {
            logging::warn(DataSource::Aemet, None, "AEMET_API_KEY not set; skipping AEMET");
        }
    }
    let feeds = clients.feeds();

    let adjusted: Vec<StationConfig> = selected
        .into_iter()
        .map(|s| StationConfig {
            replace_missing: s.replace_missing && !cli.no_repair,
            ..s.clone()
        })
        .collect();

    let results: Vec<StationOutcome> = std::thread::scope(|scope| {
        let handles: Vec<_> = adjusted
            .iter()
            .map(|station| {
                let feeds = &feeds;
                let (weather, forecast) = (cli.weather && live, cli.forecast && live);
                scope.spawn(move || {
                    let result = run_station(station, fetcher).map(|mut run| {
                        if weather {
                            attach_weather(&mut run, station, feeds);
                        }
                        let outlook = if forecast { forecast_weather(station, feeds) } else { None };
                        (run, outlook)
                    });
                    (station.code.clone(), result)
                })
            })
            .collect();
        handles
            .into_iter()
            .zip(&adjusted)
            .map(|(handle, station)| {
                handle.join().unwrap_or_else(|_| {
                    (
                        station.code.clone(),
                        Err(FlowError::Config(format!("station {} worker panicked", station.code))),
                    )
                })
            })
            .collect()
    });

    let mut all_ok = true;
    for (code, result) in results {
        match result {
            Ok((run, outlook)) => {
                logging::info(DataSource::Pipeline, Some(&code), &frame_summary(&run.frame));
                if let Err(err) = emit(&cli, &code, &run, outlook.as_ref()) {
                    logging::error(DataSource::Pipeline, Some(&code), &format!("output failed: {}", err));
                    all_ok = false;
                }
            }
            Err(err) => {
                logging::error(DataSource::Pipeline, Some(&code), &err.to_string());
                all_ok = false;
            }
        }
    }
    Ok(all_ok)
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose { LogLevel::Debug } else { LogLevel::Info };
    if let Err(err) = logging::init_logger(level, cli.log_file.as_deref(), true) {
        eprintln!("cannot open log file: {}", err);
        return ExitCode::from(2);
    }

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            logging::error(DataSource::Pipeline, None, &err.to_string());
            ExitCode::from(2)
        }
    }
}
