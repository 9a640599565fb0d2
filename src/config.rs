//! Functions and structures related to configuring a load test.
//!
//! A load test can be configured at run time by passing in the options and flags
//! defined by the [`LoadTestConfiguration`] structure, which are validated into
//! an immutable [`TestSettings`] with [`LoadTestConfiguration::settings`].
//!
//! A load test can also be configured programmatically by building
//! [`TestSettings`] directly.

use gumdrop::Options;
use regex::RegexSet;
use serde::Serialize;
use simplelog::*;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use std::{fmt, fs};

use crate::util;
use crate::LoadTestError;

/// Default load test run time.
const DEFAULT_RUN_TIME: &str = "5m";
/// Default requests per second in rate mode.
const DEFAULT_RPS: usize = 50;
/// Default client-level request timeout, in seconds.
const DEFAULT_TIMEOUT: &str = "30";
/// Default number of outcomes between progress lines.
const DEFAULT_PROGRESS_INTERVAL: usize = 100;
/// Highest supported request rate.
const MAX_RPS: usize = 1_000_000;

/// Runtime options available when launching a load test.
///
/// Help is generated for all of these options by passing a `-h` flag.
///
/// [`gumdrop`](https://docs.rs/gumdrop/) derives the above help from the below
/// structure.
#[derive(Options, Debug, Clone, Default)]
#[options(
    help = r#"Drives HTTP GET traffic against a target at a fixed rate or with a fixed
number of concurrent workers, then summarizes the responses.

The following runtime options are available:"#
)]
pub struct LoadTestConfiguration {
    /// Displays this help
    #[options(short = "h")]
    pub help: bool,
    /// Prints version information
    #[options(short = "V", help = "Prints version information\n")]
    pub version: bool,

    /// Defines the target to load test (ie http://10.21.32.33:8080/health)
    #[options(short = "T", meta = "URL")]
    pub target: String,
    /// Stops load test after (30s, 250ms, 20m, 1h30m, etc) (default: 5m)
    #[options(short = "t", meta = "TIME")]
    pub run_time: String,
    /// Sets requests per second (default: 50)
    #[options(short = "r", meta = "RATE")]
    pub rps: Option<usize>,
    /// Sets concurrent workers, replacing --rps (default: 0, disabled)
    #[options(short = "c", meta = "WORKERS")]
    pub concurrency: Option<usize>,
    /// Sets per-request timeout, in seconds (default: 30)
    #[options(no_short, meta = "VALUE", help = "Sets per-request timeout, in seconds (default: 30)\n\nReporting:")]
    pub timeout: Option<String>,

    /// Logs progress every N requests (default: 100)
    #[options(no_short, meta = "N")]
    pub progress_interval: Option<usize>,
    /// Sets the summary format (text, json) (default: text)
    #[options(no_short, meta = "FORMAT")]
    pub report_format: Option<ReportFormat>,
    /// Doesn't display metrics at end of load test
    #[options(no_short, help = "Doesn't display metrics at end of load test\n\nLogging:")]
    pub no_print_metrics: bool,

    /// Enables log file and sets name
    #[options(short = "G", meta = "NAME")]
    pub log_file: String,
    /// Increases log file level (-g, -gg, etc)
    #[options(short = "g", count)]
    pub log_level: u8,
    /// Decreases verbosity (-q, -qq, etc)
    #[options(count, short = "q")]
    pub quiet: u8,
    /// Increases verbosity (-v, -vv, etc)
    #[options(count, short = "v")]
    pub verbose: u8,
}

/// How load is generated. The two strategies are mutually exclusive.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "strategy", rename_all = "lowercase")]
pub enum LoadTestMode {
    /// Dispatch a fixed number of requests per second.
    Rate { rps: usize },
    /// Keep a fixed number of workers issuing requests back-to-back.
    Concurrency { workers: usize },
}
impl fmt::Display for LoadTestMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            LoadTestMode::Rate { rps } => write!(f, "{} requests per second", rps),
            LoadTestMode::Concurrency { workers } => {
                write!(f, "{} concurrent workers", workers)
            }
        }
    }
}

/// Supported summary formats.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReportFormat {
    /// Human-readable tables (default).
    Text,
    /// Pretty-printed JSON.
    Json,
}
impl Default for ReportFormat {
    fn default() -> Self {
        ReportFormat::Text
    }
}
/// Allow `--report-format` from the command line using text variations on supported
/// `ReportFormat`s by implementing [`FromStr`].
impl FromStr for ReportFormat {
    type Err = LoadTestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let report_format = RegexSet::new(&[r"(?i)^(text|txt|plain|table)$", r"(?i)^(json|js)$"])
            .expect("failed to compile report_format RegexSet");
        let matches = report_format.matches(s);
        if matches.matched(0) {
            Ok(ReportFormat::Text)
        } else if matches.matched(1) {
            Ok(ReportFormat::Json)
        } else {
            Err(LoadTestError::InvalidOption {
                option: "--report-format".to_string(),
                value: s.to_string(),
                detail: "Invalid report format, expected: text or json".to_string(),
            })
        }
    }
}

/// The validated, immutable configuration of one load test run.
///
/// # Example
/// ```rust
/// use std::time::Duration;
/// use rightsizer::config::{LoadTestMode, TestSettings};
///
/// let settings = TestSettings::new("localhost:8080", "2s")
///     .unwrap()
///     .set_concurrency(5);
///
/// assert_eq!(settings.run_time, Duration::from_secs(2));
/// assert_eq!(settings.mode(), LoadTestMode::Concurrency { workers: 5 });
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct TestSettings {
    /// Target as provided; normalized when the test starts.
    pub target: String,
    /// Requests per second, ignored when `concurrency` is non-zero.
    pub rps: usize,
    /// Number of concurrent workers, 0 selects rate mode.
    pub concurrency: usize,
    /// Total load test duration.
    pub run_time: Duration,
    /// Client-level timeout applied to every request.
    pub request_timeout: Duration,
    /// Number of outcomes between progress lines.
    pub progress_interval: usize,
    pub report_format: ReportFormat,
    /// Whether to render the summary when the load test completes.
    pub print_metrics: bool,
}
impl TestSettings {
    /// Settings for a rate mode test at the default rate.
    pub fn new(target: &str, run_time: &str) -> Result<Self, LoadTestError> {
        let settings = TestSettings {
            target: target.to_string(),
            rps: DEFAULT_RPS,
            concurrency: 0,
            run_time: parse_run_time(run_time)?,
            request_timeout: parse_timeout(DEFAULT_TIMEOUT)?,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            report_format: ReportFormat::default(),
            print_metrics: true,
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn set_rps(mut self, rps: usize) -> Self {
        self.rps = rps;
        self
    }

    pub fn set_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn set_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn set_progress_interval(mut self, progress_interval: usize) -> Self {
        self.progress_interval = progress_interval;
        self
    }

    pub fn set_report_format(mut self, report_format: ReportFormat) -> Self {
        self.report_format = report_format;
        self
    }

    pub fn set_print_metrics(mut self, print_metrics: bool) -> Self {
        self.print_metrics = print_metrics;
        self
    }

    /// Concurrency greater than zero selects the worker pool, otherwise rate mode.
    pub fn mode(&self) -> LoadTestMode {
        if self.concurrency > 0 {
            LoadTestMode::Concurrency {
                workers: self.concurrency,
            }
        } else {
            LoadTestMode::Rate { rps: self.rps }
        }
    }

    /// Confirm the settings describe a runnable load test.
    pub fn validate(&self) -> Result<(), LoadTestError> {
        if self.target.is_empty() {
            return Err(LoadTestError::InvalidOption {
                option: "--target".to_string(),
                value: self.target.clone(),
                detail: "A target must be defined via the --target option.".to_string(),
            });
        }

        if self.run_time == Duration::from_secs(0) {
            return Err(LoadTestError::InvalidOption {
                option: "--run-time".to_string(),
                value: format!("{:?}", self.run_time),
                detail: "The run time must be greater than zero.".to_string(),
            });
        }

        // The request rate only matters in rate mode.
        if self.concurrency == 0 {
            if self.rps == 0 {
                return Err(LoadTestError::InvalidOption {
                    option: "--rps".to_string(),
                    value: self.rps.to_string(),
                    detail: "--rps must be set to at least 1 request per second.".to_string(),
                });
            } else if self.rps > MAX_RPS {
                return Err(LoadTestError::InvalidOption {
                    option: "--rps".to_string(),
                    value: self.rps.to_string(),
                    detail: "--rps can not be set to more than 1,000,000 requests per second."
                        .to_string(),
                });
            }
        }

        if self.request_timeout == Duration::from_secs(0) {
            return Err(LoadTestError::InvalidOption {
                option: "--timeout".to_string(),
                value: format!("{:?}", self.request_timeout),
                detail: "The request timeout must be greater than zero.".to_string(),
            });
        }

        if self.progress_interval == 0 {
            return Err(LoadTestError::InvalidOption {
                option: "--progress-interval".to_string(),
                value: self.progress_interval.to_string(),
                detail: "--progress-interval must be at least 1.".to_string(),
            });
        }

        Ok(())
    }
}

impl LoadTestConfiguration {
    /// Resolve defaults and validate all options into [`TestSettings`].
    ///
    /// # Example
    /// ```rust
    /// use gumdrop::Options;
    /// use rightsizer::config::LoadTestConfiguration;
    ///
    /// let configuration =
    ///     LoadTestConfiguration::parse_args_default(&["--target", "example.com", "-t", "30s"])
    ///         .unwrap();
    /// let settings = configuration.settings().unwrap();
    /// assert_eq!(settings.rps, 50);
    /// ```
    pub fn settings(&self) -> Result<TestSettings, LoadTestError> {
        let run_time = if self.run_time.is_empty() {
            DEFAULT_RUN_TIME
        } else {
            self.run_time.as_str()
        };

        let settings = TestSettings {
            target: self.target.clone(),
            rps: self.rps.unwrap_or(DEFAULT_RPS),
            concurrency: self.concurrency.unwrap_or(0),
            run_time: parse_run_time(run_time)?,
            request_timeout: parse_timeout(self.timeout.as_deref().unwrap_or(DEFAULT_TIMEOUT))?,
            progress_interval: self.progress_interval.unwrap_or(DEFAULT_PROGRESS_INTERVAL),
            report_format: self.report_format.unwrap_or_default(),
            print_metrics: !self.no_print_metrics,
        };
        settings.validate()?;

        Ok(settings)
    }

    /// Optionally initialize the logger which writes to standard out and/or to
    /// a configurable log file.
    pub fn initialize_logger(&self) {
        // Configure debug output level.
        let debug_level = match self.verbose {
            0 => match self.quiet {
                0 => LevelFilter::Info,
                _ => LevelFilter::Warn,
            },
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        // Configure log file level.
        let log_level = match self.log_level {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        let log_file: Option<PathBuf> = if !self.log_file.is_empty() {
            Some(PathBuf::from(&self.log_file))
        } else {
            None
        };

        let mut loggers: Vec<Box<dyn SharedLogger>> =
            vec![SimpleLogger::new(debug_level, Config::default())];
        if let Some(log_to_file) = log_file.as_ref() {
            match fs::File::create(log_to_file) {
                Ok(file) => loggers.push(WriteLogger::new(log_level, Config::default(), file)),
                Err(e) => eprintln!("failed to create log file {}: {}", log_to_file.display(), e),
            }
        }

        match CombinedLogger::init(loggers) {
            Ok(_) => (),
            Err(e) => {
                info!("failed to initialize CombinedLogger: {}", e);
            }
        }

        if let Some(log_to_file) = log_file {
            info!("Writing to log file: {}", log_to_file.display());
        }
        info!("Output verbosity level: {}", debug_level);
        info!("Logfile verbosity level: {}", log_level);
    }
}

fn parse_run_time(run_time: &str) -> Result<Duration, LoadTestError> {
    match util::parse_timespan(run_time) {
        Some(duration) if duration > Duration::from_secs(0) => Ok(duration),
        Some(_) => Err(LoadTestError::InvalidOption {
            option: "--run-time".to_string(),
            value: run_time.to_string(),
            detail: "The run time must be a positive time span such as 30s, 5m or 1h30m."
                .to_string(),
        }),
        None => Err(LoadTestError::InvalidOption {
            option: "--run-time".to_string(),
            value: run_time.to_string(),
            detail: "The run time is too large.".to_string(),
        }),
    }
}

fn parse_timeout(timeout: &str) -> Result<Duration, LoadTestError> {
    match f64::from_str(timeout).map(Duration::try_from_secs_f64) {
        Ok(Ok(duration)) if duration > Duration::from_secs(0) => Ok(duration),
        _ => Err(LoadTestError::InvalidOption {
            option: "--timeout".to_string(),
            value: timeout.to_string(),
            detail: "The timeout must be a positive number of seconds.".to_string(),
        }),
    }
}
