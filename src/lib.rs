//! # Rightsizer
//!
//! Rightsizer drives HTTP GET traffic against a single target and summarizes how
//! the target responded. It is used to measure a service under a known load
//! before deciding how much CPU and memory its pods should request.
//!
//! Load is generated with one of two strategies:
//!
//! - **Rate mode** (default) launches a fixed number of requests per second,
//!   each in its own task, independent of how long earlier requests take. At
//!   most `floor(rps * run_time)` requests are launched.
//! - **Concurrency mode** runs a fixed pool of workers that each issue requests
//!   back-to-back until the run time elapses.
//!
//! Every request produces an [`Outcome`](client::Outcome) that is handed to a
//! bounded [`ResultChannel`](channel::ResultChannel). A single aggregator task
//! folds outcomes into [`LoadTestMetrics`](metrics::LoadTestMetrics), which is
//! printed and returned when the load test completes.
//!
//! Rightsizer uses [`reqwest`](https://docs.rs/reqwest/) as its HTTP client.
//!
//! ## Running a load test
//!
//! From the command line:
//!
//! ```bash
//! $ rightsizer --target my-service.default.svc:8080/healthz --rps 100 --run-time 2m
//! ```
//!
//! Or from Rust code:
//!
//! ```rust,no_run
//! use rightsizer::prelude::*;
//!
//! fn main() -> Result<(), LoadTestError> {
//!     let settings = TestSettings::new("http://localhost:8080/", "30s")?.set_concurrency(8);
//!     let metrics = LoadTest::new(settings).execute(CancellationToken::new())?;
//!     assert_eq!(metrics.success + metrics.failures, metrics.requests);
//!     Ok(())
//! }
//! ```
//!
//! ## License
//!
//! Copyright 2020-2026 The Rightsizer Authors
//!
//! Licensed under the Apache License, Version 2.0 (the "License");
//! you may not use this file except in compliance with the License.
//! You may obtain a copy of the License at
//!
//! <http://www.apache.org/licenses/LICENSE-2.0>
//!
//! Unless required by applicable law or agreed to in writing, software
//! distributed under the License is distributed on an "AS IS" BASIS,
//! WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//! See the License for the specific language governing permissions and
//! limitations under the License.

#[macro_use]
extern crate log;

pub mod channel;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod metrics;
pub mod prelude;
pub mod report;
pub mod target;
pub mod util;
pub mod worker;

use chrono::prelude::*;
use std::sync::Arc;
use std::time::Instant;
use std::{fmt, io};
use tokio::runtime::Runtime;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::channel::ResultChannel;
use crate::client::RequestClient;
use crate::config::{LoadTestMode, TestSettings};
use crate::dispatcher::{planned_requests, RateDispatcher};
use crate::metrics::{aggregate_outcomes, LoadTestMetrics};

/// An enumeration of all errors a [`LoadTest`](./struct.LoadTest.html) can return.
#[derive(Debug)]
pub enum LoadTestError {
    /// Wraps a [`std::io::Error`](https://doc.rust-lang.org/std/io/struct.Error.html).
    Io(io::Error),
    /// Wraps a [`reqwest::Error`](https://docs.rs/reqwest/*/reqwest/struct.Error.html).
    Reqwest(reqwest::Error),
    /// Wraps a ['tokio::task::JoinError'](https://tokio-rs.github.io/tokio/doc/tokio/task/struct.JoinError.html).
    TokioJoin(tokio::task::JoinError),
    /// Wraps a [`serde_json::Error`](https://docs.rs/serde_json/*/serde_json/struct.Error.html).
    Serialization(serde_json::Error),
    /// The target could not be turned into a valid URL.
    MalformedTarget {
        /// The target as it was provided.
        target: String,
        /// An optional explanation of the error.
        detail: String,
        /// Wraps a [`url::ParseError`](https://docs.rs/url/*/url/enum.ParseError.html).
        parse_error: url::ParseError,
    },
    /// Invalid option or value specified, may only be invalid in context.
    InvalidOption {
        /// The invalid option that caused this error, may be only invalid in context.
        option: String,
        /// The invalid value that caused this error, may be only invalid in context.
        value: String,
        /// An optional explanation of the error.
        detail: String,
    },
}
impl LoadTestError {
    fn describe(&self) -> &str {
        match *self {
            LoadTestError::Io(_) => "io::Error",
            LoadTestError::Reqwest(_) => "reqwest::Error",
            LoadTestError::TokioJoin(_) => "tokio::task::JoinError",
            LoadTestError::Serialization(_) => "serde_json::Error",
            LoadTestError::MalformedTarget { .. } => "failed to parse target",
            LoadTestError::InvalidOption { .. } => "invalid option or value specified",
        }
    }
}

impl fmt::Display for LoadTestError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            LoadTestError::Io(ref source) => {
                write!(f, "LoadTestError: {} ({})", self.describe(), source)
            }
            LoadTestError::Reqwest(ref source) => {
                write!(f, "LoadTestError: {} ({})", self.describe(), source)
            }
            LoadTestError::TokioJoin(ref source) => {
                write!(f, "LoadTestError: {} ({})", self.describe(), source)
            }
            LoadTestError::Serialization(ref source) => {
                write!(f, "LoadTestError: {} ({})", self.describe(), source)
            }
            LoadTestError::MalformedTarget {
                ref detail,
                ref parse_error,
                ..
            } => write!(
                f,
                "LoadTestError: {}: {} ({})",
                self.describe(),
                detail,
                parse_error
            ),
            LoadTestError::InvalidOption {
                ref option,
                ref value,
                ref detail,
            } => write!(
                f,
                "LoadTestError: {} {}={:?}: {}",
                self.describe(),
                option,
                value,
                detail
            ),
        }
    }
}

// Define the lower level source of this error, if any.
impl std::error::Error for LoadTestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match *self {
            LoadTestError::Io(ref source) => Some(source),
            LoadTestError::Reqwest(ref source) => Some(source),
            LoadTestError::TokioJoin(ref source) => Some(source),
            LoadTestError::Serialization(ref source) => Some(source),
            LoadTestError::MalformedTarget {
                ref parse_error, ..
            } => Some(parse_error),
            _ => None,
        }
    }
}

/// Auto-convert Reqwest errors.
impl From<reqwest::Error> for LoadTestError {
    fn from(err: reqwest::Error) -> LoadTestError {
        LoadTestError::Reqwest(err)
    }
}

/// Auto-convert IO errors.
impl From<io::Error> for LoadTestError {
    fn from(err: io::Error) -> LoadTestError {
        LoadTestError::Io(err)
    }
}

/// Auto-convert TokioJoin errors.
impl From<tokio::task::JoinError> for LoadTestError {
    fn from(err: tokio::task::JoinError) -> LoadTestError {
        LoadTestError::TokioJoin(err)
    }
}

/// Auto-convert serde_json errors.
impl From<serde_json::Error> for LoadTestError {
    fn from(err: serde_json::Error) -> LoadTestError {
        LoadTestError::Serialization(err)
    }
}

/// A single load test against a single target.
#[derive(Clone, Debug)]
pub struct LoadTest {
    settings: TestSettings,
}
impl LoadTest {
    pub fn new(settings: TestSettings) -> Self {
        LoadTest { settings }
    }

    pub fn settings(&self) -> &TestSettings {
        &self.settings
    }

    /// Run the load test on a new multi-threaded tokio runtime, blocking until
    /// it completes.
    ///
    /// Canceling `canceled` ends the load test early, for example from a ctrl-c
    /// handler. The metrics collected up to that point are still returned.
    pub fn execute(self, canceled: CancellationToken) -> Result<LoadTestMetrics, LoadTestError> {
        let rt = Runtime::new()?;
        rt.block_on(self.run(&canceled))
    }

    /// Run the load test from within an existing tokio runtime.
    ///
    /// The test ends when the run time elapses, when every planned request has
    /// completed in rate mode, or when `canceled` fires. In every case the
    /// aggregator drains all delivered outcomes before the metrics are returned.
    pub async fn run(&self, canceled: &CancellationToken) -> Result<LoadTestMetrics, LoadTestError> {
        self.settings.validate()?;

        let url = target::validate_target(&self.settings.target)?;
        let client = RequestClient::new(url.clone(), self.settings.request_timeout)?;
        let mode = self.settings.mode();
        info!("starting load test against {}: {}", url, mode);

        // Everything belonging to this test is canceled through `scope`, which
        // is also canceled when the caller cancels `canceled`.
        let scope = canceled.child_token();

        let capacity = match mode {
            LoadTestMode::Rate { rps } => planned_requests(rps, self.settings.run_time),
            LoadTestMode::Concurrency { .. } => worker::POOL_BUFFER_SIZE,
        };
        let (results, receiver) = ResultChannel::bounded(capacity, scope.clone());

        let started = Local::now();
        let started_at = Instant::now();

        let run_time = self.settings.run_time;
        let deadline_scope = scope.clone();
        let deadline = tokio::spawn(async move {
            tokio::select! {
                _ = time::sleep(run_time) => {
                    info!("run time of {:?} elapsed, stopping load test", run_time);
                    deadline_scope.cancel();
                }
                _ = deadline_scope.cancelled() => (),
            }
        });

        let aggregator = tokio::spawn(aggregate_outcomes(
            receiver,
            self.settings.progress_interval,
        ));

        match mode {
            LoadTestMode::Rate { rps } => {
                let mut dispatcher =
                    RateDispatcher::new(client, Arc::clone(&results), rps, run_time);
                let report = dispatcher.run(&scope).await;
                info!(
                    "rate dispatcher launched {} of {} planned requests",
                    report.launched, report.planned
                );
            }
            LoadTestMode::Concurrency { workers } => {
                let report = worker::run_pool(client, Arc::clone(&results), workers, &scope).await;
                debug!("requests per worker: {:?}", report.requests_per_worker);
            }
        }

        // Every producer has exited. The dispatcher already closed the channel
        // after draining, in which case this is a no-op.
        results.close();
        scope.cancel();
        deadline.await?;

        let mut metrics = aggregator.await?;
        metrics.target = url.to_string();
        metrics.mode = Some(mode);
        metrics.started = Some(started);
        metrics.ended = Some(Local::now());
        metrics.elapsed = started_at.elapsed();
        metrics.backpressure_drops = results.backpressure_drops();
        metrics.canceled_drops = results.canceled_drops();

        if metrics.canceled_drops > 0 {
            debug!(
                "{} outcomes completed after the load test ended",
                metrics.canceled_drops
            );
        }
        info!("load test completed after {} requests", metrics.requests);

        if self.settings.print_metrics {
            report::print_report(&metrics, self.settings.report_format)?;
        }

        Ok(metrics)
    }
}
