//! Metrics collected and aggregated during a load test.
//!
//! Producers never touch the aggregate. They hand each [`Outcome`] to the
//! [`ResultChannel`](../channel/struct.ResultChannel.html), and a single consumer
//! task feeds them one at a time into [`LoadTestMetrics::add`]. When the test
//! completes, [`LoadTest::execute()`](../struct.LoadTest.html#method.execute)
//! returns the finalized [`LoadTestMetrics`].
//!
//! Counters are maintained incrementally. Mean, percentiles, success rate and
//! throughput are computed on demand from the aggregate.
//!
//! When the [`LoadTestMetrics`] object is viewed with [`std::fmt::Display`], the
//! contained metrics are displayed in tables.

use chrono::prelude::*;
use http::StatusCode;
use itertools::Itertools;
use num_format::{Locale, ToFormattedString};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use crate::client::Outcome;
use crate::config::LoadTestMode;
use crate::util;

/// Initial minimum latency, larger than any realistic request latency.
pub(crate) const MIN_LATENCY_SENTINEL: Duration = Duration::from_secs(24 * 60 * 60);

/// Aggregated metrics for one load test run.
///
/// Invariant: `success + failures == requests` after every [`add`](#method.add).
#[derive(Clone, Debug, Default)]
pub struct LoadTestMetrics {
    /// Total number of outcomes processed.
    pub requests: usize,
    /// Outcomes with a status code in [200, 400).
    pub success: usize,
    /// Transport failures plus responses outside [200, 400).
    pub failures: usize,
    /// Occurrences of each status code that was actually received.
    pub status_codes: HashMap<u16, usize>,
    /// Sum of all response latencies.
    pub total_latency: Duration,
    pub min_latency: Duration,
    pub max_latency: Duration,
    /// Every response latency, in arrival order.
    pub latencies: Vec<Duration>,

    /// The validated target the load test ran against.
    pub target: String,
    /// How load was generated.
    pub mode: Option<LoadTestMode>,
    /// When the load test started.
    pub started: Option<DateTime<Local>>,
    /// When the load test finished.
    pub ended: Option<DateTime<Local>>,
    /// Wall-clock time from start until every outcome was consumed.
    pub elapsed: Duration,
    /// Outcomes dropped because the result buffer was full.
    pub backpressure_drops: usize,
    /// Outcomes dropped because they completed after the test ended.
    pub canceled_drops: usize,
}
impl LoadTestMetrics {
    /// Fold one outcome into the aggregate.
    ///
    /// # Example
    /// ```rust
    /// use std::time::Duration;
    /// use rightsizer::client::Outcome;
    /// use rightsizer::metrics::LoadTestMetrics;
    ///
    /// let mut metrics = LoadTestMetrics::default();
    /// metrics.add(&Outcome::response(Duration::from_millis(20), 200));
    /// metrics.add(&Outcome::response(Duration::from_millis(40), 503));
    ///
    /// assert_eq!(metrics.requests, 2);
    /// assert_eq!(metrics.success, 1);
    /// assert_eq!(metrics.failures, 1);
    /// assert_eq!(metrics.mean_latency(), Duration::from_millis(30));
    /// ```
    pub fn add(&mut self, outcome: &Outcome) {
        if self.requests == 0 {
            self.min_latency = MIN_LATENCY_SENTINEL;
        }

        self.requests += 1;

        // Transport failures have no response to account for.
        if let Some(error) = outcome.error.as_ref() {
            self.failures += 1;
            debug!("request error: {}", error);
            return;
        }

        *self.status_codes.entry(outcome.status_code).or_insert(0) += 1;

        self.total_latency += outcome.latency;
        self.latencies.push(outcome.latency);
        if outcome.latency < self.min_latency {
            self.min_latency = outcome.latency;
        }
        if outcome.latency > self.max_latency {
            self.max_latency = outcome.latency;
        }

        if outcome.is_success() {
            self.success += 1;
        } else {
            self.failures += 1;
            debug!("non-success status code: {}", outcome.status_code);
        }
    }

    /// Cumulative latency divided by all requests, including transport failures.
    pub fn mean_latency(&self) -> Duration {
        if self.requests == 0 || self.total_latency == Duration::from_secs(0) {
            return Duration::from_secs(0);
        }
        Duration::from_nanos((self.total_latency.as_nanos() / self.requests as u128) as u64)
    }

    /// Fastest response, if any response was received.
    pub fn fastest(&self) -> Option<Duration> {
        if self.latencies.is_empty() || self.min_latency >= MIN_LATENCY_SENTINEL {
            None
        } else {
            Some(self.min_latency)
        }
    }

    /// Percentage of all requests that succeeded.
    pub fn success_rate(&self) -> f64 {
        if self.requests == 0 {
            return 0.0;
        }
        self.success as f64 / self.requests as f64 * 100.0
    }

    /// Percentage of all requests that failed.
    pub fn failure_rate(&self) -> f64 {
        if self.requests == 0 {
            return 0.0;
        }
        self.failures as f64 / self.requests as f64 * 100.0
    }

    /// Latency at `percentile` (between 0.0 and 1.0) of all response latencies.
    ///
    /// Uses the sorted index `floor(percentile * count)`, clamped to the last
    /// sample. No interpolation is done.
    pub fn percentile(&self, percentile: f64) -> Duration {
        if self.latencies.is_empty() {
            return Duration::from_secs(0);
        }

        let mut sorted = self.latencies.clone();
        sorted.sort_unstable();

        let index = (sorted.len() as f64 * percentile.max(0.0)) as usize;
        sorted[index.min(sorted.len() - 1)]
    }

    pub fn p95_latency(&self) -> Duration {
        self.percentile(0.95)
    }

    /// Requests divided by the sum of all response latencies, in seconds.
    ///
    /// Latencies of concurrent requests overlap in real time, so with more than
    /// one request in flight this overstates the achieved request rate. See
    /// [`wall_clock_throughput`](#method.wall_clock_throughput).
    pub fn throughput(&self) -> f64 {
        if self.requests == 0 || self.total_latency == Duration::from_secs(0) {
            return 0.0;
        }
        self.requests as f64 / self.total_latency.as_secs_f64()
    }

    /// Requests divided by the elapsed wall-clock time of the load test.
    pub fn wall_clock_throughput(&self) -> f64 {
        if self.requests == 0 || self.elapsed == Duration::from_secs(0) {
            return 0.0;
        }
        self.requests as f64 / self.elapsed.as_secs_f64()
    }

    /// Display all metrics from a completed load test as text tables.
    ///
    /// # Example
    /// ```rust,no_run
    /// use tokio_util::sync::CancellationToken;
    /// use rightsizer::config::TestSettings;
    /// use rightsizer::LoadTest;
    ///
    /// let settings = TestSettings::new("localhost:8080", "10s")?.set_print_metrics(false);
    /// let metrics = LoadTest::new(settings).execute(CancellationToken::new())?;
    /// metrics.print();
    /// # Ok::<(), rightsizer::LoadTestError>(())
    /// ```
    pub fn print(&self) {
        print!("{}", self);
    }

    pub(crate) fn fmt_overview(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            fmt,
            "\n === LOAD TEST RESULTS ===\n ------------------------------------------------------------------------------"
        )?;
        writeln!(fmt, " Target: {}", util::truncate_string(&self.target, 68))?;
        if let Some(mode) = self.mode.as_ref() {
            writeln!(fmt, " Mode: {}", mode)?;
        }
        if let (Some(started), Some(ended)) = (self.started, self.ended) {
            writeln!(
                fmt,
                " Run: {} - {} (duration: {})",
                started.format("%Y-%m-%d %H:%M:%S"),
                ended.format("%Y-%m-%d %H:%M:%S"),
                format_elapsed(self.elapsed),
            )?;
        }

        Ok(())
    }

    pub(crate) fn fmt_requests(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            fmt,
            " ------------------------------------------------------------------------------"
        )?;
        writeln!(
            fmt,
            " {:<24} | {:>13} | {:>14} | {:>16}",
            "Requests", "# total", "# success", "# fail"
        )?;
        writeln!(
            fmt,
            " ------------------------------------------------------------------------------"
        )?;
        writeln!(
            fmt,
            " {:<24} | {:>13} | {:>14} | {:>16}",
            "GET",
            format_number(self.requests),
            format_number(self.success),
            format!(
                "{} ({:.1}%)",
                format_number(self.failures),
                self.failure_rate()
            ),
        )?;
        writeln!(fmt, " Success rate: {:.2}%", self.success_rate())?;

        Ok(())
    }

    pub(crate) fn fmt_latencies(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Without any response there are no latencies to show.
        if self.latencies.is_empty() {
            return Ok(());
        }

        writeln!(
            fmt,
            " ------------------------------------------------------------------------------"
        )?;
        writeln!(
            fmt,
            " {:<24} | {:>9} | {:>9} | {:>9} | {:>6} | {:>6} | {:>6}",
            "Latency (ms)", "Average", "Min", "Max", "50%", "95%", "99%"
        )?;
        writeln!(
            fmt,
            " ------------------------------------------------------------------------------"
        )?;
        writeln!(
            fmt,
            " {:<24} | {:>9.2} | {:>9.2} | {:>9.2} | {:>6.0} | {:>6.0} | {:>6.0}",
            "GET",
            as_millis_f64(self.mean_latency()),
            as_millis_f64(self.fastest().unwrap_or_default()),
            as_millis_f64(self.max_latency),
            as_millis_f64(self.percentile(0.5)),
            as_millis_f64(self.p95_latency()),
            as_millis_f64(self.percentile(0.99)),
        )?;
        writeln!(
            fmt,
            " Throughput: {:.2} req/s (latency sum), {:.2} req/s (wall clock)",
            self.throughput(),
            self.wall_clock_throughput(),
        )?;

        Ok(())
    }

    pub(crate) fn fmt_status_codes(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            fmt,
            " ------------------------------------------------------------------------------"
        )?;
        writeln!(fmt, " {:<45} | {:>30}", "Status code", "# responses")?;
        writeln!(
            fmt,
            " ------------------------------------------------------------------------------"
        )?;
        if self.status_codes.is_empty() {
            writeln!(
                fmt,
                " No status codes recorded (all requests may have failed with errors)"
            )?;
        }
        for (status_code, count) in self.status_codes.iter().sorted() {
            let reason = StatusCode::from_u16(*status_code)
                .ok()
                .and_then(|s| s.canonical_reason())
                .unwrap_or("");
            writeln!(
                fmt,
                " {:<45} | {:>30}",
                util::truncate_string(&format!("[{}] {}", status_code, reason), 45),
                format_number(*count),
            )?;
        }

        Ok(())
    }

    pub(crate) fn fmt_warnings(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            fmt,
            " ------------------------------------------------------------------------------"
        )?;
        if self.backpressure_drops > 0 {
            writeln!(
                fmt,
                " Warning: {} outcomes dropped (result buffer full)",
                format_number(self.backpressure_drops)
            )?;
        }
        if self.failures > 0 {
            writeln!(
                fmt,
                " Warning: {} failed requests ({:.2}%)",
                format_number(self.failures),
                self.failure_rate()
            )?;
        }

        Ok(())
    }
}

impl fmt::Display for LoadTestMetrics {
    // Implement display of metrics with `{}` marker.
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        self.fmt_overview(fmt)?;
        self.fmt_requests(fmt)?;
        self.fmt_latencies(fmt)?;
        self.fmt_status_codes(fmt)?;
        self.fmt_warnings(fmt)
    }
}

/// The single consumer of a load test's outcomes.
///
/// Drains `receiver` until every sender is gone and the queue is empty, logging
/// progress every `progress_interval` outcomes, then returns the aggregate.
pub(crate) async fn aggregate_outcomes(
    receiver: flume::Receiver<Outcome>,
    progress_interval: usize,
) -> LoadTestMetrics {
    let mut metrics = LoadTestMetrics::default();
    let progress_interval = progress_interval.max(1);

    while let Ok(outcome) = receiver.recv_async().await {
        metrics.add(&outcome);

        if metrics.requests % progress_interval == 0 {
            info!(
                "progress: {} requests, {:.2}% success",
                format_number(metrics.requests),
                metrics.success_rate()
            );
        }
    }
    debug!("result channel drained after {} outcomes", metrics.requests);

    metrics
}

/// Format large number in locale appropriate style.
pub(crate) fn format_number(number: usize) -> String {
    (number).to_formatted_string(&Locale::en)
}

pub(crate) fn as_millis_f64(duration: Duration) -> f64 {
    duration.as_micros() as f64 / 1_000.0
}

/// Format a duration as HH:MM:SS.
pub(crate) fn format_elapsed(elapsed: Duration) -> String {
    let seconds = elapsed.as_secs();
    format!(
        "{:02}:{:02}:{:02}",
        seconds / 3_600,
        (seconds / 60) % 60,
        seconds % 60
    )
}
