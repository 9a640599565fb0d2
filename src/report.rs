//! Renders the final summary of a load test.
//!
//! The text format is the [`Display`](std::fmt::Display) implementation of
//! [`LoadTestMetrics`]. The JSON format serializes a flattened [`MetricsReport`]
//! for consumption by other tools.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::config::{LoadTestMode, ReportFormat};
use crate::metrics::{as_millis_f64, LoadTestMetrics};
use crate::LoadTestError;

/// Latency figures, in milliseconds.
#[derive(Debug, Serialize)]
pub struct LatencyReport {
    pub mean: f64,
    /// Absent when no response was received.
    pub min: Option<f64>,
    pub max: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Serializable snapshot of a completed load test.
#[derive(Debug, Serialize)]
pub struct MetricsReport {
    pub target: String,
    pub mode: Option<LoadTestMode>,
    pub started: Option<String>,
    pub ended: Option<String>,
    pub elapsed_seconds: f64,
    pub requests: usize,
    pub success: usize,
    pub failures: usize,
    pub success_rate: f64,
    pub failure_rate: f64,
    pub latency_ms: LatencyReport,
    /// Requests per second of cumulative latency.
    pub throughput: f64,
    /// Requests per second of elapsed run time.
    pub wall_clock_throughput: f64,
    /// Keyed by status code, sorted.
    pub status_codes: BTreeMap<u16, usize>,
    pub backpressure_drops: usize,
    pub canceled_drops: usize,
}
impl From<&LoadTestMetrics> for MetricsReport {
    fn from(metrics: &LoadTestMetrics) -> Self {
        MetricsReport {
            target: metrics.target.clone(),
            mode: metrics.mode,
            started: metrics.started.map(|s| s.to_rfc3339()),
            ended: metrics.ended.map(|e| e.to_rfc3339()),
            elapsed_seconds: metrics.elapsed.as_secs_f64(),
            requests: metrics.requests,
            success: metrics.success,
            failures: metrics.failures,
            success_rate: metrics.success_rate(),
            failure_rate: metrics.failure_rate(),
            latency_ms: LatencyReport {
                mean: as_millis_f64(metrics.mean_latency()),
                min: metrics.fastest().map(as_millis_f64),
                max: as_millis_f64(metrics.max_latency),
                p50: as_millis_f64(metrics.percentile(0.5)),
                p95: as_millis_f64(metrics.p95_latency()),
                p99: as_millis_f64(metrics.percentile(0.99)),
            },
            throughput: metrics.throughput(),
            wall_clock_throughput: metrics.wall_clock_throughput(),
            status_codes: metrics
                .status_codes
                .iter()
                .map(|(code, count)| (*code, *count))
                .collect(),
            backpressure_drops: metrics.backpressure_drops,
            canceled_drops: metrics.canceled_drops,
        }
    }
}

/// Render the summary in the requested format.
pub fn render(metrics: &LoadTestMetrics, format: ReportFormat) -> Result<String, LoadTestError> {
    match format {
        ReportFormat::Text => Ok(metrics.to_string()),
        ReportFormat::Json => Ok(serde_json::to_string_pretty(&MetricsReport::from(metrics))?),
    }
}

/// Write the summary to stdout.
pub(crate) fn print_report(
    metrics: &LoadTestMetrics,
    format: ReportFormat,
) -> Result<(), LoadTestError> {
    info!(
        "printing final metrics after {} requests...",
        metrics.requests
    );
    let rendered = render(metrics, format)?;
    println!("{}", rendered);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{Outcome, RequestError};
    use std::time::Duration;

    fn sample_metrics() -> LoadTestMetrics {
        let mut metrics = LoadTestMetrics::default();
        metrics.target = "http://example.com/".to_string();
        metrics.mode = Some(LoadTestMode::Rate { rps: 10 });
        metrics.elapsed = Duration::from_secs(2);
        metrics.add(&Outcome::response(Duration::from_millis(10), 200));
        metrics.add(&Outcome::response(Duration::from_millis(30), 404));
        metrics.add(&Outcome::failed(
            Duration::from_millis(5),
            RequestError::Connect("refused".to_string()),
        ));
        metrics
    }

    #[test]
    fn json_report() {
        let rendered = render(&sample_metrics(), ReportFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&rendered).unwrap();

        assert_eq!(value["target"], "http://example.com/");
        assert_eq!(value["mode"]["strategy"], "rate");
        assert_eq!(value["mode"]["rps"], 10);
        assert_eq!(value["requests"], 3);
        assert_eq!(value["success"], 1);
        assert_eq!(value["failures"], 2);
        assert_eq!(value["status_codes"]["200"], 1);
        assert_eq!(value["status_codes"]["404"], 1);
        assert_eq!(value["latency_ms"]["min"], 10.0);
        assert_eq!(value["latency_ms"]["max"], 30.0);
        assert_eq!(value["wall_clock_throughput"], 1.5);
        assert!(value["started"].is_null());
    }

    #[test]
    fn json_without_responses() {
        let mut metrics = LoadTestMetrics::default();
        metrics.add(&Outcome::failed(Duration::from_millis(1), RequestError::Canceled));
        let report = MetricsReport::from(&metrics);
        assert!(report.latency_ms.min.is_none());
        assert!(report.status_codes.is_empty());
        assert_eq!(report.failures, 1);
    }

    #[test]
    fn text_report() {
        let rendered = render(&sample_metrics(), ReportFormat::Text).unwrap();
        assert!(rendered.contains("Mode: 10 requests per second"));
        assert!(rendered.contains("[404] Not Found"));
    }
}
