/// Validate that a load test shuts down cleanly when canceled, from code, by
/// SIGINT (control-c) or by SIGTERM, and still returns the metrics collected so far.
use httpmock::MockServer;
use nix::sys::signal::{kill, Signal, SIGINT, SIGTERM};
use nix::unistd::getpid;
use serial_test::serial;
use std::time::{Duration, Instant};

mod common;

use rightsizer::prelude::*;
use rightsizer::util;

// Paths used in load tests performed during these tests.
const INDEX_PATH: &str = "/";

// Long enough that only cancellation can end these load tests in time.
const RUN_TIME: &str = "30";

// There are multiple test variations in this file.
enum TestType {
    // Fixed request rate.
    Rate,
    // Fixed pool of workers.
    Concurrency,
}

fn configuration_for(server: &MockServer, test_type: &TestType) -> LoadTestConfiguration {
    match test_type {
        TestType::Rate => common::build_configuration(
            server,
            vec!["--rps", "50", "--run-time", RUN_TIME],
        ),
        TestType::Concurrency => common::build_configuration(
            server,
            vec!["--concurrency", "4", "--run-time", RUN_TIME],
        ),
    }
}

// Cancel the token after the given delay.
async fn cancel_load_test(canceled: CancellationToken, delay: Duration) {
    tokio::time::sleep(delay).await;
    canceled.cancel();
}

// Send a signal to this process after the given delay.
async fn signal_load_test(signal: Signal, delay: Duration) {
    tokio::time::sleep(delay).await;
    kill(getpid(), signal).expect("failed to send signal");
}

fn validate_canceled(metrics: &LoadTestMetrics, started: Instant) {
    // Ended long before the run time.
    assert!(started.elapsed() < Duration::from_secs(5));
    // Requests made before the cancellation are reported.
    assert!(metrics.requests > 0);
    assert_eq!(metrics.success + metrics.failures, metrics.requests);
    assert!(metrics.ended.is_some());
}

async fn run_canceled_test(test_type: TestType) {
    let server = MockServer::start();
    let index = common::mock_endpoint(&server, INDEX_PATH, 200);
    let configuration = configuration_for(&server, &test_type);

    let canceled = CancellationToken::new();
    let _ = tokio::spawn(cancel_load_test(
        canceled.clone(),
        Duration::from_millis(500),
    ));

    let started = Instant::now();
    let metrics = common::run_load_test(&configuration, &canceled).await;

    validate_canceled(&metrics, started);
    assert!(index.calls() >= metrics.requests);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
// Cancel a rate mode load test before its run time elapses.
async fn test_cancel_rate() {
    run_canceled_test(TestType::Rate).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
// Cancel a concurrency mode load test before its run time elapses.
async fn test_cancel_concurrency() {
    run_canceled_test(TestType::Concurrency).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
// A token canceled before the load test starts ends it right away.
async fn test_cancel_before_start() {
    let server = MockServer::start();
    let configuration = configuration_for(&server, &TestType::Concurrency);

    let canceled = CancellationToken::new();
    canceled.cancel();

    let started = Instant::now();
    let metrics = common::run_load_test(&configuration, &canceled).await;
    assert_eq!(metrics.requests, 0);
    assert!(started.elapsed() < Duration::from_secs(1));
}

async fn run_signaled_test(signal: Signal) {
    let server = MockServer::start();
    let index = common::mock_endpoint(&server, INDEX_PATH, 200);
    let configuration = configuration_for(&server, &TestType::Rate);

    let canceled = CancellationToken::new();
    util::setup_ctrlc_handler(&canceled);
    let _ = tokio::spawn(signal_load_test(signal, Duration::from_millis(500)));

    let started = Instant::now();
    let metrics = common::run_load_test(&configuration, &canceled).await;

    validate_canceled(&metrics, started);
    assert!(canceled.is_cancelled());
    assert!(index.calls() >= metrics.requests);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
// Cancel a load test with SIGINT, as if control-c was pressed.
async fn test_cancel_sigint() {
    run_signaled_test(SIGINT).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
// Cancel a load test with SIGTERM, as when its pod is stopped.
async fn test_cancel_sigterm() {
    run_signaled_test(SIGTERM).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
// A handler configured again for a later load test cancels the later token.
async fn test_ctrlc_follows_latest_token() {
    let first = CancellationToken::new();
    util::setup_ctrlc_handler(&first);
    let second = CancellationToken::new();
    util::setup_ctrlc_handler(&second);

    kill(getpid(), SIGINT).expect("failed to send SIGINT");
    tokio::time::timeout(Duration::from_secs(5), second.cancelled())
        .await
        .expect("SIGINT didn't cancel the latest token");
    assert!(!first.is_cancelled());
}
