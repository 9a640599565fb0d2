/// Validate how failing targets and invalid configuration are reported.
use httpmock::MockServer;
use std::time::Duration;

mod common;

use rightsizer::prelude::*;

// Paths used in load tests performed during these tests.
const ERROR_PATH: &str = "/error";
const MISSING_PATH: &str = "/missing";

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
// Responses outside [200, 400) are failures that still have a status code and latency.
async fn test_error_responses() {
    let server = MockServer::start();
    let error = common::mock_endpoint(&server, ERROR_PATH, 503);

    let configuration = common::build_configuration(
        &server,
        vec![
            "--target",
            &server.url(ERROR_PATH),
            "--rps",
            "20",
            "--run-time",
            "500ms",
        ],
    );
    let metrics = common::run_load_test(&configuration, &CancellationToken::new()).await;

    assert!(metrics.requests > 0);
    assert_eq!(metrics.success, 0);
    assert_eq!(metrics.failures, metrics.requests);
    assert_eq!(metrics.status_codes.get(&503), Some(&metrics.requests));
    assert_eq!(metrics.latencies.len(), metrics.requests);
    assert!((metrics.failure_rate() - 100.0).abs() < 1e-9);
    assert!(error.calls() > 0);

    let summary = metrics.to_string();
    assert!(summary.contains("[503] Service Unavailable"));
    assert!(summary.contains("Warning:"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
// Mixed outcomes keep success and failure counts consistent.
async fn test_not_found_is_failure() {
    let server = MockServer::start();
    common::mock_endpoint(&server, MISSING_PATH, 404);

    let configuration = common::build_configuration(
        &server,
        vec![
            "--target",
            &server.url(MISSING_PATH),
            "--concurrency",
            "2",
            "--run-time",
            "300ms",
        ],
    );
    let metrics = common::run_load_test(&configuration, &CancellationToken::new()).await;

    assert!(metrics.requests > 0);
    assert_eq!(metrics.success + metrics.failures, metrics.requests);
    assert_eq!(metrics.status_codes.get(&404), Some(&metrics.failures));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
// Nothing listening on the target: every request fails without a status code.
async fn test_unreachable_target() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let target = format!("127.0.0.1:{}", port);

    let settings = TestSettings::new(&target, "500ms")
        .unwrap()
        .set_rps(10)
        .set_request_timeout(Duration::from_secs(1))
        .set_print_metrics(false);
    let metrics = LoadTest::new(settings)
        .run(&CancellationToken::new())
        .await
        .unwrap();

    assert!(metrics.requests > 0);
    assert_eq!(metrics.success, 0);
    assert_eq!(metrics.failures, metrics.requests);
    assert!(metrics.status_codes.is_empty());
    assert!(metrics.latencies.is_empty());
    assert_eq!(metrics.fastest(), None);

    let summary = metrics.to_string();
    assert!(summary.contains("No status codes recorded"));
}

#[tokio::test]
// An unparseable target fails before any request is made.
async fn test_malformed_target() {
    let settings = TestSettings::new("::not a url::", "1s")
        .unwrap()
        .set_print_metrics(false);

    match LoadTest::new(settings).run(&CancellationToken::new()).await {
        Err(LoadTestError::MalformedTarget { target, .. }) => {
            assert_eq!(target, "::not a url::");
        }
        other => panic!("expected MalformedTarget, got {:?}", other.map(|m| m.requests)),
    }
}

#[test]
// Invalid options are rejected before a load test is built.
fn test_invalid_configuration() {
    let server = MockServer::start();

    let configuration = common::build_configuration(&server, vec!["--rps", "0"]);
    match configuration.settings() {
        Err(LoadTestError::InvalidOption { option, .. }) => assert_eq!(option, "--rps"),
        other => panic!("expected InvalidOption, got {:?}", other),
    }

    let configuration = common::build_configuration(&server, vec!["--run-time", "never"]);
    assert!(configuration.settings().is_err());
}
