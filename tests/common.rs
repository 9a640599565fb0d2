use gumdrop::Options;
use httpmock::{Method::GET, Mock, MockServer};

use rightsizer::prelude::*;

/// Not all functions are used by all tests, so we enable allow(dead_code) to avoid
/// compiler warnings during testing.

/// The following options are configured by default, if not set to a custom value:
///  --target <mock-server>
///  --run-time 1
///  --no-print-metrics
#[allow(dead_code)]
pub fn build_configuration(server: &MockServer, custom: Vec<&str>) -> LoadTestConfiguration {
    // Start with an empty configuration.
    let mut configuration: Vec<&str> = vec![];
    // Declare server_url here no matter what, so its lifetime is sufficient when needed.
    let server_url = server.base_url();

    // Merge in all custom options first.
    configuration.extend_from_slice(&custom);

    // Default to using mock server if not otherwise configured.
    if !configuration.contains(&"--target") {
        configuration.extend_from_slice(&["--target", &server_url]);
    }

    // Default to running for 1 second if not otherwise configured.
    if !configuration.contains(&"--run-time") {
        configuration.extend_from_slice(&["--run-time", "1"]);
    }

    // Don't print the summary if not otherwise configured.
    if !configuration.contains(&"--no-print-metrics") {
        configuration.push("--no-print-metrics");
    }

    // Parse these options to generate a LoadTestConfiguration.
    LoadTestConfiguration::parse_args_default(&configuration)
        .expect("failed to parse options and generate a configuration")
}

/// Mock a single path that always responds with `status`.
#[allow(dead_code)]
pub fn mock_endpoint<'a>(server: &'a MockServer, path: &str, status: u16) -> Mock<'a> {
    server.mock(|when, then| {
        when.method(GET).path(path);
        then.status(status);
    })
}

/// Validate the configuration and run the load test to completion.
#[allow(dead_code)]
pub async fn run_load_test(
    configuration: &LoadTestConfiguration,
    canceled: &CancellationToken,
) -> LoadTestMetrics {
    let settings = configuration
        .settings()
        .expect("failed to build settings from configuration");

    LoadTest::new(settings)
        .run(canceled)
        .await
        .expect("failed to run load test")
}
