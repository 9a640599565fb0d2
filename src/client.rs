//! Issues single GET requests against the target and classifies them into [`Outcome`]s.
//!
//! One [`RequestClient`] is built per load test and shared by every producer. It
//! wraps a [`reqwest::Client`], so connections are pooled and reused across
//! requests; every response body is read to the end and discarded to keep
//! that reuse working.

use reqwest::header::{HeaderValue, USER_AGENT};
use reqwest::Client;
use std::time::{Duration, Instant};
use std::{fmt, sync::Arc};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::LoadTestError;

/// Identifies requests made by this tool in the target's access logs.
pub(crate) static APP_USER_AGENT: &str =
    concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Why a single request attempt failed before a response was received.
#[derive(Clone, Debug, PartialEq)]
pub enum RequestError {
    /// The request could not be built.
    Construction(String),
    /// The request timed out.
    Timeout(String),
    /// The connection was refused or could not be established.
    Connect(String),
    /// Any other transport-level failure (DNS, TLS, reset, body read, etc).
    Transport(String),
    /// The load test ended while the request was in flight.
    Canceled,
}
impl RequestError {
    fn describe(&self) -> &str {
        match *self {
            RequestError::Construction(_) => "failed to build request",
            RequestError::Timeout(_) => "request timed out",
            RequestError::Connect(_) => "connection failed",
            RequestError::Transport(_) => "transport error",
            RequestError::Canceled => "request canceled",
        }
    }
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            RequestError::Construction(ref detail)
            | RequestError::Timeout(ref detail)
            | RequestError::Connect(ref detail)
            | RequestError::Transport(ref detail) => write!(f, "{} ({})", self.describe(), detail),
            RequestError::Canceled => write!(f, "{}", self.describe()),
        }
    }
}

impl std::error::Error for RequestError {}

impl From<reqwest::Error> for RequestError {
    fn from(err: reqwest::Error) -> RequestError {
        if err.is_timeout() {
            RequestError::Timeout(err.to_string())
        } else if err.is_connect() {
            RequestError::Connect(err.to_string())
        } else if err.is_builder() {
            RequestError::Construction(err.to_string())
        } else {
            RequestError::Transport(err.to_string())
        }
    }
}

/// The result of one request attempt.
///
/// `status_code` is 0 when no response was received, in which case `error` is
/// always set. An outcome is immutable once created.
#[derive(Clone, Debug, PartialEq)]
pub struct Outcome {
    /// Time from starting the request until response headers arrived, or until
    /// the failure was observed.
    pub latency: Duration,
    /// HTTP status code, or 0 if no response was received.
    pub status_code: u16,
    /// Set if the request failed before a response was received.
    pub error: Option<RequestError>,
}
impl Outcome {
    /// An outcome for a request that received a response.
    pub fn response(latency: Duration, status_code: u16) -> Self {
        Outcome {
            latency,
            status_code,
            error: None,
        }
    }

    /// An outcome for a request that failed without a response.
    pub fn failed(latency: Duration, error: RequestError) -> Self {
        Outcome {
            latency,
            status_code: 0,
            error: Some(error),
        }
    }

    /// Status codes in [200, 400) are successes.
    pub fn is_success(&self) -> bool {
        self.error.is_none() && (200..400).contains(&self.status_code)
    }
}

/// Shared HTTP client bound to a single validated target.
#[derive(Clone, Debug)]
pub struct RequestClient {
    client: Client,
    target: Arc<Url>,
}
impl RequestClient {
    /// Build a client with a fixed user agent and a client-level request timeout.
    pub fn new(target: Url, timeout: Duration) -> Result<Self, LoadTestError> {
        trace!("new client for {} with {:?} timeout", target, timeout);
        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(RequestClient {
            client,
            target: Arc::new(target),
        })
    }

    /// Issue one GET request and classify the result.
    ///
    /// The request is abandoned as soon as `canceled` fires, producing a
    /// [`RequestError::Canceled`] outcome. Never fails: every error is
    /// recorded in the returned [`Outcome`].
    pub async fn fetch(&self, canceled: &CancellationToken) -> Outcome {
        let started = Instant::now();
        let request = match self
            .client
            .get(self.target.as_str())
            .header(USER_AGENT, HeaderValue::from_static(APP_USER_AGENT))
            .build()
        {
            Ok(r) => r,
            Err(e) => {
                warn!("error creating request to {}: {}", self.target, e);
                return Outcome::failed(started.elapsed(), RequestError::Construction(e.to_string()));
            }
        };

        let response = tokio::select! {
            response = self.client.execute(request) => response,
            _ = canceled.cancelled() => {
                return Outcome::failed(started.elapsed(), RequestError::Canceled);
            }
        };
        let latency = started.elapsed();

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                let error = RequestError::from(e);
                match &error {
                    RequestError::Timeout(_) => debug!("network timeout error: {}", error),
                    RequestError::Connect(_) => {
                        debug!("{} (is the service running?)", error)
                    }
                    _ => debug!("HTTP request error: {}", error),
                }
                return Outcome::failed(latency, error);
            }
        };
        let status_code = response.status().as_u16();
        trace!("{}: status_code {}", self.target, status_code);

        // Read the whole body so the connection goes back into the pool.
        tokio::select! {
            body = response.bytes() => {
                if let Err(e) = body {
                    debug!("failed to read response body from {}: {}", self.target, e);
                }
            }
            _ = canceled.cancelled() => {}
        }

        Outcome::response(latency, status_code)
    }
}
