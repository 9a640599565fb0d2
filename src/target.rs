//! Normalizes the user-supplied target into a well-formed URL.
//!
//! Targets are frequently given as a bare `host:port` or service name. Anything
//! without an `http://` or `https://` prefix is treated as plain HTTP. No DNS
//! resolution or connectivity check happens here: an unreachable target is
//! reported per request, as failed outcomes.

use url::Url;

use crate::LoadTestError;

const HTTP_PREFIX: &str = "http://";
const HTTPS_PREFIX: &str = "https://";

/// Returns `true` if the target already carries an HTTP(S) scheme.
pub fn has_http_scheme(target: &str) -> bool {
    target.starts_with(HTTP_PREFIX) || target.starts_with(HTTPS_PREFIX)
}

/// Validate a target, prepending `http://` if it has no HTTP(S) scheme.
///
/// # Example
/// ```rust
/// use rightsizer::target;
///
/// let url = target::validate_target("example.com").unwrap();
/// assert_eq!(url.as_str(), "http://example.com/");
///
/// assert!(target::validate_target("::not a url::").is_err());
/// ```
pub fn validate_target(target: &str) -> Result<Url, LoadTestError> {
    let normalized = if has_http_scheme(target) {
        target.to_string()
    } else {
        let normalized = format!("{}{}", HTTP_PREFIX, target);
        info!("added {} prefix, target is now: {}", HTTP_PREFIX, normalized);
        normalized
    };

    let url = Url::parse(&normalized).map_err(|parse_error| LoadTestError::MalformedTarget {
        target: target.to_string(),
        detail: format!("{} is not a valid URL", normalized),
        parse_error,
    })?;

    info!("validated target URL: {}", url);
    Ok(url)
}
