//! Utility functions used by the load test, and available to callers embedding it.

use lazy_static::lazy_static;
use regex::Regex;
use std::str::FromStr;
use std::sync::RwLock;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Parse a string representing a time span and return it as a [`Duration`].
///
/// Can be specified as an integer, indicating seconds. Or can use integers
/// together with one or more of "h", "m", "s" and "ms", indicating "hours",
/// "minutes", "seconds" and "milliseconds".
///
/// Valid formats include: 20, 20s, 250ms, 3m, 2h, 1h20m, 3h30m10s, etc.
///
/// Returns `None` if the time span doesn't fit in a [`Duration`].
///
/// # Example
/// ```rust
/// use std::time::Duration;
/// use rightsizer::util;
///
/// // 1 hour 2 minutes and 3 seconds.
/// assert_eq!(util::parse_timespan("1h2m3s"), Some(Duration::from_secs(3_723)));
///
/// // 45 seconds.
/// assert_eq!(util::parse_timespan("45"), Some(Duration::from_secs(45)));
///
/// // A quarter of a second.
/// assert_eq!(util::parse_timespan("250ms"), Some(Duration::from_millis(250)));
///
/// // Invalid value is no time at all.
/// assert_eq!(util::parse_timespan("foo"), Some(Duration::from_secs(0)));
///
/// // Too large to represent.
/// assert_eq!(util::parse_timespan("5124095576030432h"), None);
/// ```
pub fn parse_timespan(time_str: &str) -> Option<Duration> {
    match u64::from_str(time_str) {
        // If an integer is passed in, assume it's seconds
        Ok(t) => {
            trace!("{} is integer: {} seconds", time_str, t);
            Some(Duration::from_secs(t))
        }
        // Otherwise use a regex to extract each value and unit pair from the string.
        Err(_) => {
            let re = Regex::new(r"(?P<value>\d+)(?P<unit>ms|h|m|s)")
                .expect("failed to compile timespan regex");
            let mut total = Duration::from_secs(0);
            for time_match in re.captures_iter(time_str) {
                let value = match u64::from_str(&time_match["value"]) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!("{} in {} is out of range: {}", &time_match["value"], time_str, e);
                        return None;
                    }
                };
                let span = match &time_match["unit"] {
                    "h" => value.checked_mul(60 * 60).map(Duration::from_secs),
                    "m" => value.checked_mul(60).map(Duration::from_secs),
                    "s" => Some(Duration::from_secs(value)),
                    _ => Some(Duration::from_millis(value)),
                }?;
                total = total.checked_add(span)?;
            }
            trace!("{} is {:?}", time_str, total);
            Some(total)
        }
    }
}

/// Truncate strings when they're too long to display.
///
/// If a string is longer than the specified max length, this function removes
/// the extra characters and replaces the last two with a double-period ellipsis.
///
/// # Example
/// ```rust
/// use rightsizer::util;
///
/// let target = util::truncate_string("http://example.com/very/long/path", 20);
/// assert_eq!(target, "http://example.com..");
/// ```
pub fn truncate_string(str_to_truncate: &str, max_length: usize) -> String {
    if str_to_truncate.char_indices().count() > max_length {
        match str_to_truncate.char_indices().nth(max_length.saturating_sub(2)) {
            None => str_to_truncate.to_string(),
            Some((idx, _)) => format!("{}..", &str_to_truncate[..idx]),
        }
    } else {
        str_to_truncate.to_string()
    }
}

lazy_static! {
    /// Token canceled by the next ctrl-c or SIGTERM.
    static ref CTRLC_TOKEN: RwLock<Option<CancellationToken>> = RwLock::new(None);
}

/// Configure the control-c handler. Cancel the load test cleanly on the first
/// ctrl-c or SIGTERM. Exit abruptly on the second.
///
/// The handler is installed once per process. Each call points it at
/// `canceled`, so embedding callers can run one load test after another and
/// every signal reaches the token of the current one.
pub fn setup_ctrlc_handler(canceled: &CancellationToken) {
    *CTRLC_TOKEN.write().unwrap_or_else(|e| e.into_inner()) = Some(canceled.clone());

    match ctrlc::set_handler(move || {
        let current = CTRLC_TOKEN.read().unwrap_or_else(|e| e.into_inner()).clone();
        let canceled = match current {
            Some(c) => c,
            None => return,
        };
        // We've caught a ctrl-c, determine if it's the first time or an additional time.
        if canceled.is_cancelled() {
            warn!("caught another ctrl-c, exiting immediately...");
            std::process::exit(1);
        } else {
            warn!("caught ctrl-c, stopping...");
            canceled.cancel();
        }
    }) {
        Ok(_) => (),
        Err(e) => {
            // Already installed, it now cancels the token set above.
            debug!("reusing ctrl-c handler: {}", e);
        }
    }
}
