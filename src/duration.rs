//! Human-readable durations for command-line timing flags.

use std::time::Duration;

/// Parse a duration from a human-readable string.
///
/// Supports the following suffixes:
/// - `s` or no suffix: seconds
/// - `m`: minutes
/// - `h`: hours
/// - `ms`: milliseconds
///
/// # Examples
/// ```
/// use bs440_listener::duration::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("3s").unwrap(), Duration::from_secs(3));
/// assert_eq!(parse_duration("1m").unwrap(), Duration::from_secs(60));
/// assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
/// ```
pub fn parse_duration(src: &str) -> Result<Duration, String> {
    let src = src.trim();

    if src.is_empty() {
        return Err("empty duration string".to_string());
    }

    let (number, scale): (&str, fn(u64) -> Duration) = if let Some(num) = src.strip_suffix("ms") {
        (num, Duration::from_millis)
    } else if let Some(num) = src.strip_suffix('h') {
        (num, |n| Duration::from_secs(n.saturating_mul(3600)))
    } else if let Some(num) = src.strip_suffix('m') {
        (num, |n| Duration::from_secs(n.saturating_mul(60)))
    } else if let Some(num) = src.strip_suffix('s') {
        (num, Duration::from_secs)
    } else {
        (src, Duration::from_secs)
    };

    number
        .trim()
        .parse::<u64>()
        .map(scale)
        .map_err(|_| format!("invalid duration: {}", src))
}
