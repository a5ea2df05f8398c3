//! Rate-limit reset-hint parsing.
//!
//! Providers phrase their cooldown horizon in a handful of formats:
//! "try again in 4m36.48s", "try again in 150 seconds", "retry in 2
//! minutes", or an `X-RateLimit-Reset` unix-millisecond timestamp.
//! Unrecognized formats yield `None` and the caller applies the default
//! cooldown.

use chrono::{DateTime, Duration, Utc};

/// Extract a cooldown duration from a provider error message.
pub fn parse_retry_hint(message: &str, now: DateTime<Utc>) -> Option<Duration> {
    let lower = message.to_lowercase();

    if let Some(idx) = lower.find("try again in")
        && let Some(duration) = parse_duration_at(&lower[idx + "try again in".len()..])
    {
        return Some(duration);
    }

    if let Some(idx) = lower.find("x-ratelimit-reset")
        && let Some(duration) = parse_unix_ms_reset(&lower[idx..], now)
    {
        return Some(duration);
    }

    if let Some(idx) = lower.find("retry")
        && let Some(duration) = parse_duration_at(&lower[idx..])
    {
        return Some(duration);
    }

    None
}

/// Parse the first number (and unit) in `s` into a duration. Handles
/// the compound "4m36.48s" form as well as "<n> s|seconds|m|min|minutes".
fn parse_duration_at(s: &str) -> Option<Duration> {
    let s = s.trim_start_matches(|c: char| !c.is_ascii_digit());
    let (value, rest) = take_number(s)?;
    let rest = rest.trim_start();

    if let Some(tail) = rest.strip_prefix('m') {
        // Compound minutes+seconds: "4m36.48s".
        if tail.chars().next().is_some_and(|c| c.is_ascii_digit()) {
            let (seconds, tail) = take_number(tail)?;
            if tail.trim_start().starts_with('s') {
                return from_secs_f64(value * 60.0 + seconds);
            }
            return None;
        }
        // "m", "min", "minutes".
        return from_secs_f64(value * 60.0);
    }

    if rest.starts_with('s') {
        return from_secs_f64(value);
    }

    None
}

fn parse_unix_ms_reset(s: &str, now: DateTime<Utc>) -> Option<Duration> {
    let digits: String = s
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    // Millisecond timestamps are at least 13 digits this century.
    if digits.len() < 13 {
        return None;
    }
    let reset_ms = digits.parse::<i64>().ok()?;
    let reset_at = DateTime::from_timestamp_millis(reset_ms)?;
    let remaining = reset_at - now;
    (remaining > Duration::zero()).then_some(remaining)
}

fn take_number(s: &str) -> Option<(f64, &str)> {
    let mut end = 0;
    let mut seen_dot = false;
    for (i, c) in s.char_indices() {
        if c.is_ascii_digit() {
            end = i + 1;
        } else if c == '.' && !seen_dot && end > 0 {
            seen_dot = true;
            end = i + 1;
        } else {
            break;
        }
    }
    if end == 0 {
        return None;
    }
    let value = s[..end].trim_end_matches('.').parse::<f64>().ok()?;
    Some((value, &s[end..]))
}

fn from_secs_f64(secs: f64) -> Option<Duration> {
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    Duration::try_milliseconds((secs * 1000.0) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, 10, 0, 0).unwrap()
    }

    #[test]
    fn compound_minutes_seconds() {
        let hint = parse_retry_hint("Rate limit reached. Please try again in 4m36.48s", now());
        assert_eq!(hint.unwrap().num_milliseconds(), 276_480);
    }

    #[test]
    fn plain_seconds_and_minutes() {
        assert_eq!(
            parse_retry_hint("try again in 150 seconds", now())
                .unwrap()
                .num_seconds(),
            150
        );
        assert_eq!(
            parse_retry_hint("try again in 2.5 minutes", now())
                .unwrap()
                .num_seconds(),
            150
        );
        assert_eq!(
            parse_retry_hint("rate limit reached, try again in 2m30s", now())
                .unwrap()
                .num_seconds(),
            150
        );
    }

    #[test]
    fn retry_in_form() {
        assert_eq!(
            parse_retry_hint("429: retry in 90 seconds", now())
                .unwrap()
                .num_seconds(),
            90
        );
        assert_eq!(
            parse_retry_hint("please retry in 3 minutes", now())
                .unwrap()
                .num_seconds(),
            180
        );
    }

    #[test]
    fn unix_ms_reset_header() {
        let reset_at = now() + Duration::seconds(120);
        let message = format!("X-RateLimit-Reset: {}", reset_at.timestamp_millis());
        let hint = parse_retry_hint(&message, now()).unwrap();
        assert_eq!(hint.num_seconds(), 120);
    }

    #[test]
    fn stale_reset_timestamp_ignored() {
        let reset_at = now() - Duration::seconds(120);
        let message = format!("X-RateLimit-Reset: {}", reset_at.timestamp_millis());
        assert!(parse_retry_hint(&message, now()).is_none());
    }

    #[test]
    fn unknown_format_is_none() {
        assert!(parse_retry_hint("quota exhausted, come back tomorrow", now()).is_none());
        assert!(parse_retry_hint("retry later", now()).is_none());
    }
}
