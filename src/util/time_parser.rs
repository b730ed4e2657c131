//! Flexible time parser for CLI arguments.
//!
//! Supports multiple formats:
//! - ISO 8601: `2026-02-07T17:00:00`
//! - Unix timestamp: `1738944000`
//! - Relative: `-1h`, `-30m`, `-2d`
//! - Date+time (UTC): `2026-02-07:07:00` or `2026-02-07:07:00:00`
//! - Time only (current day, UTC): `07:00`
//!
//! Also resolves the `--begin`/`--end`/`--window`/`--last` argument set into
//! a single half-open time window.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};

/// Error type for time parsing failures.
#[derive(Debug, Clone)]
pub struct TimeParseError {
    pub input: String,
    pub message: String,
}

impl std::fmt::Display for TimeParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Failed to parse time '{}': {}", self.input, self.message)
    }
}

impl std::error::Error for TimeParseError {}

/// Parse a flexible time string into a Unix timestamp (seconds since epoch).
///
/// # Supported formats
///
/// | Format | Example | Description |
/// |--------|---------|-------------|
/// | ISO 8601 | `2026-02-07T17:00:00` | Full datetime |
/// | Unix timestamp | `1738944000` | Seconds since epoch |
/// | Relative | `-1h`, `-30m`, `-2d` | Relative to now |
/// | Date+time | `2026-02-07:07:00` | UTC, colon separator |
/// | Date+time+sec | `2026-02-07:07:00:00` | UTC, with seconds |
/// | Time only | `07:00` | Current day, UTC |
pub fn parse_time(input: &str) -> Result<i64, TimeParseError> {
    let input = input.trim();

    // Try each format in order
    if let Some(ts) = try_parse_unix_timestamp(input) {
        return Ok(ts);
    }

    if let Some(ts) = try_parse_relative(input) {
        return Ok(ts);
    }

    if let Some(ts) = try_parse_iso8601(input) {
        return Ok(ts);
    }

    if let Some(ts) = try_parse_date_colon_time(input) {
        return Ok(ts);
    }

    if let Some(ts) = try_parse_time_only(input) {
        return Ok(ts);
    }

    Err(TimeParseError {
        input: input.to_string(),
        message: "Unrecognized format. Use: ISO 8601 (2026-02-07T17:00:00), \
                  Unix timestamp (1738944000), relative (-1h, -30m, -2d), \
                  date:time (2026-02-07:07:00), or time only (07:00)"
            .to_string(),
    })
}

/// Parses a duration expression like `30s`, `15m`, `1h`, `2d`, `1w` into seconds.
pub fn parse_duration_secs(input: &str) -> Result<i64, TimeParseError> {
    let input = input.trim();
    let err = || TimeParseError {
        input: input.to_string(),
        message: "Unrecognized duration. Use a number with a unit: 30s, 15m, 1h, 2d, 1w"
            .to_string(),
    };

    if input.len() < 2 {
        return Err(err());
    }

    let unit = input.chars().last().ok_or_else(err)?;
    let number: i64 = input[..input.len() - 1].parse().map_err(|_| err())?;
    if number < 0 {
        return Err(err());
    }

    match unit {
        's' => Ok(number),
        'm' => Ok(number * 60),
        'h' => Ok(number * 3600),
        'd' => Ok(number * 86400),
        'w' => Ok(number * 604800),
        _ => Err(err()),
    }
}

/// Resolves the `--begin`/`--end`/`--window`/`--last` argument set into a
/// half-open `[begin, end)` window of UTC timestamps.
///
/// Rules:
/// - `--last D` is a shorthand for `begin = now - D` and must not be combined
///   with any of the other three.
/// - `--window D` fills in the missing boundary next to exactly one of
///   `--begin` or `--end`; combining it with both (or with neither) is an
///   error.
pub fn resolve_time_bounds(
    begin: Option<&str>,
    end: Option<&str>,
    window: Option<&str>,
    last: Option<&str>,
) -> Result<(Option<DateTime<Utc>>, Option<DateTime<Utc>>), TimeParseError> {
    if let Some(last) = last {
        if begin.is_some() || end.is_some() || window.is_some() {
            return Err(TimeParseError {
                input: last.to_string(),
                message: "--last cannot be combined with --begin, --end or --window".to_string(),
            });
        }
        let secs = parse_duration_secs(last)?;
        let begin_ts = Utc::now().timestamp() - secs;
        return Ok((to_datetime(begin_ts, last)?, None));
    }

    let begin_ts = begin.map(parse_time).transpose()?;
    let end_ts = end.map(parse_time).transpose()?;

    let (begin_ts, end_ts) = match window {
        None => (begin_ts, end_ts),
        Some(w) => {
            let secs = parse_duration_secs(w)?;
            match (begin_ts, end_ts) {
                (Some(b), None) => (Some(b), Some(b + secs)),
                (None, Some(e)) => (Some(e - secs), Some(e)),
                (Some(_), Some(_)) => {
                    return Err(TimeParseError {
                        input: w.to_string(),
                        message: "--window cannot be combined with both --begin and --end"
                            .to_string(),
                    });
                }
                (None, None) => {
                    return Err(TimeParseError {
                        input: w.to_string(),
                        message: "--window requires either --begin or --end".to_string(),
                    });
                }
            }
        }
    };

    if let (Some(b), Some(e)) = (begin_ts, end_ts)
        && b >= e
    {
        return Err(TimeParseError {
            input: format!("{b}..{e}"),
            message: "Time window is empty: begin must be before end".to_string(),
        });
    }

    let begin_dt = match begin_ts {
        Some(ts) => to_datetime(ts, begin.unwrap_or("--begin"))?,
        None => None,
    };
    let end_dt = match end_ts {
        Some(ts) => to_datetime(ts, end.unwrap_or("--end"))?,
        None => None,
    };
    Ok((begin_dt, end_dt))
}

fn to_datetime(ts: i64, input: &str) -> Result<Option<DateTime<Utc>>, TimeParseError> {
    match Utc.timestamp_opt(ts, 0).single() {
        Some(dt) => Ok(Some(dt)),
        None => Err(TimeParseError {
            input: input.to_string(),
            message: "Timestamp out of range".to_string(),
        }),
    }
}

/// Try to parse as Unix timestamp (plain integer).
fn try_parse_unix_timestamp(input: &str) -> Option<i64> {
    if input.chars().all(|c| c.is_ascii_digit()) && !input.is_empty() {
        input.parse::<i64>().ok()
    } else {
        None
    }
}

/// Try to parse as relative time (-1h, -30m, -2d, -1w).
fn try_parse_relative(input: &str) -> Option<i64> {
    let rest = input.strip_prefix('-')?;
    let secs = parse_duration_secs(rest).ok()?;
    Some(Utc::now().timestamp() - secs)
}

/// Try to parse as ISO 8601 datetime.
fn try_parse_iso8601(input: &str) -> Option<i64> {
    if input.contains('T') {
        // With timezone first
        if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
            return Some(dt.with_timezone(&Utc).timestamp());
        }

        // Naive, assume UTC
        if let Ok(ndt) = NaiveDateTime::parse_from_str(input, "%Y-%m-%dT%H:%M:%S") {
            return Some(Utc.from_utc_datetime(&ndt).timestamp());
        }

        if let Ok(ndt) = NaiveDateTime::parse_from_str(input, "%Y-%m-%dT%H:%M") {
            return Some(Utc.from_utc_datetime(&ndt).timestamp());
        }
    }

    None
}

/// Try to parse as date:time format (2026-02-07:07:00 or 2026-02-07:07:00:00).
fn try_parse_date_colon_time(input: &str) -> Option<i64> {
    if !input.is_ascii() || !input.contains('-') {
        return None;
    }

    // Date format: YYYY-MM-DD (10 chars), then a colon separates the time
    if input.len() < 11 {
        return None;
    }

    let date_part = &input[..10];
    if !input[10..].starts_with(':') {
        return None;
    }

    let time_part = &input[11..];

    let date = NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()?;

    let time = if time_part.len() == 5 {
        NaiveTime::parse_from_str(time_part, "%H:%M").ok()?
    } else if time_part.len() == 8 {
        NaiveTime::parse_from_str(time_part, "%H:%M:%S").ok()?
    } else {
        return None;
    };

    let datetime = NaiveDateTime::new(date, time);
    Some(Utc.from_utc_datetime(&datetime).timestamp())
}

/// Try to parse as time only (07:00 = today at that time, UTC).
fn try_parse_time_only(input: &str) -> Option<i64> {
    if input.len() != 5 {
        return None;
    }

    if input.chars().nth(2) != Some(':') {
        return None;
    }

    let time = NaiveTime::parse_from_str(input, "%H:%M").ok()?;
    let today = Utc::now().date_naive();
    let datetime = NaiveDateTime::new(today, time);

    Some(Utc.from_utc_datetime(&datetime).timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unix_timestamp() {
        assert_eq!(parse_time("1738944000").unwrap(), 1738944000);
        assert_eq!(parse_time("0").unwrap(), 0);
    }

    #[test]
    fn test_relative_time() {
        let now = Utc::now().timestamp();

        let ts = parse_time("-1h").unwrap();
        assert!((ts - (now - 3600)).abs() < 2);

        let ts = parse_time("-30m").unwrap();
        assert!((ts - (now - 1800)).abs() < 2);

        let ts = parse_time("-2d").unwrap();
        assert!((ts - (now - 172800)).abs() < 2);
    }

    #[test]
    fn test_iso8601() {
        let expected = NaiveDateTime::new(
            NaiveDate::from_ymd_opt(2026, 2, 7).unwrap(),
            NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
        );
        let expected_ts = Utc.from_utc_datetime(&expected).timestamp();

        assert_eq!(parse_time("2026-02-07T17:00:00").unwrap(), expected_ts);
        assert_eq!(parse_time("2026-02-07T17:00").unwrap(), expected_ts);
        assert_eq!(parse_time("2026-02-07:17:00").unwrap(), expected_ts);
        assert_eq!(parse_time("2026-02-07:17:00:00").unwrap(), expected_ts);
    }

    #[test]
    fn test_time_only() {
        let ts = parse_time("07:00").unwrap();
        let today = Utc::now().date_naive();
        let expected = NaiveDateTime::new(today, NaiveTime::from_hms_opt(7, 0, 0).unwrap());
        assert_eq!(ts, Utc.from_utc_datetime(&expected).timestamp());
    }

    #[test]
    fn test_invalid_formats() {
        assert!(parse_time("").is_err());
        assert!(parse_time("invalid").is_err());
        assert!(parse_time("2026-02-07").is_err()); // date only, no time
        assert!(parse_time("-abc").is_err());
    }

    #[test]
    fn test_parse_duration_secs() {
        assert_eq!(parse_duration_secs("30s").unwrap(), 30);
        assert_eq!(parse_duration_secs("15m").unwrap(), 900);
        assert_eq!(parse_duration_secs("1h").unwrap(), 3600);
        assert_eq!(parse_duration_secs("2d").unwrap(), 172800);
        assert!(parse_duration_secs("h").is_err());
        assert!(parse_duration_secs("10x").is_err());
    }

    #[test]
    fn test_resolve_bounds_window_fills_end() {
        let (b, e) = resolve_time_bounds(Some("1700000000"), None, Some("1h"), None).unwrap();
        assert_eq!(b.unwrap().timestamp(), 1700000000);
        assert_eq!(e.unwrap().timestamp(), 1700003600);
    }

    #[test]
    fn test_resolve_bounds_window_fills_begin() {
        let (b, e) = resolve_time_bounds(None, Some("1700003600"), Some("1h"), None).unwrap();
        assert_eq!(b.unwrap().timestamp(), 1700000000);
        assert_eq!(e.unwrap().timestamp(), 1700003600);
    }

    #[test]
    fn test_resolve_bounds_conflicts() {
        assert!(
            resolve_time_bounds(Some("1700000000"), Some("1700003600"), Some("1h"), None).is_err()
        );
        assert!(resolve_time_bounds(None, None, Some("1h"), None).is_err());
        assert!(resolve_time_bounds(Some("1700000000"), None, None, Some("1h")).is_err());
    }

    #[test]
    fn test_resolve_bounds_last() {
        let now = Utc::now().timestamp();
        let (b, e) = resolve_time_bounds(None, None, None, Some("1h")).unwrap();
        assert!(e.is_none());
        assert!((b.unwrap().timestamp() - (now - 3600)).abs() < 2);
    }

    #[test]
    fn test_resolve_bounds_empty_window() {
        assert!(resolve_time_bounds(Some("1700003600"), Some("1700000000"), None, None).is_err());
    }
}
