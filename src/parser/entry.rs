//! Canonical log record shared by all format parsers.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// PostgreSQL message severity, ordered from most to least severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Severity {
    Panic,
    Fatal,
    Error,
    Warning,
    Notice,
    Log,
    Info,
    Debug,
}

impl Severity {
    /// Parses a severity keyword as it appears in log output.
    /// `DEBUG1`..`DEBUG5` all map to [`Severity::Debug`].
    pub fn parse(token: &str) -> Option<Severity> {
        let token = token.trim_end_matches(|c: char| c.is_ascii_digit());
        match token {
            "PANIC" => Some(Severity::Panic),
            "FATAL" => Some(Severity::Fatal),
            "ERROR" => Some(Severity::Error),
            "WARNING" => Some(Severity::Warning),
            "NOTICE" => Some(Severity::Notice),
            "LOG" => Some(Severity::Log),
            "INFO" => Some(Severity::Info),
            "DEBUG" => Some(Severity::Debug),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Panic => "PANIC",
            Severity::Fatal => "FATAL",
            Severity::Error => "ERROR",
            Severity::Warning => "WARNING",
            Severity::Notice => "NOTICE",
            Severity::Log => "LOG",
            Severity::Info => "INFO",
            Severity::Debug => "DEBUG",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One normalized log record, immutable once emitted into the pipeline.
///
/// `message` always carries the severity keyword prefix (`ERROR: ...`) plus
/// any continuation lines (`STATEMENT:`, `DETAIL:`, ...) folded in, so
/// downstream analyzers can work on a single string regardless of the
/// source format.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub severity: Option<Severity>,
    pub message: String,
    pub pid: Option<u32>,
    pub session_id: Option<String>,
    pub database: Option<String>,
    pub user: Option<String>,
    pub application: Option<String>,
    pub client_host: Option<String>,
    pub duration_ms: Option<f64>,
    pub sql_state: Option<String>,
}

impl LogEntry {
    /// Fills derived fields from the message text: statement duration and
    /// SQLSTATE code. Parsers call this once, after continuation lines have
    /// been folded in.
    pub fn enrich(&mut self) {
        if self.duration_ms.is_none() {
            self.duration_ms = extract_duration_ms(&self.message);
        }
        if self.sql_state.is_none() {
            self.sql_state = extract_sql_state(&self.message);
        }
    }
}

/// Extracts the duration in milliseconds from a `duration: 12.345 ms` marker.
pub fn extract_duration_ms(message: &str) -> Option<f64> {
    let pos = message.find("duration: ")?;
    let rest = &message[pos + "duration: ".len()..];
    let end = rest
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(rest.len());
    let value: f64 = rest[..end].parse().ok()?;
    if rest[end..].trim_start().starts_with("ms") {
        Some(value)
    } else {
        None
    }
}

/// Extracts a five-character SQLSTATE code from common message shapes:
/// `SQLSTATE = '42P01'`, `ERROR: 42P01:` or a `] 42P01` marker from
/// `%e` in log_line_prefix.
pub fn extract_sql_state(message: &str) -> Option<String> {
    if let Some(pos) = message.find("SQLSTATE") {
        let rest = &message[pos + "SQLSTATE".len()..];
        let rest = rest.trim_start_matches([' ', '=', '\'']);
        let code: String = rest.chars().take(5).collect();
        if is_sql_state(&code) {
            return Some(code);
        }
    }

    for marker in ["ERROR: ", "FATAL: ", "PANIC: ", "] "] {
        if let Some(pos) = message.find(marker) {
            let rest = &message[pos + marker.len()..];
            let code: String = rest.chars().take(5).collect();
            if is_sql_state(&code) && rest[5..].starts_with([':', ' ']) {
                return Some(code);
            }
        }
    }

    None
}

fn is_sql_state(code: &str) -> bool {
    code.len() == 5
        && code
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase())
        && code.chars().any(|c| c.is_ascii_digit())
}

/// Normalizes a connection attribute value. Empty values and the
/// `[unknown]` placeholder PostgreSQL emits for unset attributes both
/// collapse to `None`.
pub fn normalize_attr(value: &str) -> Option<String> {
    let value = value.trim().trim_matches(['"', '\'']);
    if value.is_empty() || value.eq_ignore_ascii_case("unknown") || value == "[unknown]" {
        None
    } else {
        Some(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_parse() {
        assert_eq!(Severity::parse("LOG"), Some(Severity::Log));
        assert_eq!(Severity::parse("ERROR"), Some(Severity::Error));
        assert_eq!(Severity::parse("DEBUG3"), Some(Severity::Debug));
        assert_eq!(Severity::parse("STATEMENT"), None);
    }

    #[test]
    fn test_extract_duration() {
        assert_eq!(
            extract_duration_ms("LOG: duration: 12.345 ms statement: SELECT 1"),
            Some(12.345)
        );
        assert_eq!(extract_duration_ms("LOG: duration: 250 ms"), Some(250.0));
        assert_eq!(extract_duration_ms("LOG: checkpoint complete"), None);
        assert_eq!(extract_duration_ms("LOG: duration: abc ms"), None);
    }

    #[test]
    fn test_extract_sql_state() {
        assert_eq!(
            extract_sql_state("ERROR: 42P01: relation \"x\" does not exist"),
            Some("42P01".to_string())
        );
        assert_eq!(
            extract_sql_state("ERROR: syntax error SQLSTATE = '42601'"),
            Some("42601".to_string())
        );
        assert_eq!(extract_sql_state("LOG: connection received"), None);
        // ERROR alone must not match the message text as a code
        assert_eq!(extract_sql_state("ERROR: weird stuff"), None);
    }

    #[test]
    fn test_normalize_attr() {
        assert_eq!(normalize_attr("appdb"), Some("appdb".to_string()));
        assert_eq!(normalize_attr("\"quoted\""), Some("quoted".to_string()));
        assert_eq!(normalize_attr("[unknown]"), None);
        assert_eq!(normalize_attr("unknown"), None);
        assert_eq!(normalize_attr(""), None);
    }
}
