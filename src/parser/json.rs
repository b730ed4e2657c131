//! Parser for jsonlog output and generic JSON-lines PostgreSQL logs.
//!
//! Accepts one JSON object per line (the jsonlog format) as well as a
//! whole-stream JSON array of objects. Field names follow the jsonlog
//! schema with a few aliases seen in log shippers (`time`, `ts`,
//! `@timestamp`, `database`, ...). Malformed lines are counted and skipped.

use std::io::{self, BufRead, Read};

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use tracing::warn;

use super::FileStats;
use super::entry::{LogEntry, Severity, normalize_attr};
use super::prefix::parse_pg_timestamp;

/// Parses a complete jsonlog stream.
pub fn parse<R: BufRead>(mut reader: R, sink: &mut dyn FnMut(LogEntry)) -> io::Result<FileStats> {
    let mut stats = FileStats::default();

    // Peek for the array form; jsonlog proper is always line-oriented
    let head = reader.fill_buf()?;
    let is_array = head
        .iter()
        .find(|b| !b.is_ascii_whitespace())
        .is_some_and(|b| *b == b'[');

    if is_array {
        let mut text = String::new();
        reader.read_to_string(&mut text)?;
        match serde_json::from_str::<Value>(&text) {
            Ok(Value::Array(objects)) => {
                for obj in &objects {
                    consume_object(obj, &mut stats, sink);
                }
            }
            _ => {
                warn!("JSON array input did not parse as an array of log records");
                stats.skipped += 1;
            }
        }
        return Ok(stats);
    }

    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(trimmed) {
            Ok(obj) => consume_object(&obj, &mut stats, sink),
            Err(e) => {
                warn!("skipping malformed JSON log line: {}", e);
                stats.skipped += 1;
            }
        }
    }
    Ok(stats)
}

fn consume_object(obj: &Value, stats: &mut FileStats, sink: &mut dyn FnMut(LogEntry)) {
    match entry_from_object(obj) {
        Some(mut entry) => {
            entry.enrich();
            stats.entries += 1;
            sink(entry);
        }
        None => stats.skipped += 1,
    }
}

fn entry_from_object(obj: &Value) -> Option<LogEntry> {
    let obj = obj.as_object()?;

    let timestamp = ["timestamp", "time", "ts", "@timestamp"]
        .iter()
        .find_map(|key| obj.get(*key))
        .and_then(parse_timestamp_value)?;

    let severity = ["error_severity", "severity", "level"]
        .iter()
        .find_map(|key| obj.get(*key))
        .and_then(Value::as_str)
        .and_then(|s| Severity::parse(&s.to_uppercase()));

    let base = str_field(obj, &["message", "msg"]).unwrap_or_default();
    let mut message = match severity {
        Some(sev) => format!("{}:  {}", sev.as_str(), base),
        None => base,
    };
    for (keys, label) in [
        (&["detail"][..], "DETAIL"),
        (&["hint"][..], "HINT"),
        (&["statement", "query"][..], "STATEMENT"),
        (&["context"][..], "CONTEXT"),
    ] {
        if let Some(value) = str_field(obj, keys)
            && !value.is_empty()
        {
            message.push_str(&format!(" {}: {}", label, value));
        }
    }

    let sql_state = str_field(obj, &["state_code", "sql_state", "sqlstate"])
        .filter(|code| !code.is_empty() && code != "00000");

    Some(LogEntry {
        timestamp,
        severity,
        message,
        pid: obj
            .get("pid")
            .or_else(|| obj.get("process_id"))
            .and_then(Value::as_u64)
            .map(|p| p as u32),
        session_id: str_field(obj, &["session_id"]).and_then(|s| normalize_attr(&s)),
        database: str_field(obj, &["dbname", "database", "db"]).and_then(|s| normalize_attr(&s)),
        user: str_field(obj, &["user", "user_name", "username"]).and_then(|s| normalize_attr(&s)),
        application: str_field(obj, &["application_name", "app"]).and_then(|s| normalize_attr(&s)),
        client_host: str_field(obj, &["remote_host", "client"]).and_then(|s| normalize_attr(&s)),
        duration_ms: None,
        sql_state,
    })
}

fn str_field(obj: &serde_json::Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| obj.get(*key))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Accepts jsonlog's `2024-01-15 10:30:00.123 UTC` strings, RFC 3339
/// strings, and numeric Unix timestamps in seconds or milliseconds.
fn parse_timestamp_value(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => {
            if let Some((ts, _)) = parse_pg_timestamp(s) {
                return Some(ts);
            }
            DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        }
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                if i > 10_000_000_000 {
                    return Utc.timestamp_millis_opt(i).single();
                }
                return Utc.timestamp_opt(i, 0).single();
            }
            let f = n.as_f64()?;
            Utc.timestamp_opt(f as i64, ((f.fract()) * 1e9) as u32).single()
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn parse_all(input: &str) -> (Vec<LogEntry>, FileStats) {
        let mut out = Vec::new();
        let stats = parse(Cursor::new(input), &mut |e| out.push(e)).unwrap();
        (out, stats)
    }

    #[test]
    fn test_parse_jsonlog_line() {
        let input = r#"{"timestamp":"2024-01-15 10:30:01.200 UTC","user":"alice","dbname":"shop","pid":100,"error_severity":"LOG","message":"duration: 15.500 ms  statement: SELECT 1","application_name":"psql"}
"#;
        let (entries, stats) = parse_all(input);
        assert_eq!(stats.entries, 1);
        let e = &entries[0];
        assert_eq!(e.severity, Some(Severity::Log));
        assert_eq!(e.pid, Some(100));
        assert_eq!(e.database.as_deref(), Some("shop"));
        assert_eq!(e.duration_ms, Some(15.5));
        assert!(e.message.starts_with("LOG:"));
    }

    #[test]
    fn test_parse_unix_timestamps() {
        let (entries, _) =
            parse_all("{\"ts\":1705314600,\"level\":\"error\",\"message\":\"boom\"}\n");
        assert_eq!(entries[0].timestamp.timestamp(), 1705314600);

        let (entries, _) =
            parse_all("{\"ts\":1705314600123,\"level\":\"error\",\"message\":\"boom\"}\n");
        assert_eq!(entries[0].timestamp.timestamp_millis(), 1705314600123);
    }

    #[test]
    fn test_malformed_lines_skipped() {
        let input = "not json at all\n{\"timestamp\":\"2024-01-15 10:30:00 UTC\",\"error_severity\":\"LOG\",\"message\":\"ok\"}\n{\"no_timestamp\":true}\n";
        let (entries, stats) = parse_all(input);
        assert_eq!(entries.len(), 1);
        assert_eq!(stats.skipped, 2);
    }

    #[test]
    fn test_array_form() {
        let input = r#"[
            {"timestamp":"2024-01-15 10:30:00 UTC","error_severity":"LOG","message":"one"},
            {"timestamp":"2024-01-15 10:30:01 UTC","error_severity":"ERROR","message":"two","state_code":"42P01"}
        ]"#;
        let (entries, stats) = parse_all(input);
        assert_eq!(stats.entries, 2);
        assert_eq!(entries[1].sql_state.as_deref(), Some("42P01"));
    }

    #[test]
    fn test_statement_appended_to_message() {
        let input = r#"{"timestamp":"2024-01-15 10:30:00 UTC","error_severity":"ERROR","message":"relation does not exist","statement":"SELECT * FROM missing"}"#;
        let (entries, _) = parse_all(input);
        assert!(entries[0].message.contains("STATEMENT: SELECT * FROM missing"));
    }
}
