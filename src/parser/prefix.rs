//! Log line prefix grammar shared by the stderr and syslog parsers.
//!
//! PostgreSQL's `log_line_prefix` is free-form, so instead of requiring one
//! exact layout this module recognizes the pieces that matter: a leading
//! timestamp, the `[pid]` marker, `key=value` connection attributes and the
//! severity keyword that starts the payload.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc};

use super::entry::{LogEntry, Severity, normalize_attr};

/// Connection attributes recovered from a prefix or message text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnFields {
    pub database: Option<String>,
    pub user: Option<String>,
    pub application: Option<String>,
    pub client_host: Option<String>,
}

/// Parses a PostgreSQL log timestamp at the start of `s`:
/// `2024-01-15 10:30:00.123 UTC` or with a numeric offset (`+03`, `-05:30`).
///
/// Returns the UTC instant and the number of bytes consumed. Named zone
/// abbreviations carry no offset information and are read as UTC.
pub fn parse_pg_timestamp(s: &str) -> Option<(DateTime<Utc>, usize)> {
    let b = s.as_bytes();
    if b.len() < 19 || !b[..19].is_ascii() {
        return None;
    }
    // Cheap positional check before the real parse
    if b[4] != b'-' || b[7] != b'-' || b[10] != b' ' || b[13] != b':' || b[16] != b':' {
        return None;
    }

    let date = NaiveDate::parse_from_str(&s[..10], "%Y-%m-%d").ok()?;
    let time = NaiveTime::parse_from_str(&s[11..19], "%H:%M:%S").ok()?;

    let mut pos = 19;

    // Fractional seconds
    let mut nanos: u32 = 0;
    if b.len() > pos && b[pos] == b'.' {
        pos += 1;
        let mut digits = 0u32;
        let mut value: u64 = 0;
        while pos < b.len() && b[pos].is_ascii_digit() {
            if digits < 9 {
                value = value * 10 + u64::from(b[pos] - b'0');
                digits += 1;
            }
            pos += 1;
        }
        if digits == 0 {
            return None;
        }
        nanos = (value * 10u64.pow(9 - digits)) as u32;
    }

    let time = time.with_nanosecond(nanos)?;
    let naive = NaiveDateTime::new(date, time);

    // Optional timezone token
    let mut offset_secs: i64 = 0;
    if pos < b.len() && b[pos] == b' ' {
        let rest = &s[pos + 1..];
        let token_len = rest
            .find(|c: char| c == ' ' || c == '[' || c == ',')
            .unwrap_or(rest.len());
        let token = &rest[..token_len];
        if let Some(off) = parse_numeric_offset(token) {
            offset_secs = off;
            pos += 1 + token_len;
        } else if !token.is_empty()
            && token.len() <= 5
            && token.chars().all(|c| c.is_ascii_uppercase())
        {
            pos += 1 + token_len;
        }
    }

    let utc = Utc.from_utc_datetime(&naive) - Duration::seconds(offset_secs);
    Some((utc, pos))
}

/// Parses a numeric UTC offset: `+03`, `-05`, `+0330`, `-05:30`.
fn parse_numeric_offset(token: &str) -> Option<i64> {
    let sign = match token.chars().next()? {
        '+' => 1,
        '-' => -1,
        _ => return None,
    };
    let digits: String = token[1..].chars().filter(|c| *c != ':').collect();
    if digits.is_empty() || digits.len() > 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let (hours, minutes) = if digits.len() <= 2 {
        (digits.parse::<i64>().ok()?, 0)
    } else {
        let split = digits.len() - 2;
        (
            digits[..split].parse::<i64>().ok()?,
            digits[split..].parse::<i64>().ok()?,
        )
    };
    if hours > 15 || minutes > 59 {
        return None;
    }
    Some(sign * (hours * 3600 + minutes * 60))
}

/// Finds the severity keyword (`LOG:`, `ERROR:`, ...) closest to the start
/// of `text`. Returns the byte offset of the keyword and the severity.
pub fn find_severity(text: &str) -> Option<(usize, Severity)> {
    const KEYWORDS: [(&str, Severity); 13] = [
        ("PANIC:", Severity::Panic),
        ("FATAL:", Severity::Fatal),
        ("ERROR:", Severity::Error),
        ("WARNING:", Severity::Warning),
        ("NOTICE:", Severity::Notice),
        ("LOG:", Severity::Log),
        ("INFO:", Severity::Info),
        ("DEBUG1:", Severity::Debug),
        ("DEBUG2:", Severity::Debug),
        ("DEBUG3:", Severity::Debug),
        ("DEBUG4:", Severity::Debug),
        ("DEBUG5:", Severity::Debug),
        ("DEBUG:", Severity::Debug),
    ];

    let mut best: Option<(usize, Severity)> = None;
    for (kw, sev) in KEYWORDS {
        let mut search = 0;
        while let Some(rel) = text[search..].find(kw) {
            let pos = search + rel;
            let boundary = pos == 0
                || text[..pos]
                    .chars()
                    .next_back()
                    .is_some_and(|c| c.is_whitespace() || c == ']' || c == ')');
            if boundary {
                if best.is_none_or(|(p, _)| pos < p) {
                    best = Some((pos, sev));
                }
                break;
            }
            search = pos + kw.len();
        }
    }
    best
}

/// Scans `text` for `user=`, `db=`, `app=` and `client=` attributes.
/// Values end at the usual prefix separators and have quotes stripped.
pub fn scan_conn_fields(text: &str) -> ConnFields {
    ConnFields {
        database: extract_attr(text, "db="),
        user: extract_attr(text, "user="),
        application: extract_attr(text, "app="),
        client_host: extract_attr(text, "client=").map(strip_port),
    }
}

fn extract_attr(text: &str, key: &str) -> Option<String> {
    let mut search = 0;
    loop {
        let rel = text[search..].find(key)?;
        let pos = search + rel;
        // Avoid matching inside a longer word, e.g. "subdb=" for "db="
        let ok = pos == 0
            || text[..pos]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_whitespace() || c == ',' || c == '[' || c == '(');
        if ok {
            let rest = &text[pos + key.len()..];
            let end = rest
                .find([' ', ',', ']', ')', ';'])
                .unwrap_or(rest.len());
            return normalize_attr(&rest[..end]);
        }
        search = pos + key.len();
    }
}

/// Drops a `:port` suffix from a client address, leaving IPv6 literals with
/// no port untouched.
fn strip_port(addr: String) -> String {
    if let Some(pos) = addr.rfind(':')
        && addr[pos + 1..].chars().all(|c| c.is_ascii_digit())
        && !addr[pos + 1..].is_empty()
        && addr[..pos].matches(':').count() == 0
    {
        return addr[..pos].to_string();
    }
    addr
}

/// Parses one fully prefixed stderr-style line into a [`LogEntry`].
///
/// Returns `None` when the line does not start with a timestamp or carries
/// no severity keyword; such lines are continuations of the previous entry.
pub fn parse_prefixed_line(line: &str) -> Option<LogEntry> {
    let (timestamp, consumed) = parse_pg_timestamp(line)?;
    let rest = &line[consumed..];

    let (sev_pos, severity) = find_severity(rest)?;
    let prefix = &rest[..sev_pos];
    let fields = scan_conn_fields(prefix);

    Some(LogEntry {
        timestamp,
        severity: Some(severity),
        message: rest[sev_pos..].trim().to_string(),
        pid: extract_pid(prefix),
        session_id: extract_session_id(prefix),
        database: fields.database,
        user: fields.user,
        application: fields.application,
        client_host: fields.client_host,
        duration_ms: None,
        sql_state: None,
    })
}

/// Parses a prefixed line that carries no severity keyword but a detail
/// marker (`STATEMENT:`, `DETAIL:`, ...). PostgreSQL writes these as
/// separate prefixed lines right after the entry they belong to; the payload
/// is folded back into that entry when the PID matches.
pub fn parse_detail_line(line: &str) -> Option<(Option<u32>, &str)> {
    let (_, consumed) = parse_pg_timestamp(line)?;
    let rest = &line[consumed..];
    if find_severity(rest).is_some() {
        return None;
    }
    const MARKERS: [&str; 5] = ["STATEMENT:", "DETAIL:", "HINT:", "CONTEXT:", "QUERY:"];
    for marker in MARKERS {
        if let Some(pos) = rest.find(marker) {
            return Some((extract_pid(&rest[..pos]), rest[pos..].trim()));
        }
    }
    None
}

/// Extracts the backend PID from the first plain `[12345]` marker.
fn extract_pid(prefix: &str) -> Option<u32> {
    let mut search = 0;
    while let Some(rel) = prefix[search..].find('[') {
        let start = search + rel + 1;
        let rest = &prefix[start..];
        let end = rest.find(']')?;
        let inner = &rest[..end];
        if !inner.is_empty() && inner.chars().all(|c| c.is_ascii_digit()) {
            return inner.parse().ok();
        }
        search = start + end;
    }
    None
}

/// Extracts a `%c` session id (hex.hex) from the prefix, if present.
fn extract_session_id(prefix: &str) -> Option<String> {
    for token in prefix.split([' ', ',', '[', ']']) {
        if let Some((a, b)) = token.split_once('.')
            && a.len() >= 4
            && !b.is_empty()
            && a.chars().all(|c| c.is_ascii_hexdigit())
            && b.chars().all(|c| c.is_ascii_hexdigit())
            && token.chars().any(|c| c.is_ascii_alphabetic())
        {
            return Some(token.to_string());
        }
    }
    None
}
