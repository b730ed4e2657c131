//! Parser for syslog-wrapped PostgreSQL logs.
//!
//! Handles three envelope shapes around the same inner message grammar:
//!
//! - BSD: `Jan 15 10:30:00 host postgres[100]: [1-1] LOG:  ...`
//! - ISO: `2024-01-15T10:30:00.123+00:00 host postgres[100]: [1-1] LOG: ...`
//! - RFC 5424: `<134>1 2024-01-15T10:30:00Z host postgres 100 - - LOG: ...`
//!
//! The syslog daemon splits multi-line messages into numbered `[seq-part]`
//! chunks; parts with a part number above one are folded back into the
//! entry they continue. Messages logged before the collector took over
//! (startup banners and the like) carry no severity keyword and are kept
//! as bare entries.

use std::io::{self, BufRead};

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};

use super::FileStats;
use super::detect::LogFormat;
use super::entry::{LogEntry, Severity};
use super::prefix::{find_severity, parse_pg_timestamp, scan_conn_fields};

/// Syslog's tab marker: literal tabs are escaped as `#011` on the wire.
const TAB_MARKER: &str = "#011";

struct Envelope {
    timestamp: DateTime<Utc>,
    pid: Option<u32>,
    /// Part number from the `[seq-part]` chunk marker, when present.
    part: Option<u32>,
    payload: String,
}

/// Streaming syslog parser with the same one-entry lookbehind as stderr.
pub struct SyslogParser {
    variant: LogFormat,
    pending: Option<LogEntry>,
    stats: FileStats,
    year: i32,
}

impl SyslogParser {
    pub fn new(variant: LogFormat) -> Self {
        Self {
            variant,
            pending: None,
            stats: FileStats::default(),
            year: Utc::now().year(),
        }
    }

    pub fn feed(&mut self, line: &str, sink: &mut dyn FnMut(LogEntry)) {
        let line = line.trim_end_matches(['\n', '\r']);
        if line.is_empty() {
            return;
        }

        let Some(envelope) = self.strip_envelope(line) else {
            self.stats.skipped += 1;
            return;
        };
        let payload = envelope.payload.as_str();

        // Later parts of a split message continue the previous entry,
        // unless the chunk itself opens with a fresh timestamp.
        if envelope.part.is_some_and(|p| p > 1)
            && parse_pg_timestamp(payload).is_none()
            && let Some(entry) = &mut self.pending
        {
            entry.message.push(' ');
            entry.message.push_str(payload.trim());
            return;
        }

        // Inner payload may itself be a full stderr-style prefixed line
        // when log_line_prefix is set alongside syslog output.
        let inner = match parse_pg_timestamp(payload) {
            Some((ts, consumed)) => (ts, &payload[consumed..]),
            None => (envelope.timestamp, payload),
        };
        let (timestamp, rest) = inner;

        match find_severity(rest) {
            Some((pos, severity)) => {
                let fields = scan_conn_fields(&rest[..pos]);
                self.flush(sink);
                self.pending = Some(LogEntry {
                    timestamp,
                    severity: Some(severity),
                    message: rest[pos..].trim().to_string(),
                    pid: envelope.pid,
                    session_id: None,
                    database: fields.database,
                    user: fields.user,
                    application: fields.application,
                    client_host: fields.client_host,
                    duration_ms: None,
                    sql_state: None,
                });
            }
            None => {
                let trimmed = rest.trim();
                let is_detail = ["STATEMENT:", "DETAIL:", "HINT:", "CONTEXT:", "QUERY:"]
                    .iter()
                    .any(|m| trimmed.starts_with(m));
                if is_detail && let Some(entry) = &mut self.pending {
                    if entry.pid == envelope.pid || envelope.pid.is_none() {
                        entry.message.push(' ');
                        entry.message.push_str(trimmed);
                    } else {
                        self.stats.skipped += 1;
                    }
                } else {
                    // Pre-collector message without a severity keyword
                    self.flush(sink);
                    self.pending = Some(LogEntry {
                        timestamp,
                        severity: None,
                        message: trimmed.to_string(),
                        pid: envelope.pid,
                        ..LogEntry::default()
                    });
                }
            }
        }
    }

    pub fn finish(mut self, sink: &mut dyn FnMut(LogEntry)) -> FileStats {
        self.flush(sink);
        self.stats
    }

    fn flush(&mut self, sink: &mut dyn FnMut(LogEntry)) {
        if let Some(mut entry) = self.pending.take() {
            entry.enrich();
            self.stats.entries += 1;
            sink(entry);
        }
    }

    fn strip_envelope(&self, line: &str) -> Option<Envelope> {
        match self.variant {
            LogFormat::SyslogBsd => self.strip_bsd(line),
            LogFormat::SyslogIso => strip_iso(line),
            LogFormat::SyslogRfc5424 => strip_rfc5424(line),
            _ => None,
        }
    }

    fn strip_bsd(&self, line: &str) -> Option<Envelope> {
        if !super::detect::is_syslog_bsd(line) {
            return None;
        }
        let month = match &line[..3] {
            "Jan" => 1,
            "Feb" => 2,
            "Mar" => 3,
            "Apr" => 4,
            "May" => 5,
            "Jun" => 6,
            "Jul" => 7,
            "Aug" => 8,
            "Sep" => 9,
            "Oct" => 10,
            "Nov" => 11,
            "Dec" => 12,
            _ => return None,
        };
        let day: u32 = line[4..6].trim_start().parse().ok()?;
        let time = NaiveTime::parse_from_str(&line[7..15], "%H:%M:%S").ok()?;
        // The BSD timestamp carries no year; assume the current one
        let date = NaiveDate::from_ymd_opt(self.year, month, day)?;
        let timestamp = Utc.from_utc_datetime(&NaiveDateTime::new(date, time));

        let rest = &line[16..];
        let (_host, rest) = take_token(rest);
        let (pid, payload) = strip_tag(rest)?;
        let (part, payload) = strip_chunk_marker(payload);
        Some(Envelope {
            timestamp,
            pid,
            part,
            payload: payload.replace(TAB_MARKER, "\t"),
        })
    }
}

fn strip_iso(line: &str) -> Option<Envelope> {
    let (ts_token, rest) = take_token(line);
    let timestamp = DateTime::parse_from_rfc3339(ts_token)
        .ok()?
        .with_timezone(&Utc);
    let (_host, rest) = take_token(rest);
    let (pid, payload) = strip_tag(rest)?;
    let (part, payload) = strip_chunk_marker(payload);
    Some(Envelope {
        timestamp,
        pid,
        part,
        payload: payload.replace(TAB_MARKER, "\t"),
    })
}

fn strip_rfc5424(line: &str) -> Option<Envelope> {
    if !super::detect::is_syslog_rfc5424(line) {
        return None;
    }
    let rest = &line[line.find('>')? + 2..]; // past "<pri>1"
    let (ts_token, rest) = take_token(rest);
    let timestamp = DateTime::parse_from_rfc3339(ts_token)
        .ok()?
        .with_timezone(&Utc);
    let (_host, rest) = take_token(rest);
    let (_app, rest) = take_token(rest);
    let (procid, rest) = take_token(rest);
    let (_msgid, rest) = take_token(rest);
    // Structured data: "-" or one or more "[...]" blocks
    let rest = rest.trim_start();
    let payload = if let Some(after) = rest.strip_prefix('-') {
        after.trim_start()
    } else {
        let mut rest = rest;
        while rest.starts_with('[') {
            match rest.find(']') {
                Some(end) => rest = rest[end + 1..].trim_start(),
                None => return None,
            }
        }
        rest
    };
    let pid = procid.parse().ok();
    let (part, payload) = strip_chunk_marker(payload);
    Some(Envelope {
        timestamp,
        pid,
        part,
        payload: payload.replace(TAB_MARKER, "\t"),
    })
}

fn take_token(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.find(' ') {
        Some(i) => (&s[..i], &s[i + 1..]),
        None => (s, ""),
    }
}

/// Strips the `tag[pid]:` marker, e.g. `postgres[100]: `.
fn strip_tag(s: &str) -> Option<(Option<u32>, &str)> {
    let s = s.trim_start();
    let colon = s.find(": ")?;
    let tag = &s[..colon];
    let payload = &s[colon + 2..];
    let pid = tag
        .rfind('[')
        .and_then(|open| tag[open + 1..].strip_suffix(']'))
        .and_then(|digits| digits.parse().ok());
    Some((pid, payload))
}

/// Strips the syslog splitter's `[seq-part]` marker and returns the part
/// number, e.g. `[2-1] LOG: ...` -> part 1.
fn strip_chunk_marker(s: &str) -> (Option<u32>, &str) {
    let trimmed = s.trim_start();
    if let Some(rest) = trimmed.strip_prefix('[')
        && let Some(end) = rest.find(']')
        && let Some((seq, part)) = rest[..end].split_once('-')
        && !seq.is_empty()
        && seq.chars().all(|c| c.is_ascii_digit())
        && part.chars().all(|c| c.is_ascii_digit())
        && let Ok(part) = part.parse::<u32>()
    {
        return (Some(part), rest[end + 1..].trim_start());
    }
    (None, s)
}

/// Parses a complete syslog stream in the given envelope variant.
pub fn parse<R: BufRead>(
    variant: LogFormat,
    reader: R,
    sink: &mut dyn FnMut(LogEntry),
) -> io::Result<FileStats> {
    let mut parser = SyslogParser::new(variant);
    for line in reader.lines() {
        parser.feed(&line?, sink);
    }
    Ok(parser.finish(sink))
}
