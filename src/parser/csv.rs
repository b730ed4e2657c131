//! Parser for PostgreSQL csvlog output.
//!
//! csvlog records are RFC-4180 style: fields may be quoted, quotes are
//! doubled inside quoted fields, and a quoted field may span lines (the
//! query and context columns regularly contain newlines). The reader below
//! reassembles one record at a time; column order follows the server's
//! fixed csvlog layout (23 columns up to v13, 26 from v14 on).

use std::io::{self, BufRead};

use super::FileStats;
use super::entry::{LogEntry, Severity, normalize_attr};
use super::prefix::parse_pg_timestamp;

// csvlog column indices (v14+ layout; the v13 23-column layout is a prefix)
const COL_TIMESTAMP: usize = 0;
const COL_USER: usize = 1;
const COL_DATABASE: usize = 2;
const COL_PID: usize = 3;
const COL_CLIENT: usize = 4;
const COL_SESSION_ID: usize = 5;
const COL_SEVERITY: usize = 11;
const COL_SQL_STATE: usize = 12;
const COL_MESSAGE: usize = 13;
const COL_DETAIL: usize = 14;
const COL_HINT: usize = 15;
const COL_CONTEXT: usize = 18;
const COL_QUERY: usize = 19;
const COL_APPLICATION: usize = 22;

/// Minimum columns for a usable record (through the message column).
const MIN_COLS: usize = 14;

/// Quote-aware CSV record reader.
pub struct CsvReader<R: BufRead> {
    inner: R,
    line: String,
}

impl<R: BufRead> CsvReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            line: String::new(),
        }
    }

    /// Reads one record, following quoted fields across line breaks.
    /// Returns `Ok(None)` at end of input.
    pub fn read_record(&mut self) -> io::Result<Option<Vec<String>>> {
        let mut fields: Vec<String> = Vec::new();
        let mut field = String::new();
        let mut in_quotes = false;
        let mut started = false;

        loop {
            self.line.clear();
            let n = self.inner.read_line(&mut self.line)?;
            if n == 0 {
                if !started {
                    return Ok(None);
                }
                fields.push(std::mem::take(&mut field));
                return Ok(Some(fields));
            }
            started = true;

            let mut chars = self.line.chars().peekable();
            while let Some(c) = chars.next() {
                if in_quotes {
                    if c == '"' {
                        if chars.peek() == Some(&'"') {
                            chars.next();
                            field.push('"');
                        } else {
                            in_quotes = false;
                        }
                    } else {
                        field.push(c);
                    }
                } else {
                    match c {
                        '"' => in_quotes = true,
                        ',' => fields.push(std::mem::take(&mut field)),
                        '\n' | '\r' => {}
                        _ => field.push(c),
                    }
                }
            }

            if !in_quotes {
                fields.push(std::mem::take(&mut field));
                return Ok(Some(fields));
            }
            // An open quote at end of line means the field continues on the
            // next one; read_line stripped nothing, the newline is already
            // in `field` via the in_quotes branch.
        }
    }
}

/// Parses a complete csvlog stream.
pub fn parse<R: BufRead>(reader: R, sink: &mut dyn FnMut(LogEntry)) -> io::Result<FileStats> {
    let mut reader = CsvReader::new(reader);
    let mut stats = FileStats::default();

    while let Some(record) = reader.read_record()? {
        match entry_from_record(&record) {
            Some(mut entry) => {
                entry.enrich();
                stats.entries += 1;
                sink(entry);
            }
            None => stats.skipped += 1,
        }
    }
    Ok(stats)
}

fn entry_from_record(record: &[String]) -> Option<LogEntry> {
    if record.len() < MIN_COLS {
        return None;
    }

    let (timestamp, _) = parse_pg_timestamp(&record[COL_TIMESTAMP])?;
    let severity = Severity::parse(&record[COL_SEVERITY])?;

    let mut message = format!("{}:  {}", severity.as_str(), record[COL_MESSAGE]);
    for (col, label) in [
        (COL_DETAIL, "DETAIL"),
        (COL_HINT, "HINT"),
        (COL_QUERY, "STATEMENT"),
        (COL_CONTEXT, "CONTEXT"),
    ] {
        if let Some(value) = record.get(col)
            && !value.is_empty()
        {
            message.push_str(&format!(" {}: {}", label, value));
        }
    }

    let sql_state = match record[COL_SQL_STATE].as_str() {
        "" | "00000" => None,
        code => Some(code.to_string()),
    };

    Some(LogEntry {
        timestamp,
        severity: Some(severity),
        message,
        pid: record[COL_PID].parse().ok(),
        session_id: normalize_attr(&record[COL_SESSION_ID]),
        database: normalize_attr(&record[COL_DATABASE]),
        user: normalize_attr(&record[COL_USER]),
        application: record.get(COL_APPLICATION).and_then(|v| normalize_attr(v)),
        client_host: normalize_attr(&record[COL_CLIENT]).map(|c| {
            c.split_once(':')
                .map(|(host, _)| host.to_string())
                .unwrap_or(c)
        }),
        duration_ms: None,
        sql_state,
    })
}
