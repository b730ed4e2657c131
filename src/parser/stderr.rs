//! Parser for PostgreSQL stderr log output.
//!
//! A prefixed line starts a new entry; anything that does not parse as a
//! prefixed line (indented SQL, `STATEMENT:`/`DETAIL:`/`HINT:`/`CONTEXT:`
//! blocks) continues the one before it. The parser therefore holds at most
//! one pending entry and emits it as soon as the next prefixed line shows up.

use std::io::{self, BufRead};

use super::FileStats;
use super::entry::LogEntry;
use super::prefix::{parse_detail_line, parse_prefixed_line};

/// Streaming stderr parser with one-entry lookbehind.
pub struct StderrParser {
    pending: Option<LogEntry>,
    stats: FileStats,
}

impl Default for StderrParser {
    fn default() -> Self {
        Self::new()
    }
}

impl StderrParser {
    pub fn new() -> Self {
        Self {
            pending: None,
            stats: FileStats::default(),
        }
    }

    /// Feeds one line. Completed entries are passed to `sink`.
    pub fn feed(&mut self, line: &str, sink: &mut dyn FnMut(LogEntry)) {
        let line = line.trim_end_matches(['\n', '\r']);
        if line.is_empty() {
            return;
        }

        if let Some(entry) = parse_prefixed_line(line) {
            self.flush(sink);
            self.pending = Some(entry);
            return;
        }

        // Prefixed STATEMENT/DETAIL/... lines belong to the entry before
        // them; fold the payload in when the PID agrees.
        if let Some((pid, payload)) = parse_detail_line(line) {
            match &mut self.pending {
                Some(entry) if pid.is_none() || entry.pid == pid => {
                    entry.message.push(' ');
                    entry.message.push_str(payload);
                }
                _ => self.stats.skipped += 1,
            }
            return;
        }

        // Continuation of the previous entry, folded in with a single space
        match &mut self.pending {
            Some(entry) => {
                entry.message.push(' ');
                entry.message.push_str(line.trim());
            }
            None => self.stats.skipped += 1,
        }
    }

    fn flush(&mut self, sink: &mut dyn FnMut(LogEntry)) {
        if let Some(mut entry) = self.pending.take() {
            entry.enrich();
            self.stats.entries += 1;
            sink(entry);
        }
    }

    /// Emits the last pending entry and returns the per-file counters.
    pub fn finish(mut self, sink: &mut dyn FnMut(LogEntry)) -> FileStats {
        self.flush(sink);
        self.stats
    }
}

/// Parses a complete stderr stream.
pub fn parse<R: BufRead>(reader: R, sink: &mut dyn FnMut(LogEntry)) -> io::Result<FileStats> {
    let mut parser = StderrParser::new();
    for line in reader.lines() {
        parser.feed(&line?, sink);
    }
    Ok(parser.finish(sink))
}
