//! SQL statement analyzer.
//!
//! Folds `duration: X ms  statement: ...` entries into per-fingerprint
//! statistics. Count, totals and extremes are O(1) folds; individual
//! durations are buffered per fingerprint and sorted once at finalize to
//! produce median and P99.

use std::collections::HashMap;

use serde::Serialize;

use super::fingerprint::{QueryCategory, fingerprint, query_category, query_type_name};
use super::stats::{median, percentile};
use crate::parser::LogEntry;

/// Extracts the SQL text from a statement log message:
/// `duration: 1.0 ms  statement: SELECT ...` or
/// `duration: 1.0 ms  execute <name>: SELECT ...`.
pub fn extract_query(message: &str) -> Option<&str> {
    if let Some(pos) = message.find("statement: ") {
        let query = message[pos + "statement: ".len()..].trim();
        if !query.is_empty() {
            return Some(query);
        }
    }
    if let Some(pos) = message.find("execute ") {
        let rest = &message[pos + "execute ".len()..];
        if let Some(colon) = rest.find(':') {
            let query = rest[colon + 1..].trim();
            if !query.is_empty() {
                return Some(query);
            }
        }
    }
    None
}

/// Extracts the SQL text from an error's `STATEMENT:` block.
pub fn extract_statement_block(message: &str) -> Option<&str> {
    let pos = message.find("STATEMENT:")?;
    let rest = message[pos + "STATEMENT:".len()..].trim();
    // Detail blocks that may follow the statement
    let end = ["DETAIL:", "HINT:", "CONTEXT:"]
        .iter()
        .filter_map(|m| rest.find(m))
        .min()
        .unwrap_or(rest.len());
    let query = rest[..end].trim();
    if query.is_empty() { None } else { Some(query) }
}

/// Per-fingerprint statement statistics.
#[derive(Debug, Clone, Serialize)]
pub struct QueryStat {
    pub query_id: String,
    pub query_type: &'static str,
    pub category: QueryCategory,
    pub example: String,
    pub count: u64,
    pub total_ms: f64,
    pub mean_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub median_ms: f64,
    pub p99_ms: f64,
    pub temp_file_count: u64,
    pub temp_file_bytes: u64,
}

/// Per-statement-type rollup.
#[derive(Debug, Clone, Serialize)]
pub struct QueryTypeStat {
    pub query_type: &'static str,
    pub category: QueryCategory,
    pub count: u64,
    pub total_ms: f64,
}

/// Finalized SQL metrics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SqlMetrics {
    pub total_statements: u64,
    pub distinct_queries: usize,
    pub total_ms: f64,
    pub max_ms: f64,
    /// `duration:` entries that carried no statement text
    /// (log_min_duration_statement without statement logging).
    pub duration_only: u64,
    pub queries: Vec<QueryStat>,
    pub by_type: Vec<QueryTypeStat>,
    /// Fingerprints seen only through locks or temp files, never with a
    /// duration. Filled in by the aggregator join.
    pub queries_without_duration: Vec<String>,
}

impl SqlMetrics {
    /// Looks up a query's stats by fingerprint id.
    pub fn query(&self, id: &str) -> Option<&QueryStat> {
        self.queries.iter().find(|q| q.query_id == id)
    }
}

struct QueryAccum {
    id: String,
    example: String,
    count: u64,
    total_ms: f64,
    min_ms: f64,
    max_ms: f64,
    durations: Vec<f64>,
}

/// Streaming SQL analyzer. Keyed by normalized query text so the state is
/// O(distinct queries), not O(entries).
#[derive(Default)]
pub struct SqlAnalyzer {
    stats: HashMap<String, QueryAccum>,
    total_statements: u64,
    total_ms: f64,
    max_ms: f64,
    duration_only: u64,
    /// Example text for fingerprints seen without a duration (error
    /// STATEMENT blocks), used by the lock/temp-file joins.
    seen_without_duration: HashMap<String, String>,
}

impl SqlAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Processes one entry. Returns the fingerprint id when the entry
    /// carried recognizable SQL, so the caller can track the last query
    /// per backend PID.
    pub fn process(&mut self, entry: &LogEntry) -> Option<String> {
        if let Some(duration) = entry.duration_ms {
            match extract_query(&entry.message) {
                Some(raw) => return Some(self.record(raw, duration)),
                None => {
                    self.duration_only += 1;
                    self.total_statements += 1;
                    self.total_ms += duration;
                    if duration > self.max_ms {
                        self.max_ms = duration;
                    }
                    return None;
                }
            }
        }

        let raw = extract_statement_block(&entry.message)?;
        let (normalized, id) = fingerprint(raw);
        if let Some(accum) = self.stats.get(&normalized) {
            return Some(accum.id.clone());
        }
        self.seen_without_duration
            .entry(id.clone())
            .or_insert_with(|| raw.to_string());
        Some(id)
    }

    fn record(&mut self, raw: &str, duration: f64) -> String {
        self.total_statements += 1;
        self.total_ms += duration;
        if duration > self.max_ms {
            self.max_ms = duration;
        }

        let (normalized, id) = fingerprint(raw);
        let accum = self.stats.entry(normalized).or_insert_with(|| QueryAccum {
            id: id.clone(),
            example: raw.to_string(),
            count: 0,
            total_ms: 0.0,
            min_ms: f64::MAX,
            max_ms: 0.0,
            durations: Vec::new(),
        });

        // Deterministic example regardless of file processing order
        if raw < accum.example.as_str() {
            accum.example = raw.to_string();
        }
        accum.count += 1;
        accum.total_ms += duration;
        accum.min_ms = accum.min_ms.min(duration);
        accum.max_ms = accum.max_ms.max(duration);
        accum.durations.push(duration);
        id
    }

    /// Example text for a fingerprint only seen via an error STATEMENT
    /// block.
    pub fn orphan_example(&self, id: &str) -> Option<&str> {
        self.seen_without_duration.get(id).map(String::as_str)
    }

    pub fn finalize(self) -> SqlMetrics {
        let mut by_type: HashMap<&'static str, QueryTypeStat> = HashMap::new();
        let mut queries: Vec<QueryStat> = Vec::with_capacity(self.stats.len());

        for (_, mut accum) in self.stats {
            accum
                .durations
                .sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

            let type_name = query_type_name(&accum.id);
            let entry = by_type.entry(type_name).or_insert_with(|| QueryTypeStat {
                query_type: type_name,
                category: query_category(&accum.id),
                count: 0,
                total_ms: 0.0,
            });
            entry.count += accum.count;
            entry.total_ms += accum.total_ms;

            queries.push(QueryStat {
                query_type: type_name,
                category: query_category(&accum.id),
                query_id: accum.id,
                example: accum.example,
                count: accum.count,
                total_ms: accum.total_ms,
                mean_ms: accum.total_ms / accum.count as f64,
                min_ms: accum.min_ms,
                max_ms: accum.max_ms,
                median_ms: median(&accum.durations),
                p99_ms: percentile(&accum.durations, 99.0),
                temp_file_count: 0,
                temp_file_bytes: 0,
            });
        }

        queries.sort_by(|a, b| {
            b.total_ms
                .partial_cmp(&a.total_ms)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.query_id.cmp(&b.query_id))
        });

        let mut by_type: Vec<QueryTypeStat> = by_type.into_values().collect();
        by_type.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| a.query_type.cmp(b.query_type))
        });

        SqlMetrics {
            total_statements: self.total_statements,
            distinct_queries: queries.len(),
            total_ms: self.total_ms,
            max_ms: self.max_ms,
            duration_only: self.duration_only,
            queries,
            by_type,
            queries_without_duration: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::LogEntry;

    fn entry(message: &str) -> LogEntry {
        let mut e = LogEntry {
            message: message.to_string(),
            ..LogEntry::default()
        };
        e.enrich();
        e
    }

    #[test]
    fn test_extract_query() {
        assert_eq!(
            extract_query("LOG:  duration: 1.0 ms  statement: SELECT 1"),
            Some("SELECT 1")
        );
        assert_eq!(
            extract_query("LOG:  duration: 1.0 ms  execute stmt_1: SELECT $1"),
            Some("SELECT $1")
        );
        assert_eq!(extract_query("LOG:  duration: 1.0 ms"), None);
    }

    #[test]
    fn test_aggregation_over_same_shape() {
        let mut a = SqlAnalyzer::new();
        a.process(&entry(
            "LOG:  duration: 10.0 ms  statement: SELECT * FROM users WHERE id = 1",
        ));
        a.process(&entry(
            "LOG:  duration: 30.0 ms  statement: SELECT * FROM users WHERE id = 2",
        ));
        a.process(&entry(
            "LOG:  duration: 5.0 ms  statement: INSERT INTO t VALUES (1)",
        ));

        let m = a.finalize();
        assert_eq!(m.total_statements, 3);
        assert_eq!(m.distinct_queries, 2);
        assert_eq!(m.max_ms, 30.0);

        // Sorted by total time: the SELECT bucket first
        let top = &m.queries[0];
        assert_eq!(top.count, 2);
        assert_eq!(top.total_ms, 40.0);
        assert_eq!(top.min_ms, 10.0);
        assert_eq!(top.max_ms, 30.0);
        assert_eq!(top.mean_ms, 20.0);
        assert!(top.query_id.starts_with("se-"));
        // Lexicographically smallest raw kept as the example
        assert!(top.example.ends_with("id = 1"));
    }

    #[test]
    fn test_duration_only_counted() {
        let mut a = SqlAnalyzer::new();
        a.process(&entry("LOG:  duration: 42.0 ms"));
        let m = a.finalize();
        assert_eq!(m.duration_only, 1);
        assert_eq!(m.total_statements, 1);
        assert!(m.queries.is_empty());
    }

    #[test]
    fn test_statement_block_returns_id_for_association() {
        let mut a = SqlAnalyzer::new();
        let id = a
            .process(&entry(
                "ERROR:  relation \"m\" does not exist STATEMENT:  SELECT * FROM m",
            ))
            .unwrap();
        assert!(id.starts_with("se-"));
        assert_eq!(a.orphan_example(&id), Some("SELECT * FROM m"));
        let m = a.finalize();
        assert_eq!(m.total_statements, 0);
    }

    #[test]
    fn test_by_type_rollup() {
        let mut a = SqlAnalyzer::new();
        a.process(&entry("LOG:  duration: 1.0 ms  statement: SELECT 1"));
        a.process(&entry("LOG:  duration: 2.0 ms  statement: SELECT 2"));
        a.process(&entry("LOG:  duration: 3.0 ms  statement: UPDATE t SET x = 1"));
        let m = a.finalize();
        assert_eq!(m.by_type.len(), 2);
        assert_eq!(m.by_type[0].query_type, "SELECT");
        assert_eq!(m.by_type[0].count, 2);
    }
}
