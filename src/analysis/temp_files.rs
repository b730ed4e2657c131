//! Temporary file analyzer.
//!
//! Tracks `temporary file: path "...", size N` messages and attributes the
//! spill to a query: the `STATEMENT:` block logged with the message when
//! log_temp_files fires, or the last statement seen from the same backend.

use std::collections::HashMap;

use serde::Serialize;

use super::fingerprint::fingerprint;
use super::sql::extract_statement_block;
use crate::parser::LogEntry;

#[derive(Debug, Clone, Default, Serialize)]
pub struct TempFileQueryStat {
    pub query_id: String,
    pub example: String,
    pub count: u64,
    pub total_bytes: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TempFileMetrics {
    pub count: u64,
    pub total_bytes: u64,
    pub max_bytes: u64,
    pub by_query: Vec<TempFileQueryStat>,
}

#[derive(Default)]
pub struct TempFileAnalyzer {
    count: u64,
    total_bytes: u64,
    max_bytes: u64,
    by_query: HashMap<String, TempFileQueryStat>,
}

impl TempFileAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process(&mut self, entry: &LogEntry, last_query: &HashMap<u32, (String, String)>) {
        if !entry.message.contains("temporary file: ") {
            return;
        }
        let Some(size) = extract_size(&entry.message) else {
            return;
        };

        self.count += 1;
        self.total_bytes += size;
        if size > self.max_bytes {
            self.max_bytes = size;
        }

        // Same-message STATEMENT block wins over the per-PID association
        let attribution = extract_statement_block(&entry.message)
            .map(|raw| {
                let (_, id) = fingerprint(raw);
                (id, raw.to_string())
            })
            .or_else(|| {
                entry
                    .pid
                    .and_then(|pid| last_query.get(&pid))
                    .map(|(id, example)| (id.clone(), example.clone()))
            });

        if let Some((id, example)) = attribution {
            let stat = self.by_query.entry(id.clone()).or_default();
            if stat.query_id.is_empty() {
                stat.query_id = id;
                stat.example = example;
            }
            stat.count += 1;
            stat.total_bytes += size;
        }
    }

    pub fn finalize(self) -> TempFileMetrics {
        let mut by_query: Vec<TempFileQueryStat> = self.by_query.into_values().collect();
        by_query.sort_by(|a, b| {
            b.total_bytes
                .cmp(&a.total_bytes)
                .then_with(|| a.query_id.cmp(&b.query_id))
        });

        TempFileMetrics {
            count: self.count,
            total_bytes: self.total_bytes,
            max_bytes: self.max_bytes,
            by_query,
        }
    }
}

/// Extracts N from `..., size N` at the end of the message (or before the
/// folded STATEMENT block).
fn extract_size(message: &str) -> Option<u64> {
    let pos = message.find("size ")?;
    let rest = &message[pos + "size ".len()..];
    let end = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
    if end == 0 {
        return None;
    }
    rest[..end].parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(message: &str, pid: Option<u32>) -> LogEntry {
        LogEntry {
            message: message.to_string(),
            pid,
            ..LogEntry::default()
        }
    }

    #[test]
    fn test_totals() {
        let mut a = TempFileAnalyzer::new();
        let queries = HashMap::new();
        a.process(
            &entry(
                "LOG:  temporary file: path \"base/pgsql_tmp/pgsql_tmp100.0\", size 4096000",
                Some(100),
            ),
            &queries,
        );
        a.process(
            &entry(
                "LOG:  temporary file: path \"base/pgsql_tmp/pgsql_tmp100.1\", size 1024",
                Some(100),
            ),
            &queries,
        );
        let m = a.finalize();
        assert_eq!(m.count, 2);
        assert_eq!(m.total_bytes, 4097024);
        assert_eq!(m.max_bytes, 4096000);
    }

    #[test]
    fn test_same_message_statement_association() {
        let mut a = TempFileAnalyzer::new();
        a.process(
            &entry(
                "LOG:  temporary file: path \"base/pgsql_tmp/x\", size 2048 STATEMENT:  SELECT * FROM big ORDER BY v",
                Some(5),
            ),
            &HashMap::new(),
        );
        let m = a.finalize();
        assert_eq!(m.by_query.len(), 1);
        assert!(m.by_query[0].query_id.starts_with("se-"));
        assert_eq!(m.by_query[0].total_bytes, 2048);
    }

    #[test]
    fn test_last_query_by_pid_association() {
        let mut a = TempFileAnalyzer::new();
        let mut queries = HashMap::new();
        queries.insert(
            7u32,
            ("se-xyz999".to_string(), "SELECT big".to_string()),
        );
        a.process(
            &entry(
                "LOG:  temporary file: path \"base/pgsql_tmp/y\", size 512",
                Some(7),
            ),
            &queries,
        );
        let m = a.finalize();
        assert_eq!(m.by_query[0].query_id, "se-xyz999");
    }
}
