//! Lock-wait and deadlock analyzer.
//!
//! PostgreSQL logs a `still waiting` message for every log_lock_waits
//! interval a process spends blocked, then one `acquired` message with the
//! final wait time. Waits are keyed by `(pid, mode, resource)` so repeated
//! progress reports for the same wait are not double-counted: only the
//! final acquired time contributes to the global total.

use std::collections::HashMap;

use serde::Serialize;

use crate::parser::LogEntry;

#[derive(Debug, Clone, Serialize)]
pub struct LockTypeStat {
    pub resource: String,
    pub count: u64,
    pub total_wait_ms: f64,
}

/// Lock behavior of one query fingerprint.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LockQueryStat {
    pub query_id: String,
    pub example: String,
    pub acquired: u64,
    pub acquired_wait_ms: f64,
    pub still_waiting: u64,
    pub max_wait_ms: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LockMetrics {
    pub waiting_reports: u64,
    pub acquired: u64,
    pub deadlocks: u64,
    pub total_wait_ms: f64,
    pub max_wait_ms: f64,
    pub by_resource: Vec<LockTypeStat>,
    pub by_query: Vec<LockQueryStat>,
}

struct LockEvent<'a> {
    pid: u32,
    mode: &'a str,
    resource: &'a str,
    wait_ms: f64,
    acquired: bool,
}

#[derive(Default)]
struct QueryAccum {
    example: String,
    acquired: u64,
    acquired_wait_ms: f64,
    still_waiting: u64,
    max_wait_ms: f64,
}

#[derive(Default)]
pub struct LockAnalyzer {
    waiting_reports: u64,
    acquired: u64,
    deadlocks: u64,
    total_wait_ms: f64,
    max_wait_ms: f64,
    /// Open waits keyed by "pid-mode-resource".
    active: HashMap<String, f64>,
    by_resource: HashMap<String, LockTypeStat>,
    by_query: HashMap<String, QueryAccum>,
}

impl LockAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    /// `last_query` maps a backend PID to the fingerprint id and example
    /// text of the last SQL statement seen from it.
    pub fn process(&mut self, entry: &LogEntry, last_query: &HashMap<u32, (String, String)>) {
        if entry.message.contains("deadlock detected") {
            self.deadlocks += 1;
            return;
        }

        let Some(event) = parse_lock_event(&entry.message) else {
            return;
        };

        let key = format!("{}-{}-{}", event.pid, event.mode, event.resource);
        let associated = last_query.get(&event.pid);

        if event.acquired {
            self.acquired += 1;
            self.total_wait_ms += event.wait_ms;
            if event.wait_ms > self.max_wait_ms {
                self.max_wait_ms = event.wait_ms;
            }
            self.active.remove(&key);

            let resource_type = resource_type(event.resource);
            let stat = self
                .by_resource
                .entry(resource_type.to_string())
                .or_insert_with(|| LockTypeStat {
                    resource: resource_type.to_string(),
                    count: 0,
                    total_wait_ms: 0.0,
                });
            stat.count += 1;
            stat.total_wait_ms += event.wait_ms;

            if let Some((id, example)) = associated {
                let accum = self.by_query.entry(id.clone()).or_default();
                if accum.example.is_empty() {
                    accum.example = example.clone();
                }
                accum.acquired += 1;
                accum.acquired_wait_ms += event.wait_ms;
                accum.max_wait_ms = accum.max_wait_ms.max(event.wait_ms);
            }
        } else {
            self.waiting_reports += 1;
            self.active.insert(key, event.wait_ms);

            if let Some((id, example)) = associated {
                let accum = self.by_query.entry(id.clone()).or_default();
                if accum.example.is_empty() {
                    accum.example = example.clone();
                }
                accum.still_waiting += 1;
                accum.max_wait_ms = accum.max_wait_ms.max(event.wait_ms);
            }
        }
    }

    pub fn finalize(self) -> LockMetrics {
        // Waits that never resolved still count toward the global total
        let mut total_wait_ms = self.total_wait_ms;
        let mut max_wait_ms = self.max_wait_ms;
        for wait in self.active.values() {
            total_wait_ms += wait;
            if *wait > max_wait_ms {
                max_wait_ms = *wait;
            }
        }

        let mut by_resource: Vec<LockTypeStat> = self.by_resource.into_values().collect();
        by_resource.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| a.resource.cmp(&b.resource))
        });

        let mut by_query: Vec<LockQueryStat> = self
            .by_query
            .into_iter()
            .map(|(query_id, accum)| LockQueryStat {
                query_id,
                example: accum.example,
                acquired: accum.acquired,
                acquired_wait_ms: accum.acquired_wait_ms,
                still_waiting: accum.still_waiting,
                max_wait_ms: accum.max_wait_ms,
            })
            .collect();
        by_query.sort_by(|a, b| {
            b.acquired_wait_ms
                .partial_cmp(&a.acquired_wait_ms)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.query_id.cmp(&b.query_id))
        });

        LockMetrics {
            waiting_reports: self.waiting_reports,
            acquired: self.acquired,
            deadlocks: self.deadlocks,
            total_wait_ms,
            max_wait_ms,
            by_resource,
            by_query,
        }
    }
}

/// Parses `process N still waiting for <mode> on <resource> after T ms`
/// and the matching `acquired` form.
fn parse_lock_event(message: &str) -> Option<LockEvent<'_>> {
    let pos = message.find("process ")?;
    let rest = &message[pos + "process ".len()..];
    let pid_end = rest.find(' ')?;
    let pid: u32 = rest[..pid_end].parse().ok()?;
    let rest = &rest[pid_end + 1..];

    let (acquired, rest) = if let Some(r) = rest.strip_prefix("still waiting for ") {
        (false, r)
    } else if let Some(r) = rest.strip_prefix("acquired ") {
        (true, r)
    } else {
        return None;
    };

    let on = rest.find(" on ")?;
    let mode = &rest[..on];
    let rest = &rest[on + " on ".len()..];

    let after = rest.find(" after ")?;
    let resource = &rest[..after];
    let rest = &rest[after + " after ".len()..];

    let ms_end = rest
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(rest.len());
    let wait_ms: f64 = rest[..ms_end].parse().ok()?;
    if !rest[ms_end..].trim_start().starts_with("ms") {
        return None;
    }

    Some(LockEvent {
        pid,
        mode,
        resource,
        wait_ms,
        acquired,
    })
}

/// First word of the locked resource: relation, transaction, tuple, ...
fn resource_type(resource: &str) -> &str {
    if resource.starts_with("advisory lock") {
        return "advisory lock";
    }
    resource.split(' ').next().unwrap_or(resource)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(message: &str) -> LogEntry {
        LogEntry {
            message: message.to_string(),
            ..LogEntry::default()
        }
    }

    #[test]
    fn test_waiting_then_acquired_counts_once() {
        let mut a = LockAnalyzer::new();
        let queries = HashMap::new();
        a.process(
            &entry("LOG:  process 77 still waiting for ShareLock on transaction 123 after 1000.000 ms"),
            &queries,
        );
        a.process(
            &entry("LOG:  process 77 still waiting for ShareLock on transaction 123 after 2000.000 ms"),
            &queries,
        );
        a.process(
            &entry("LOG:  process 77 acquired ShareLock on transaction 123 after 2500.000 ms"),
            &queries,
        );

        let m = a.finalize();
        assert_eq!(m.waiting_reports, 2);
        assert_eq!(m.acquired, 1);
        // Only the final acquired wait hits the total, not the progress reports
        assert_eq!(m.total_wait_ms, 2500.0);
        assert_eq!(m.by_resource[0].resource, "transaction");
    }

    #[test]
    fn test_unresolved_wait_still_counted() {
        let mut a = LockAnalyzer::new();
        let queries = HashMap::new();
        a.process(
            &entry("LOG:  process 9 still waiting for AccessExclusiveLock on relation 16384 of database 5 after 3000.000 ms"),
            &queries,
        );
        let m = a.finalize();
        assert_eq!(m.acquired, 0);
        assert_eq!(m.total_wait_ms, 3000.0);
        assert_eq!(m.max_wait_ms, 3000.0);
    }

    #[test]
    fn test_deadlock() {
        let mut a = LockAnalyzer::new();
        a.process(&entry("ERROR:  deadlock detected"), &HashMap::new());
        assert_eq!(a.finalize().deadlocks, 1);
    }

    #[test]
    fn test_query_association() {
        let mut a = LockAnalyzer::new();
        let mut queries = HashMap::new();
        queries.insert(
            42u32,
            ("up-abc123".to_string(), "UPDATE t SET x = 1".to_string()),
        );
        a.process(
            &entry("LOG:  process 42 acquired RowExclusiveLock on relation 999 after 500.000 ms"),
            &queries,
        );
        let m = a.finalize();
        assert_eq!(m.by_query.len(), 1);
        assert_eq!(m.by_query[0].query_id, "up-abc123");
        assert_eq!(m.by_query[0].acquired_wait_ms, 500.0);
    }
}
