//! Streaming aggregation engine.
//!
//! [`StreamingAnalyzer`] consumes the filtered entry stream and fans every
//! entry out to the sub-analyzers. It never fails: entries missing a field
//! an analyzer wants simply fall into the zero or blank buckets. State is
//! proportional to the number of distinct queries, tables, sessions and
//! entities, not to the number of entries.

pub mod checkpoints;
pub mod connections;
pub mod errclass;
pub mod events;
pub mod fingerprint;
pub mod locks;
pub mod sql;
pub mod stats;
pub mod temp_files;
pub mod vacuum;

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::parser::{LogEntry, Severity};

use checkpoints::{CheckpointAnalyzer, CheckpointMetrics};
use connections::{ConnectionAnalyzer, ConnectionMetrics};
use errclass::{ErrorClassAnalyzer, ErrorClassStat};
use events::{EventAnalyzer, EventSummary};
use locks::{LockAnalyzer, LockMetrics};
use sql::{SqlAnalyzer, SqlMetrics};
use temp_files::{TempFileAnalyzer, TempFileMetrics};
use vacuum::{VacuumAnalyzer, VacuumMetrics};

/// Whole-stream counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GlobalMetrics {
    pub entries: u64,
    pub first_timestamp: Option<DateTime<Utc>>,
    pub last_timestamp: Option<DateTime<Utc>>,
    pub panics: u64,
    pub fatals: u64,
    pub errors: u64,
    pub warnings: u64,
    pub logs: u64,
}

/// Sorted sets of the databases, users and applications seen.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UniqueEntities {
    pub databases: Vec<String>,
    pub users: Vec<String>,
    pub applications: Vec<String>,
}

/// The terminal, immutable analysis snapshot.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AggregatedMetrics {
    pub global: GlobalMetrics,
    pub sql: SqlMetrics,
    pub connections: ConnectionMetrics,
    pub checkpoints: CheckpointMetrics,
    pub vacuum: VacuumMetrics,
    pub locks: LockMetrics,
    pub temp_files: TempFileMetrics,
    pub entities: UniqueEntities,
    pub events: Vec<EventSummary>,
    pub error_classes: Vec<ErrorClassStat>,
}

impl AggregatedMetrics {
    /// Per-query lookup by fingerprint id.
    pub fn query(&self, id: &str) -> Option<&sql::QueryStat> {
        self.sql.query(id)
    }
}

pub struct StreamingAnalyzer {
    global: GlobalMetrics,
    sql: SqlAnalyzer,
    connections: ConnectionAnalyzer,
    checkpoints: CheckpointAnalyzer,
    vacuum: VacuumAnalyzer,
    locks: LockAnalyzer,
    temp_files: TempFileAnalyzer,
    events: EventAnalyzer,
    error_classes: ErrorClassAnalyzer,
    databases: BTreeSet<String>,
    users: BTreeSet<String>,
    applications: BTreeSet<String>,
    /// Last SQL fingerprint (id, example) seen per backend PID, used to
    /// attribute lock waits and temp files to queries.
    last_query_by_pid: HashMap<u32, (String, String)>,
}

impl Default for StreamingAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamingAnalyzer {
    pub fn new() -> Self {
        Self {
            global: GlobalMetrics::default(),
            sql: SqlAnalyzer::new(),
            connections: ConnectionAnalyzer::new(),
            checkpoints: CheckpointAnalyzer::new(),
            vacuum: VacuumAnalyzer::new(),
            locks: LockAnalyzer::new(),
            temp_files: TempFileAnalyzer::new(),
            events: EventAnalyzer::new(),
            error_classes: ErrorClassAnalyzer::new(),
            databases: BTreeSet::new(),
            users: BTreeSet::new(),
            applications: BTreeSet::new(),
            last_query_by_pid: HashMap::new(),
        }
    }

    pub fn process(&mut self, entry: &LogEntry) {
        self.global.entries += 1;
        if self
            .global
            .first_timestamp
            .is_none_or(|first| entry.timestamp < first)
        {
            self.global.first_timestamp = Some(entry.timestamp);
        }
        if self
            .global
            .last_timestamp
            .is_none_or(|last| entry.timestamp > last)
        {
            self.global.last_timestamp = Some(entry.timestamp);
        }
        match entry.severity {
            Some(Severity::Panic) => self.global.panics += 1,
            Some(Severity::Fatal) => self.global.fatals += 1,
            Some(Severity::Error) => self.global.errors += 1,
            Some(Severity::Warning) => self.global.warnings += 1,
            Some(Severity::Log) => self.global.logs += 1,
            _ => {}
        }

        if let Some(db) = &entry.database {
            self.databases.insert(db.clone());
        }
        if let Some(user) = &entry.user {
            self.users.insert(user.clone());
        }
        if let Some(app) = &entry.application {
            self.applications.insert(app.clone());
        }

        // SQL first: locks and temp files want the freshest per-PID query
        if let Some(id) = self.sql.process(entry)
            && let Some(pid) = entry.pid
        {
            let example = sql::extract_query(&entry.message)
                .or_else(|| sql::extract_statement_block(&entry.message))
                .unwrap_or("")
                .to_string();
            self.last_query_by_pid.insert(pid, (id, example));
        }

        self.locks.process(entry, &self.last_query_by_pid);
        self.temp_files.process(entry, &self.last_query_by_pid);
        self.connections.process(entry);
        self.checkpoints.process(entry);
        self.vacuum.process(entry);
        self.events.process(entry);
        self.error_classes.process(entry);
    }

    pub fn finalize(self) -> AggregatedMetrics {
        let range = match (self.global.first_timestamp, self.global.last_timestamp) {
            (Some(first), Some(last)) if last > first => Some((first, last)),
            _ => None,
        };

        let locks = self.locks.finalize();
        let temp_files = self.temp_files.finalize();
        let mut sql_metrics = {
            // Orphan examples needed below, analyzer consumed by finalize
            let orphans: Vec<String> = locks
                .by_query
                .iter()
                .map(|q| q.query_id.clone())
                .chain(temp_files.by_query.iter().map(|q| q.query_id.clone()))
                .filter(|id| self.sql.orphan_example(id).is_some())
                .collect();
            let mut metrics = self.sql.finalize();
            let mut orphans: Vec<String> = orphans
                .into_iter()
                .filter(|id| metrics.query(id).is_none())
                .collect();
            orphans.sort();
            orphans.dedup();
            metrics.queries_without_duration = orphans;
            metrics
        };

        // Join temp-file usage into the per-query SQL stats
        for temp in &temp_files.by_query {
            if let Some(stat) = sql_metrics
                .queries
                .iter_mut()
                .find(|q| q.query_id == temp.query_id)
            {
                stat.temp_file_count = temp.count;
                stat.temp_file_bytes = temp.total_bytes;
            }
        }

        AggregatedMetrics {
            global: self.global,
            sql: sql_metrics,
            connections: self.connections.finalize(range),
            checkpoints: self.checkpoints.finalize(),
            vacuum: self.vacuum.finalize(),
            locks,
            temp_files,
            entities: UniqueEntities {
                databases: self.databases.into_iter().collect(),
                users: self.users.into_iter().collect(),
                applications: self.applications.into_iter().collect(),
            },
            events: self.events.finalize(),
            error_classes: self.error_classes.finalize(),
        }
    }
}
