//! SQLSTATE error classification.
//!
//! Groups error codes by their two-character class with the standard
//! PostgreSQL class descriptions.

use std::collections::HashMap;

use serde::Serialize;

use crate::parser::LogEntry;

#[derive(Debug, Clone, Serialize)]
pub struct ErrorClassStat {
    pub class: String,
    pub description: &'static str,
    pub count: u64,
}

#[derive(Default)]
pub struct ErrorClassAnalyzer {
    counts: HashMap<String, u64>,
}

impl ErrorClassAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process(&mut self, entry: &LogEntry) {
        if let Some(code) = &entry.sql_state
            && code.len() >= 2
            && code.is_ascii()
        {
            *self.counts.entry(code[..2].to_string()).or_insert(0) += 1;
        }
    }

    pub fn finalize(self) -> Vec<ErrorClassStat> {
        let mut stats: Vec<ErrorClassStat> = self
            .counts
            .into_iter()
            .map(|(class, count)| ErrorClassStat {
                description: class_description(&class),
                class,
                count,
            })
            .collect();
        stats.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.class.cmp(&b.class)));
        stats
    }
}

/// Standard PostgreSQL SQLSTATE class descriptions.
pub fn class_description(class: &str) -> &'static str {
    match class {
        "00" => "Successful Completion",
        "01" => "Warning",
        "02" => "No Data",
        "03" => "SQL Statement Not Yet Complete",
        "08" => "Connection Exception",
        "09" => "Triggered Action Exception",
        "0A" => "Feature Not Supported",
        "0B" => "Invalid Transaction Initiation",
        "0F" => "Locator Exception",
        "0L" => "Invalid Grantor",
        "0P" => "Invalid Role Specification",
        "0Z" => "Diagnostics Exception",
        "20" => "Case Not Found",
        "21" => "Cardinality Violation",
        "22" => "Data Exception",
        "23" => "Integrity Constraint Violation",
        "24" => "Invalid Cursor State",
        "25" => "Invalid Transaction State",
        "26" => "Invalid SQL Statement Name",
        "27" => "Triggered Data Change Violation",
        "28" => "Invalid Authorization Specification",
        "2B" => "Dependent Privilege Descriptors Still Exist",
        "2D" => "Invalid Transaction Termination",
        "2F" => "SQL Routine Exception",
        "34" => "Invalid Cursor Name",
        "38" => "External Routine Exception",
        "39" => "External Routine Invocation Exception",
        "3B" => "Savepoint Exception",
        "3D" => "Invalid Catalog Name",
        "3F" => "Invalid Schema Name",
        "40" => "Transaction Rollback",
        "42" => "Syntax Error or Access Rule Violation",
        "44" => "WITH CHECK OPTION Violation",
        "53" => "Insufficient Resources",
        "54" => "Program Limit Exceeded",
        "55" => "Object Not In Prerequisite State",
        "57" => "Operator Intervention",
        "58" => "System Error",
        "72" => "Snapshot Failure",
        "F0" => "Configuration File Error",
        "HV" => "Foreign Data Wrapper Error",
        "P0" => "PL/pgSQL Error",
        "XX" => "Internal Error",
        _ => "Unknown",
    }
}
