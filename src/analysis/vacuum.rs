//! Autovacuum and autoanalyze analyzer.

use std::collections::HashMap;

use serde::Serialize;

use crate::parser::LogEntry;

/// Size of one heap page; removed pages translate to recovered bytes.
const PAGE_SIZE: u64 = 8192;

#[derive(Debug, Clone, Serialize)]
pub struct TableVacuumStat {
    pub table: String,
    pub vacuums: u64,
    pub analyzes: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct VacuumMetrics {
    pub vacuums: u64,
    pub analyzes: u64,
    pub space_recovered_bytes: u64,
    pub tables: Vec<TableVacuumStat>,
}

#[derive(Default)]
struct TableAccum {
    vacuums: u64,
    analyzes: u64,
}

#[derive(Default)]
pub struct VacuumAnalyzer {
    vacuums: u64,
    analyzes: u64,
    space_recovered_bytes: u64,
    tables: HashMap<String, TableAccum>,
}

impl VacuumAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process(&mut self, entry: &LogEntry) {
        if entry.message.contains("automatic vacuum of table") {
            self.vacuums += 1;
            self.tables
                .entry(table_name(&entry.message))
                .or_default()
                .vacuums += 1;
            if let Some(pages) = extract_pages_removed(&entry.message) {
                self.space_recovered_bytes += pages * PAGE_SIZE;
            }
        } else if entry.message.contains("automatic analyze of table") {
            self.analyzes += 1;
            self.tables
                .entry(table_name(&entry.message))
                .or_default()
                .analyzes += 1;
        }
    }

    pub fn finalize(self) -> VacuumMetrics {
        let mut tables: Vec<TableVacuumStat> = self
            .tables
            .into_iter()
            .map(|(table, accum)| TableVacuumStat {
                table,
                vacuums: accum.vacuums,
                analyzes: accum.analyzes,
            })
            .collect();
        tables.sort_by(|a, b| {
            (b.vacuums + b.analyzes)
                .cmp(&(a.vacuums + a.analyzes))
                .then_with(|| a.table.cmp(&b.table))
        });

        VacuumMetrics {
            vacuums: self.vacuums,
            analyzes: self.analyzes,
            space_recovered_bytes: self.space_recovered_bytes,
            tables,
        }
    }
}

/// The target table is the first quoted token of the message.
fn table_name(message: &str) -> String {
    let Some(start) = message.find('"') else {
        return "UNKNOWN".to_string();
    };
    let rest = &message[start + 1..];
    match rest.find('"') {
        Some(end) => rest[..end].to_string(),
        None => "UNKNOWN".to_string(),
    }
}

/// Extracts N from `pages: N removed, ...`.
fn extract_pages_removed(message: &str) -> Option<u64> {
    let pos = message.find("pages: ")?;
    let rest = &message[pos + "pages: ".len()..];
    let end = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
    if !rest[end..].trim_start().starts_with("removed") {
        return None;
    }
    rest[..end].parse().ok()
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
    fn test_vacuum_and_analyze_counted() {
        let mut a = VacuumAnalyzer::new();
        a.process(&entry(
            "LOG:  automatic vacuum of table \"shop.public.orders\": index scans: 1 pages: 12 removed, 340 remain",
        ));
        a.process(&entry(
            "LOG:  automatic vacuum of table \"shop.public.orders\": index scans: 0 pages: 0 removed, 340 remain",
        ));
        a.process(&entry(
            "LOG:  automatic analyze of table \"shop.public.users\" system usage: CPU 0.01s",
        ));

        let m = a.finalize();
        assert_eq!(m.vacuums, 2);
        assert_eq!(m.analyzes, 1);
        assert_eq!(m.space_recovered_bytes, 12 * 8192);
        assert_eq!(m.tables[0].table, "shop.public.orders");
        assert_eq!(m.tables[0].vacuums, 2);
    }

    #[test]
    fn test_unquoted_table_is_unknown() {
        let mut a = VacuumAnalyzer::new();
        a.process(&entry("LOG:  automatic vacuum of table without quotes"));
        let m = a.finalize();
        assert_eq!(m.tables[0].table, "UNKNOWN");
    }
}
