//! Per-severity event tally.

use std::collections::HashMap;

use serde::Serialize;

use crate::parser::{LogEntry, Severity};

#[derive(Debug, Clone, Serialize)]
pub struct EventSummary {
    pub severity: Severity,
    pub count: u64,
    pub percent: f64,
}

#[derive(Default)]
pub struct EventAnalyzer {
    counts: HashMap<Severity, u64>,
    total: u64,
}

impl EventAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process(&mut self, entry: &LogEntry) {
        if let Some(severity) = entry.severity {
            *self.counts.entry(severity).or_insert(0) += 1;
            self.total += 1;
        }
    }

    pub fn finalize(self) -> Vec<EventSummary> {
        let total = self.total.max(1) as f64;
        let mut summaries: Vec<EventSummary> = self
            .counts
            .into_iter()
            .map(|(severity, count)| EventSummary {
                severity,
                count,
                percent: count as f64 * 100.0 / total,
            })
            .collect();
        summaries.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| a.severity.cmp(&b.severity))
        });
        summaries
    }
}
