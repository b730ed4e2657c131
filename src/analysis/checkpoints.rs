//! Checkpoint analyzer.
//!
//! Associates each `checkpoint complete` with the most recent
//! `checkpoint starting: <reason>` and extracts the `total=X s` write time
//! from the completion message.

use std::collections::HashMap;

use serde::Serialize;

use crate::parser::LogEntry;

#[derive(Debug, Clone, Serialize)]
pub struct CheckpointTypeStat {
    pub reason: String,
    pub count: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CheckpointMetrics {
    pub completed: u64,
    pub by_reason: Vec<CheckpointTypeStat>,
    pub total_write_secs: f64,
    pub max_write_secs: f64,
    pub avg_write_secs: f64,
}

#[derive(Default)]
pub struct CheckpointAnalyzer {
    pending_reason: Option<String>,
    completed: u64,
    by_reason: HashMap<String, u64>,
    total_write_secs: f64,
    max_write_secs: f64,
}

impl CheckpointAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process(&mut self, entry: &LogEntry) {
        if let Some(pos) = entry.message.find("checkpoint starting: ") {
            let reason = entry.message[pos + "checkpoint starting: ".len()..]
                .trim()
                .to_string();
            self.pending_reason = Some(reason);
            return;
        }

        if entry.message.contains("checkpoint complete")
            || entry.message.contains("restartpoint complete")
        {
            self.completed += 1;
            let reason = self
                .pending_reason
                .take()
                .unwrap_or_else(|| "unknown".to_string());
            *self.by_reason.entry(reason).or_insert(0) += 1;

            if let Some(secs) = extract_total_secs(&entry.message) {
                self.total_write_secs += secs;
                if secs > self.max_write_secs {
                    self.max_write_secs = secs;
                }
            }
        }
    }

    pub fn finalize(self) -> CheckpointMetrics {
        let mut by_reason: Vec<CheckpointTypeStat> = self
            .by_reason
            .into_iter()
            .map(|(reason, count)| CheckpointTypeStat { reason, count })
            .collect();
        by_reason.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.reason.cmp(&b.reason)));

        CheckpointMetrics {
            completed: self.completed,
            avg_write_secs: if self.completed > 0 {
                self.total_write_secs / self.completed as f64
            } else {
                0.0
            },
            by_reason,
            total_write_secs: self.total_write_secs,
            max_write_secs: self.max_write_secs,
        }
    }
}

/// Extracts the `total=12.345 s` component of a completion message.
fn extract_total_secs(message: &str) -> Option<f64> {
    let pos = message.find("total=")?;
    let rest = &message[pos + "total=".len()..];
    let end = rest
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(rest.len());
    let value: f64 = rest[..end].parse().ok()?;
    rest[end..].trim_start().starts_with('s').then_some(value)
}
