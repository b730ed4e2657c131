//! Small numeric helpers shared by the analyzers.

/// Median of a sorted slice. Returns 0.0 for empty input.
pub fn median(sorted: &[f64]) -> f64 {
    percentile(sorted, 50.0)
}

/// Nearest-rank percentile of a sorted slice. Returns 0.0 for empty input.
pub fn percentile(sorted: &[f64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let mut index = (sorted.len() as f64 * pct / 100.0) as usize;
    if index >= sorted.len() {
        index = sorted.len() - 1;
    }
    sorted[index]
}

/// Formats a millisecond duration for human output.
pub fn format_ms(ms: f64) -> String {
    if ms >= 60_000.0 {
        format!("{:.1}min", ms / 60_000.0)
    } else if ms >= 1_000.0 {
        format!("{:.2}s", ms / 1_000.0)
    } else {
        format!("{:.2}ms", ms)
    }
}

/// Formats a byte count for human output.
pub fn format_bytes(bytes: u64) -> String {
    const GB: u64 = 1024 * 1024 * 1024;
    const MB: u64 = 1024 * 1024;
    const KB: u64 = 1024;

    if bytes >= GB {
        format!("{:.1}G", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1}M", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1}K", bytes as f64 / KB as f64)
    } else {
        format!("{}B", bytes)
    }
}
