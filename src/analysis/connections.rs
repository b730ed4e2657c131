//! Connection and session analyzer.
//!
//! Counts connections/disconnections, parses `session time:` durations and
//! reconstructs session intervals, which feed a sweep-line pass computing
//! the concurrent-session profile over the observed time range.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::parser::LogEntry;

/// One reconstructed session interval, half-open `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SessionEvent {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// One bucket of the concurrency histogram.
#[derive(Debug, Clone, Serialize)]
pub struct ConcurrencyBucket {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub max_concurrent: i64,
}

/// Concurrent-session profile over the analyzed range.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConcurrencyProfile {
    pub buckets: Vec<ConcurrencyBucket>,
    pub peak: i64,
    pub peak_time: Option<DateTime<Utc>>,
}

/// Finalized connection metrics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConnectionMetrics {
    pub received: u64,
    pub disconnections: u64,
    pub sessions: usize,
    pub avg_session_secs: f64,
    pub max_session_secs: f64,
    pub concurrency: ConcurrencyProfile,
}

/// Default number of histogram buckets.
pub const DEFAULT_BUCKETS: usize = 6;

#[derive(Default)]
pub struct ConnectionAnalyzer {
    received: u64,
    disconnections: u64,
    session_secs_total: f64,
    session_secs_max: f64,
    session_count: u64,
    connect_ts: HashMap<u32, DateTime<Utc>>,
    sessions: Vec<SessionEvent>,
}

impl ConnectionAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process(&mut self, entry: &LogEntry) {
        if entry.message.contains("connection received") {
            self.received += 1;
            if let Some(pid) = entry.pid {
                self.connect_ts.insert(pid, entry.timestamp);
            }
            return;
        }

        if entry.message.contains("disconnection") {
            self.disconnections += 1;
            let session_secs = extract_session_secs(&entry.message);
            if let Some(secs) = session_secs {
                self.session_count += 1;
                self.session_secs_total += secs;
                if secs > self.session_secs_max {
                    self.session_secs_max = secs;
                }
            }

            // Prefer the matching connect timestamp; fall back to the
            // logged session time when the connect was outside the window.
            let start = entry
                .pid
                .and_then(|pid| self.connect_ts.remove(&pid))
                .or_else(|| {
                    session_secs.map(|secs| {
                        entry.timestamp - Duration::milliseconds((secs * 1000.0) as i64)
                    })
                });
            if let Some(start) = start
                && start < entry.timestamp
            {
                self.sessions.push(SessionEvent {
                    start,
                    end: entry.timestamp,
                });
            }
        }
    }

    pub fn finalize(
        self,
        range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> ConnectionMetrics {
        let concurrency = match range {
            Some((start, end)) if end > start => {
                concurrency_histogram(&self.sessions, start, end, DEFAULT_BUCKETS)
            }
            _ => ConcurrencyProfile::default(),
        };

        ConnectionMetrics {
            received: self.received,
            disconnections: self.disconnections,
            sessions: self.sessions.len(),
            avg_session_secs: if self.session_count > 0 {
                self.session_secs_total / self.session_count as f64
            } else {
                0.0
            },
            max_session_secs: self.session_secs_max,
            concurrency,
        }
    }
}

/// Parses `session time: 0:02:05.123` into seconds.
fn extract_session_secs(message: &str) -> Option<f64> {
    let pos = message.find("session time: ")?;
    let rest = &message[pos + "session time: ".len()..];
    let token = rest
        .split([' ', ','])
        .next()
        .filter(|t| !t.is_empty())?;
    let mut parts = token.split(':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Sweep-line over session intervals: each start is a +1 event, each end a
/// -1 event. At equal timestamps starts sort before ends, so touching
/// sessions count as overlapping (the conservative reading for a peak).
/// The running counter carries across bucket boundaries, so long-lived
/// sessions are visible in every bucket they span.
pub fn concurrency_histogram(
    sessions: &[SessionEvent],
    range_start: DateTime<Utc>,
    range_end: DateTime<Utc>,
    bucket_count: usize,
) -> ConcurrencyProfile {
    if sessions.is_empty() || bucket_count == 0 || range_end <= range_start {
        return ConcurrencyProfile::default();
    }

    let mut events: Vec<(DateTime<Utc>, i64)> = Vec::with_capacity(sessions.len() * 2);
    for s in sessions {
        events.push((s.start, 1));
        events.push((s.end, -1));
    }
    events.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)));

    let total_ms = (range_end - range_start).num_milliseconds().max(1);
    let bucket_ms = (total_ms as f64 / bucket_count as f64).max(1.0);

    let mut buckets = Vec::with_capacity(bucket_count);
    let mut current: i64 = 0;
    let mut peak: i64 = 0;
    let mut peak_time: Option<DateTime<Utc>> = None;
    let mut idx = 0;

    // Sessions starting before the analyzed range still contribute
    while idx < events.len() && events[idx].0 < range_start {
        current += events[idx].1;
        if current > peak {
            peak = current;
            peak_time = Some(range_start);
        }
        idx += 1;
    }

    for b in 0..bucket_count {
        let bucket_start =
            range_start + Duration::milliseconds((b as f64 * bucket_ms) as i64);
        let bucket_end = if b + 1 == bucket_count {
            range_end
        } else {
            range_start + Duration::milliseconds(((b + 1) as f64 * bucket_ms) as i64)
        };

        // Events at the exact bucket boundary apply before the bucket:
        // an interval ending at `bucket_start` is not active inside it
        while idx < events.len() && events[idx].0 <= bucket_start {
            let at = events[idx].0;
            current += events[idx].1;
            if current > peak {
                peak = current;
                peak_time = Some(at);
            }
            idx += 1;
        }

        let mut bucket_max = current;
        while idx < events.len() && events[idx].0 < bucket_end {
            let at = events[idx].0;
            current += events[idx].1;
            if current > bucket_max {
                bucket_max = current;
            }
            if current > peak {
                peak = current;
                peak_time = Some(at);
            }
            idx += 1;
        }

        buckets.push(ConcurrencyBucket {
            start: bucket_start,
            end: bucket_end,
            max_concurrent: bucket_max,
        });
    }

    ConcurrencyProfile {
        buckets,
        peak,
        peak_time,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap()
    }

    fn session(start: i64, end: i64) -> SessionEvent {
        SessionEvent {
            start: ts(start),
            end: ts(end),
        }
    }

    #[test]
    fn test_peak_two_overlapping_one_apart() {
        // A=[0,10) B=[5,15) C=[20,25): peak is 2, first reached at t=5
        let sessions = [session(0, 10), session(5, 15), session(20, 25)];
        let profile = concurrency_histogram(&sessions, ts(0), ts(25), 1);
        assert_eq!(profile.peak, 2);
        assert_eq!(profile.peak_time, Some(ts(5)));
        assert_eq!(profile.buckets.len(), 1);
        assert_eq!(profile.buckets[0].max_concurrent, 2);
    }

    #[test]
    fn test_counter_carries_across_buckets() {
        // One session spanning the whole range: every bucket sees it
        let sessions = [session(0, 60)];
        let profile = concurrency_histogram(&sessions, ts(0), ts(60), 6);
        assert_eq!(profile.buckets.len(), 6);
        for bucket in &profile.buckets {
            assert_eq!(bucket.max_concurrent, 1);
        }
    }

    #[test]
    fn test_touching_sessions_count_as_overlap() {
        // End at t=10 and start at t=10: starts sort first, so 2
        let sessions = [session(0, 10), session(10, 20)];
        let profile = concurrency_histogram(&sessions, ts(0), ts(20), 1);
        assert_eq!(profile.peak, 2);
    }

    #[test]
    fn test_session_started_before_range() {
        let sessions = [session(-100, 30)];
        let profile = concurrency_histogram(&sessions, ts(0), ts(60), 2);
        assert_eq!(profile.buckets[0].max_concurrent, 1);
        assert_eq!(profile.buckets[1].max_concurrent, 0);
    }

    #[test]
    fn test_extract_session_secs() {
        assert_eq!(
            extract_session_secs("LOG:  disconnection: session time: 0:02:05.123 user=alice"),
            Some(125.123)
        );
        assert_eq!(
            extract_session_secs("LOG:  disconnection: session time: 1:00:00.000"),
            Some(3600.0)
        );
        assert_eq!(extract_session_secs("LOG:  disconnection"), None);
    }

    #[test]
    fn test_analyzer_matches_connect_disconnect() {
        let mut a = ConnectionAnalyzer::new();
        a.process(&LogEntry {
            timestamp: ts(100),
            pid: Some(7),
            message: "LOG:  connection received: host=10.0.0.5 port=1".into(),
            ..LogEntry::default()
        });
        a.process(&LogEntry {
            timestamp: ts(160),
            pid: Some(7),
            message: "LOG:  disconnection: session time: 0:01:00.000 user=alice".into(),
            ..LogEntry::default()
        });
        let m = a.finalize(Some((ts(100), ts(160))));
        assert_eq!(m.received, 1);
        assert_eq!(m.disconnections, 1);
        assert_eq!(m.sessions, 1);
        assert_eq!(m.avg_session_secs, 60.0);
    }

    #[test]
    fn test_disconnect_without_connect_uses_session_time() {
        let mut a = ConnectionAnalyzer::new();
        a.process(&LogEntry {
            timestamp: ts(500),
            pid: Some(9),
            message: "LOG:  disconnection: session time: 0:00:20.000".into(),
            ..LogEntry::default()
        });
        let m = a.finalize(Some((ts(0), ts(500))));
        assert_eq!(m.sessions, 1);
    }
}
