//! Parallel ingestion pipeline.
//!
//! A fixed pool of worker threads pulls file paths from a shared channel
//! and runs decompress -> detect -> parse on each, writing canonical
//! entries into a bounded raw queue. One filter thread moves matching
//! entries into a bounded filtered queue, which the aggregation fold
//! drains to exhaustion. The two bounded queues are the only cross-thread
//! state and give the pipeline backpressure: fast parsers block rather
//! than buffer unboundedly.
//!
//! Per-file problems are logged and skipped; the run as a whole fails only
//! when no file yields a single entry. Configuration problems (stdin mixed
//! with files) fail before any thread starts.

use std::io::{self, BufReader, Cursor, Read};
use std::path::{Path, PathBuf};
use std::thread;

use crossbeam_channel::{Sender, bounded, unbounded};
use tracing::{debug, info, warn};

use crate::analysis::{AggregatedMetrics, StreamingAnalyzer};
use crate::parser::{
    self, DetectError, FileStats, Input, LogEntry, LogFilters, SourceError, detect_format,
};

/// Capacity of the raw and filtered entry queues.
const QUEUE_CAPACITY: usize = 24_576;

/// Bytes sampled from the head of each stream for format detection.
const DETECT_SAMPLE: usize = 32 * 1024;

/// Error type for a whole pipeline run.
#[derive(Debug)]
pub enum PipelineError {
    /// No input paths were given.
    NoInputs,
    /// `-` (stdin) must be the only input when used.
    StdinMixed,
    /// Every input file failed; nothing was aggregated.
    AllFilesFailed(usize),
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::NoInputs => write!(f, "no input files"),
            PipelineError::StdinMixed => {
                write!(f, "stdin ('-') cannot be combined with file inputs")
            }
            PipelineError::AllFilesFailed(n) => {
                write!(f, "all {} input file(s) failed to parse", n)
            }
        }
    }
}

impl std::error::Error for PipelineError {}

/// Error type for one input file.
#[derive(Debug)]
pub enum FileError {
    Source(SourceError),
    Detect(DetectError),
    Io(io::Error),
    /// The file parsed but produced zero entries.
    NoEntries,
}

impl std::fmt::Display for FileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileError::Source(e) => write!(f, "{}", e),
            FileError::Detect(e) => write!(f, "{}", e),
            FileError::Io(e) => write!(f, "read error: {}", e),
            FileError::NoEntries => write!(f, "no log entries found"),
        }
    }
}

impl std::error::Error for FileError {}

impl From<SourceError> for FileError {
    fn from(e: SourceError) -> Self {
        FileError::Source(e)
    }
}

impl From<io::Error> for FileError {
    fn from(e: io::Error) -> Self {
        FileError::Io(e)
    }
}

/// Outcome of a pipeline run.
#[derive(Debug)]
pub struct RunReport {
    pub metrics: AggregatedMetrics,
    pub files_ok: usize,
    pub files_failed: usize,
    /// Entries emitted by parsers, before filtering.
    pub entries_parsed: u64,
    /// Lines or records that did not parse in otherwise good files.
    pub lines_skipped: u64,
}

/// Worker pool size for a given number of input files: a single file gets
/// a single worker, otherwise half the cores clamped to [2, 4] and never
/// more workers than files.
pub fn worker_count(files: usize) -> usize {
    if files <= 1 {
        return 1;
    }
    let cores = thread::available_parallelism().map(|n| n.get()).unwrap_or(2);
    (cores / 2).clamp(2, 4).min(files)
}

/// Runs the full pipeline over `paths` (where `-` means stdin) and returns
/// the aggregated snapshot.
pub fn run(paths: &[PathBuf], filters: &LogFilters) -> Result<RunReport, PipelineError> {
    if paths.is_empty() {
        return Err(PipelineError::NoInputs);
    }
    let stdin_count = paths.iter().filter(|p| p.as_os_str() == "-").count();
    if stdin_count > 0 && paths.len() > 1 {
        return Err(PipelineError::StdinMixed);
    }

    let workers = worker_count(paths.len());
    debug!(files = paths.len(), workers, "starting ingestion");

    let mut analyzer = StreamingAnalyzer::new();
    let mut stats = FileStats::default();
    let mut files_ok = 0usize;
    let mut files_failed = 0usize;

    thread::scope(|scope| {
        let (path_tx, path_rx) = unbounded::<PathBuf>();
        let (raw_tx, raw_rx) = bounded::<LogEntry>(QUEUE_CAPACITY);
        let (filtered_tx, filtered_rx) = bounded::<LogEntry>(QUEUE_CAPACITY);
        let (result_tx, result_rx) = unbounded::<(PathBuf, Result<FileStats, FileError>)>();

        for path in paths {
            // Receiver outlives this loop; send cannot fail here
            let _ = path_tx.send(path.clone());
        }
        drop(path_tx);

        for _ in 0..workers {
            let path_rx = path_rx.clone();
            let raw_tx = raw_tx.clone();
            let result_tx = result_tx.clone();
            scope.spawn(move || {
                for path in path_rx {
                    let outcome = process_file(&path, &raw_tx);
                    let _ = result_tx.send((path, outcome));
                }
            });
        }
        drop(path_rx);
        drop(raw_tx);
        drop(result_tx);

        let filters = filters.clone();
        scope.spawn(move || {
            for entry in raw_rx {
                if filters.matches(&entry) && filtered_tx.send(entry).is_err() {
                    break;
                }
            }
        });

        for entry in filtered_rx {
            analyzer.process(&entry);
        }

        for (path, outcome) in result_rx {
            match outcome {
                Ok(file_stats) => {
                    debug!(
                        path = %path.display(),
                        entries = file_stats.entries,
                        skipped = file_stats.skipped,
                        "file parsed"
                    );
                    stats.merge(file_stats);
                    files_ok += 1;
                }
                Err(e) => {
                    warn!("skipping {}: {}", path.display(), e);
                    files_failed += 1;
                }
            }
        }
    });

    if files_ok == 0 {
        return Err(PipelineError::AllFilesFailed(files_failed));
    }
    if files_failed > 0 {
        info!(
            "{} of {} files could not be processed",
            files_failed,
            paths.len()
        );
    }

    Ok(RunReport {
        metrics: analyzer.finalize(),
        files_ok,
        files_failed,
        entries_parsed: stats.entries,
        lines_skipped: stats.skipped,
    })
}

/// Processes one input path end to end: open, detect, parse. Tar archives
/// are unpacked member by member, each detected independently.
///
/// A stream error hitting after entries were already emitted (a truncated
/// compressed file, say) degrades to a warning: those entries are aggregated
/// and the file counts as processed.
fn process_file(path: &Path, tx: &Sender<LogEntry>) -> Result<FileStats, FileError> {
    let input = if path.as_os_str() == "-" {
        parser::open_stdin()?
    } else {
        parser::open(path)?
    };

    let stats = match input {
        Input::Stream(reader) => {
            let (stats, err) = process_stream(reader, tx);
            if let Some(e) = err {
                if stats.entries == 0 {
                    return Err(e);
                }
                warn!(
                    "{}: input ended early after {} entries: {}",
                    path.display(),
                    stats.entries,
                    e
                );
            }
            stats
        }
        Input::Archive(reader) => {
            let mut archive = tar::Archive::new(reader);
            let mut total = FileStats::default();
            for member in archive.entries()? {
                let member = member?;
                if !member.header().entry_type().is_file() {
                    continue;
                }
                let name = member
                    .path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|_| "<member>".to_string());
                let (member_stats, err) = process_stream(member, tx);
                total.merge(member_stats);
                if let Some(e) = err {
                    warn!("archive member {}: {}", name, e);
                }
            }
            total
        }
    };

    if stats.entries == 0 {
        return Err(FileError::NoEntries);
    }
    Ok(stats)
}

/// Detects the format from a bounded head sample, then parses the whole
/// stream (sample included) in that format. Returns the entries emitted so
/// far together with any error, so a mid-stream failure keeps its partial
/// results.
fn process_stream<R: Read>(reader: R, tx: &Sender<LogEntry>) -> (FileStats, Option<FileError>) {
    let mut reader = reader;
    let mut sample = Vec::with_capacity(DETECT_SAMPLE);
    let mut buf = [0u8; 8192];
    while sample.len() < DETECT_SAMPLE {
        let n = match reader.read(&mut buf) {
            Ok(n) => n,
            Err(e) => return (FileStats::default(), Some(FileError::Io(e))),
        };
        if n == 0 {
            break;
        }
        let take = n.min(DETECT_SAMPLE - sample.len());
        sample.extend_from_slice(&buf[..take]);
        if take < n {
            // Put the overshoot back in front of the remaining stream
            let rest = buf[take..n].to_vec();
            let format = match detect_format(&sample) {
                Ok(f) => f,
                Err(e) => return (FileStats::default(), Some(FileError::Detect(e))),
            };
            let full = Cursor::new(sample).chain(Cursor::new(rest)).chain(reader);
            return parse_from(format, full, tx);
        }
    }

    let format = match detect_format(&sample) {
        Ok(f) => f,
        Err(e) => return (FileStats::default(), Some(FileError::Detect(e))),
    };
    let full = Cursor::new(sample).chain(reader);
    parse_from(format, full, tx)
}

fn parse_from<R: Read>(
    format: parser::LogFormat,
    reader: R,
    tx: &Sender<LogEntry>,
) -> (FileStats, Option<FileError>) {
    let mut emitted = 0u64;
    let result = parser::parse_stream(format, BufReader::new(reader), &mut |entry| {
        emitted += 1;
        let _ = tx.send(entry);
    });
    match result {
        Ok(stats) => (stats, None),
        // The parser's own counters are lost on error; the emit count is the
        // ground truth for what reached the aggregator
        Err(e) => (
            FileStats {
                entries: emitted,
                skipped: 0,
            },
            Some(FileError::Io(e)),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;

    const SAMPLE_LOG: &str = "\
2024-01-15 10:30:00.100 UTC [100] LOG:  connection received: host=10.0.0.5 port=4321
2024-01-15 10:30:01.200 UTC [100] user=alice,db=shop LOG:  duration: 15.500 ms  statement: SELECT * FROM orders WHERE id = 1
2024-01-15 10:30:02.300 UTC [100] user=alice,db=shop ERROR:  42P01: relation \"missing\" does not exist
2024-01-15 10:31:00.000 UTC [100] LOG:  disconnection: session time: 0:01:00.000 user=alice database=shop
";

    #[test]
    fn test_worker_count_policy() {
        assert_eq!(worker_count(0), 1);
        assert_eq!(worker_count(1), 1);
        let n = worker_count(8);
        assert!((2..=4).contains(&n), "got {}", n);
        assert!(worker_count(2) <= 2);
    }

    #[test]
    fn test_run_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pg.log");
        fs::write(&path, SAMPLE_LOG).unwrap();

        let report = run(&[path], &LogFilters::default()).unwrap();
        assert_eq!(report.files_ok, 1);
        assert_eq!(report.entries_parsed, 4);
        assert_eq!(report.metrics.global.entries, 4);
        assert_eq!(report.metrics.sql.total_statements, 1);
        assert_eq!(report.metrics.connections.received, 1);
    }

    #[test]
    fn test_stdin_mixed_with_files_is_fatal() {
        let err = run(
            &[PathBuf::from("-"), PathBuf::from("x.log")],
            &LogFilters::default(),
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::StdinMixed));
    }

    #[test]
    fn test_no_inputs() {
        let err = run(&[], &LogFilters::default()).unwrap_err();
        assert!(matches!(err, PipelineError::NoInputs));
    }

    #[test]
    fn test_partial_failure_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let good1 = dir.path().join("a.log");
        let good2 = dir.path().join("b.log");
        let corrupt = dir.path().join("c.log");
        fs::write(&good1, SAMPLE_LOG).unwrap();
        fs::write(&good2, SAMPLE_LOG).unwrap();
        fs::write(&corrupt, [0u8, 159, 146, 150]).unwrap();

        let report = run(
            &[good1, good2, corrupt],
            &LogFilters::default(),
        )
        .unwrap();
        assert_eq!(report.files_ok, 2);
        assert_eq!(report.files_failed, 1);
        assert_eq!(report.metrics.global.entries, 8);
    }

    #[test]
    fn test_all_files_failed() {
        let dir = tempfile::tempdir().unwrap();
        let bad = dir.path().join("bad.log");
        fs::write(&bad, "garbage\nlines\n").unwrap();

        let err = run(&[bad, dir.path().join("missing.log")], &LogFilters::default())
            .unwrap_err();
        assert!(matches!(err, PipelineError::AllFilesFailed(2)));
    }

    #[test]
    fn test_truncated_gzip_keeps_parsed_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pg.log.gz");

        let mut body = String::new();
        for _ in 0..2000 {
            body.push_str(SAMPLE_LOG);
        }
        let mut enc =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(body.as_bytes()).unwrap();
        let compressed = enc.finish().unwrap();
        fs::write(&path, &compressed[..compressed.len() - 64]).unwrap();

        let report = run(&[path], &LogFilters::default()).unwrap();
        assert_eq!(report.files_ok, 1);
        assert_eq!(report.files_failed, 0);
        assert!(report.metrics.global.entries > 0);
    }

    #[test]
    fn test_compression_transparency() {
        let dir = tempfile::tempdir().unwrap();

        let plain = dir.path().join("pg.log");
        fs::write(&plain, SAMPLE_LOG).unwrap();

        let gz = dir.path().join("pg.log.gz");
        let mut enc = flate2::write::GzEncoder::new(
            fs::File::create(&gz).unwrap(),
            flate2::Compression::default(),
        );
        enc.write_all(SAMPLE_LOG.as_bytes()).unwrap();
        enc.finish().unwrap();

        let zst = dir.path().join("pg.log.zst");
        fs::write(&zst, zstd::encode_all(SAMPLE_LOG.as_bytes(), 3).unwrap()).unwrap();

        let filters = LogFilters::default();
        let json_plain =
            serde_json::to_string(&run(&[plain], &filters).unwrap().metrics).unwrap();
        let json_gz = serde_json::to_string(&run(&[gz], &filters).unwrap().metrics).unwrap();
        let json_zst = serde_json::to_string(&run(&[zst], &filters).unwrap().metrics).unwrap();

        assert_eq!(json_plain, json_gz);
        assert_eq!(json_plain, json_zst);
    }

    #[test]
    fn test_format_equivalence_on_key_metrics() {
        let stderr_log = "\
2024-01-15 10:30:01.200 UTC [100] user=alice,db=shop LOG:  duration: 15.500 ms  statement: SELECT 1
2024-01-15 10:31:00.000 UTC [100] user=alice,db=shop ERROR:  42P01: relation \"missing\" does not exist
";
        let csv_log = "\
2024-01-15 10:30:01.200 UTC,\"alice\",\"shop\",100,\"10.0.0.5:4321\",65a4f2b1.64,2,\"SELECT\",2024-01-15 10:00:00 UTC,3/15,0,LOG,00000,\"duration: 15.500 ms  statement: SELECT 1\",,,,,,,,,\"psql\",\"client backend\",,0
2024-01-15 10:31:00 UTC,\"alice\",\"shop\",100,\"10.0.0.5:4321\",65a4f2b1.64,3,\"SELECT\",2024-01-15 10:00:00 UTC,3/16,0,ERROR,42P01,\"relation \"\"missing\"\" does not exist\",,,,,,,,,\"psql\",\"client backend\",,0
";
        let json_log = concat!(
            "{\"timestamp\":\"2024-01-15 10:30:01.200 UTC\",\"error_severity\":\"LOG\",",
            "\"message\":\"duration: 15.500 ms  statement: SELECT 1\",",
            "\"pid\":100,\"user\":\"alice\",\"dbname\":\"shop\"}\n",
            "{\"timestamp\":\"2024-01-15 10:31:00 UTC\",\"error_severity\":\"ERROR\",",
            "\"message\":\"relation \\\"missing\\\" does not exist\",",
            "\"state_code\":\"42P01\",\"pid\":100,\"user\":\"alice\",\"dbname\":\"shop\"}\n",
        );
        // BSD envelope around the same prefixed payloads; the inner
        // timestamps carry the year the envelope lacks
        let syslog_log = "\
Jan 15 10:30:01 db1 postgres[100]: [1-1] 2024-01-15 10:30:01.200 UTC [100] user=alice,db=shop LOG:  duration: 15.500 ms  statement: SELECT 1
Jan 15 10:31:00 db1 postgres[100]: [2-1] 2024-01-15 10:31:00.000 UTC [100] user=alice,db=shop ERROR:  42P01: relation \"missing\" does not exist
";

        let dir = tempfile::tempdir().unwrap();
        let mut snapshots = Vec::new();
        for (name, content) in [
            ("pg.stderr.log", stderr_log),
            ("pg.csv.log", csv_log),
            ("pg.json.log", json_log),
            ("pg.syslog.log", syslog_log),
        ] {
            let path = dir.path().join(name);
            fs::write(&path, content).unwrap();
            snapshots.push(run(&[path], &LogFilters::default()).unwrap().metrics);
        }

        let reference = &snapshots[0];
        assert_eq!(reference.sql.total_statements, 1);
        for m in &snapshots {
            assert_eq!(m.global.entries, reference.global.entries);
            assert_eq!(m.global.errors, reference.global.errors);
            assert_eq!(m.sql.total_statements, reference.sql.total_statements);
            assert_eq!(m.sql.queries[0].query_id, reference.sql.queries[0].query_id);
            assert_eq!(m.sql.queries[0].total_ms, reference.sql.queries[0].total_ms);
            assert_eq!(m.error_classes[0].class, "42");
            assert_eq!(m.entities.users, reference.entities.users);
            assert_eq!(m.entities.databases, reference.entities.databases);
        }
    }

    #[test]
    fn test_tar_archive_members_parsed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs.tar");
        let file = fs::File::create(&path).unwrap();
        let mut builder = tar::Builder::new(file);
        for name in ["one.log", "two.log"] {
            let mut header = tar::Header::new_gnu();
            header.set_size(SAMPLE_LOG.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, name, SAMPLE_LOG.as_bytes())
                .unwrap();
        }
        builder.finish().unwrap();

        let report = run(&[path], &LogFilters::default()).unwrap();
        assert_eq!(report.metrics.global.entries, 8);
    }

    #[test]
    fn test_filters_applied_in_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pg.log");
        fs::write(&path, SAMPLE_LOG).unwrap();

        let filters = LogFilters {
            users: vec!["nobody".to_string()],
            ..LogFilters::default()
        };
        // All attribute-carrying entries are for alice; entries without a
        // user attribute are dropped by the allow-list too
        let err = run(&[path], &filters);
        // File still parsed fine; zero aggregated entries is not a failure
        let report = err.unwrap();
        assert_eq!(report.metrics.global.entries, 0);
        assert_eq!(report.entries_parsed, 4);
    }
}
