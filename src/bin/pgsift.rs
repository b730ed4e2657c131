//! pgsift - PostgreSQL log analyzer.
//!
//! Parses PostgreSQL server logs in stderr, csvlog, jsonlog and syslog
//! formats (optionally gzip/zstd/tar compressed), aggregates query,
//! connection, checkpoint, vacuum, lock and temp-file statistics and
//! prints a report.

use tikv_jemallocator::Jemalloc;
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::path::PathBuf;
use std::time::Instant;

use clap::Parser;
use tracing::{Level, error};
use tracing_subscriber::EnvFilter;

use pgsift::analysis::stats::{format_bytes, format_ms};
use pgsift::analysis::AggregatedMetrics;
use pgsift::parser::LogFilters;
use pgsift::pipeline;
use pgsift::util::resolve_time_bounds;

/// PostgreSQL log analyzer.
#[derive(Parser)]
#[command(name = "pgsift", about = "PostgreSQL log analyzer", version)]
struct Args {
    /// Log files to analyze. Use '-' to read from stdin.
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Only analyze entries at or after this time
    /// (unix timestamp, ISO 8601, 'YYYY-MM-DD HH:MM:SS' or '-1h' style relative).
    #[arg(short, long)]
    begin: Option<String>,

    /// Only analyze entries before this time (same formats as --begin).
    #[arg(short, long)]
    end: Option<String>,

    /// Window length (e.g. "30m", "2h") anchored to --begin or --end.
    #[arg(short, long)]
    window: Option<String>,

    /// Analyze only the trailing period before now (e.g. "1h", "2d").
    /// Cannot be combined with --begin, --end or --window.
    #[arg(short, long)]
    last: Option<String>,

    /// Only include entries for this database (repeatable).
    #[arg(long = "db", value_name = "NAME")]
    databases: Vec<String>,

    /// Only include entries for this user (repeatable).
    #[arg(long = "user", value_name = "NAME")]
    users: Vec<String>,

    /// Exclude entries for this user (repeatable, wins over --user).
    #[arg(long = "exclude-user", value_name = "NAME")]
    exclude_users: Vec<String>,

    /// Only include entries for this application (repeatable).
    #[arg(long = "app", value_name = "NAME")]
    applications: Vec<String>,

    /// Number of queries shown in the top-queries section.
    #[arg(long, default_value = "20")]
    top: usize,

    /// Emit the full aggregated metrics as JSON instead of the text report.
    #[arg(long)]
    json: bool,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

/// Initializes the tracing subscriber with the appropriate log level.
/// Default level is INFO. Use -q for quiet mode (errors only).
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("pgsift={}", level).parse().unwrap());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn build_filters(args: &Args) -> Result<LogFilters, String> {
    let (begin, end) = resolve_time_bounds(
        args.begin.as_deref(),
        args.end.as_deref(),
        args.window.as_deref(),
        args.last.as_deref(),
    )
    .map_err(|e| e.to_string())?;

    Ok(LogFilters {
        begin,
        end,
        databases: args.databases.clone(),
        users: args.users.clone(),
        exclude_users: args.exclude_users.clone(),
        applications: args.applications.clone(),
    })
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    let filters = match build_filters(&args) {
        Ok(filters) => filters,
        Err(message) => {
            error!("{}", message);
            std::process::exit(2);
        }
    };

    let started = Instant::now();
    let report = match pipeline::run(&args.files, &filters) {
        Ok(report) => report,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };
    let elapsed = started.elapsed();

    if args.json {
        match serde_json::to_string_pretty(&report.metrics) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                error!("failed to serialize metrics: {}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    print_report(&report.metrics, args.top);
    eprintln!();
    eprintln!(
        "{} entries from {} file(s) in {:.2}s ({:.0} entries/s), {} lines skipped",
        report.entries_parsed,
        report.files_ok,
        elapsed.as_secs_f64(),
        report.entries_parsed as f64 / elapsed.as_secs_f64().max(0.001),
        report.lines_skipped,
    );
}

fn print_report(m: &AggregatedMetrics, top: usize) {
    println!("=== Overview ===");
    match (m.global.first_timestamp, m.global.last_timestamp) {
        (Some(first), Some(last)) => {
            println!("Time range:   {} .. {}", first, last);
        }
        _ => println!("Time range:   (none)"),
    }
    println!("Entries:      {}", m.global.entries);
    println!(
        "Severities:   {} panic, {} fatal, {} error, {} warning, {} log",
        m.global.panics, m.global.fatals, m.global.errors, m.global.warnings, m.global.logs
    );
    if !m.entities.databases.is_empty() {
        println!("Databases:    {}", m.entities.databases.join(", "));
    }
    if !m.entities.users.is_empty() {
        println!("Users:        {}", m.entities.users.join(", "));
    }
    if !m.entities.applications.is_empty() {
        println!("Applications: {}", m.entities.applications.join(", "));
    }

    if m.sql.total_statements > 0 || m.sql.duration_only > 0 {
        println!();
        println!("=== Queries ===");
        println!(
            "Statements:   {} ({} distinct), total {}",
            m.sql.total_statements,
            m.sql.distinct_queries,
            format_ms(m.sql.total_ms)
        );
        if m.sql.duration_only > 0 {
            println!("Duration-only entries: {}", m.sql.duration_only);
        }
        for stat in m.sql.queries.iter().take(top) {
            println!(
                "  {}  {:>6}x  total {:>9}  mean {:>9}  p99 {:>9}  max {:>9}",
                stat.query_id,
                stat.count,
                format_ms(stat.total_ms),
                format_ms(stat.mean_ms),
                format_ms(stat.p99_ms),
                format_ms(stat.max_ms),
            );
            println!("      {}", truncate(&stat.example, 120));
        }
        if !m.sql.by_type.is_empty() {
            println!("By type:");
            for t in &m.sql.by_type {
                println!(
                    "  {:<10} {:>8}x  total {}",
                    t.query_type,
                    t.count,
                    format_ms(t.total_ms)
                );
            }
        }
        if !m.sql.queries_without_duration.is_empty() {
            println!(
                "Seen without durations: {}",
                m.sql.queries_without_duration.join(", ")
            );
        }
    }

    if m.connections.received > 0 || m.connections.sessions > 0 {
        println!();
        println!("=== Connections ===");
        println!(
            "Received: {}, disconnections: {}, sessions: {}",
            m.connections.received, m.connections.disconnections, m.connections.sessions
        );
        println!(
            "Session time: avg {:.1}s, max {:.1}s",
            m.connections.avg_session_secs, m.connections.max_session_secs
        );
        if m.connections.concurrency.peak > 0 {
            let peak_time = m
                .connections
                .concurrency
                .peak_time
                .map(|t| t.to_string())
                .unwrap_or_else(|| "-".to_string());
            println!(
                "Peak concurrency: {} at {}",
                m.connections.concurrency.peak, peak_time
            );
            for bucket in &m.connections.concurrency.buckets {
                println!(
                    "  {} .. {}  max {}",
                    bucket.start, bucket.end, bucket.max_concurrent
                );
            }
        }
    }

    if m.checkpoints.completed > 0 {
        println!();
        println!("=== Checkpoints ===");
        println!(
            "Completed: {}, write time avg {:.1}s max {:.1}s",
            m.checkpoints.completed, m.checkpoints.avg_write_secs, m.checkpoints.max_write_secs
        );
        for reason in &m.checkpoints.by_reason {
            println!("  {:<12} {}", reason.reason, reason.count);
        }
    }

    if m.vacuum.vacuums > 0 || m.vacuum.analyzes > 0 {
        println!();
        println!("=== Autovacuum ===");
        println!(
            "Vacuums: {}, analyzes: {}, space recovered: {}",
            m.vacuum.vacuums,
            m.vacuum.analyzes,
            format_bytes(m.vacuum.space_recovered_bytes)
        );
        for table in m.vacuum.tables.iter().take(top) {
            println!(
                "  {:<40} {} vacuums, {} analyzes",
                table.table, table.vacuums, table.analyzes
            );
        }
    }

    if m.locks.waiting_reports > 0 || m.locks.deadlocks > 0 {
        println!();
        println!("=== Locks ===");
        println!(
            "Waits reported: {}, acquired after wait: {}, deadlocks: {}",
            m.locks.waiting_reports, m.locks.acquired, m.locks.deadlocks
        );
        println!(
            "Wait time: total {}, max {}",
            format_ms(m.locks.total_wait_ms),
            format_ms(m.locks.max_wait_ms)
        );
        for resource in &m.locks.by_resource {
            println!("  {:<20} {} waits", resource.resource, resource.count);
        }
        for q in m.locks.by_query.iter().take(top) {
            println!(
                "  {}  {} acquired ({}), {} still waiting",
                q.query_id,
                q.acquired,
                format_ms(q.acquired_wait_ms),
                q.still_waiting
            );
        }
    }

    if m.temp_files.count > 0 {
        println!();
        println!("=== Temporary files ===");
        println!(
            "Files: {}, total {}, largest {}",
            m.temp_files.count,
            format_bytes(m.temp_files.total_bytes),
            format_bytes(m.temp_files.max_bytes)
        );
        for q in m.temp_files.by_query.iter().take(top) {
            println!(
                "  {}  {}x  {}  {}",
                q.query_id,
                q.count,
                format_bytes(q.total_bytes),
                truncate(&q.example, 80)
            );
        }
    }

    if !m.events.is_empty() {
        println!();
        println!("=== Events ===");
        for event in &m.events {
            println!(
                "  {:<8} {:>8}  {:>5.1}%",
                event.severity.as_str(),
                event.count,
                event.percent
            );
        }
    }

    if !m.error_classes.is_empty() {
        println!();
        println!("=== Error classes ===");
        for class in &m.error_classes {
            println!(
                "  {}  {:<45} {}",
                class.class, class.description, class.count
            );
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{}...", cut)
    }
}
