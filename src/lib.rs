//! pgsift - PostgreSQL log analyzer library.
//!
//! Turns raw PostgreSQL server logs (stderr, csvlog, jsonlog or
//! syslog-wrapped output, possibly gzip/zstd/tar compressed) into a single
//! aggregated metrics snapshot in one streaming pass:
//!
//! - `parser` - format detection, decompression and per-format parsers
//!   producing canonical [`parser::LogEntry`] records
//! - `pipeline` - parallel per-file ingestion over bounded queues
//! - `analysis` - streaming aggregation into [`analysis::AggregatedMetrics`]
//! - `util` - flexible time parsing for CLI arguments

pub mod analysis;
pub mod parser;
pub mod pipeline;
pub mod util;
