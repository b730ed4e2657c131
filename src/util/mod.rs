//! Utility modules for pgsift.

mod time_parser;

pub use time_parser::{TimeParseError, parse_duration_secs, parse_time, resolve_time_bounds};
