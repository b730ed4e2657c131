//! Log format auto-detection.
//!
//! Classifies a bounded sample from the head of a stream into one of the
//! supported formats. The decision is made once per stream; a file that
//! mixes formats fails detection-driven parsing instead of being silently
//! misread line by line.

use super::prefix::parse_pg_timestamp;

/// Supported log formats. Syslog has three envelope variants that share the
/// inner PostgreSQL message grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum LogFormat {
    Stderr,
    Csv,
    Json,
    SyslogBsd,
    SyslogIso,
    SyslogRfc5424,
}

impl LogFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogFormat::Stderr => "stderr",
            LogFormat::Csv => "csv",
            LogFormat::Json => "json",
            LogFormat::SyslogBsd => "syslog",
            LogFormat::SyslogIso => "syslog-iso",
            LogFormat::SyslogRfc5424 => "syslog-rfc5424",
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type for format detection failures.
#[derive(Debug)]
pub enum DetectError {
    /// The stream contained no data.
    Empty,
    /// The sample looks like binary data, not text logs.
    Binary,
    /// No known format matched the sample.
    Unrecognized,
}

impl std::fmt::Display for DetectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DetectError::Empty => write!(f, "empty input"),
            DetectError::Binary => write!(f, "binary data is not a supported log format"),
            DetectError::Unrecognized => write!(f, "unrecognized log format"),
        }
    }
}

impl std::error::Error for DetectError {}

/// Number of leading non-empty lines inspected before giving up.
const DETECT_LINES: usize = 10;

/// Classifies a sample taken from the head of a stream.
pub fn detect_format(sample: &[u8]) -> Result<LogFormat, DetectError> {
    if sample.is_empty() {
        return Err(DetectError::Empty);
    }
    if looks_binary(sample) {
        return Err(DetectError::Binary);
    }

    let text = String::from_utf8_lossy(sample);
    let mut inspected = 0;
    for line in text.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        if let Some(format) = classify_line(line) {
            return Ok(format);
        }
        inspected += 1;
        if inspected >= DETECT_LINES {
            break;
        }
    }

    if inspected == 0 {
        Err(DetectError::Empty)
    } else {
        Err(DetectError::Unrecognized)
    }
}

fn classify_line(line: &str) -> Option<LogFormat> {
    if is_syslog_bsd(line) {
        return Some(LogFormat::SyslogBsd);
    }
    if is_syslog_rfc5424(line) {
        return Some(LogFormat::SyslogRfc5424);
    }
    if is_syslog_iso(line) {
        return Some(LogFormat::SyslogIso);
    }
    if let Some((_, consumed)) = parse_pg_timestamp(line) {
        if line[consumed..].starts_with(',') && count_unquoted_commas(line) >= 12 {
            return Some(LogFormat::Csv);
        }
        return Some(LogFormat::Stderr);
    }
    if line.starts_with('{') && serde_json::from_str::<serde_json::Value>(line).is_ok() {
        return Some(LogFormat::Json);
    }
    // Whole-file JSON array form
    if line.starts_with('[') && line[1..].trim_start().starts_with('{') {
        return Some(LogFormat::Json);
    }
    None
}

/// BSD syslog: `Jan 15 10:30:00 host tag[pid]: ...`
pub(crate) fn is_syslog_bsd(line: &str) -> bool {
    const MONTHS: [&str; 12] = [
        "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
    ];
    let b = line.as_bytes();
    if b.len() < 16 || !b[..16].is_ascii() {
        return false;
    }
    if !MONTHS.contains(&&line[..3]) {
        return false;
    }
    // "Mmm dd hh:mm:ss " with a possibly space-padded day
    b[3] == b' '
        && (b[4] == b' ' || b[4].is_ascii_digit())
        && b[5].is_ascii_digit()
        && b[6] == b' '
        && b[9] == b':'
        && b[12] == b':'
        && b[15] == b' '
}

/// RFC5424: `<pri>1 2024-01-15T10:30:00Z host app procid msgid ...`
pub(crate) fn is_syslog_rfc5424(line: &str) -> bool {
    let Some(rest) = line.strip_prefix('<') else {
        return false;
    };
    let Some(end) = rest.find('>') else {
        return false;
    };
    if end == 0 || end > 3 || !rest[..end].chars().all(|c| c.is_ascii_digit()) {
        return false;
    }
    rest[end + 1..].starts_with("1 ")
}

/// ISO syslog: `2024-01-15T10:30:00.123+00:00 host tag[pid]: ...`
pub(crate) fn is_syslog_iso(line: &str) -> bool {
    let Some(space) = line.find(' ') else {
        return false;
    };
    if chrono::DateTime::parse_from_rfc3339(&line[..space]).is_err() {
        return false;
    }
    // Needs a "tag[pid]:" marker after the hostname to distinguish from
    // other ISO-timestamped text.
    line[space + 1..].contains("]: ") || line[space + 1..].contains("]:")
}

fn count_unquoted_commas(line: &str) -> usize {
    let mut in_quotes = false;
    let mut count = 0;
    for c in line.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => count += 1,
            _ => {}
        }
    }
    count
}

/// Heuristic binary check: any NUL byte, or more than 30% control
/// characters outside the usual text whitespace.
fn looks_binary(sample: &[u8]) -> bool {
    let mut control = 0usize;
    for &b in sample {
        if b == 0 {
            return true;
        }
        if b < 0x20 && b != b'\n' && b != b'\r' && b != b'\t' {
            control += 1;
        }
    }
    control * 100 > sample.len() * 30
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_stderr() {
        let sample = b"2024-01-15 10:30:00.123 UTC [100] LOG:  checkpoint starting: time\n";
        assert_eq!(detect_format(sample).unwrap(), LogFormat::Stderr);
    }

    #[test]
    fn test_detect_csv() {
        let sample = b"2024-01-15 10:30:00.123 UTC,\"alice\",\"shop\",100,\"10.0.0.5:4321\",65a4.1,1,\"SELECT\",2024-01-15 10:00:00 UTC,1/2,123,LOG,00000,\"duration: 1.0 ms\",,,,,,,,,\"psql\",\"client backend\",,0\n";
        assert_eq!(detect_format(sample).unwrap(), LogFormat::Csv);
    }

    #[test]
    fn test_detect_json() {
        let sample =
            br#"{"timestamp":"2024-01-15 10:30:00.123 UTC","error_severity":"LOG","message":"x"}"#;
        assert_eq!(detect_format(sample).unwrap(), LogFormat::Json);
    }

    #[test]
    fn test_detect_syslog_bsd() {
        let sample = b"Jan 15 10:30:00 db1 postgres[100]: [1-1] LOG:  ready\n";
        assert_eq!(detect_format(sample).unwrap(), LogFormat::SyslogBsd);
    }

    #[test]
    fn test_detect_syslog_iso() {
        let sample = b"2024-01-15T10:30:00.123+00:00 db1 postgres[100]: [1-1] LOG:  ready\n";
        assert_eq!(detect_format(sample).unwrap(), LogFormat::SyslogIso);
    }

    #[test]
    fn test_detect_syslog_rfc5424() {
        let sample = b"<134>1 2024-01-15T10:30:00Z db1 postgres 100 - - LOG:  ready\n";
        assert_eq!(detect_format(sample).unwrap(), LogFormat::SyslogRfc5424);
    }

    #[test]
    fn test_detect_binary() {
        let sample = [0u8, 1, 2, 3, 4];
        assert!(matches!(detect_format(&sample), Err(DetectError::Binary)));
    }

    #[test]
    fn test_detect_empty_and_unknown() {
        assert!(matches!(detect_format(b""), Err(DetectError::Empty)));
        assert!(matches!(
            detect_format(b"no timestamps anywhere\njust text\n"),
            Err(DetectError::Unrecognized)
        ));
    }

    #[test]
    fn test_detect_multibyte_noise_line() {
        // Multibyte char straddling the fixed month offset must not panic
        let sample = "ab\u{e9}0123456789012345\n2024-01-15 10:30:00 UTC [1] LOG:  up\n".as_bytes();
        assert_eq!(detect_format(sample).unwrap(), LogFormat::Stderr);
        assert!(matches!(
            detect_format("ab\u{e9}0123456789012345\n".as_bytes()),
            Err(DetectError::Unrecognized)
        ));
    }

    #[test]
    fn test_detect_skips_leading_noise() {
        // First lines unparseable, a later line decides the format
        let sample = b"random preamble\n2024-01-15 10:30:00 UTC [1] LOG:  started\n";
        assert_eq!(detect_format(sample).unwrap(), LogFormat::Stderr);
    }
}
