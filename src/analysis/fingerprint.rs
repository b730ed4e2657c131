//! Query normalization and fingerprinting.
//!
//! `normalize_query` strips out everything that varies between executions
//! of the same statement shape (literals, parameter numbers, whitespace,
//! letter case) while keeping identifiers intact. The normalized text is
//! hashed with xxh3 into a short stable id prefixed with a two-letter
//! statement-type tag, so the same query always lands in the same bucket
//! within and across runs.

use xxhash_rust::xxh3::xxh3_64;

/// High-level statement category derived from the type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum QueryCategory {
    Dml,
    Copy,
    Cte,
    Ddl,
    Tcl,
    Cursor,
    Utility,
    Other,
}

impl QueryCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryCategory::Dml => "DML",
            QueryCategory::Copy => "COPY",
            QueryCategory::Cte => "CTE",
            QueryCategory::Ddl => "DDL",
            QueryCategory::Tcl => "TCL",
            QueryCategory::Cursor => "CURSOR",
            QueryCategory::Utility => "UTILITY",
            QueryCategory::Other => "OTHER",
        }
    }
}

/// Normalizes a SQL query to its shape:
///
/// - single-quoted literals, `$n` parameters and standalone numbers
///   (including negatives and decimals) become `?`
/// - digits embedded in identifiers (`table2`, `order_2023`) survive
/// - everything is lowercased and whitespace is collapsed
/// - per-backend schema names (`pg_temp_3`, `pg_toast_16384`) are masked
pub fn normalize_query(query: &str) -> String {
    let mut out = String::with_capacity(query.len());
    let mut chars = query.char_indices().peekable();
    let mut prev: Option<char> = None;

    while let Some((start, c)) = chars.next() {
        match c {
            '\'' => {
                // String literal, '' is an escaped quote inside it
                out.push('?');
                while let Some((_, c2)) = chars.next() {
                    if c2 == '\'' {
                        if chars.peek().map(|&(_, c3)| c3) == Some('\'') {
                            chars.next();
                        } else {
                            break;
                        }
                    }
                }
                prev = Some('\'');
            }
            '"' => {
                // Quoted identifier: kept, lowercased
                out.push('"');
                for (_, c2) in chars.by_ref() {
                    if c2 == '"' {
                        out.push('"');
                        break;
                    }
                    out.extend(c2.to_lowercase());
                }
                prev = Some('"');
            }
            '$' if chars.peek().is_some_and(|&(_, c2)| c2.is_ascii_digit()) => {
                while chars.peek().is_some_and(|&(_, c2)| c2.is_ascii_digit()) {
                    chars.next();
                }
                out.push('?');
                prev = Some('$');
            }
            '-' if chars.peek().is_some_and(|&(_, c2)| c2.is_ascii_digit())
                && !prev.is_some_and(is_ident_char) =>
            {
                // Negative number literal
                while chars
                    .peek()
                    .is_some_and(|&(_, c2)| c2.is_ascii_digit() || c2 == '.')
                {
                    chars.next();
                }
                out.push('?');
                prev = Some('0');
            }
            _ if c.is_ascii_digit() => {
                let mut end = start + 1;
                while let Some(&(i, c2)) = chars.peek() {
                    if c2.is_ascii_digit() || c2 == '.' {
                        end = i + c2.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let next_ident = chars.peek().is_some_and(|&(_, c2)| is_ident_char(c2));
                let prev_ident = prev.is_some_and(is_ident_char);
                if prev_ident || next_ident {
                    // Part of an identifier, keep as-is
                    out.push_str(&query[start..end]);
                } else {
                    out.push('?');
                }
                prev = Some('0');
            }
            _ => {
                out.extend(c.to_lowercase());
                prev = Some(c);
            }
        }
    }

    let collapsed = out.split_whitespace().collect::<Vec<_>>().join(" ");
    mask_backend_schemas(&collapsed)
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Replaces the numeric suffix of `pg_temp_N` / `pg_toast_N` schema names.
fn mask_backend_schemas(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    loop {
        let hit = ["pg_temp_", "pg_toast_"]
            .iter()
            .filter_map(|p| rest.find(p).map(|i| (i, p.len())))
            .min();
        match hit {
            Some((pos, len)) if rest[pos + len..].starts_with(|c: char| c.is_ascii_digit()) => {
                out.push_str(&rest[..pos + len]);
                out.push('?');
                rest = rest[pos + len..].trim_start_matches(|c: char| c.is_ascii_digit());
            }
            Some((pos, len)) => {
                out.push_str(&rest[..pos + len]);
                rest = &rest[pos + len..];
            }
            None => {
                out.push_str(rest);
                return out;
            }
        }
    }
}

/// Skips leading whitespace, `--` line comments and (nested) `/* */` block
/// comments so the type tag sees the first real keyword.
pub fn skip_leading_comments(query: &str) -> &str {
    let mut rest = query.trim_start();
    loop {
        if let Some(after) = rest.strip_prefix("--") {
            rest = match after.find('\n') {
                Some(pos) => after[pos + 1..].trim_start(),
                None => "",
            };
        } else if rest.starts_with("/*") {
            let mut depth = 0usize;
            let bytes = rest.as_bytes();
            let mut i = 0;
            let mut end = rest.len();
            while i + 1 < bytes.len() {
                if bytes[i] == b'/' && bytes[i + 1] == b'*' {
                    depth += 1;
                    i += 2;
                } else if bytes[i] == b'*' && bytes[i + 1] == b'/' {
                    depth -= 1;
                    i += 2;
                    if depth == 0 {
                        end = i;
                        break;
                    }
                } else {
                    i += 1;
                }
            }
            if depth != 0 {
                return "";
            }
            rest = rest[end..].trim_start();
        } else {
            return rest;
        }
    }
}

/// Two-letter statement-type tag for the fingerprint id.
pub fn type_tag(normalized: &str) -> &'static str {
    let text = skip_leading_comments(normalized);
    let mut words = text.split_whitespace();
    let first = words.next().unwrap_or("");
    let second = words.next().unwrap_or("");
    let third = words.next().unwrap_or("");

    match first {
        "select" => "se",
        "insert" => "in",
        "update" => "up",
        "delete" => "de",
        "merge" => "me",
        "copy" => "co",
        "with" => "wi",
        "create" => match (second, third) {
            ("materialized", _) => "mv",
            ("table", _) => "ct",
            _ => "cr",
        },
        "refresh" => "mv",
        "drop" => "dr",
        "alter" => "al",
        "truncate" => "tr",
        "comment" => "cn",
        "begin" => "be",
        "commit" | "end" => "cm",
        "rollback" => "rb",
        "savepoint" => "sv",
        "release" => "rl",
        "start" => "sa",
        "abort" => "ab",
        "prepare" => "pr",
        "execute" => "ex",
        "deallocate" => "dl",
        "declare" => "dc",
        "fetch" => "fe",
        "move" => "mo",
        "close" => "cl",
        "vacuum" => "va",
        "analyze" | "analyse" => "an",
        "reindex" => "ri",
        "cluster" => "cu",
        "lock" => "lk",
        "listen" => "li",
        "unlisten" => "ul",
        "notify" => "no",
        "discard" => "di",
        "set" => "st",
        "show" => "sh",
        "grant" => "gr",
        "revoke" => "rv",
        "do" => "do",
        "call" => "ca",
        "checkpoint" => "ck",
        "explain" => "xp",
        _ => "xx",
    }
}

/// Category rollup for a fingerprint id (or a bare type tag).
pub fn query_category(id: &str) -> QueryCategory {
    let tag = id.split('-').next().unwrap_or(id);
    match tag {
        "se" | "in" | "up" | "de" | "me" => QueryCategory::Dml,
        "co" => QueryCategory::Copy,
        "wi" => QueryCategory::Cte,
        "cr" | "ct" | "mv" | "dr" | "al" | "tr" | "ri" | "cn" => QueryCategory::Ddl,
        "be" | "cm" | "rb" | "sv" | "rl" | "sa" | "ab" => QueryCategory::Tcl,
        "dc" | "fe" | "mo" | "cl" => QueryCategory::Cursor,
        "va" | "an" | "cu" | "lk" | "li" | "ul" | "no" | "di" | "st" | "sh" | "gr" | "rv"
        | "do" | "ca" | "ck" | "xp" | "pr" | "ex" | "dl" => QueryCategory::Utility,
        _ => QueryCategory::Other,
    }
}

/// Display name for a fingerprint id's statement type.
pub fn query_type_name(id: &str) -> &'static str {
    let tag = id.split('-').next().unwrap_or(id);
    match tag {
        "se" => "SELECT",
        "in" => "INSERT",
        "up" => "UPDATE",
        "de" => "DELETE",
        "me" => "MERGE",
        "co" => "COPY",
        "wi" => "WITH",
        "cr" | "ct" => "CREATE",
        "mv" => "MATERIALIZED VIEW",
        "dr" => "DROP",
        "al" => "ALTER",
        "tr" => "TRUNCATE",
        "cn" => "COMMENT",
        "be" => "BEGIN",
        "cm" => "COMMIT",
        "rb" => "ROLLBACK",
        "sv" => "SAVEPOINT",
        "rl" => "RELEASE",
        "sa" => "START TRANSACTION",
        "ab" => "ABORT",
        "pr" => "PREPARE",
        "ex" => "EXECUTE",
        "dl" => "DEALLOCATE",
        "dc" => "DECLARE",
        "fe" => "FETCH",
        "mo" => "MOVE",
        "cl" => "CLOSE",
        "va" => "VACUUM",
        "an" => "ANALYZE",
        "ri" => "REINDEX",
        "cu" => "CLUSTER",
        "lk" => "LOCK",
        "li" => "LISTEN",
        "ul" => "UNLISTEN",
        "no" => "NOTIFY",
        "di" => "DISCARD",
        "st" => "SET",
        "sh" => "SHOW",
        "gr" => "GRANT",
        "rv" => "REVOKE",
        "do" => "DO",
        "ca" => "CALL",
        "ck" => "CHECKPOINT",
        "xp" => "EXPLAIN",
        _ => "OTHER",
    }
}

const ID_ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Builds the fingerprint id for already-normalized query text:
/// a type tag plus six base-36 characters of the xxh3 hash.
pub fn query_id(normalized: &str) -> String {
    let mut hash = xxh3_64(normalized.as_bytes());
    let mut code = [0u8; 6];
    for slot in code.iter_mut() {
        *slot = ID_ALPHABET[(hash % 36) as usize];
        hash /= 36;
    }
    let code = std::str::from_utf8(&code).unwrap_or("000000");
    format!("{}-{}", type_tag(normalized), code)
}

/// Normalizes a raw query and returns `(normalized, id)`.
pub fn fingerprint(raw: &str) -> (String, String) {
    let normalized = normalize_query(raw);
    let id = query_id(&normalized);
    (normalized, id)
}
