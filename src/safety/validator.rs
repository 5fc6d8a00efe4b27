//! Keyword blocklist and table allowlist scan.

use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, warn};

use super::{Rejection, Vetted};

/// Keywords that reject a statement when they appear as a whole word, in any case.
/// Checked in this order; the first present keyword is the one reported.
pub const BLOCKED_KEYWORDS: &[&str] = &[
    "DROP", "DELETE", "INSERT", "UPDATE", "ALTER", "CREATE", "TRUNCATE", "GRANT", "REVOKE",
    "COPY", "EXECUTE", "DO",
];

/// The spatial tables generated SQL is expected to read from.
pub const KNOWN_TABLES: &[&str] = &[
    "sold_properties",
    "cadastral_freehold",
    "cadastral_leasehold",
    "rzlt",
    "dlr_planning_polygons",
    "dlr_planning_points",
];

/// Tokens that may legitimately follow FROM/JOIN without naming a table.
const SQL_KEYWORDS: &[&str] = &[
    "select",
    "where",
    "as",
    "on",
    "and",
    "or",
    "in",
    "case",
    "when",
    "then",
    "else",
    "end",
    "null",
    "true",
    "false",
    "lateral",
    "unnest",
    "generate_series",
];

/// Prefix of PostGIS functions (`ST_Dump`, `ST_Subdivide`, ...).
const SPATIAL_FUNCTION_PREFIX: &str = "st_";

fn blocked_keyword_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let pattern = format!(r"(?i)\b({})\b", BLOCKED_KEYWORDS.join("|"));
        Regex::new(&pattern).expect("blocked keyword pattern is a valid regex")
    })
}

fn table_reference_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:FROM|JOIN)\s+([A-Za-z_][A-Za-z0-9_.]*)")
            .expect("table reference pattern is a valid regex")
    })
}

/// Checks generated SQL against the blocklist and scans its table references.
///
/// Returns the first blocked keyword as a [`Rejection`]. Table references
/// outside [`KNOWN_TABLES`] never reject; they are returned as advisory notes.
pub fn validate(sql: &str) -> Result<Vetted, Rejection> {
    let found: Vec<String> = blocked_keyword_regex()
        .find_iter(sql)
        .map(|m| m.as_str().to_uppercase())
        .collect();

    if let Some(keyword) = BLOCKED_KEYWORDS
        .iter()
        .find(|kw| found.iter().any(|f| f == *kw))
    {
        let rejection = Rejection::new(format!("blocked keyword: {keyword}"));
        warn!(reason = %rejection, "Rejected generated SQL");
        return Err(rejection);
    }

    let mut unrecognized_tables: Vec<String> = Vec::new();
    for caps in table_reference_regex().captures_iter(sql) {
        let token = caps[1].to_lowercase();
        let bare = token.strip_prefix("public.").unwrap_or(&token);

        if KNOWN_TABLES.contains(&bare)
            || SQL_KEYWORDS.contains(&bare)
            || bare.starts_with(SPATIAL_FUNCTION_PREFIX)
        {
            continue;
        }

        if !unrecognized_tables.contains(&token) {
            debug!(token = %token, "Unrecognized table reference tolerated");
            unrecognized_tables.push(token);
        }
    }

    Ok(Vetted {
        unrecognized_tables,
    })
}
