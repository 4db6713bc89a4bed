//! Canned SHOW values and catalog shims
//!
//! Drivers probe a newly opened connection with `SHOW ...`, `SELECT
//! version()` and a handful of pg_catalog queries before they run any user
//! SQL. None of these can be answered by IRIS, so they are served from small
//! in-process tables and never forwarded.

use crate::types::oid;
use regex::Regex;
use std::sync::OnceLock;

/// A synthetic result set served without touching the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct ShimResult {
    /// Column (name, type OID) pairs
    pub columns: Vec<(String, i32)>,
    /// Rows in text form (None = NULL)
    pub rows: Vec<Vec<Option<String>>>,
    /// CommandComplete tag
    pub tag: String,
}

impl ShimResult {
    /// One row, one text column.
    fn scalar(name: &str, value: &str) -> Self {
        Self {
            columns: vec![(name.to_string(), oid::TEXT)],
            rows: vec![vec![Some(value.to_string())]],
            tag: "SELECT 1".to_string(),
        }
    }

    /// No rows at all (benign catalog probes).
    fn empty(columns: Vec<(String, i32)>) -> Self {
        Self {
            columns,
            tag: "SELECT 0".to_string(),
            rows: Vec::new(),
        }
    }
}

/// Session values a SHOW answer can echo back.
#[derive(Debug, Clone)]
pub struct ShowContext {
    /// Advertised server version
    pub server_version: String,
    /// Session time zone
    pub timezone: String,
    /// Client's application_name, echoed
    pub application_name: String,
}

/// Answer `SHOW <param>`. Returns the (column name, value) pair, or None for
/// parameters not in the canned table.
pub fn show_value(param: &str, ctx: &ShowContext) -> Option<(String, String)> {
    let normalized = param
        .trim()
        .trim_end_matches(';')
        .trim()
        .to_ascii_lowercase();
    let value = match normalized.as_str() {
        "transaction isolation level" | "transaction_isolation" => "read committed".to_string(),
        "server_version" => ctx.server_version.clone(),
        "server_encoding" => "UTF8".to_string(),
        "client_encoding" => "UTF8".to_string(),
        "datestyle" => "ISO, MDY".to_string(),
        "timezone" => ctx.timezone.clone(),
        "standard_conforming_strings" => "on".to_string(),
        "integer_datetimes" => "on".to_string(),
        "intervalstyle" => "postgres".to_string(),
        "is_superuser" => "off".to_string(),
        "application_name" => ctx.application_name.clone(),
        "search_path" => "public".to_string(),
        "max_connections" => "1000".to_string(),
        _ => return None,
    };
    // SHOW's column is named after the parameter, PostgreSQL-style
    let column = match normalized.as_str() {
        "transaction isolation level" => "transaction_isolation".to_string(),
        other => other.to_string(),
    };
    Some((column, value))
}

fn version_probe() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^\s*select\s+version\s*\(\s*\)").expect("valid regex"))
}

fn current_schema_probe() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*select\s+current_schema(\s*\(\s*\))?\s*;?\s*$").expect("valid regex")
    })
}

fn set_config_probe() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*select\s+(pg_catalog\.)?set_config\s*\(").expect("valid regex")
    })
}

/// Context-free check used by the translator: is this statement a catalog
/// probe? Classification does not depend on session values, only the
/// answer's contents do.
pub fn is_catalog_probe(sql: &str) -> bool {
    static PROBE_CTX: OnceLock<ShowContext> = OnceLock::new();
    let ctx = PROBE_CTX.get_or_init(|| ShowContext {
        server_version: String::new(),
        timezone: String::new(),
        application_name: String::new(),
    });
    classify_shim(sql, ctx).is_some()
}

/// Classify a statement as a catalog probe the adapter answers itself.
/// Returns None for ordinary SQL.
pub fn classify_shim(sql: &str, ctx: &ShowContext) -> Option<ShimResult> {
    if version_probe().is_match(sql) {
        return Some(ShimResult::scalar(
            "version",
            &format!("PostgreSQL {}", ctx.server_version),
        ));
    }

    if current_schema_probe().is_match(sql) {
        return Some(ShimResult::scalar("current_schema", "public"));
    }

    if set_config_probe().is_match(sql) {
        // Drivers call set_config for extra_float_digits and friends; accept
        // and echo an empty setting.
        return Some(ShimResult::scalar("set_config", ""));
    }

    let lowered = sql.to_ascii_lowercase();

    // pg_type lookups: drivers resolving custom type OIDs. Answering with
    // zero rows makes them fall back to text transfer, which is correct
    // here; answering the vector OID specially keeps pgvector clients happy.
    if lowered.contains("from pg_type") || lowered.contains("from pg_catalog.pg_type") {
        if lowered.contains("vector") {
            return Some(ShimResult {
                columns: vec![
                    ("oid".to_string(), oid::OID),
                    ("typname".to_string(), oid::TEXT),
                ],
                rows: vec![vec![
                    Some(oid::VECTOR.to_string()),
                    Some("vector".to_string()),
                ]],
                tag: "SELECT 1".to_string(),
            });
        }
        return Some(ShimResult::empty(vec![
            ("oid".to_string(), oid::OID),
            ("typname".to_string(), oid::TEXT),
        ]));
    }

    // Other pg_catalog administrivia gets an empty result; the drivers
    // that send it treat zero rows as "feature absent" and move on.
    if lowered.contains("pg_catalog.")
        || lowered.contains("from pg_namespace")
        || lowered.contains("from pg_class")
        || lowered.contains("from pg_attribute")
        || lowered.contains("from pg_range")
        || lowered.contains("from pg_settings")
    {
        return Some(ShimResult::empty(vec![("?column?".to_string(), oid::TEXT)]));
    }

    None
}
