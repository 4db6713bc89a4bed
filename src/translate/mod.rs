//! PostgreSQL → IRIS SQL translation
//!
//! `translate` classifies a single statement, rewrites PostgreSQL syntax
//! that IRIS does not accept (positional placeholders, `::` casts, pgvector
//! operators, DATE literals), and infers output column names for results
//! whose metadata the backend will not report. It is a pure function of the
//! statement text; per-session values (SHOW answers, shim rows) are resolved
//! by the session at execution time so translations can be cached globally.

pub mod cache;
pub mod lexer;
pub mod show;

use crate::copy::{parse_copy, CopySpec};
use crate::error::{AdapterError, Result};
use crate::types::oid;
use chrono::NaiveDate;
use lexer::{tokenize, Token, TokenKind};
use std::sync::Arc;

pub use cache::TranslationCache;

/// Transaction-control verb recognized in a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxVerb {
    /// BEGIN / START TRANSACTION
    Begin,
    /// COMMIT / END
    Commit,
    /// ROLLBACK / ABORT
    Rollback,
}

/// What the session should do with a translated statement.
#[derive(Debug, Clone, PartialEq)]
pub enum StatementClass {
    /// Forward to the executor
    Query,
    /// Empty statement: EmptyQueryResponse
    Empty,
    /// Transaction control, forwarded and tracked
    Tx(TxVerb),
    /// `SHOW <param>`: answered from the canned table
    Show(String),
    /// `SET ...`: accepted and ignored
    Set,
    /// Driver catalog probe: answered from the shim table
    CatalogShim,
    /// COPY subprotocol hand-off
    Copy(CopySpec),
}

/// A finished translation.
#[derive(Debug, Clone, PartialEq)]
pub struct Translation {
    /// SQL to forward to the backend
    pub sql: String,
    /// Statement classification
    pub class: StatementClass,
    /// Number of `?` placeholders in the translated SQL
    pub param_count: usize,
    /// Inferred output column names (empty when inference failed or N/A)
    pub column_names: Vec<String>,
    /// Type OID hints parallel to `column_names` (0 = unknown)
    pub column_hints: Vec<i32>,
    /// Whether the statement produces a result set
    pub expects_rows: bool,
    /// Statement uses the `<->` operator; IRIS has no L2 distance, so
    /// execution must fail with feature-not-supported
    pub l2_unsupported: bool,
}

impl Translation {
    fn simple(sql: impl Into<String>, class: StatementClass) -> Self {
        Self {
            sql: sql.into(),
            class,
            param_count: 0,
            column_names: Vec::new(),
            column_hints: Vec::new(),
            expects_rows: false,
            l2_unsupported: false,
        }
    }
}

/// Translate through the shared cache.
pub fn translate(sql: &str, cache: &TranslationCache) -> Result<Arc<Translation>> {
    if let Some(hit) = cache.get(sql) {
        return Ok(hit);
    }
    let translation = Arc::new(translate_uncached(sql)?);
    cache.put(sql.to_string(), Arc::clone(&translation));
    Ok(translation)
}

/// Translate one statement, no cache involved.
pub fn translate_uncached(sql: &str) -> Result<Translation> {
    let stripped = strip_statement(sql);
    if stripped.is_empty() {
        return Ok(Translation::simple("", StatementClass::Empty));
    }

    let head = first_keyword(stripped);
    match head.as_str() {
        "BEGIN" | "START" => {
            return Ok(Translation::simple(
                "START TRANSACTION",
                StatementClass::Tx(TxVerb::Begin),
            ))
        }
        "COMMIT" | "END" => {
            return Ok(Translation::simple(
                "COMMIT",
                StatementClass::Tx(TxVerb::Commit),
            ))
        }
        "ROLLBACK" | "ABORT" => {
            return Ok(Translation::simple(
                "ROLLBACK",
                StatementClass::Tx(TxVerb::Rollback),
            ))
        }
        "SHOW" => {
            let param = stripped[4..].trim().to_string();
            return Ok(Translation {
                expects_rows: true,
                ..Translation::simple(stripped, StatementClass::Show(param))
            });
        }
        "SET" => return Ok(Translation::simple(stripped, StatementClass::Set)),
        "COPY" => {
            let spec = parse_copy(stripped)?
                .ok_or_else(|| AdapterError::Internal("COPY classification".to_string()))?;
            return Ok(Translation::simple(stripped, StatementClass::Copy(spec)));
        }
        "PREPARE" if stripped.to_ascii_uppercase().contains("TRANSACTION") => {
            return Err(AdapterError::Unsupported(
                "two-phase commit (PREPARE TRANSACTION)".to_string(),
            ))
        }
        "LISTEN" | "UNLISTEN" | "NOTIFY" => {
            return Err(AdapterError::Unsupported(format!(
                "{} is not supported",
                head
            )))
        }
        _ => {}
    }

    if show::is_catalog_probe(stripped) {
        return Ok(Translation {
            expects_rows: true,
            ..Translation::simple(stripped, StatementClass::CatalogShim)
        });
    }

    // Ordinary SQL: run the rewrite passes in order.
    let rewritten = rewrite_placeholders(stripped)?;
    let rewritten = rewrite_casts(&rewritten)?;
    let (rewritten, l2_unsupported) = rewrite_vector_ops(rewritten)?;
    let rewritten = rewrite_date_literals(&rewritten)?;
    let rewritten = rewrite_quoted_idents(&rewritten)?;

    let param_count = count_placeholders(&rewritten)?;
    let (column_names, column_hints) = infer_columns(&rewritten)?;
    let expects_rows = statement_returns_rows(&rewritten);

    Ok(Translation {
        sql: rewritten,
        class: StatementClass::Query,
        param_count,
        column_names,
        column_hints,
        expects_rows,
        l2_unsupported,
    })
}

/// Trim whitespace and a trailing semicolon.
fn strip_statement(sql: &str) -> &str {
    let mut s = sql.trim();
    while let Some(rest) = s.strip_suffix(';') {
        s = rest.trim_end();
    }
    s.trim()
}

fn first_keyword(sql: &str) -> String {
    sql.split_whitespace()
        .next()
        .unwrap_or("")
        .trim_end_matches(';')
        .to_ascii_uppercase()
}

/// A pending span replacement.
struct Edit {
    start: usize,
    end: usize,
    text: String,
}

/// Apply non-overlapping edits, rightmost first.
fn apply_edits(sql: &str, mut edits: Vec<Edit>) -> String {
    edits.sort_by(|a, b| b.start.cmp(&a.start));
    let mut out = sql.to_string();
    for edit in edits {
        out.replace_range(edit.start..edit.end, &edit.text);
    }
    out
}

/// Rewrite `$N` and `%s` placeholders to `?`, preserving relative order.
fn rewrite_placeholders(sql: &str) -> Result<String> {
    let tokens = tokenize(sql)?;
    let edits: Vec<Edit> = tokens
        .iter()
        .filter(|t| matches!(t.kind, TokenKind::DollarParam | TokenKind::PercentParam))
        .map(|t| Edit {
            start: t.start,
            end: t.end,
            text: "?".to_string(),
        })
        .collect();
    Ok(apply_edits(sql, edits))
}

fn count_placeholders(sql: &str) -> Result<usize> {
    Ok(tokenize(sql)?
        .iter()
        .filter(|t| t.kind == TokenKind::QuestionParam)
        .count())
}

/// Map a PostgreSQL cast target to the IRIS type name.
fn map_cast_type(name: &str) -> &'static str {
    match name.to_ascii_lowercase().as_str() {
        "int" | "int4" | "integer" => "INTEGER",
        "int2" | "smallint" => "SMALLINT",
        "int8" | "bigint" => "BIGINT",
        "text" | "varchar" | "char" | "character" | "bpchar" | "uuid" | "json" | "jsonb" => {
            "VARCHAR"
        }
        "float" | "float4" | "float8" | "real" | "double" => "DOUBLE",
        "bool" | "boolean" => "BIT",
        "date" => "DATE",
        "time" => "TIME",
        "timestamp" | "timestamptz" => "TIMESTAMP",
        "numeric" | "decimal" => "NUMERIC",
        _ => "VARCHAR",
    }
}

/// Find the operand token range ending at token index `i` (inclusive
/// bounds): a literal, a placeholder, a dotted identifier chain, or a
/// balanced paren group with an optional function name.
fn operand_before(tokens: &[Token], sql: &str, i: usize) -> Option<(usize, usize)> {
    let token = tokens.get(i)?;
    match token.kind {
        TokenKind::String
        | TokenKind::Number
        | TokenKind::DollarParam
        | TokenKind::PercentParam
        | TokenKind::QuestionParam => Some((i, i)),
        TokenKind::Ident | TokenKind::QuotedIdent => {
            let mut start = i;
            while start >= 2
                && tokens[start - 1].kind == TokenKind::Op
                && tokens[start - 1].text(sql) == "."
                && matches!(
                    tokens[start - 2].kind,
                    TokenKind::Ident | TokenKind::QuotedIdent
                )
            {
                start -= 2;
            }
            Some((start, i))
        }
        TokenKind::Op if token.text(sql) == ")" => {
            let mut depth = 0i32;
            let mut j = i;
            loop {
                let t = tokens.get(j)?;
                if t.kind == TokenKind::Op {
                    match t.text(sql) {
                        ")" => depth += 1,
                        "(" => {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                        }
                        _ => {}
                    }
                }
                if j == 0 {
                    return None;
                }
                j -= 1;
            }
            // include a function name in front of the parens
            if j >= 1
                && matches!(
                    tokens[j - 1].kind,
                    TokenKind::Ident | TokenKind::QuotedIdent
                )
            {
                let (start, _) = operand_before(tokens, sql, j - 1)?;
                Some((start, i))
            } else {
                Some((j, i))
            }
        }
        _ => None,
    }
}

/// Find the operand token range starting at token index `i`.
fn operand_after(tokens: &[Token], sql: &str, i: usize) -> Option<(usize, usize)> {
    let token = tokens.get(i)?;
    match token.kind {
        TokenKind::String
        | TokenKind::Number
        | TokenKind::DollarParam
        | TokenKind::PercentParam
        | TokenKind::QuestionParam => Some((i, i)),
        TokenKind::Op if token.text(sql) == "-" || token.text(sql) == "+" => {
            let (_, end) = operand_after(tokens, sql, i + 1)?;
            Some((i, end))
        }
        TokenKind::Ident | TokenKind::QuotedIdent => {
            let mut end = i;
            while end + 2 < tokens.len()
                && tokens[end + 1].kind == TokenKind::Op
                && tokens[end + 1].text(sql) == "."
                && matches!(
                    tokens[end + 2].kind,
                    TokenKind::Ident | TokenKind::QuotedIdent
                )
            {
                end += 2;
            }
            // function call
            if end + 1 < tokens.len()
                && tokens[end + 1].kind == TokenKind::Op
                && tokens[end + 1].text(sql) == "("
            {
                let (_, close) = balanced_forward(tokens, sql, end + 1)?;
                end = close;
            }
            Some((i, end))
        }
        TokenKind::Op if token.text(sql) == "(" => balanced_forward(tokens, sql, i),
        _ => None,
    }
}

fn balanced_forward(tokens: &[Token], sql: &str, open: usize) -> Option<(usize, usize)> {
    let mut depth = 0i32;
    for (j, t) in tokens.iter().enumerate().skip(open) {
        if t.kind == TokenKind::Op {
            match t.text(sql) {
                "(" => depth += 1,
                ")" => {
                    depth -= 1;
                    if depth == 0 {
                        return Some((open, j));
                    }
                }
                _ => {}
            }
        }
    }
    None
}

/// Rewrite `expr::type` into `CAST(expr AS type)`, repeatedly, so cast
/// chains nest naturally.
fn rewrite_casts(sql: &str) -> Result<String> {
    let mut sql = sql.to_string();
    loop {
        let tokens = tokenize(&sql)?;
        let Some(cast_idx) = tokens.iter().position(|t| t.kind == TokenKind::Cast) else {
            return Ok(sql);
        };

        // target type: ident, optionally "double precision" or a precision
        // suffix like (10,2)
        let Some(type_token) = tokens.get(cast_idx + 1) else {
            return Ok(sql);
        };
        if type_token.kind != TokenKind::Ident {
            return Ok(sql);
        }
        let type_name = type_token.text(&sql).to_string();
        let mut type_end_idx = cast_idx + 1;
        if type_name.eq_ignore_ascii_case("double")
            && tokens
                .get(cast_idx + 2)
                .is_some_and(|t| t.is_keyword(&sql, "precision"))
        {
            type_end_idx = cast_idx + 2;
        }
        let mut precision = String::new();
        if tokens
            .get(type_end_idx + 1)
            .is_some_and(|t| t.kind == TokenKind::Op && t.text(&sql) == "(")
        {
            if let Some((open, close)) = balanced_forward(&tokens, &sql, type_end_idx + 1) {
                precision = sql[tokens[open].start..tokens[close].end].to_string();
                type_end_idx = close;
            }
        }

        let Some((expr_start_idx, _)) = (cast_idx > 0)
            .then(|| operand_before(&tokens, &sql, cast_idx - 1))
            .flatten()
        else {
            return Ok(sql);
        };

        let expr_text = sql[tokens[expr_start_idx].start..tokens[cast_idx - 1].end].to_string();
        let replacement = if type_name.eq_ignore_ascii_case("vector") {
            format!("TO_VECTOR({}, DOUBLE)", expr_text)
        } else {
            format!(
                "CAST({} AS {}{})",
                expr_text,
                map_cast_type(&type_name),
                precision
            )
        };

        sql = apply_edits(
            &sql,
            vec![Edit {
                start: tokens[expr_start_idx].start,
                end: tokens[type_end_idx].end,
                text: replacement,
            }],
        );
    }
}

/// Rewrite pgvector operators into IRIS vector functions. `<->` has no IRIS
/// counterpart: the statement is still rewritten so Parse succeeds, but it
/// is flagged and execution fails with feature-not-supported.
fn rewrite_vector_ops(sql: String) -> Result<(String, bool)> {
    let mut sql = sql;
    let mut l2 = false;
    loop {
        let tokens = tokenize(&sql)?;
        let Some(op_idx) = tokens.iter().position(|t| {
            matches!(
                t.kind,
                TokenKind::CosineOp | TokenKind::InnerOp | TokenKind::L2Op
            )
        }) else {
            return Ok((sql, l2));
        };

        let function = match tokens[op_idx].kind {
            TokenKind::CosineOp => "VECTOR_COSINE",
            TokenKind::InnerOp => "VECTOR_DOT_PRODUCT",
            _ => {
                l2 = true;
                "VECTOR_L2_DISTANCE"
            }
        };

        let lhs = (op_idx > 0)
            .then(|| operand_before(&tokens, &sql, op_idx - 1))
            .flatten();
        let rhs = operand_after(&tokens, &sql, op_idx + 1);
        let (Some((lhs_start, lhs_end)), Some((rhs_start, rhs_end))) = (lhs, rhs) else {
            return Err(AdapterError::Unsupported(
                "vector operator without operands".to_string(),
            ));
        };

        let lhs_text = wrap_vector_operand(&sql, &tokens, lhs_start, lhs_end);
        let rhs_text = wrap_vector_operand(&sql, &tokens, rhs_start, rhs_end);

        sql = apply_edits(
            &sql,
            vec![Edit {
                start: tokens[lhs_start].start,
                end: tokens[rhs_end].end,
                text: format!("{}({}, {})", function, lhs_text, rhs_text),
            }],
        );
    }
}

/// Parameter and literal operands of a vector operator must pass through
/// the IRIS vector constructor.
fn wrap_vector_operand(sql: &str, tokens: &[Token], start: usize, end: usize) -> String {
    let text = &sql[tokens[start].start..tokens[end].end];
    if start == end
        && matches!(
            tokens[start].kind,
            TokenKind::QuestionParam | TokenKind::String
        )
    {
        format!("TO_VECTOR({}, DOUBLE)", text)
    } else {
        text.to_string()
    }
}

/// Horolog day number for a calendar date: days since 1840-12-31.
pub fn horolog_day(date: NaiveDate) -> i64 {
    let epoch = NaiveDate::from_ymd_opt(1840, 12, 31).expect("valid epoch");
    date.signed_duration_since(epoch).num_days()
}

fn parse_date_literal(text: &str) -> Option<NaiveDate> {
    let inner = text.strip_prefix('\'')?.strip_suffix('\'')?;
    let mut parts = inner.splitn(3, '-');
    let year: i32 = parts.next()?.parse().ok()?;
    let month: u32 = parts.next()?.parse().ok()?;
    let day: u32 = parts.next()?.parse().ok()?;
    if !(1841..=9999).contains(&year) {
        return None;
    }
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Rewrite `DATE 'YYYY-MM-DD'` literals, and bare `'YYYY-MM-DD'` literals
/// compared against a column whose name suggests a DATE column, into the
/// IRIS Horolog day number.
fn rewrite_date_literals(sql: &str) -> Result<String> {
    let tokens = tokenize(sql)?;
    let mut edits = Vec::new();

    for (i, token) in tokens.iter().enumerate() {
        if token.kind != TokenKind::String {
            continue;
        }
        let Some(date) = parse_date_literal(token.text(sql)) else {
            continue;
        };

        // DATE 'YYYY-MM-DD' prefix form
        if i >= 1 && tokens[i - 1].is_keyword(sql, "DATE") {
            edits.push(Edit {
                start: tokens[i - 1].start,
                end: token.end,
                text: horolog_day(date).to_string(),
            });
            continue;
        }

        // bare literal in DATE-column context: `birth_date >= '1990-01-01'`
        if i >= 2
            && tokens[i - 1].kind == TokenKind::Op
            && matches!(tokens[i - 1].text(sql), "=" | "<" | ">" | "<=" | ">=" | "<>" | "!=")
            && matches!(
                tokens[i - 2].kind,
                TokenKind::Ident | TokenKind::QuotedIdent
            )
            && tokens[i - 2]
                .text(sql)
                .to_ascii_lowercase()
                .contains("date")
        {
            edits.push(Edit {
                start: token.start,
                end: token.end,
                text: horolog_day(date).to_string(),
            });
        }
    }

    Ok(apply_edits(sql, edits))
}

/// Strip quotes from quoted identifiers that need no quoting in IRIS.
/// Identifiers with exotic characters or reserved-word names keep their
/// quotes; IRIS accepts delimited identifiers for those.
fn rewrite_quoted_idents(sql: &str) -> Result<String> {
    const KEEP_QUOTED: &[&str] = &[
        "SELECT", "FROM", "WHERE", "GROUP", "ORDER", "BY", "TABLE", "USER", "JOIN", "UNION",
        "AND", "OR", "NOT", "NULL", "AS", "IN", "IS", "VALUES", "INSERT", "UPDATE", "DELETE",
    ];

    let tokens = tokenize(sql)?;
    let mut edits = Vec::new();
    for token in &tokens {
        if token.kind != TokenKind::QuotedIdent {
            continue;
        }
        let inner = &sql[token.start + 1..token.end - 1];
        let simple = !inner.is_empty()
            && inner
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_')
            && inner.as_bytes()[0].is_ascii_alphabetic()
            && !KEEP_QUOTED.contains(&inner.to_ascii_uppercase().as_str());
        if simple {
            edits.push(Edit {
                start: token.start,
                end: token.end,
                text: inner.to_string(),
            });
        }
    }
    Ok(apply_edits(sql, edits))
}

/// Does the statement stream rows back?
fn statement_returns_rows(sql: &str) -> bool {
    let head = first_keyword(sql);
    if matches!(head.as_str(), "SELECT" | "VALUES" | "WITH" | "EXPLAIN" | "SHOW") {
        return true;
    }
    tokenize(sql)
        .map(|tokens| tokens.iter().any(|t| t.is_keyword(sql, "RETURNING")))
        .unwrap_or(false)
}

/// Infer output column names (and weak type hints) from the SELECT list of
/// the translated SQL. Returns empty vectors when inference is impossible
/// (`SELECT *`, non-SELECT statements).
fn infer_columns(sql: &str) -> Result<(Vec<String>, Vec<i32>)> {
    let tokens = tokenize(sql)?;
    if tokens.is_empty() || !tokens[0].is_keyword(sql, "SELECT") {
        return Ok((Vec::new(), Vec::new()));
    }

    let mut idx = 1;
    while tokens
        .get(idx)
        .is_some_and(|t| t.is_keyword(sql, "DISTINCT") || t.is_keyword(sql, "ALL"))
    {
        idx += 1;
    }

    // collect items until the top-level FROM (or end of statement)
    let mut items: Vec<Vec<Token>> = Vec::new();
    let mut current: Vec<Token> = Vec::new();
    let mut depth = 0i32;
    for token in &tokens[idx..] {
        if token.kind == TokenKind::Op {
            match token.text(sql) {
                "(" => depth += 1,
                ")" => depth -= 1,
                "," if depth == 0 => {
                    items.push(std::mem::take(&mut current));
                    continue;
                }
                _ => {}
            }
        }
        if depth == 0 && token.is_keyword(sql, "FROM") {
            break;
        }
        current.push(*token);
    }
    if !current.is_empty() {
        items.push(current);
    }
    if items.is_empty() {
        return Ok((Vec::new(), Vec::new()));
    }

    let mut names = Vec::with_capacity(items.len());
    let mut hints = Vec::with_capacity(items.len());
    for (n, item) in items.iter().enumerate() {
        // `SELECT *` and `SELECT t.*` defeat inference entirely
        if item
            .iter()
            .any(|t| t.kind == TokenKind::Op && t.text(sql) == "*" && item.len() <= 3)
        {
            return Ok((Vec::new(), Vec::new()));
        }
        let (name, hint) = infer_item(sql, item, n + 1);
        names.push(name);
        hints.push(hint);
    }
    Ok((names, hints))
}

fn infer_item(sql: &str, item: &[Token], position: usize) -> (String, i32) {
    let fallback = || format!("column{}", position);
    let hint = item_hint(sql, item);

    let Some(last) = item.last() else {
        return (fallback(), hint);
    };

    // explicit alias
    if item.len() >= 3 && item[item.len() - 2].is_keyword(sql, "AS") {
        return (ident_text(sql, last).unwrap_or_else(fallback), hint);
    }

    // single token
    if item.len() == 1 {
        return match last.kind {
            TokenKind::Ident | TokenKind::QuotedIdent => {
                (ident_text(sql, last).unwrap_or_else(fallback), hint)
            }
            _ => (fallback(), hint),
        };
    }

    // dotted reference: name is the last segment
    if item.len() >= 3
        && item.len() % 2 == 1
        && item
            .iter()
            .enumerate()
            .all(|(i, t)| {
                if i % 2 == 0 {
                    matches!(t.kind, TokenKind::Ident | TokenKind::QuotedIdent)
                } else {
                    t.kind == TokenKind::Op && t.text(sql) == "."
                }
            })
    {
        return (ident_text(sql, last).unwrap_or_else(fallback), hint);
    }

    // implicit alias: expression followed by a bare identifier
    if matches!(last.kind, TokenKind::Ident | TokenKind::QuotedIdent) {
        let prev = &item[item.len() - 2];
        let prev_is_value = matches!(
            prev.kind,
            TokenKind::Ident
                | TokenKind::QuotedIdent
                | TokenKind::Number
                | TokenKind::String
                | TokenKind::QuestionParam
        ) || (prev.kind == TokenKind::Op && prev.text(sql) == ")");
        let prev_is_dot = prev.kind == TokenKind::Op && prev.text(sql) == ".";
        if prev_is_value && !prev_is_dot && !last.is_keyword(sql, "precision") {
            return (ident_text(sql, last).unwrap_or_else(fallback), hint);
        }
    }

    (fallback(), hint)
}

fn ident_text(sql: &str, token: &Token) -> Option<String> {
    match token.kind {
        TokenKind::Ident => Some(token.text(sql).to_string()),
        TokenKind::QuotedIdent => Some(
            sql[token.start + 1..token.end - 1]
                .replace("\"\"", "\"")
                .to_string(),
        ),
        _ => None,
    }
}

fn item_hint(sql: &str, item: &[Token]) -> i32 {
    if let Some(first) = item.first() {
        if first.kind == TokenKind::Ident {
            let upper = first.upper(sql);
            if upper == "VECTOR_COSINE" || upper == "VECTOR_DOT_PRODUCT" || upper == "VECTOR_L2_DISTANCE" {
                return oid::FLOAT8;
            }
            if upper == "COUNT" {
                return oid::INT8;
            }
        }
    }
    if item.len() == 1 {
        match item[0].kind {
            TokenKind::Number => {
                let text = item[0].text(sql);
                if text.contains('.') || text.contains('e') || text.contains('E') {
                    return oid::FLOAT8;
                }
                return oid::INT4;
            }
            TokenKind::String => return oid::TEXT,
            _ => {}
        }
    }
    0
}
