//! COPY subprotocol support
//!
//! Dissects COPY statements, parses the CSV/text stream arriving in CopyData
//! frames into rows, formats outgoing rows for COPY TO STDOUT, and batches
//! incoming rows for the executor. The backend cannot do multi-row INSERT,
//! so CopyIn throughput tops out in the low thousands of rows per second;
//! batching exists for error locality and pipelining, not for magic speed.

use crate::error::{AdapterError, Result};
use crate::types::PgValue;
use regex::Regex;
use std::sync::OnceLock;

/// Rows accumulated before a batch is handed to the executor.
pub const DEFAULT_COPY_BATCH_ROWS: usize = 1000;

/// COPY transfer direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyDirection {
    /// COPY ... FROM STDIN
    FromStdin,
    /// COPY ... TO STDOUT
    ToStdout,
}

/// COPY data format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyFormat {
    /// Tab-delimited text with backslash escapes
    Text,
    /// RFC-4180-style CSV
    Csv,
}

/// A dissected COPY statement.
#[derive(Debug, Clone, PartialEq)]
pub struct CopySpec {
    /// Transfer direction
    pub direction: CopyDirection,
    /// Target table, quoting stripped
    pub table: String,
    /// Explicit column list (empty = all columns)
    pub columns: Vec<String>,
    /// Data format
    pub format: CopyFormat,
    /// Field delimiter
    pub delimiter: u8,
    /// Quote character (CSV only)
    pub quote: u8,
    /// Escape character (CSV only)
    pub escape: u8,
    /// Marker string decoded as NULL
    pub null_marker: String,
    /// Whether the first record is a header row
    pub header: bool,
}

impl CopySpec {
    fn with_format(direction: CopyDirection, table: String, columns: Vec<String>, format: CopyFormat) -> Self {
        let (delimiter, null_marker) = match format {
            CopyFormat::Text => (b'\t', "\\N".to_string()),
            CopyFormat::Csv => (b',', String::new()),
        };
        Self {
            direction,
            table,
            columns,
            format,
            delimiter,
            quote: b'"',
            escape: b'"',
            null_marker,
            header: false,
        }
    }

    /// INSERT statement used to land one row of this COPY.
    pub fn insert_sql(&self) -> String {
        let mut sql = String::from("INSERT INTO ");
        sql.push_str(&self.table);
        if !self.columns.is_empty() {
            sql.push_str(" (");
            sql.push_str(&self.columns.join(", "));
            sql.push(')');
        }
        sql.push_str(" VALUES (");
        for i in 0..self.column_count() {
            if i > 0 {
                sql.push_str(", ");
            }
            sql.push('?');
        }
        sql.push(')');
        sql
    }

    /// Number of columns a data row must carry; 0 means "not declared".
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// SELECT statement producing the rows for COPY TO STDOUT.
    pub fn select_sql(&self) -> String {
        if self.columns.is_empty() {
            format!("SELECT * FROM {}", self.table)
        } else {
            format!("SELECT {} FROM {}", self.columns.join(", "), self.table)
        }
    }
}

fn copy_statement_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?is)^\s*COPY\s+("[^"]+"|[\w.]+)\s*(?:\(([^)]*)\))?\s+(FROM\s+STDIN|TO\s+STDOUT)\s*(.*?)\s*;?\s*$"#,
        )
        .expect("valid regex")
    })
}

/// Dissect a COPY statement. Returns None when the statement is not COPY at
/// all; returns an error for COPY variants the adapter cannot serve (files,
/// binary format).
pub fn parse_copy(sql: &str) -> Result<Option<CopySpec>> {
    if !sql.trim_start().get(..4).is_some_and(|s| s.eq_ignore_ascii_case("copy")) {
        return Ok(None);
    }

    let caps = match copy_statement_re().captures(sql) {
        Some(caps) => caps,
        None => {
            return Err(AdapterError::Unsupported(
                "COPY is only supported FROM STDIN or TO STDOUT".to_string(),
            ))
        }
    };

    let table = unquote_ident(caps.get(1).map(|m| m.as_str()).unwrap_or_default());
    let columns: Vec<String> = caps
        .get(2)
        .map(|m| {
            m.as_str()
                .split(',')
                .map(|c| unquote_ident(c.trim()))
                .filter(|c| !c.is_empty())
                .collect()
        })
        .unwrap_or_default();
    let direction = if caps
        .get(3)
        .is_some_and(|m| m.as_str().to_ascii_uppercase().starts_with("FROM"))
    {
        CopyDirection::FromStdin
    } else {
        CopyDirection::ToStdout
    };

    let mut spec = CopySpec::with_format(direction, table, columns, CopyFormat::Text);
    if let Some(options) = caps.get(4) {
        apply_options(&mut spec, options.as_str())?;
    }
    Ok(Some(spec))
}

fn unquote_ident(ident: &str) -> String {
    let trimmed = ident.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        trimmed[1..trimmed.len() - 1].replace("\"\"", "\"")
    } else {
        trimmed.to_string()
    }
}

/// Apply the WITH options clause. Accepts both the parenthesized form
/// `WITH (FORMAT csv, HEADER true)` and the legacy `WITH CSV HEADER`.
fn apply_options(spec: &mut CopySpec, options: &str) -> Result<()> {
    let mut text = options.trim();
    if text.is_empty() {
        return Ok(());
    }
    if let Some(rest) = strip_keyword(text, "WITH") {
        text = rest.trim();
    }
    let inner = text
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .unwrap_or(text);

    let mut words = OptionWords::new(inner);
    while let Some(word) = words.next() {
        match word.to_ascii_uppercase().as_str() {
            "FORMAT" => {
                let value = words.expect_value("FORMAT")?;
                spec.set_format(&value)?;
            }
            "CSV" => spec.set_format("csv")?,
            "TEXT" => spec.set_format("text")?,
            "BINARY" => {
                return Err(AdapterError::Unsupported(
                    "COPY binary format".to_string(),
                ))
            }
            "HEADER" => {
                spec.header = match words.peek_value() {
                    Some(v) => {
                        words.next();
                        matches!(
                            v.to_ascii_lowercase().as_str(),
                            "true" | "on" | "1" | "match"
                        )
                    }
                    None => true,
                };
            }
            "DELIMITER" => {
                let value = words.expect_value("DELIMITER")?;
                spec.delimiter = single_byte(&value, "DELIMITER")?;
            }
            "QUOTE" => {
                let value = words.expect_value("QUOTE")?;
                spec.quote = single_byte(&value, "QUOTE")?;
                spec.escape = spec.quote;
            }
            "ESCAPE" => {
                let value = words.expect_value("ESCAPE")?;
                spec.escape = single_byte(&value, "ESCAPE")?;
            }
            "NULL" => {
                spec.null_marker = words.expect_value("NULL")?;
            }
            other => {
                return Err(AdapterError::Unsupported(format!(
                    "COPY option {}",
                    other
                )))
            }
        }
    }
    Ok(())
}

impl CopySpec {
    fn set_format(&mut self, value: &str) -> Result<()> {
        let format = match value.to_ascii_lowercase().as_str() {
            "text" => CopyFormat::Text,
            "csv" => CopyFormat::Csv,
            "binary" => {
                return Err(AdapterError::Unsupported("COPY binary format".to_string()))
            }
            other => {
                return Err(AdapterError::InvalidText(format!(
                    "unknown COPY format \"{}\"",
                    other
                )))
            }
        };
        let keep_header = self.header;
        let (direction, table, columns) =
            (self.direction, self.table.clone(), self.columns.clone());
        *self = CopySpec::with_format(direction, table, columns, format);
        self.header = keep_header;
        Ok(())
    }
}

fn strip_keyword<'a>(text: &'a str, keyword: &str) -> Option<&'a str> {
    if text.len() >= keyword.len() && text[..keyword.len()].eq_ignore_ascii_case(keyword) {
        Some(&text[keyword.len()..])
    } else {
        None
    }
}

fn single_byte(value: &str, option: &str) -> Result<u8> {
    let unescaped = match value {
        "\\t" => "\t",
        "\\n" => "\n",
        other => other,
    };
    if unescaped.len() == 1 {
        Ok(unescaped.as_bytes()[0])
    } else {
        Err(AdapterError::InvalidText(format!(
            "COPY {} must be a single character",
            option
        )))
    }
}

/// Splits an options clause into words, treating quoted values as one word
/// and skipping commas.
struct OptionWords<'a> {
    rest: &'a str,
}

impl<'a> OptionWords<'a> {
    fn new(text: &'a str) -> Self {
        Self { rest: text }
    }

    fn next(&mut self) -> Option<String> {
        self.advance()
    }

    fn peek_value(&self) -> Option<String> {
        let mut clone = OptionWords { rest: self.rest };
        let value = clone.advance()?;
        // A value, not the next option keyword
        if matches!(
            value.to_ascii_uppercase().as_str(),
            "FORMAT" | "CSV" | "TEXT" | "BINARY" | "HEADER" | "DELIMITER" | "QUOTE" | "ESCAPE"
                | "NULL"
        ) {
            None
        } else {
            Some(value)
        }
    }

    fn expect_value(&mut self, option: &str) -> Result<String> {
        self.advance().ok_or_else(|| {
            AdapterError::InvalidText(format!("COPY {} requires a value", option))
        })
    }

    fn advance(&mut self) -> Option<String> {
        let rest = self.rest.trim_start_matches(|c: char| c.is_whitespace() || c == ',');
        if rest.is_empty() {
            self.rest = rest;
            return None;
        }
        if let Some(stripped) = rest.strip_prefix('\'') {
            let close = stripped.find('\'')?;
            let value = stripped[..close].to_string();
            self.rest = &stripped[close + 1..];
            return Some(value);
        }
        let end = rest
            .find(|c: char| c.is_whitespace() || c == ',' || c == '(' || c == ')')
            .unwrap_or(rest.len());
        let value = rest[..end].to_string();
        self.rest = &rest[end..];
        Some(value)
    }
}

/// Incremental decoder for the CopyData byte stream. Bytes are fed in as
/// they arrive; complete records come out with their 1-based line numbers.
pub struct CopyRowDecoder {
    spec: CopySpec,
    buf: Vec<u8>,
    line: u64,
    header_skipped: bool,
    done: bool,
}

impl CopyRowDecoder {
    /// Build a decoder for a CopyIn transfer.
    pub fn new(spec: CopySpec) -> Self {
        let header_skipped = !spec.header;
        Self {
            spec,
            buf: Vec::new(),
            line: 0,
            header_skipped,
            done: false,
        }
    }

    /// Feed a CopyData chunk.
    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Signal CopyDone: a trailing record without a final newline is now a
    /// complete record.
    pub fn finish(&mut self) {
        self.done = true;
    }

    /// Pull the next complete record, if any. Each record is returned with
    /// its 1-based data line number (header rows do not count).
    pub fn next_record(&mut self) -> Result<Option<(u64, Vec<Option<String>>)>> {
        loop {
            let Some(end) = self.find_record_end() else {
                if self.done && !self.buf.is_empty() {
                    let raw: Vec<u8> = std::mem::take(&mut self.buf);
                    return self.emit(raw);
                }
                return Ok(None);
            };

            let mut raw: Vec<u8> = self.buf.drain(..=end).collect();
            // strip the record terminator
            if raw.last() == Some(&b'\n') {
                raw.pop();
            }
            if raw.last() == Some(&b'\r') {
                raw.pop();
            }

            if raw.is_empty() && self.buf.is_empty() && self.done {
                return Ok(None);
            }

            if !self.header_skipped {
                self.header_skipped = true;
                continue;
            }

            // the text-format end marker
            if raw == b"\\." {
                self.done = true;
                self.buf.clear();
                return Ok(None);
            }

            return self.emit(raw);
        }
    }

    fn emit(&mut self, raw: Vec<u8>) -> Result<Option<(u64, Vec<Option<String>>)>> {
        if !self.header_skipped {
            self.header_skipped = true;
            return Ok(None);
        }
        self.line += 1;
        let fields = match self.spec.format {
            CopyFormat::Csv => parse_csv_record(&raw, &self.spec, self.line)?,
            CopyFormat::Text => parse_text_record(&raw, &self.spec, self.line)?,
        };
        Ok(Some((self.line, fields)))
    }

    /// Index of the newline ending the next complete record, honoring CSV
    /// quoting (a newline inside quotes does not end a record).
    fn find_record_end(&self) -> Option<usize> {
        match self.spec.format {
            CopyFormat::Text => self.buf.iter().position(|&b| b == b'\n'),
            CopyFormat::Csv => {
                let mut in_quotes = false;
                let mut i = 0;
                while i < self.buf.len() {
                    let b = self.buf[i];
                    if in_quotes {
                        if b == self.spec.escape
                            && self.buf.get(i + 1) == Some(&self.spec.quote)
                            && self.spec.escape != self.spec.quote
                        {
                            i += 2;
                            continue;
                        }
                        if b == self.spec.quote {
                            if self.spec.escape == self.spec.quote
                                && self.buf.get(i + 1) == Some(&self.spec.quote)
                            {
                                i += 2;
                                continue;
                            }
                            in_quotes = false;
                        }
                    } else if b == self.spec.quote {
                        in_quotes = true;
                    } else if b == b'\n' {
                        return Some(i);
                    }
                    i += 1;
                }
                None
            }
        }
    }
}

fn parse_csv_record(raw: &[u8], spec: &CopySpec, line: u64) -> Result<Vec<Option<String>>> {
    let mut fields = Vec::new();
    let mut field = Vec::new();
    let mut quoted = false;
    let mut in_quotes = false;
    let mut i = 0;

    while i < raw.len() {
        let b = raw[i];
        if in_quotes {
            if b == spec.escape && spec.escape != spec.quote && raw.get(i + 1) == Some(&spec.quote)
            {
                field.push(spec.quote);
                i += 2;
                continue;
            }
            if b == spec.quote {
                if spec.escape == spec.quote && raw.get(i + 1) == Some(&spec.quote) {
                    field.push(spec.quote);
                    i += 2;
                    continue;
                }
                in_quotes = false;
                i += 1;
                continue;
            }
            field.push(b);
            i += 1;
            continue;
        }
        if b == spec.quote && field.is_empty() && !quoted {
            in_quotes = true;
            quoted = true;
            i += 1;
            continue;
        }
        if b == spec.delimiter {
            fields.push(finish_csv_field(std::mem::take(&mut field), quoted, spec, line)?);
            quoted = false;
            i += 1;
            continue;
        }
        field.push(b);
        i += 1;
    }

    if in_quotes {
        return Err(copy_row_error(line, "unterminated quoted field"));
    }
    fields.push(finish_csv_field(field, quoted, spec, line)?);
    Ok(fields)
}

fn finish_csv_field(
    raw: Vec<u8>,
    quoted: bool,
    spec: &CopySpec,
    line: u64,
) -> Result<Option<String>> {
    let text = String::from_utf8(raw)
        .map_err(|_| copy_row_error(line, "invalid UTF-8 in field"))?;
    // An unquoted field equal to the NULL marker is NULL; a quoted one is data.
    if !quoted && text == spec.null_marker {
        return Ok(None);
    }
    Ok(Some(text))
}

fn parse_text_record(raw: &[u8], spec: &CopySpec, line: u64) -> Result<Vec<Option<String>>> {
    let mut fields = Vec::new();
    let mut field = Vec::new();
    let mut i = 0;

    while i < raw.len() {
        let b = raw[i];
        if b == b'\\' {
            match raw.get(i + 1) {
                Some(b't') => field.push(b'\t'),
                Some(b'n') => field.push(b'\n'),
                Some(b'r') => field.push(b'\r'),
                Some(b'\\') => field.push(b'\\'),
                Some(b'N') => {
                    field.push(b'\\');
                    field.push(b'N');
                }
                Some(&other) => field.push(other),
                None => return Err(copy_row_error(line, "dangling backslash")),
            }
            i += 2;
            continue;
        }
        if b == spec.delimiter {
            fields.push(finish_text_field(std::mem::take(&mut field), spec, line)?);
            i += 1;
            continue;
        }
        field.push(b);
        i += 1;
    }
    fields.push(finish_text_field(field, spec, line)?);
    Ok(fields)
}

fn finish_text_field(raw: Vec<u8>, spec: &CopySpec, line: u64) -> Result<Option<String>> {
    let text = String::from_utf8(raw)
        .map_err(|_| copy_row_error(line, "invalid UTF-8 in field"))?;
    if text == spec.null_marker {
        return Ok(None);
    }
    Ok(Some(text))
}

/// Shape a per-row COPY error so the client sees the failing line.
pub fn copy_row_error(line: u64, message: impl std::fmt::Display) -> AdapterError {
    AdapterError::InvalidText(format!("row {}: {}", line, message))
}

/// Format one outgoing row for COPY TO STDOUT.
pub fn encode_row(spec: &CopySpec, values: &[PgValue]) -> Vec<u8> {
    let mut out = Vec::new();
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            out.push(spec.delimiter);
        }
        match crate::types::encode_text(value) {
            None => out.extend_from_slice(spec.null_marker.as_bytes()),
            Some(text) => match spec.format {
                CopyFormat::Text => {
                    for &b in text.iter() {
                        match b {
                            b'\t' => out.extend_from_slice(b"\\t"),
                            b'\n' => out.extend_from_slice(b"\\n"),
                            b'\r' => out.extend_from_slice(b"\\r"),
                            b'\\' => out.extend_from_slice(b"\\\\"),
                            other => out.push(other),
                        }
                    }
                }
                CopyFormat::Csv => {
                    let needs_quoting = text.iter().any(|&b| {
                        b == spec.delimiter || b == spec.quote || b == b'\n' || b == b'\r'
                    }) || (text.is_empty() && !spec.null_marker.is_empty());
                    if needs_quoting || text.is_empty() {
                        out.push(spec.quote);
                        for &b in text.iter() {
                            if b == spec.quote {
                                out.push(spec.escape);
                            }
                            out.push(b);
                        }
                        out.push(spec.quote);
                    } else {
                        out.extend_from_slice(&text);
                    }
                }
            },
        }
    }
    out.push(b'\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_copy_from_stdin_csv() {
        let spec = parse_copy(
            "COPY people (id, name) FROM STDIN WITH (FORMAT csv, HEADER true)",
        )
        .unwrap()
        .unwrap();
        assert_eq!(spec.direction, CopyDirection::FromStdin);
        assert_eq!(spec.table, "people");
        assert_eq!(spec.columns, vec!["id", "name"]);
        assert_eq!(spec.format, CopyFormat::Csv);
        assert!(spec.header);
        assert_eq!(spec.delimiter, b',');
    }

    #[test]
    fn test_parse_copy_defaults_to_text() {
        let spec = parse_copy("COPY t FROM STDIN").unwrap().unwrap();
        assert_eq!(spec.format, CopyFormat::Text);
        assert_eq!(spec.delimiter, b'\t');
        assert_eq!(spec.null_marker, "\\N");
        assert!(!spec.header);
        assert!(spec.columns.is_empty());
    }

    #[test]
    fn test_parse_copy_legacy_options() {
        let spec = parse_copy("COPY t TO STDOUT WITH CSV HEADER").unwrap().unwrap();
        assert_eq!(spec.direction, CopyDirection::ToStdout);
        assert_eq!(spec.format, CopyFormat::Csv);
        assert!(spec.header);
    }

    #[test]
    fn test_parse_copy_custom_delimiter_and_null() {
        let spec = parse_copy(
            "COPY t FROM STDIN WITH (FORMAT csv, DELIMITER ';', NULL 'NIL')",
        )
        .unwrap()
        .unwrap();
        assert_eq!(spec.delimiter, b';');
        assert_eq!(spec.null_marker, "NIL");
    }

    #[test]
    fn test_parse_copy_rejects_file_and_binary() {
        assert!(parse_copy("COPY t FROM '/tmp/data.csv'").is_err());
        assert!(matches!(
            parse_copy("COPY t FROM STDIN WITH (FORMAT binary)"),
            Err(AdapterError::Unsupported(_))
        ));
    }

    #[test]
    fn test_non_copy_statement() {
        assert_eq!(parse_copy("SELECT 1").unwrap(), None);
    }

    #[test]
    fn test_insert_sql_shape() {
        let spec = parse_copy("COPY people (id, name) FROM STDIN").unwrap().unwrap();
        assert_eq!(spec.insert_sql(), "INSERT INTO people (id, name) VALUES (?, ?)");
    }

    #[test]
    fn test_csv_decoding_with_header() {
        let spec = parse_copy("COPY p (id, name) FROM STDIN WITH (FORMAT csv, HEADER true)")
            .unwrap()
            .unwrap();
        let mut decoder = CopyRowDecoder::new(spec);
        decoder.feed(b"id,name\n1,Alice\n2,Bob\n");
        decoder.finish();

        let (line, row) = decoder.next_record().unwrap().unwrap();
        assert_eq!(line, 1);
        assert_eq!(row, vec![Some("1".to_string()), Some("Alice".to_string())]);
        let (line, row) = decoder.next_record().unwrap().unwrap();
        assert_eq!(line, 2);
        assert_eq!(row, vec![Some("2".to_string()), Some("Bob".to_string())]);
        assert!(decoder.next_record().unwrap().is_none());
    }

    #[test]
    fn test_csv_quoting_and_nulls() {
        let spec = parse_copy("COPY p (a, b, c) FROM STDIN WITH (FORMAT csv)")
            .unwrap()
            .unwrap();
        let mut decoder = CopyRowDecoder::new(spec);
        decoder.feed(b"\"a,b\",\"line\nbreak\",\n");
        decoder.finish();

        let (_, row) = decoder.next_record().unwrap().unwrap();
        assert_eq!(
            row,
            vec![
                Some("a,b".to_string()),
                Some("line\nbreak".to_string()),
                None
            ]
        );
    }

    #[test]
    fn test_csv_quoted_empty_is_not_null() {
        let spec = parse_copy("COPY p (a, b) FROM STDIN WITH (FORMAT csv)")
            .unwrap()
            .unwrap();
        let mut decoder = CopyRowDecoder::new(spec);
        decoder.feed(b"\"\",x\n");
        decoder.finish();
        let (_, row) = decoder.next_record().unwrap().unwrap();
        assert_eq!(row, vec![Some(String::new()), Some("x".to_string())]);
    }

    #[test]
    fn test_records_split_across_chunks() {
        let spec = parse_copy("COPY p (a, b) FROM STDIN WITH (FORMAT csv)")
            .unwrap()
            .unwrap();
        let mut decoder = CopyRowDecoder::new(spec);
        decoder.feed(b"1,al");
        assert!(decoder.next_record().unwrap().is_none());
        decoder.feed(b"ice\n2,bob\n");
        let (_, row) = decoder.next_record().unwrap().unwrap();
        assert_eq!(row[1].as_deref(), Some("alice"));
        let (_, row) = decoder.next_record().unwrap().unwrap();
        assert_eq!(row[1].as_deref(), Some("bob"));
    }

    #[test]
    fn test_text_format_escapes_and_terminator() {
        let spec = parse_copy("COPY p (a, b) FROM STDIN").unwrap().unwrap();
        let mut decoder = CopyRowDecoder::new(spec);
        decoder.feed(b"a\\tb\t\\N\n\\.\n");
        decoder.finish();
        let (_, row) = decoder.next_record().unwrap().unwrap();
        assert_eq!(row, vec![Some("a\tb".to_string()), None]);
        assert!(decoder.next_record().unwrap().is_none());
    }

    #[test]
    fn test_trailing_record_without_newline() {
        let spec = parse_copy("COPY p (a) FROM STDIN WITH (FORMAT csv)")
            .unwrap()
            .unwrap();
        let mut decoder = CopyRowDecoder::new(spec);
        decoder.feed(b"only");
        assert!(decoder.next_record().unwrap().is_none());
        decoder.finish();
        let (_, row) = decoder.next_record().unwrap().unwrap();
        assert_eq!(row, vec![Some("only".to_string())]);
    }

    #[test]
    fn test_encode_row_csv() {
        let spec = parse_copy("COPY p (a, b, c) TO STDOUT WITH (FORMAT csv)")
            .unwrap()
            .unwrap();
        let row = vec![
            PgValue::Int(1),
            PgValue::Text("needs,quoting".to_string()),
            PgValue::Null,
        ];
        assert_eq!(encode_row(&spec, &row), b"1,\"needs,quoting\",\n".to_vec());
    }

    #[test]
    fn test_encode_row_text() {
        let spec = parse_copy("COPY p (a, b) TO STDOUT").unwrap().unwrap();
        let row = vec![PgValue::Text("tab\there".to_string()), PgValue::Null];
        assert_eq!(encode_row(&spec, &row), b"tab\\there\t\\N\n".to_vec());
    }

    #[test]
    fn test_row_error_carries_line_number() {
        let err = copy_row_error(3, "expected 2 columns, found 1");
        let (code, message) = crate::error::to_pg_error(&err);
        assert_eq!(code, "22P02");
        assert!(message.contains("row 3"));
    }
}
