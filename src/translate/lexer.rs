//! Tolerant SQL tokenizer used by the translator
//!
//! This is not a SQL parser. It splits a statement into spans precise enough
//! to rewrite placeholders, casts and operators without disturbing string
//! literals, quoted identifiers or comments.

use crate::error::{AdapterError, Result};

/// Token classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Unquoted identifier or keyword
    Ident,
    /// Double-quoted identifier (span includes the quotes)
    QuotedIdent,
    /// String literal (span includes the quotes)
    String,
    /// Numeric literal
    Number,
    /// `$N` positional placeholder
    DollarParam,
    /// `%s` placeholder (psycopg paramstyle)
    PercentParam,
    /// `?` placeholder
    QuestionParam,
    /// `::` cast operator
    Cast,
    /// `<=>` cosine-distance operator
    CosineOp,
    /// `<#>` inner-product operator
    InnerOp,
    /// `<->` L2-distance operator
    L2Op,
    /// Any other operator or punctuation character
    Op,
}

/// A token with its byte span in the source statement.
#[derive(Debug, Clone, Copy)]
pub struct Token {
    /// Classification
    pub kind: TokenKind,
    /// Start byte offset (inclusive)
    pub start: usize,
    /// End byte offset (exclusive)
    pub end: usize,
}

impl Token {
    /// The token's text.
    pub fn text<'a>(&self, sql: &'a str) -> &'a str {
        &sql[self.start..self.end]
    }

    /// Uppercased text, for keyword comparison.
    pub fn upper(&self, sql: &str) -> String {
        self.text(sql).to_ascii_uppercase()
    }

    /// Whether this token is the given keyword (case-insensitive).
    pub fn is_keyword(&self, sql: &str, keyword: &str) -> bool {
        self.kind == TokenKind::Ident && self.text(sql).eq_ignore_ascii_case(keyword)
    }
}

/// Tokenize a statement. Comments and whitespace are skipped; unterminated
/// strings and quotes are protocol-level errors.
pub fn tokenize(sql: &str) -> Result<Vec<Token>> {
    let bytes = sql.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];

        // whitespace
        if b.is_ascii_whitespace() {
            i += 1;
            continue;
        }

        // line comment
        if b == b'-' && bytes.get(i + 1) == Some(&b'-') {
            while i < bytes.len() && bytes[i] != b'\n' {
                i += 1;
            }
            continue;
        }

        // block comment (non-nesting)
        if b == b'/' && bytes.get(i + 1) == Some(&b'*') {
            let close = sql[i + 2..]
                .find("*/")
                .ok_or_else(|| AdapterError::Protocol("unterminated comment".to_string()))?;
            i += 2 + close + 2;
            continue;
        }

        // string literal with '' escape
        if b == b'\'' {
            let start = i;
            i += 1;
            loop {
                match bytes.get(i) {
                    Some(b'\'') if bytes.get(i + 1) == Some(&b'\'') => i += 2,
                    Some(b'\'') => {
                        i += 1;
                        break;
                    }
                    Some(_) => i += 1,
                    None => {
                        return Err(AdapterError::Protocol(
                            "unterminated string literal".to_string(),
                        ))
                    }
                }
            }
            tokens.push(Token {
                kind: TokenKind::String,
                start,
                end: i,
            });
            continue;
        }

        // quoted identifier with "" escape
        if b == b'"' {
            let start = i;
            i += 1;
            loop {
                match bytes.get(i) {
                    Some(b'"') if bytes.get(i + 1) == Some(&b'"') => i += 2,
                    Some(b'"') => {
                        i += 1;
                        break;
                    }
                    Some(_) => i += 1,
                    None => {
                        return Err(AdapterError::Protocol(
                            "unterminated quoted identifier".to_string(),
                        ))
                    }
                }
            }
            tokens.push(Token {
                kind: TokenKind::QuotedIdent,
                start,
                end: i,
            });
            continue;
        }

        // $N placeholder or dollar-quoted string
        if b == b'$' {
            let start = i;
            let mut j = i + 1;
            while j < bytes.len() && bytes[j].is_ascii_digit() {
                j += 1;
            }
            if j > i + 1 {
                tokens.push(Token {
                    kind: TokenKind::DollarParam,
                    start,
                    end: j,
                });
                i = j;
                continue;
            }
            // $tag$ ... $tag$ body is treated as one opaque string token
            let mut k = i + 1;
            while k < bytes.len() && (bytes[k].is_ascii_alphanumeric() || bytes[k] == b'_') {
                k += 1;
            }
            if bytes.get(k) == Some(&b'$') {
                let delim = &sql[i..=k];
                let body_start = k + 1;
                let close = sql[body_start..].find(delim).ok_or_else(|| {
                    AdapterError::Protocol("unterminated dollar-quoted string".to_string())
                })?;
                let end = body_start + close + delim.len();
                tokens.push(Token {
                    kind: TokenKind::String,
                    start,
                    end,
                });
                i = end;
                continue;
            }
            tokens.push(Token {
                kind: TokenKind::Op,
                start,
                end: i + 1,
            });
            i += 1;
            continue;
        }

        // %s placeholder; `x%salary` is modulo against an identifier, not a
        // placeholder, so require a word boundary after the s
        if b == b'%'
            && bytes.get(i + 1) == Some(&b's')
            && !bytes
                .get(i + 2)
                .is_some_and(|c| c.is_ascii_alphanumeric() || *c == b'_')
        {
            tokens.push(Token {
                kind: TokenKind::PercentParam,
                start: i,
                end: i + 2,
            });
            i += 2;
            continue;
        }

        if b == b'?' {
            tokens.push(Token {
                kind: TokenKind::QuestionParam,
                start: i,
                end: i + 1,
            });
            i += 1;
            continue;
        }

        // number
        if b.is_ascii_digit() || (b == b'.' && bytes.get(i + 1).is_some_and(u8::is_ascii_digit)) {
            let start = i;
            while i < bytes.len()
                && (bytes[i].is_ascii_digit()
                    || bytes[i] == b'.'
                    || bytes[i] == b'e'
                    || bytes[i] == b'E'
                    || ((bytes[i] == b'+' || bytes[i] == b'-')
                        && matches!(bytes.get(i.wrapping_sub(1)), Some(b'e') | Some(b'E'))))
            {
                i += 1;
            }
            tokens.push(Token {
                kind: TokenKind::Number,
                start,
                end: i,
            });
            continue;
        }

        // identifier / keyword
        if b.is_ascii_alphabetic() || b == b'_' {
            let start = i;
            while i < bytes.len()
                && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_' || bytes[i] == b'$')
            {
                i += 1;
            }
            tokens.push(Token {
                kind: TokenKind::Ident,
                start,
                end: i,
            });
            continue;
        }

        // multi-character operators, longest first
        let rest = &sql[i..];
        let (kind, len) = if rest.starts_with("<=>") {
            (TokenKind::CosineOp, 3)
        } else if rest.starts_with("<#>") {
            (TokenKind::InnerOp, 3)
        } else if rest.starts_with("<->") {
            (TokenKind::L2Op, 3)
        } else if rest.starts_with("::") {
            (TokenKind::Cast, 2)
        } else if rest.starts_with("<=")
            || rest.starts_with(">=")
            || rest.starts_with("<>")
            || rest.starts_with("!=")
            || rest.starts_with("||")
        {
            (TokenKind::Op, 2)
        } else {
            (TokenKind::Op, 1)
        };
        tokens.push(Token {
            kind,
            start: i,
            end: i + len,
        });
        i += len;
    }

    Ok(tokens)
}
