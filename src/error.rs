//! Error types for the IRIS PostgreSQL wire adapter
//!
//! This module provides the error taxonomy used across the adapter, plus the
//! mapping from internal errors to PostgreSQL SQLSTATE codes.

use std::io;
use thiserror::Error;

/// Result type for the adapter
pub type Result<T> = std::result::Result<T, AdapterError>;

/// Error type for the adapter
#[derive(Debug, Error)]
pub enum AdapterError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// PostgreSQL protocol violation (malformed frame, illegal message for state)
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Incomplete frame; the reader needs more bytes
    #[error("incomplete message")]
    Incomplete,

    /// Authentication failure
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Unsupported SQL construct (vector L2 distance, two-phase commit, ...)
    #[error("feature is not supported: {0}")]
    Unsupported(String),

    /// Invalid text representation of a value (bad parameter, bad COPY field)
    #[error("invalid input syntax: {0}")]
    InvalidText(String),

    /// Error reported by the IRIS backend
    #[error("{message}")]
    Backend {
        /// SQLSTATE when the backend SQLCODE maps to one
        sqlstate: Option<&'static str>,
        /// Human-readable message
        message: String,
    },

    /// Prepared statement name already in use
    #[error("prepared statement \"{0}\" already exists")]
    DuplicateStatement(String),

    /// Statement canceled by an out-of-band CancelRequest
    #[error("canceling statement due to user request")]
    Canceled,

    /// Statement or authentication timeout
    #[error("canceling statement due to statement timeout")]
    Timeout,

    /// Connection budget exhausted
    #[error("sorry, too many clients already")]
    TooManyConnections,

    /// Peer closed the connection
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl AdapterError {
    /// Whether this error terminates the connection rather than the statement.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AdapterError::Io(_)
                | AdapterError::Config(_)
                | AdapterError::Protocol(_)
                | AdapterError::Incomplete
                | AdapterError::Auth(_)
                | AdapterError::TooManyConnections
                | AdapterError::ConnectionClosed
        )
    }

    /// Build a backend error from an IRIS SQLCODE and message.
    pub fn from_sqlcode(sqlcode: i32, message: impl Into<String>) -> Self {
        AdapterError::Backend {
            sqlstate: sqlstate_for_sqlcode(sqlcode),
            message: message.into(),
        }
    }
}

/// Convert an adapter error to the (SQLSTATE, message) pair carried in an
/// ErrorResponse. Internal details stay in the log, not in the message.
pub fn to_pg_error(error: &AdapterError) -> (&'static str, String) {
    match error {
        AdapterError::Protocol(msg) => ("08P01", msg.clone()),
        AdapterError::Incomplete => ("08P01", "incomplete message".to_string()),
        AdapterError::Auth(msg) => ("28P01", msg.clone()),
        AdapterError::Unsupported(msg) => ("0A000", msg.clone()),
        AdapterError::InvalidText(msg) => ("22P02", msg.clone()),
        AdapterError::Backend { sqlstate, message } => {
            (sqlstate.unwrap_or("XX000"), message.clone())
        }
        AdapterError::DuplicateStatement(name) => {
            ("42P05", format!("prepared statement \"{}\" already exists", name))
        }
        AdapterError::Canceled => ("57014", error.to_string()),
        AdapterError::Timeout => ("57014", error.to_string()),
        AdapterError::TooManyConnections => ("53300", error.to_string()),
        AdapterError::Config(msg) => ("XX000", msg.clone()),
        _ => ("XX000", "internal error".to_string()),
    }
}

/// Map a handful of well-known IRIS SQLCODEs to SQLSTATE codes. Anything
/// unmapped surfaces as XX000.
fn sqlstate_for_sqlcode(sqlcode: i32) -> Option<&'static str> {
    match sqlcode {
        -30 => Some("42P01"),  // table or view not found
        -29 => Some("42703"),  // column not found
        -1 | -12 | -25 => Some("42601"), // syntax errors
        -119 | -120 => Some("23505"),    // unique constraint
        -99 => Some("42501"),  // privilege violation
        -108 => Some("23502"), // required field missing
        -104 => Some("22000"), // field validation failed
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlstate_mapping() {
        assert_eq!(to_pg_error(&AdapterError::Canceled).0, "57014");
        assert_eq!(to_pg_error(&AdapterError::Timeout).0, "57014");
        assert_eq!(to_pg_error(&AdapterError::TooManyConnections).0, "53300");
        assert_eq!(
            to_pg_error(&AdapterError::Protocol("bad tag".to_string())).0,
            "08P01"
        );
        assert_eq!(
            to_pg_error(&AdapterError::Unsupported("L2".to_string())).0,
            "0A000"
        );
        assert_eq!(
            to_pg_error(&AdapterError::Auth("nope".to_string())).0,
            "28P01"
        );
    }

    #[test]
    fn test_backend_sqlcode_mapping() {
        let err = AdapterError::from_sqlcode(-30, "Table 'USERS' not found");
        assert_eq!(to_pg_error(&err).0, "42P01");

        let err = AdapterError::from_sqlcode(-400, "some engine failure");
        assert_eq!(to_pg_error(&err).0, "XX000");
    }

    #[test]
    fn test_fatal_classification() {
        assert!(AdapterError::Protocol("x".to_string()).is_fatal());
        assert!(AdapterError::Auth("x".to_string()).is_fatal());
        assert!(!AdapterError::Canceled.is_fatal());
        assert!(!AdapterError::Unsupported("x".to_string()).is_fatal());
        assert!(!AdapterError::Backend { sqlstate: None, message: "x".to_string() }.is_fatal());
    }
}
