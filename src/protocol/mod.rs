//! PostgreSQL wire protocol implementation
//!
//! Frame parsing and formatting, client authentication, the prepared
//! statement and portal caches, transaction tracking, and the per-session
//! state machine that ties them together.

/// Message types for the PostgreSQL wire protocol
pub mod message;

/// Frame reading and frontend message decoding
pub mod parser;

/// Backend message encoding and buffered writing
pub mod formatter;

/// Client authentication
pub mod auth;

/// Prepared statement and portal caches
pub mod statements;

/// Transaction status tracking
pub mod transaction;

/// Per-connection session state machine
pub mod connection;

// Re-export common types
pub use self::auth::{AuthMethod, Authenticator};
pub use self::connection::{run_session, ConnectionStats, SessionContext};
pub use self::formatter::MessageWriter;
pub use self::message::{AuthenticationRequest, BackendMessage, FrontendMessage, TransactionStatus};
pub use self::parser::FrameReader;
pub use self::statements::{Portal, PreparedStatement, SessionCaches};
pub use self::transaction::TransactionTracker;
