//! PostgreSQL wire protocol adapter for InterSystems IRIS
//!
//! This crate speaks the PostgreSQL v3.0 frontend/backend protocol to
//! clients and executes their SQL against an IRIS backend through a narrow
//! [`executor::Executor`] interface. It covers startup and authentication
//! (trust, password, MD5, SCRAM-SHA-256 with TLS channel binding), the
//! simple and extended query protocols, PostgreSQL→IRIS SQL translation
//! including pgvector operators, the COPY streaming subprotocol, and
//! out-of-band query cancellation.

/// Error taxonomy and SQLSTATE mapping
pub mod error;

/// Configuration loading and layering
pub mod config;

/// PostgreSQL wire protocol implementation
pub mod protocol;

/// PostgreSQL → IRIS SQL translation
pub mod translate;

/// Type OID registry and value codecs
pub mod types;

/// COPY subprotocol support
pub mod copy;

/// Process-wide cancel registry
pub mod cancel;

/// Backend executor interface and the in-process backend
pub mod executor;

/// Listener and session pool
pub mod server;

pub use config::AdapterConfig;
pub use error::{AdapterError, Result};
pub use server::AdapterServer;

// Re-export commonly used types
pub use cancel::{BackendKey, CancelRegistry};
pub use executor::{ExecOutcome, Executor, ExecutorFactory, ResultStream};
pub use protocol::auth::{AuthMethod, Authenticator, CredentialStore, TokenExchanger};
pub use protocol::connection::{run_session, SessionContext};
pub use protocol::message::{BackendMessage, FrontendMessage, TransactionStatus};
pub use translate::{translate, StatementClass, Translation, TranslationCache};
pub use types::PgValue;
