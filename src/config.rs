//! Adapter configuration
//!
//! Layered defaults ← JSON config file ← `PGWIRE_*` environment ← CLI
//! flags. The file and environment layers live here; flag handling is in
//! the binary.

use crate::error::{AdapterError, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// Listen address
    pub host: String,

    /// Listen port
    pub port: u16,

    /// Maximum concurrent sessions
    pub max_connections: usize,

    /// Per-statement execution budget in milliseconds (None = unlimited)
    pub statement_timeout_ms: Option<u64>,

    /// Close sessions idle longer than this many seconds (None = never)
    pub idle_timeout_secs: Option<u64>,

    /// Grace period before sessions are told to go away at shutdown
    pub shutdown_grace_secs: u64,

    /// Advertised server_version. Must start with a number >= 9 or drivers
    /// refuse to speak to us.
    pub server_version: String,

    /// Session TimeZone; None falls back to $TZ, then UTC
    pub timezone: Option<String>,

    /// Log statement text at debug level
    pub log_queries: bool,

    /// Hard cap on a single protocol frame
    pub max_frame_bytes: usize,

    /// Rows per COPY FROM STDIN batch
    pub copy_batch_rows: usize,

    /// TLS settings; None disables the SSLRequest upgrade
    pub tls: Option<TlsSettings>,

    /// Authentication settings
    pub auth: AuthSettings,
}

/// TLS certificate material.
#[derive(Debug, Clone, Deserialize)]
pub struct TlsSettings {
    /// PEM certificate chain
    pub cert_file: PathBuf,

    /// PEM private key
    pub key_file: PathBuf,
}

/// Authentication settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// Method name: trust | password | md5 | scram-sha-256
    pub method: String,

    /// User → password map for the in-memory credential store
    pub users: HashMap<String, String>,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            method: "scram-sha-256".to_string(),
            users: HashMap::new(),
        }
    }
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5432,
            max_connections: 1000,
            statement_timeout_ms: None,
            idle_timeout_secs: None,
            shutdown_grace_secs: 5,
            server_version: "16.0 (IRIS adapter)".to_string(),
            timezone: None,
            log_queries: false,
            max_frame_bytes: 1024 * 1024 * 1024,
            copy_batch_rows: crate::copy::DEFAULT_COPY_BATCH_ROWS,
            tls: None,
            auth: AuthSettings::default(),
        }
    }
}

impl AdapterConfig {
    /// Defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| AdapterError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        serde_json::from_str(&text)
            .map_err(|e| AdapterError::Config(format!("cannot parse {}: {}", path.display(), e)))
    }

    /// Apply the `PGWIRE_*` environment variables on top of the current
    /// values.
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(host) = std::env::var("PGWIRE_HOST") {
            self.host = host;
        }
        if let Ok(port) = std::env::var("PGWIRE_PORT") {
            self.port = port
                .parse()
                .map_err(|_| AdapterError::Config(format!("bad PGWIRE_PORT: {}", port)))?;
        }
        if let Ok(max) = std::env::var("PGWIRE_MAX_CONNECTIONS") {
            self.max_connections = max
                .parse()
                .map_err(|_| AdapterError::Config(format!("bad PGWIRE_MAX_CONNECTIONS: {}", max)))?;
        }
        if let Ok(ms) = std::env::var("PGWIRE_STATEMENT_TIMEOUT_MS") {
            let ms: u64 = ms
                .parse()
                .map_err(|_| AdapterError::Config(format!("bad PGWIRE_STATEMENT_TIMEOUT_MS: {}", ms)))?;
            self.statement_timeout_ms = (ms > 0).then_some(ms);
        }
        if let Ok(enabled) = std::env::var("PGWIRE_SSL_ENABLED") {
            let on = matches!(enabled.to_ascii_lowercase().as_str(), "1" | "true" | "on");
            if on {
                let cert_file = std::env::var("PGWIRE_TLS_CERT_FILE").map_err(|_| {
                    AdapterError::Config(
                        "PGWIRE_SSL_ENABLED set but PGWIRE_TLS_CERT_FILE missing".to_string(),
                    )
                })?;
                let key_file = std::env::var("PGWIRE_TLS_KEY_FILE").map_err(|_| {
                    AdapterError::Config(
                        "PGWIRE_SSL_ENABLED set but PGWIRE_TLS_KEY_FILE missing".to_string(),
                    )
                })?;
                self.tls = Some(TlsSettings {
                    cert_file: cert_file.into(),
                    key_file: key_file.into(),
                });
            } else {
                self.tls = None;
            }
        }
        Ok(())
    }

    /// Listen address string.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Statement timeout as a duration.
    pub fn statement_timeout(&self) -> Option<Duration> {
        self.statement_timeout_ms.map(Duration::from_millis)
    }

    /// Idle timeout as a duration.
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }

    /// Effective session time zone.
    pub fn effective_timezone(&self) -> String {
        self.timezone
            .clone()
            .or_else(|| std::env::var("TZ").ok())
            .unwrap_or_else(|| "UTC".to_string())
    }
}
