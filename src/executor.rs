//! Executor interface
//!
//! The narrow seam between the protocol engine and whatever runs the SQL.
//! The engine never sees a driver: it hands translated SQL and decoded
//! parameter values to an [`Executor`] and pulls rows back one at a time.
//! Two kinds of backend sit behind this trait: an external IRIS driver
//! (out of tree) and the in-process [`memory::MemoryExecutor`] used by the
//! binary's standalone mode and the test suite. Implementations must treat
//! IRIS SQLCODE 100 as "no more rows", never as an error.

use crate::error::{AdapterError, Result};
use crate::types::PgValue;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// IRIS SQLCODE meaning "success, no more rows".
pub const SQLCODE_NO_MORE_ROWS: i32 = 100;

/// Column metadata as reported by the backend. `type_oid` is None when the
/// backend cursor does not know; the type registry then infers from values.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMeta {
    /// Column name
    pub name: String,
    /// PG type OID, when known
    pub type_oid: Option<i32>,
}

impl ColumnMeta {
    /// Metadata with a known type.
    pub fn typed(name: impl Into<String>, type_oid: i32) -> Self {
        Self {
            name: name.into(),
            type_oid: Some(type_oid),
        }
    }

    /// Metadata with only a name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_oid: None,
        }
    }
}

/// Backend health report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    /// Fully operational
    Ok,
    /// Reachable but impaired
    Degraded,
    /// Unreachable
    Failed,
}

/// Outcome of executing one statement.
pub enum ExecOutcome {
    /// A result set, pulled row by row
    Rows(Box<dyn ResultStream>),
    /// A command with no result set
    Command {
        /// Statement verb for the CommandComplete tag (INSERT, UPDATE, ...)
        verb: String,
        /// Affected row count
        rows: u64,
    },
}

impl std::fmt::Debug for ExecOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecOutcome::Rows(_) => f.debug_tuple("Rows").field(&"<stream>").finish(),
            ExecOutcome::Command { verb, rows } => f
                .debug_struct("Command")
                .field("verb", verb)
                .field("rows", rows)
                .finish(),
        }
    }
}

/// A streaming result cursor. Rows are pulled to bound memory; the stream
/// ends with Ok(None).
#[async_trait]
pub trait ResultStream: Send + Sync {
    /// Column metadata, if the backend reports any.
    fn columns(&self) -> Option<Vec<ColumnMeta>>;

    /// The next row, or None at end of rows.
    async fn next_row(&mut self) -> Result<Option<Vec<PgValue>>>;
}

/// Connection parameters handed to the factory at session start.
#[derive(Debug, Clone, Default)]
pub struct BackendSession {
    /// Negotiated user
    pub user: String,
    /// Negotiated database / namespace
    pub database: String,
    /// Token from the OAuth bridge, when that chain element ran
    pub token: Option<String>,
}

/// What the protocol engine calls to run SQL.
///
/// Implementations over synchronous drivers must not block the session
/// task: wrap the driver call in `tokio::task::spawn_blocking` and await
/// the handle.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Execute a translated statement with decoded parameter values.
    async fn execute(&self, sql: &str, params: &[PgValue]) -> Result<ExecOutcome>;

    /// Execute the same statement for every parameter row. The default
    /// loops over [`Executor::execute`]; backends with a faster bulk path
    /// override it and report `supports_batch`.
    async fn execute_batch(&self, sql: &str, batches: Vec<Vec<PgValue>>) -> Result<u64> {
        let mut total = 0;
        for params in batches {
            if let ExecOutcome::Command { rows, .. } = self.execute(sql, &params).await? {
                total += rows;
            }
        }
        Ok(total)
    }

    /// Whether `execute_batch` is better than a loop.
    fn supports_batch(&self) -> bool {
        false
    }

    /// Column metadata for a statement without executing it, when the
    /// backend can provide it. Used to answer Describe before any Execute.
    async fn describe(&self, _sql: &str) -> Result<Option<Vec<ColumnMeta>>> {
        Ok(None)
    }

    /// Abort the statement currently executing on this connection, if any.
    /// Must be callable from another task; a no-op when nothing runs.
    fn cancel(&self);

    /// Backend health, for the listener's bookkeeping.
    async fn health(&self) -> Health {
        Health::Ok
    }
}

/// Creates one executor per session.
#[async_trait]
pub trait ExecutorFactory: Send + Sync {
    /// Open a backend connection for a new session.
    async fn connect(&self, session: &BackendSession) -> Result<Arc<dyn Executor>>;
}

pub mod memory {
    //! In-process backend
    //!
    //! A deliberately small SQL surface: CREATE TABLE, single-row INSERT
    //! with placeholders, SELECT of a table or of integer literals, DELETE,
    //! and transaction verbs. Enough to bring a session up against nothing
    //! but this process, and to script every failure mode the protocol
    //! engine has to survive.

    use super::*;
    use log::debug;
    use regex::Regex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Mutex, OnceLock};
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Scripted response for a specific statement, matched by substring.
    pub enum Scripted {
        /// Produce these rows with this metadata
        Rows {
            /// Column metadata
            columns: Vec<ColumnMeta>,
            /// Row values
            rows: Vec<Vec<PgValue>>,
        },
        /// Produce a command tag
        Command {
            /// Verb
            verb: String,
            /// Row count
            rows: u64,
        },
        /// Fail with a backend error carrying this IRIS SQLCODE
        SqlError {
            /// IRIS SQLCODE
            sqlcode: i32,
            /// Message
            message: String,
        },
        /// Sleep (cancellably), then complete
        Delay(Duration),
    }

    #[derive(Default)]
    struct TableData {
        columns: Vec<String>,
        rows: Vec<Vec<PgValue>>,
    }

    #[derive(Default)]
    struct MemoryState {
        tables: HashMap<String, TableData>,
        scripts: Vec<(String, Scripted)>,
    }

    /// The in-process executor.
    pub struct MemoryExecutor {
        state: Arc<Mutex<MemoryState>>,
        canceled: AtomicBool,
        cancel_notify: Notify,
    }

    impl Default for MemoryExecutor {
        fn default() -> Self {
            Self::new()
        }
    }

    fn insert_re() -> &'static Regex {
        static RE: OnceLock<Regex> = OnceLock::new();
        RE.get_or_init(|| {
            Regex::new(r"(?is)^\s*INSERT\s+INTO\s+([\w.]+)\s*(?:\(([^)]*)\))?\s*VALUES\s*\((.*)\)\s*$")
                .expect("valid regex")
        })
    }

    fn select_table_re() -> &'static Regex {
        static RE: OnceLock<Regex> = OnceLock::new();
        RE.get_or_init(|| {
            Regex::new(r"(?is)^\s*SELECT\s+(\*|[\w.,\s]+?)\s+FROM\s+([\w.]+)\s*$")
                .expect("valid regex")
        })
    }

    fn create_table_re() -> &'static Regex {
        static RE: OnceLock<Regex> = OnceLock::new();
        RE.get_or_init(|| {
            Regex::new(r"(?is)^\s*CREATE\s+TABLE\s+([\w.]+)\s*\((.*)\)\s*$").expect("valid regex")
        })
    }

    fn delete_re() -> &'static Regex {
        static RE: OnceLock<Regex> = OnceLock::new();
        RE.get_or_init(|| {
            Regex::new(r"(?is)^\s*DELETE\s+FROM\s+([\w.]+)\s*$").expect("valid regex")
        })
    }

    fn select_literals_re() -> &'static Regex {
        static RE: OnceLock<Regex> = OnceLock::new();
        RE.get_or_init(|| {
            Regex::new(r"(?is)^\s*SELECT\s+([-\d.,\s']+)$").expect("valid regex")
        })
    }

    impl MemoryExecutor {
        /// Empty backend.
        pub fn new() -> Self {
            Self {
                state: Arc::new(Mutex::new(MemoryState::default())),
                canceled: AtomicBool::new(false),
                cancel_notify: Notify::new(),
            }
        }

        /// Script a response for statements containing `needle`.
        pub fn script(&self, needle: impl Into<String>, response: Scripted) {
            self.state
                .lock()
                .expect("memory state lock")
                .scripts
                .push((needle.into(), response));
        }

        /// Create a table directly (test setup convenience).
        pub fn define_table(&self, name: &str, columns: &[&str]) {
            let mut state = self.state.lock().expect("memory state lock");
            state.tables.insert(
                name.to_ascii_lowercase(),
                TableData {
                    columns: columns.iter().map(|c| c.to_string()).collect(),
                    rows: Vec::new(),
                },
            );
        }

        /// Snapshot a table's rows (test assertion convenience).
        pub fn table_rows(&self, name: &str) -> Vec<Vec<PgValue>> {
            self.state
                .lock()
                .expect("memory state lock")
                .tables
                .get(&name.to_ascii_lowercase())
                .map(|t| t.rows.clone())
                .unwrap_or_default()
        }

        async fn run_delay(&self, duration: Duration) -> Result<()> {
            let canceled = async {
                // a stale notify permit without the flag set is ignored
                loop {
                    self.cancel_notify.notified().await;
                    if self.canceled.load(Ordering::SeqCst) {
                        break;
                    }
                }
            };
            tokio::select! {
                _ = tokio::time::sleep(duration) => Ok(()),
                _ = canceled => {
                    self.canceled.store(false, Ordering::SeqCst);
                    Err(AdapterError::Canceled)
                }
            }
        }
    }

    #[async_trait]
    impl Executor for MemoryExecutor {
        async fn execute(&self, sql: &str, params: &[PgValue]) -> Result<ExecOutcome> {
            // a cancel that lands between statements is a no-op; clear it so
            // it cannot poison this statement
            self.canceled.store(false, Ordering::SeqCst);
            debug!("memory executor: {}", sql);

            // scripted responses take precedence
            enum Hit {
                Rows(Vec<ColumnMeta>, Vec<Vec<PgValue>>),
                Command(String, u64),
                SqlError(i32, String),
                Delay(Duration),
            }
            let hit = {
                let state = self.state.lock().expect("memory state lock");
                state.scripts.iter().find_map(|(needle, response)| {
                    if !sql.contains(needle.as_str()) {
                        return None;
                    }
                    Some(match response {
                        Scripted::Rows { columns, rows } => {
                            Hit::Rows(columns.clone(), rows.clone())
                        }
                        Scripted::Command { verb, rows } => Hit::Command(verb.clone(), *rows),
                        Scripted::SqlError { sqlcode, message } => {
                            Hit::SqlError(*sqlcode, message.clone())
                        }
                        Scripted::Delay(duration) => Hit::Delay(*duration),
                    })
                })
            };
            if let Some(hit) = hit {
                return match hit {
                    Hit::Rows(columns, rows) => Ok(ExecOutcome::Rows(Box::new(MemoryStream {
                        columns,
                        rows: rows.into(),
                    }))),
                    Hit::Command(verb, rows) => Ok(ExecOutcome::Command { verb, rows }),
                    Hit::SqlError(sqlcode, message) => {
                        Err(AdapterError::from_sqlcode(sqlcode, message))
                    }
                    Hit::Delay(duration) => {
                        self.run_delay(duration).await?;
                        Ok(ExecOutcome::Command {
                            verb: "SELECT".to_string(),
                            rows: 0,
                        })
                    }
                };
            }

            let trimmed = sql.trim();
            let upper = trimmed.to_ascii_uppercase();

            if upper == "START TRANSACTION" || upper == "COMMIT" || upper == "ROLLBACK" {
                let verb = match upper.as_str() {
                    "START TRANSACTION" => "BEGIN",
                    other => other,
                };
                return Ok(ExecOutcome::Command {
                    verb: verb.to_string(),
                    rows: 0,
                });
            }

            if let Some(caps) = create_table_re().captures(trimmed) {
                let name = caps[1].to_ascii_lowercase();
                let columns: Vec<String> = caps[2]
                    .split(',')
                    .filter_map(|col| col.split_whitespace().next().map(str::to_string))
                    .collect();
                let mut state = self.state.lock().expect("memory state lock");
                state.tables.insert(
                    name,
                    TableData {
                        columns,
                        rows: Vec::new(),
                    },
                );
                return Ok(ExecOutcome::Command {
                    verb: "CREATE TABLE".to_string(),
                    rows: 0,
                });
            }

            if let Some(caps) = insert_re().captures(trimmed) {
                let name = caps[1].to_ascii_lowercase();
                let placeholder_count = caps[3].matches('?').count();
                let row = if placeholder_count > 0 {
                    if placeholder_count != params.len() {
                        return Err(AdapterError::from_sqlcode(
                            -1,
                            format!(
                                "expected {} parameters, got {}",
                                placeholder_count,
                                params.len()
                            ),
                        ));
                    }
                    params.to_vec()
                } else {
                    caps[3]
                        .split(',')
                        .map(|lit| parse_literal(lit.trim()))
                        .collect()
                };
                let mut state = self.state.lock().expect("memory state lock");
                let table = state.tables.get_mut(&name).ok_or_else(|| {
                    AdapterError::from_sqlcode(-30, format!("Table '{}' not found", caps[1].to_ascii_uppercase()))
                })?;
                table.rows.push(row);
                return Ok(ExecOutcome::Command {
                    verb: "INSERT 0".to_string(),
                    rows: 1,
                });
            }

            if let Some(caps) = delete_re().captures(trimmed) {
                let name = caps[1].to_ascii_lowercase();
                let mut state = self.state.lock().expect("memory state lock");
                let table = state.tables.get_mut(&name).ok_or_else(|| {
                    AdapterError::from_sqlcode(-30, format!("Table '{}' not found", caps[1].to_ascii_uppercase()))
                })?;
                let count = table.rows.len() as u64;
                table.rows.clear();
                return Ok(ExecOutcome::Command {
                    verb: "DELETE".to_string(),
                    rows: count,
                });
            }

            if let Some(caps) = select_table_re().captures(trimmed) {
                let name = caps[2].to_ascii_lowercase();
                let state = self.state.lock().expect("memory state lock");
                let table = state.tables.get(&name).ok_or_else(|| {
                    AdapterError::from_sqlcode(-30, format!("Table '{}' not found", caps[2].to_ascii_uppercase()))
                })?;
                let selected: Vec<String> = if caps[1].trim() == "*" {
                    table.columns.clone()
                } else {
                    caps[1].split(',').map(|c| c.trim().to_string()).collect()
                };
                let indices: Vec<usize> = selected
                    .iter()
                    .map(|col| {
                        table
                            .columns
                            .iter()
                            .position(|c| c.eq_ignore_ascii_case(col))
                            .ok_or_else(|| {
                                AdapterError::from_sqlcode(
                                    -29,
                                    format!("Field '{}' not found", col),
                                )
                            })
                    })
                    .collect::<Result<_>>()?;
                let rows: Vec<Vec<PgValue>> = table
                    .rows
                    .iter()
                    .map(|row| {
                        indices
                            .iter()
                            .map(|&i| row.get(i).cloned().unwrap_or(PgValue::Null))
                            .collect()
                    })
                    .collect();
                // the in-process cursor reports names but no types, like the
                // IRIS result set surface it stands in for
                let columns = selected.into_iter().map(ColumnMeta::named).collect();
                return Ok(ExecOutcome::Rows(Box::new(MemoryStream {
                    columns,
                    rows: rows.into(),
                })));
            }

            if let Some(caps) = select_literals_re().captures(trimmed) {
                let values: Vec<PgValue> = caps[1]
                    .split(',')
                    .map(|lit| parse_literal(lit.trim()))
                    .collect();
                let columns = (1..=values.len())
                    .map(|i| ColumnMeta::named(format!("column{}", i)))
                    .collect();
                return Ok(ExecOutcome::Rows(Box::new(MemoryStream {
                    columns,
                    rows: vec![values].into(),
                })));
            }

            Err(AdapterError::from_sqlcode(
                -1,
                format!("memory backend cannot run: {}", trimmed),
            ))
        }

        async fn describe(&self, sql: &str) -> Result<Option<Vec<ColumnMeta>>> {
            let state = self.state.lock().expect("memory state lock");
            Ok(state.scripts.iter().find_map(|(needle, response)| {
                match response {
                    Scripted::Rows { columns, .. } if sql.contains(needle.as_str()) => {
                        Some(columns.clone())
                    }
                    _ => None,
                }
            }))
        }

        fn cancel(&self) {
            self.canceled.store(true, Ordering::SeqCst);
            self.cancel_notify.notify_one();
        }
    }

    fn parse_literal(lit: &str) -> PgValue {
        if let Some(stripped) = lit.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')) {
            return PgValue::Text(stripped.replace("''", "'"));
        }
        if let Ok(v) = lit.parse::<i64>() {
            return PgValue::Int(v);
        }
        if let Ok(v) = lit.parse::<f64>() {
            return PgValue::Float(v);
        }
        PgValue::Text(lit.to_string())
    }

    struct MemoryStream {
        columns: Vec<ColumnMeta>,
        rows: std::collections::VecDeque<Vec<PgValue>>,
    }

    #[async_trait]
    impl ResultStream for MemoryStream {
        fn columns(&self) -> Option<Vec<ColumnMeta>> {
            Some(self.columns.clone())
        }

        async fn next_row(&mut self) -> Result<Option<Vec<PgValue>>> {
            Ok(self.rows.pop_front())
        }
    }

    /// Factory producing one shared-state [`MemoryExecutor`] per session.
    /// All sessions see the same tables, like sessions of one database.
    pub struct MemoryExecutorFactory {
        state: Arc<Mutex<MemoryState>>,
    }

    impl Default for MemoryExecutorFactory {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MemoryExecutorFactory {
        /// Empty shared backend.
        pub fn new() -> Self {
            Self {
                state: Arc::new(Mutex::new(MemoryState::default())),
            }
        }

        /// Script a response on the shared state; every session sees it.
        pub fn script(&self, needle: impl Into<String>, response: Scripted) {
            self.state
                .lock()
                .expect("memory state lock")
                .scripts
                .push((needle.into(), response));
        }

        /// Create a table on the shared state.
        pub fn define_table(&self, name: &str, columns: &[&str]) {
            let mut state = self.state.lock().expect("memory state lock");
            state.tables.insert(
                name.to_ascii_lowercase(),
                TableData {
                    columns: columns.iter().map(|c| c.to_string()).collect(),
                    rows: Vec::new(),
                },
            );
        }

        /// Snapshot a table's rows.
        pub fn table_rows(&self, name: &str) -> Vec<Vec<PgValue>> {
            self.state
                .lock()
                .expect("memory state lock")
                .tables
                .get(&name.to_ascii_lowercase())
                .map(|t| t.rows.clone())
                .unwrap_or_default()
        }
    }

    #[async_trait]
    impl ExecutorFactory for MemoryExecutorFactory {
        async fn connect(&self, session: &BackendSession) -> Result<Arc<dyn Executor>> {
            debug!(
                "memory backend connection for user={} database={}",
                session.user, session.database
            );
            Ok(Arc::new(MemoryExecutor {
                state: Arc::clone(&self.state),
                canceled: AtomicBool::new(false),
                cancel_notify: Notify::new(),
            }))
        }
    }

}
