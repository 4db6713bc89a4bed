//! Per-connection session state machine
//!
//! Owns one client connection from the end of the startup frame to
//! disconnect: authentication, the ready loop, simple and extended query
//! protocols, the COPY subprotocol, cancellation and timeouts. One task per
//! session; nothing inside a session runs concurrently.

use crate::cancel::{CancelHook, CancelRegistry, RegisteredKey};
use crate::config::AdapterConfig;
use crate::copy::{encode_row, CopyDirection, CopyRowDecoder, CopySpec};
use crate::error::{to_pg_error, AdapterError, Result};
use crate::executor::{BackendSession, ColumnMeta, ExecOutcome, Executor, ExecutorFactory};
use crate::protocol::auth::{Authenticator, AUTH_TIMEOUT};
use crate::protocol::formatter::{MessageWriter, COPY_FLUSH_BYTES};
use crate::protocol::message::{BackendMessage, ErrorFields, FieldDescription, FrontendMessage};
use crate::protocol::parser::FrameReader;
use crate::protocol::statements::{Portal, PreparedStatement, SessionCaches};
use crate::protocol::transaction::TransactionTracker;
use crate::translate::show::{self, ShowContext};
use crate::translate::{translate, StatementClass, Translation, TranslationCache, TxVerb};
use crate::types::{self, oid, PgValue};
use bytes::{Bytes, BytesMut};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::watch;
use tokio::time::timeout;

/// Collaborators injected into every session. All shared state the engine
/// touches across sessions flows through here, which keeps it substitutable
/// in tests.
#[derive(Clone)]
pub struct SessionContext {
    /// Process configuration
    pub config: Arc<AdapterConfig>,
    /// Authentication strategy
    pub authenticator: Arc<Authenticator>,
    /// Backend connection factory
    pub factory: Arc<dyn ExecutorFactory>,
    /// Process-wide cancel registry
    pub cancel_registry: Arc<CancelRegistry>,
    /// Process-wide translation cache
    pub translation_cache: Arc<TranslationCache>,
}

/// Per-session counters, logged at disconnect.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Messages read from the client
    pub messages_received: usize,
    /// Statements executed
    pub queries_executed: usize,
    /// Data rows sent
    pub rows_returned: u64,
    /// Rows ingested through COPY
    pub rows_copied: u64,
}

/// Run a fully started session: `stream` is positioned right after the
/// startup frame, whose parameters are in `params`. Returns when the client
/// disconnects or a fatal error closes the connection.
pub async fn run_session<S>(
    stream: S,
    params: HashMap<String, String>,
    cert_hash: Option<Vec<u8>>,
    ctx: SessionContext,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let mut session = Session {
        reader: FrameReader::with_max_frame_bytes(read_half, ctx.config.max_frame_bytes),
        writer: MessageWriter::new(write_half),
        ctx,
        params,
        cert_hash,
        caches: SessionCaches::new(),
        tx: TransactionTracker::new(),
        executor: None,
        cancel_hook: None,
        registered_key: None,
        ignore_until_sync: false,
        stats: ConnectionStats::default(),
        started: Instant::now(),
    };

    let result = session.run(&mut shutdown).await;

    // best-effort single error before a fatal close
    if let Err(err) = &result {
        if !matches!(err, AdapterError::ConnectionClosed) {
            let (code, message) = to_pg_error(err);
            let _ = session
                .writer
                .send(&BackendMessage::ErrorResponse(ErrorFields::fatal(
                    code, message,
                )))
                .await;
        }
    }
    let _ = session.writer.flush().await;

    info!(
        "session closed after {:?}: {} messages, {} queries, {} rows out, {} rows copied",
        session.started.elapsed(),
        session.stats.messages_received,
        session.stats.queries_executed,
        session.stats.rows_returned,
        session.stats.rows_copied,
    );

    match result {
        Err(AdapterError::ConnectionClosed) => Ok(()),
        other => other,
    }
}

struct Session<S: AsyncRead + AsyncWrite + Unpin + Send> {
    reader: FrameReader<ReadHalf<S>>,
    writer: MessageWriter<WriteHalf<S>>,
    ctx: SessionContext,
    params: HashMap<String, String>,
    cert_hash: Option<Vec<u8>>,
    caches: SessionCaches,
    tx: TransactionTracker,
    executor: Option<Arc<dyn Executor>>,
    // keeps the cancel hook alive; the registry only holds a Weak
    cancel_hook: Option<Arc<CancelHook>>,
    registered_key: Option<RegisteredKey>,
    ignore_until_sync: bool,
    stats: ConnectionStats,
    started: Instant,
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> Session<S> {
    fn param(&self, key: &str) -> &str {
        self.params.get(key).map(String::as_str).unwrap_or("")
    }

    fn show_context(&self) -> ShowContext {
        ShowContext {
            server_version: self.ctx.config.server_version.clone(),
            timezone: self.ctx.config.effective_timezone(),
            application_name: self.param("application_name").to_string(),
        }
    }

    fn executor(&self) -> Result<Arc<dyn Executor>> {
        self.executor
            .clone()
            .ok_or_else(|| AdapterError::Internal("no backend connection".to_string()))
    }

    async fn run(&mut self, shutdown: &mut watch::Receiver<bool>) -> Result<()> {
        self.authenticate().await?;
        self.connect_backend().await?;
        self.announce().await?;

        loop {
            let message = tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    self.writer
                        .send(&BackendMessage::ErrorResponse(ErrorFields::fatal(
                            "57P01",
                            "terminating connection due to administrator command",
                        )))
                        .await?;
                    return Ok(());
                }
                message = self.read_with_idle_timeout() => message?,
            };
            self.stats.messages_received += 1;

            if self.ignore_until_sync
                && !matches!(message, FrontendMessage::Sync | FrontendMessage::Terminate)
            {
                debug!("skipping {} until Sync", message.name());
                continue;
            }

            match message {
                FrontendMessage::Query(sql) => self.handle_simple_query(&sql).await?,

                FrontendMessage::Parse {
                    name,
                    query,
                    param_types,
                } => {
                    if let Err(err) = self.handle_parse(name, query, param_types).await {
                        self.statement_error(err, true).await?;
                    }
                }
                FrontendMessage::Bind {
                    portal,
                    statement,
                    param_formats,
                    param_values,
                    result_formats,
                } => {
                    if let Err(err) = self
                        .handle_bind(portal, statement, param_formats, param_values, result_formats)
                        .await
                    {
                        self.statement_error(err, true).await?;
                    }
                }
                FrontendMessage::Describe { object_type, name } => {
                    if let Err(err) = self.handle_describe(object_type, &name).await {
                        self.statement_error(err, true).await?;
                    }
                }
                FrontendMessage::Execute { portal, max_rows } => {
                    if let Err(err) = self.handle_execute(&portal, max_rows).await {
                        self.statement_error(err, true).await?;
                    }
                }
                FrontendMessage::Close { object_type, name } => {
                    match object_type {
                        b'S' => self.caches.close_statement(&name),
                        b'P' => self.caches.close_portal(&name),
                        other => {
                            self.statement_error(
                                AdapterError::Protocol(format!(
                                    "invalid close type {}",
                                    other as char
                                )),
                                true,
                            )
                            .await?;
                            continue;
                        }
                    }
                    self.writer.queue(&BackendMessage::CloseComplete);
                }
                FrontendMessage::Flush => self.writer.flush().await?,
                FrontendMessage::Sync => {
                    self.ignore_until_sync = false;
                    self.ready_for_query().await?;
                }
                FrontendMessage::Terminate => {
                    debug!("client sent Terminate");
                    return Ok(());
                }

                // Stray COPY frames arrive after an error aborted a COPY;
                // discard them like a real server does.
                FrontendMessage::CopyData(_)
                | FrontendMessage::CopyDone
                | FrontendMessage::CopyFail(_) => {
                    debug!("discarding COPY frame outside COPY mode");
                }

                FrontendMessage::AuthResponse(_) => {
                    return Err(AdapterError::Protocol(
                        "unexpected authentication message".to_string(),
                    ))
                }
                FrontendMessage::Unknown { tag, .. } => {
                    return Err(AdapterError::Protocol(format!(
                        "unknown message type '{}'",
                        tag as char
                    )))
                }
            }
        }
    }

    async fn read_with_idle_timeout(&mut self) -> Result<FrontendMessage> {
        match self.ctx.config.idle_timeout() {
            Some(limit) if !self.tx.in_transaction() => {
                match timeout(limit, self.reader.read_message()).await {
                    Ok(result) => result,
                    Err(_) => {
                        self.writer
                            .send(&BackendMessage::ErrorResponse(ErrorFields::fatal(
                                "57P05",
                                "terminating connection due to idle-session timeout",
                            )))
                            .await?;
                        Err(AdapterError::ConnectionClosed)
                    }
                }
            }
            _ => self.reader.read_message().await,
        }
    }

    // ---- startup -----------------------------------------------------

    async fn authenticate(&mut self) -> Result<()> {
        let user = self.param("user").to_string();
        if user.is_empty() {
            return Err(AdapterError::Protocol(
                "startup packet carries no user".to_string(),
            ));
        }

        let deadline = tokio::time::Instant::now() + AUTH_TIMEOUT;
        let (mut exchange, messages) =
            self.ctx.authenticator.begin(&user, self.cert_hash.clone());
        for message in &messages {
            self.writer.send(message).await?;
        }

        while !exchange.is_complete() {
            let message = tokio::time::timeout_at(deadline, self.reader.read_message())
                .await
                .map_err(|_| AdapterError::Auth("authentication timeout".to_string()))??;

            let payload = match message {
                FrontendMessage::AuthResponse(payload) => payload,
                FrontendMessage::Terminate => return Err(AdapterError::ConnectionClosed),
                other => {
                    return Err(AdapterError::Protocol(format!(
                        "unexpected {} during authentication",
                        other.name()
                    )))
                }
            };

            let step = exchange.respond(&payload)?;
            for message in &step.messages {
                self.writer.send(message).await?;
            }
        }

        if let Some(token) = exchange.token.take() {
            self.params.insert("_backend_token".to_string(), token);
        }
        debug!("user {} authenticated", user);
        Ok(())
    }

    async fn connect_backend(&mut self) -> Result<()> {
        let backend_session = BackendSession {
            user: self.param("user").to_string(),
            database: {
                let db = self.param("database");
                if db.is_empty() { self.param("user") } else { db }.to_string()
            },
            token: self.params.remove("_backend_token"),
        };
        let executor = self.ctx.factory.connect(&backend_session).await?;
        match executor.health().await {
            crate::executor::Health::Ok => {}
            crate::executor::Health::Degraded => {
                warn!("backend for {} reports degraded health", backend_session.user)
            }
            crate::executor::Health::Failed => {
                return Err(AdapterError::Backend {
                    sqlstate: Some("08001"),
                    message: "backend is unavailable".to_string(),
                })
            }
        }

        // hook for out-of-band cancellation; registry gets only a Weak
        let cancel_target = Arc::clone(&executor);
        let hook: Arc<CancelHook> = Arc::new(move || cancel_target.cancel());
        let registered = RegisteredKey::new(
            Arc::clone(&self.ctx.cancel_registry),
            Arc::downgrade(&hook),
        );
        self.cancel_hook = Some(hook);
        self.executor = Some(executor);
        self.registered_key = Some(registered);
        Ok(())
    }

    async fn announce(&mut self) -> Result<()> {
        let ctx = self.show_context();
        let statuses = [
            ("server_version", ctx.server_version.clone()),
            ("server_encoding", "UTF8".to_string()),
            ("client_encoding", "UTF8".to_string()),
            ("DateStyle", "ISO, MDY".to_string()),
            ("integer_datetimes", "on".to_string()),
            ("standard_conforming_strings", "on".to_string()),
            ("TimeZone", ctx.timezone.clone()),
            ("application_name", ctx.application_name.clone()),
        ];
        for (name, value) in statuses {
            self.writer.queue(&BackendMessage::ParameterStatus {
                name: name.to_string(),
                value,
            });
        }

        let key = self
            .registered_key
            .as_ref()
            .map(|r| r.key)
            .ok_or_else(|| AdapterError::Internal("backend key not registered".to_string()))?;
        self.writer.queue(&BackendMessage::BackendKeyData {
            process_id: key.process_id,
            secret_key: key.secret_key,
        });
        self.ready_for_query().await
    }

    async fn ready_for_query(&mut self) -> Result<()> {
        self.writer
            .send(&BackendMessage::ReadyForQuery(self.tx.status()))
            .await
    }

    // ---- error plumbing ----------------------------------------------

    /// Emit a statement-level ErrorResponse. Fatal errors propagate instead.
    /// In the extended protocol (`extended` = true) the session then skips
    /// messages until Sync.
    async fn statement_error(&mut self, err: AdapterError, extended: bool) -> Result<()> {
        if err.is_fatal() {
            return Err(err);
        }
        warn!("statement failed: {}", err);
        self.tx.observe_error();
        let (code, message) = to_pg_error(&err);
        let mut fields = ErrorFields::error(code, message);
        match &err {
            AdapterError::Timeout => fields = fields.with_detail("timeout"),
            // COPY row failures carry their 1-based line number in the detail
            AdapterError::InvalidText(msg) if msg.starts_with("row ") => {
                fields = fields.with_detail(msg.clone());
            }
            _ => {}
        }
        self.writer
            .send(&BackendMessage::ErrorResponse(fields))
            .await?;
        if extended {
            self.ignore_until_sync = true;
        }
        Ok(())
    }

    // ---- simple query ------------------------------------------------

    async fn handle_simple_query(&mut self, sql: &str) -> Result<()> {
        if self.ctx.config.log_queries {
            debug!("simple query: {}", sql);
        }

        let statements = split_statements(sql)?;
        if statements.is_empty() {
            self.writer.queue(&BackendMessage::EmptyQueryResponse);
            return self.ready_for_query().await;
        }

        for statement in statements {
            self.stats.queries_executed += 1;
            if let Err(err) = self.run_simple_statement(&statement).await {
                // an error aborts the remainder of the query string
                self.statement_error(err, false).await?;
                break;
            }
        }
        self.ready_for_query().await
    }

    async fn run_simple_statement(&mut self, sql: &str) -> Result<()> {
        let translation = translate(sql, &self.ctx.translation_cache)?;

        match &translation.class {
            StatementClass::Empty => {
                self.writer.queue(&BackendMessage::EmptyQueryResponse);
                Ok(())
            }
            StatementClass::Copy(spec) => {
                let spec = spec.clone();
                self.run_copy(spec).await
            }
            _ => {
                // Parse + Bind + Execute over the unnamed statement/portal,
                // with the row description emitted inline
                self.execute_portal_like(&translation, Vec::new(), Vec::new(), 0, true, None)
                    .await?;
                Ok(())
            }
        }
    }

    // ---- extended query ----------------------------------------------

    async fn handle_parse(
        &mut self,
        name: String,
        query: String,
        param_types: Vec<i32>,
    ) -> Result<()> {
        if self.ctx.config.log_queries {
            debug!("parse {:?}: {}", name, query);
        }
        let translation = translate(&query, &self.ctx.translation_cache)?;
        self.caches.store_statement(PreparedStatement {
            name,
            original_sql: query,
            translation,
            param_types,
        })?;
        self.writer.queue(&BackendMessage::ParseComplete);
        Ok(())
    }

    async fn handle_bind(
        &mut self,
        portal: String,
        statement: String,
        param_formats: Vec<i16>,
        param_values: Vec<Option<Bytes>>,
        result_formats: Vec<i16>,
    ) -> Result<()> {
        let stmt = self.caches.statement(&statement)?;

        let expected = stmt.translation.param_count;
        if param_values.len() != expected {
            // recoverable at the statement boundary, unlike a malformed frame
            return Err(AdapterError::Backend {
                sqlstate: Some("08P01"),
                message: format!(
                    "bind message supplies {} parameters, but prepared statement \"{}\" requires {}",
                    param_values.len(),
                    statement,
                    expected
                ),
            });
        }

        let mut params = Vec::with_capacity(param_values.len());
        for (i, raw) in param_values.iter().enumerate() {
            let format = match param_formats.len() {
                0 => 0,
                1 => param_formats[0],
                _ => param_formats.get(i).copied().unwrap_or(0),
            };
            let declared = stmt.param_types.get(i).copied().unwrap_or(0);
            let type_oid = if declared == 0 { oid::UNKNOWN } else { declared };
            params.push(types::decode_parameter(raw.as_ref(), type_oid, format)?);
        }

        self.caches.store_portal(Portal {
            name: portal,
            statement,
            params,
            result_formats,
            columns: None,
            stream: None,
            rows_emitted: 0,
        })?;
        self.writer.queue(&BackendMessage::BindComplete);
        Ok(())
    }

    async fn handle_describe(&mut self, object_type: u8, name: &str) -> Result<()> {
        match object_type {
            b'S' => {
                let stmt = self.caches.statement(name)?;
                self.writer.queue(&BackendMessage::ParameterDescription(
                    stmt.describe_param_oids(),
                ));
                match self.describe_columns(&stmt.translation, &[]).await? {
                    Some(fields) => self.writer.queue(&BackendMessage::RowDescription(fields)),
                    None => self.writer.queue(&BackendMessage::NoData),
                }
            }
            b'P' => {
                // tolerate Describe of the unnamed portal before any Bind,
                // like a real server
                if name.is_empty() && self.caches.portal(name).is_err() {
                    self.writer.queue(&BackendMessage::NoData);
                    return Ok(());
                }
                let (translation, formats, cached) = {
                    let portal = self.caches.portal(name)?;
                    let stmt = self.caches.statement(&portal.statement)?;
                    (
                        Arc::clone(&stmt.translation),
                        portal.result_formats.clone(),
                        portal.columns.clone(),
                    )
                };
                let fields = match cached {
                    Some(fields) => Some(fields),
                    None => self.describe_columns(&translation, &formats).await?,
                };
                match fields {
                    Some(fields) => self.writer.queue(&BackendMessage::RowDescription(fields)),
                    None => self.writer.queue(&BackendMessage::NoData),
                }
            }
            other => {
                return Err(AdapterError::Protocol(format!(
                    "invalid describe type {}",
                    other as char
                )))
            }
        }
        Ok(())
    }

    /// Row description before execution: backend metadata when available,
    /// translator advice otherwise.
    async fn describe_columns(
        &self,
        translation: &Translation,
        result_formats: &[i16],
    ) -> Result<Option<Vec<FieldDescription>>> {
        let format_for = |index: usize| -> i16 {
            match result_formats.len() {
                0 => 0,
                1 => result_formats[0],
                _ => result_formats.get(index).copied().unwrap_or(0),
            }
        };

        match &translation.class {
            StatementClass::Show(param) => {
                let ctx = self.show_context();
                let name = show::show_value(param, &ctx)
                    .map(|(column, _)| column)
                    .unwrap_or_else(|| "setting".to_string());
                Ok(Some(vec![FieldDescription::synthetic(
                    name,
                    oid::TEXT,
                    format_for(0),
                )]))
            }
            StatementClass::CatalogShim => {
                let ctx = self.show_context();
                let shim = show::classify_shim(&translation.sql, &ctx)
                    .ok_or_else(|| AdapterError::Internal("shim vanished".to_string()))?;
                Ok(Some(
                    shim.columns
                        .iter()
                        .enumerate()
                        .map(|(i, (name, type_oid))| {
                            FieldDescription::synthetic(name.clone(), *type_oid, format_for(i))
                        })
                        .collect(),
                ))
            }
            StatementClass::Query if translation.expects_rows => {
                if let Some(meta) = self.executor()?.describe(&translation.sql).await? {
                    let fields = meta
                        .iter()
                        .enumerate()
                        .map(|(i, column)| {
                            FieldDescription::synthetic(
                                column.name.clone(),
                                column.type_oid.unwrap_or(oid::TEXT),
                                format_for(i),
                            )
                        })
                        .collect();
                    return Ok(Some(fields));
                }
                if translation.column_names.is_empty() {
                    return Ok(None);
                }
                let fields = translation
                    .column_names
                    .iter()
                    .enumerate()
                    .map(|(i, name)| {
                        let hint = translation.column_hints.get(i).copied().unwrap_or(0);
                        let type_oid = if hint == 0 { oid::TEXT } else { hint };
                        FieldDescription::synthetic(name.clone(), type_oid, format_for(i))
                    })
                    .collect();
                Ok(Some(fields))
            }
            _ => Ok(None),
        }
    }

    async fn handle_execute(&mut self, portal_name: &str, max_rows: i32) -> Result<()> {
        self.stats.queries_executed += 1;
        let mut portal = self.caches.take_portal(portal_name)?;

        let result = if portal.stream.is_some() {
            // resume a suspended cursor
            match self.stream_portal_rows(&mut portal, max_rows).await {
                Ok(true) => Ok(true),
                Ok(false) => {
                    self.writer.queue(&BackendMessage::CommandComplete(format!(
                        "SELECT {}",
                        portal.rows_emitted
                    )));
                    Ok(false)
                }
                Err(err) => Err(err),
            }
        } else {
            match self.caches.statement(&portal.statement) {
                Ok(stmt) => {
                    let translation = Arc::clone(&stmt.translation);
                    let params = portal.params.clone();
                    let formats = portal.result_formats.clone();
                    self.execute_portal_like(
                        &translation,
                        params,
                        formats,
                        max_rows,
                        false,
                        Some(&mut portal),
                    )
                    .await
                }
                // bound statement was closed out from under the portal
                Err(err) => Err(err),
            }
        };

        match result {
            Ok(true) => {
                self.caches.restore_portal(portal);
                self.writer.queue(&BackendMessage::PortalSuspended);
                Ok(())
            }
            Ok(false) => {
                portal.stream = None;
                self.caches.restore_portal(portal);
                Ok(())
            }
            Err(err) => {
                portal.stream = None;
                self.caches.restore_portal(portal);
                Err(err)
            }
        }
    }

    // ---- shared execution core ---------------------------------------

    /// Execute one classified statement, queueing every response message
    /// it produces (including CommandComplete). Returns whether the portal
    /// was left suspended, which only happens for row-producing statements
    /// in the extended protocol.
    #[allow(clippy::too_many_arguments)]
    async fn execute_portal_like(
        &mut self,
        translation: &Arc<Translation>,
        params: Vec<PgValue>,
        result_formats: Vec<i16>,
        max_rows: i32,
        emit_row_description: bool,
        mut portal: Option<&mut Portal>,
    ) -> Result<bool> {
        match &translation.class {
            StatementClass::Empty => {
                self.writer.queue(&BackendMessage::EmptyQueryResponse);
                Ok(false)
            }

            StatementClass::Set => {
                self.writer
                    .queue(&BackendMessage::CommandComplete("SET".to_string()));
                Ok(false)
            }

            StatementClass::Show(param) => {
                let ctx = self.show_context();
                let Some((column, value)) = show::show_value(param, &ctx) else {
                    return Err(AdapterError::Backend {
                        sqlstate: Some("42704"),
                        message: format!("unrecognized configuration parameter \"{}\"", param),
                    });
                };
                if emit_row_description {
                    self.writer.queue(&BackendMessage::RowDescription(vec![
                        FieldDescription::synthetic(column, oid::TEXT, 0),
                    ]));
                }
                self.writer.queue(&BackendMessage::DataRow(vec![Some(
                    Bytes::from(value),
                )]));
                self.writer
                    .queue(&BackendMessage::CommandComplete("SHOW".to_string()));
                if let Some(portal) = portal.as_deref_mut() {
                    portal.rows_emitted += 1;
                }
                self.stats.rows_returned += 1;
                Ok(false)
            }

            StatementClass::CatalogShim => {
                let ctx = self.show_context();
                let shim = show::classify_shim(&translation.sql, &ctx)
                    .ok_or_else(|| AdapterError::Internal("shim vanished".to_string()))?;
                if emit_row_description {
                    let fields = shim
                        .columns
                        .iter()
                        .map(|(name, type_oid)| {
                            FieldDescription::synthetic(name.clone(), *type_oid, 0)
                        })
                        .collect();
                    self.writer.queue(&BackendMessage::RowDescription(fields));
                }
                let row_count = shim.rows.len() as u64;
                for row in shim.rows {
                    let values = row
                        .into_iter()
                        .map(|field| field.map(Bytes::from))
                        .collect();
                    self.writer.queue(&BackendMessage::DataRow(values));
                }
                self.writer
                    .queue(&BackendMessage::CommandComplete(shim.tag));
                if let Some(portal) = portal.as_deref_mut() {
                    portal.rows_emitted += row_count;
                }
                self.stats.rows_returned += row_count;
                Ok(false)
            }

            StatementClass::Tx(verb) => {
                let verb = *verb;
                match verb {
                    TxVerb::Commit | TxVerb::Rollback if !self.tx.in_transaction() => {
                        self.writer.queue(&BackendMessage::NoticeResponse(
                            ErrorFields::notice("there is no transaction in progress"),
                        ));
                        self.writer.queue(&BackendMessage::CommandComplete(
                            match verb {
                                TxVerb::Commit => "COMMIT",
                                _ => "ROLLBACK",
                            }
                            .to_string(),
                        ));
                        return Ok(false);
                    }
                    _ => {}
                }
                self.run_executor(&translation.sql, &[]).await?;
                self.tx.observe(verb);
                if !self.tx.in_transaction() {
                    self.caches.clear_portals();
                }
                let tag = match verb {
                    TxVerb::Begin => "BEGIN",
                    TxVerb::Commit => "COMMIT",
                    TxVerb::Rollback => "ROLLBACK",
                };
                self.writer
                    .queue(&BackendMessage::CommandComplete(tag.to_string()));
                Ok(false)
            }

            StatementClass::Copy(spec) => {
                let spec = spec.clone();
                self.run_copy(spec).await?;
                Ok(false)
            }

            StatementClass::Query => {
                if translation.l2_unsupported {
                    return Err(AdapterError::Unsupported(
                        "L2 distance operator <-> is not available on IRIS; use <=> or <#>"
                            .to_string(),
                    ));
                }
                if self.tx.is_failed() {
                    return Err(AdapterError::Backend {
                        sqlstate: Some("25P02"),
                        message:
                            "current transaction is aborted, commands ignored until end of transaction block"
                                .to_string(),
                    });
                }

                let outcome = self.run_executor(&translation.sql, &params).await?;
                match outcome {
                    ExecOutcome::Command { verb, rows } => {
                        self.writer
                            .queue(&BackendMessage::CommandComplete(command_tag(&verb, rows)));
                        Ok(false)
                    }
                    ExecOutcome::Rows(mut stream) => {
                        // first row drives type inference when the backend
                        // reports no column types
                        let first_row = stream.next_row().await?.map(normalize_row);
                        let fields = build_row_description(
                            stream.columns(),
                            translation,
                            first_row.as_deref(),
                            &result_formats,
                        );

                        if emit_row_description {
                            self.writer
                                .queue(&BackendMessage::RowDescription(fields.clone()));
                        }

                        match portal.as_deref_mut() {
                            Some(portal) => {
                                portal.columns = Some(fields.clone());
                                portal.stream = Some(stream);
                                let mut remaining = max_rows;
                                if let Some(row) = first_row {
                                    let emitted = self.emit_row(&row, &fields)?;
                                    portal.rows_emitted += emitted;
                                    if max_rows > 0 {
                                        remaining = max_rows - 1;
                                        if remaining == 0 {
                                            return Ok(true);
                                        }
                                    }
                                }
                                let suspended = self.stream_portal_rows(portal, remaining).await?;
                                if !suspended {
                                    self.writer.queue(&BackendMessage::CommandComplete(
                                        format!("SELECT {}", portal.rows_emitted),
                                    ));
                                }
                                Ok(suspended)
                            }
                            None => {
                                // simple query: stream everything inline
                                let mut count = 0u64;
                                if let Some(row) = first_row {
                                    count += self.emit_row(&row, &fields)?;
                                }
                                loop {
                                    match stream.next_row().await? {
                                        Some(row) => {
                                            count += self.emit_row(&normalize_row(row), &fields)?;
                                        }
                                        None => break,
                                    }
                                }
                                self.writer.queue(&BackendMessage::CommandComplete(format!(
                                    "SELECT {}",
                                    count
                                )));
                                Ok(false)
                            }
                        }
                    }
                }
            }
        }
    }

    /// Pull rows from a portal's live stream, respecting max_rows. Returns
    /// whether the cursor was left suspended.
    async fn stream_portal_rows(
        &mut self,
        portal: &mut Portal,
        max_rows: i32,
    ) -> Result<bool> {
        let fields = portal
            .columns
            .clone()
            .ok_or_else(|| AdapterError::Internal("portal has no row description".to_string()))?;
        let emitted_before = portal.rows_emitted;
        let limit = if max_rows > 0 {
            Some(emitted_before + max_rows as u64)
        } else {
            None
        };

        let Some(stream) = portal.stream.as_mut() else {
            return Ok(false);
        };

        loop {
            if let Some(limit) = limit {
                if portal.rows_emitted >= limit {
                    return Ok(true);
                }
            }
            match stream.next_row().await? {
                Some(row) => {
                    let row = normalize_row(row);
                    let values: Result<Vec<Option<Bytes>>> = fields
                        .iter()
                        .enumerate()
                        .map(|(i, field)| {
                            let value = row.get(i).unwrap_or(&PgValue::Null);
                            types::encode_value(value, field.data_type_oid, field.format_code)
                        })
                        .collect();
                    self.writer.queue(&BackendMessage::DataRow(values?));
                    portal.rows_emitted += 1;
                    self.stats.rows_returned += 1;
                }
                None => return Ok(false),
            }
        }
    }

    fn emit_row(&mut self, row: &[PgValue], fields: &[FieldDescription]) -> Result<u64> {
        let values: Result<Vec<Option<Bytes>>> = fields
            .iter()
            .enumerate()
            .map(|(i, field)| {
                let value = row.get(i).unwrap_or(&PgValue::Null);
                types::encode_value(value, field.data_type_oid, field.format_code)
            })
            .collect();
        self.writer.queue(&BackendMessage::DataRow(values?));
        self.stats.rows_returned += 1;
        Ok(1)
    }

    /// Run the executor under the statement timeout.
    async fn run_executor(&mut self, sql: &str, params: &[PgValue]) -> Result<ExecOutcome> {
        let executor = self.executor()?;
        match self.ctx.config.statement_timeout() {
            Some(limit) => match timeout(limit, executor.execute(sql, params)).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    executor.cancel();
                    Err(AdapterError::Timeout)
                }
            },
            None => executor.execute(sql, params).await,
        }
    }

    // ---- COPY subprotocol --------------------------------------------

    async fn run_copy(&mut self, spec: CopySpec) -> Result<()> {
        match spec.direction {
            CopyDirection::FromStdin => self.run_copy_in(spec).await,
            CopyDirection::ToStdout => self.run_copy_out(spec).await,
        }
    }

    async fn run_copy_in(&mut self, spec: CopySpec) -> Result<()> {
        if spec.columns.is_empty() {
            return Err(AdapterError::Unsupported(
                "COPY FROM STDIN requires an explicit column list".to_string(),
            ));
        }

        let column_count = spec.column_count();
        self.writer
            .send(&BackendMessage::CopyInResponse {
                format: 0,
                column_formats: vec![0; column_count],
            })
            .await?;

        let insert_sql = spec.insert_sql();
        let batch_cap = self.ctx.config.copy_batch_rows.max(1);
        let mut decoder = CopyRowDecoder::new(spec);
        let mut batch: Vec<Vec<PgValue>> = Vec::with_capacity(batch_cap);
        let mut total: u64 = 0;

        loop {
            let message = self.reader.read_message().await?;
            self.stats.messages_received += 1;
            match message {
                FrontendMessage::CopyData(data) => {
                    decoder.feed(&data);
                    self.drain_copy_rows(&mut decoder, column_count, &mut batch)?;
                    if batch.len() >= batch_cap {
                        total += self.flush_copy_batch(&insert_sql, &mut batch).await?;
                    }
                }
                FrontendMessage::CopyDone => {
                    decoder.finish();
                    self.drain_copy_rows(&mut decoder, column_count, &mut batch)?;
                    total += self.flush_copy_batch(&insert_sql, &mut batch).await?;
                    self.stats.rows_copied += total;
                    self.writer
                        .queue(&BackendMessage::CommandComplete(format!("COPY {}", total)));
                    return Ok(());
                }
                FrontendMessage::CopyFail(reason) => {
                    // batches already landed stay landed unless the client
                    // wrapped the COPY in an explicit transaction
                    return Err(AdapterError::Backend {
                        sqlstate: Some("57014"),
                        message: format!("COPY from stdin failed: {}", reason),
                    });
                }
                FrontendMessage::Flush | FrontendMessage::Sync => {
                    // legal but meaningless mid-COPY
                }
                FrontendMessage::Terminate => return Err(AdapterError::ConnectionClosed),
                other => {
                    return Err(AdapterError::Protocol(format!(
                        "unexpected {} during COPY FROM STDIN",
                        other.name()
                    )))
                }
            }
        }
    }

    fn drain_copy_rows(
        &mut self,
        decoder: &mut CopyRowDecoder,
        column_count: usize,
        batch: &mut Vec<Vec<PgValue>>,
    ) -> Result<()> {
        while let Some((line, fields)) = decoder.next_record()? {
            if fields.len() != column_count {
                return Err(crate::copy::copy_row_error(
                    line,
                    format!("expected {} columns, found {}", column_count, fields.len()),
                ));
            }
            let row = fields
                .into_iter()
                .map(|field| match field {
                    None => PgValue::Null,
                    Some(text) => PgValue::Text(text),
                })
                .collect();
            batch.push(row);
        }
        Ok(())
    }

    async fn flush_copy_batch(
        &mut self,
        insert_sql: &str,
        batch: &mut Vec<Vec<PgValue>>,
    ) -> Result<u64> {
        if batch.is_empty() {
            return Ok(0);
        }
        let rows: Vec<Vec<PgValue>> = std::mem::take(batch);
        let executor = self.executor()?;
        if executor.supports_batch() {
            executor.execute_batch(insert_sql, rows).await
        } else {
            let mut landed = 0;
            for params in rows {
                match executor.execute(insert_sql, &params).await? {
                    ExecOutcome::Command { rows, .. } => landed += rows,
                    ExecOutcome::Rows(_) => {}
                }
            }
            Ok(landed)
        }
    }

    async fn run_copy_out(&mut self, spec: CopySpec) -> Result<()> {
        let outcome = self.run_executor(&spec.select_sql(), &[]).await?;
        let mut stream = match outcome {
            ExecOutcome::Rows(stream) => stream,
            ExecOutcome::Command { .. } => {
                return Err(AdapterError::Internal(
                    "COPY TO STDOUT produced no result set".to_string(),
                ))
            }
        };

        let column_count = if spec.columns.is_empty() {
            stream.columns().map(|meta| meta.len()).unwrap_or(0)
        } else {
            spec.column_count()
        };
        self.writer
            .send(&BackendMessage::CopyOutResponse {
                format: 0,
                column_formats: vec![0; column_count],
            })
            .await?;

        let mut chunk = BytesMut::with_capacity(COPY_FLUSH_BYTES);
        if spec.header {
            let names: Vec<String> = if spec.columns.is_empty() {
                stream
                    .columns()
                    .map(|meta| meta.into_iter().map(|c| c.name).collect())
                    .unwrap_or_default()
            } else {
                spec.columns.clone()
            };
            let header = names.join(std::str::from_utf8(&[spec.delimiter]).unwrap_or(","));
            chunk.extend_from_slice(header.as_bytes());
            chunk.extend_from_slice(b"\n");
        }

        let mut total: u64 = 0;
        loop {
            let row = stream.next_row().await?;
            match row {
                Some(row) => {
                    let row = normalize_row(row);
                    chunk.extend_from_slice(&encode_row(&spec, &row));
                    total += 1;
                    if chunk.len() >= COPY_FLUSH_BYTES {
                        self.writer
                            .send(&BackendMessage::CopyData(chunk.split().freeze()))
                            .await?;
                    }
                }
                None => break,
            }
        }
        if !chunk.is_empty() {
            self.writer
                .send(&BackendMessage::CopyData(chunk.freeze()))
                .await?;
        }
        self.writer.send(&BackendMessage::CopyDone).await?;
        self.writer
            .queue(&BackendMessage::CommandComplete(format!("COPY {}", total)));
        self.stats.rows_returned += total;
        Ok(())
    }
}

/// Normalize a backend row: the IRIS result surface reports NULL as an
/// empty string or an object-reference token.
fn normalize_row(row: Vec<PgValue>) -> Vec<PgValue> {
    row.into_iter().map(types::normalize_iris_null).collect()
}

/// Build the RowDescription for a result set, in priority order: backend
/// metadata, translator advice, first-row inference, generic columnN.
fn build_row_description(
    meta: Option<Vec<ColumnMeta>>,
    translation: &Translation,
    first_row: Option<&[PgValue]>,
    result_formats: &[i16],
) -> Vec<FieldDescription> {
    let column_count = meta
        .as_ref()
        .map(|m| m.len())
        .or_else(|| first_row.map(<[PgValue]>::len))
        .unwrap_or(translation.column_names.len());

    let format_for = |index: usize| -> i16 {
        match result_formats.len() {
            0 => 0,
            1 => result_formats[0],
            _ => result_formats.get(index).copied().unwrap_or(0),
        }
    };

    (0..column_count)
        .map(|i| {
            let meta_column = meta.as_ref().and_then(|m| m.get(i));
            // advice beats the backend's generic names, backend names beat
            // columnN
            let name = translation
                .column_names
                .get(i)
                .cloned()
                .or_else(|| meta_column.map(|c| c.name.clone()))
                .unwrap_or_else(|| format!("column{}", i + 1));
            let type_oid = meta_column
                .and_then(|c| c.type_oid)
                .or_else(|| {
                    translation
                        .column_hints
                        .get(i)
                        .copied()
                        .filter(|&hint| hint != 0)
                })
                .or_else(|| {
                    first_row
                        .and_then(|row| row.get(i))
                        .filter(|v| !v.is_null())
                        .map(types::infer_oid)
                })
                .unwrap_or(oid::TEXT);
            FieldDescription::synthetic(name, type_oid, format_for(i))
        })
        .collect()
}

/// CommandComplete tag text for a command outcome.
fn command_tag(verb: &str, rows: u64) -> String {
    match verb {
        "BEGIN" | "COMMIT" | "ROLLBACK" | "SET" | "CREATE TABLE" | "DROP TABLE"
        | "CREATE INDEX" | "ALTER TABLE" | "TRUNCATE" => verb.to_string(),
        _ => format!("{} {}", verb, rows),
    }
}

/// Split a simple-Query string into statements at top-level semicolons,
/// honoring string literals, quoted identifiers and comments. Empty
/// fragments are dropped.
pub fn split_statements(sql: &str) -> Result<Vec<String>> {
    use crate::translate::lexer::{tokenize, TokenKind};

    let tokens = tokenize(sql)?;
    let mut statements = Vec::new();
    let mut start = 0usize;

    for token in &tokens {
        if token.kind == TokenKind::Op && token.text(sql) == ";" {
            let fragment = sql[start..token.start].trim();
            if !fragment.is_empty() {
                statements.push(fragment.to_string());
            }
            start = token.end;
        }
    }
    let tail = sql[start..].trim();
    if !tail.is_empty() {
        statements.push(tail.to_string());
    }
    Ok(statements)
}
