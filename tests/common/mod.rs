//! Test harness: a minimal PostgreSQL frontend driving a session over an
//! in-memory duplex stream.

#![allow(dead_code)]

use bytes::{Buf, BufMut, Bytes, BytesMut};
use iris_pgwire::config::{AdapterConfig, AuthSettings};
use iris_pgwire::executor::memory::MemoryExecutorFactory;
use iris_pgwire::protocol::connection::{run_session, SessionContext};
use iris_pgwire::AdapterServer;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// A backend message as the test client sees it.
#[derive(Debug, Clone)]
pub struct Frame {
    pub tag: u8,
    pub body: Bytes,
}

pub struct TestBackend {
    pub factory: Arc<MemoryExecutorFactory>,
    pub ctx: SessionContext,
    _shutdown: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl TestBackend {
    /// Trust-auth backend with default configuration.
    pub fn new() -> Self {
        Self::with_config(AdapterConfig {
            auth: AuthSettings {
                method: "trust".to_string(),
                users: HashMap::new(),
            },
            ..Default::default()
        })
    }

    pub fn with_config(config: AdapterConfig) -> Self {
        let factory = Arc::new(MemoryExecutorFactory::new());
        let dyn_factory: Arc<dyn iris_pgwire::ExecutorFactory> =
            Arc::clone(&factory) as Arc<dyn iris_pgwire::ExecutorFactory>;
        let server = AdapterServer::new(config, dyn_factory).unwrap();
        let (tx, rx) = watch::channel(false);
        Self {
            factory,
            ctx: server.session_context(),
            _shutdown: tx,
            shutdown_rx: rx,
        }
    }

    /// Spawn a session for `user` and return the connected client.
    pub async fn connect(&self, user: &str) -> (TestClient, JoinHandle<iris_pgwire::Result<()>>) {
        self.connect_with_params(user, HashMap::new()).await
    }

    pub async fn connect_with_params(
        &self,
        user: &str,
        mut params: HashMap<String, String>,
    ) -> (TestClient, JoinHandle<iris_pgwire::Result<()>>) {
        params.insert("user".to_string(), user.to_string());
        params
            .entry("database".to_string())
            .or_insert_with(|| "USER".to_string());
        params
            .entry("application_name".to_string())
            .or_insert_with(|| "pgwire-tests".to_string());

        let (client_io, server_io) = tokio::io::duplex(1 << 20);
        let ctx = self.ctx.clone();
        let shutdown = self.shutdown_rx.clone();
        let handle =
            tokio::spawn(async move { run_session(server_io, params, None, ctx, shutdown).await });
        (TestClient::new(client_io), handle)
    }
}

pub struct TestClient {
    stream: DuplexStream,
}

impl TestClient {
    pub fn new(stream: DuplexStream) -> Self {
        Self { stream }
    }

    pub async fn send(&mut self, tag: u8, body: &[u8]) {
        let mut frame = BytesMut::with_capacity(body.len() + 5);
        frame.put_u8(tag);
        frame.put_i32(body.len() as i32 + 4);
        frame.put_slice(body);
        self.stream.write_all(&frame).await.unwrap();
    }

    pub async fn read_frame(&mut self) -> Frame {
        let tag = self.stream.read_u8().await.unwrap();
        let len = self.stream.read_i32().await.unwrap() as usize;
        let mut body = vec![0u8; len - 4];
        self.stream.read_exact(&mut body).await.unwrap();
        Frame {
            tag,
            body: Bytes::from(body),
        }
    }

    /// True when the server has closed its end of the stream.
    pub async fn read_eof(&mut self) -> bool {
        let mut buf = [0u8; 1];
        matches!(self.stream.read(&mut buf).await, Ok(0) | Err(_))
    }

    /// Read frames until ReadyForQuery; returns everything including it.
    pub async fn read_until_ready(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        loop {
            let frame = self.read_frame().await;
            let done = frame.tag == b'Z';
            frames.push(frame);
            if done {
                return frames;
            }
        }
    }

    /// Consume the post-auth greeting (AuthenticationOk, ParameterStatus*,
    /// BackendKeyData, ReadyForQuery) and return the backend key.
    pub async fn read_greeting(&mut self) -> (i32, i32) {
        let frames = self.read_until_ready().await;
        assert_eq!(frames[0].tag, b'R', "expected AuthenticationOk first");
        assert_eq!(&frames[0].body[..], &0i32.to_be_bytes());

        let key_frame = frames
            .iter()
            .find(|f| f.tag == b'K')
            .expect("BackendKeyData in greeting");
        let mut body = &key_frame.body[..];
        let pid = body.get_i32();
        let secret = body.get_i32();

        let statuses: Vec<String> = frames
            .iter()
            .filter(|f| f.tag == b'S')
            .map(|f| {
                let text = String::from_utf8_lossy(&f.body);
                text.split('\0').next().unwrap_or("").to_string()
            })
            .collect();
        for required in [
            "server_version",
            "client_encoding",
            "DateStyle",
            "integer_datetimes",
            "standard_conforming_strings",
            "TimeZone",
            "application_name",
        ] {
            assert!(
                statuses.iter().any(|s| s == required),
                "missing ParameterStatus {}",
                required
            );
        }

        (pid, secret)
    }

    pub async fn query(&mut self, sql: &str) {
        let mut body = BytesMut::new();
        body.put_slice(sql.as_bytes());
        body.put_u8(0);
        self.send(b'Q', &body).await;
    }

    pub async fn parse(&mut self, name: &str, sql: &str, param_oids: &[i32]) {
        let mut body = BytesMut::new();
        body.put_slice(name.as_bytes());
        body.put_u8(0);
        body.put_slice(sql.as_bytes());
        body.put_u8(0);
        body.put_i16(param_oids.len() as i16);
        for oid in param_oids {
            body.put_i32(*oid);
        }
        self.send(b'P', &body).await;
    }

    pub async fn bind(
        &mut self,
        portal: &str,
        statement: &str,
        param_formats: &[i16],
        params: &[Option<&[u8]>],
        result_formats: &[i16],
    ) {
        let mut body = BytesMut::new();
        body.put_slice(portal.as_bytes());
        body.put_u8(0);
        body.put_slice(statement.as_bytes());
        body.put_u8(0);
        body.put_i16(param_formats.len() as i16);
        for format in param_formats {
            body.put_i16(*format);
        }
        body.put_i16(params.len() as i16);
        for param in params {
            match param {
                Some(value) => {
                    body.put_i32(value.len() as i32);
                    body.put_slice(value);
                }
                None => body.put_i32(-1),
            }
        }
        body.put_i16(result_formats.len() as i16);
        for format in result_formats {
            body.put_i16(*format);
        }
        self.send(b'B', &body).await;
    }

    pub async fn describe(&mut self, object_type: u8, name: &str) {
        let mut body = BytesMut::new();
        body.put_u8(object_type);
        body.put_slice(name.as_bytes());
        body.put_u8(0);
        self.send(b'D', &body).await;
    }

    pub async fn execute(&mut self, portal: &str, max_rows: i32) {
        let mut body = BytesMut::new();
        body.put_slice(portal.as_bytes());
        body.put_u8(0);
        body.put_i32(max_rows);
        self.send(b'E', &body).await;
    }

    pub async fn sync(&mut self) {
        self.send(b'S', &[]).await;
    }

    pub async fn close(&mut self, object_type: u8, name: &str) {
        let mut body = BytesMut::new();
        body.put_u8(object_type);
        body.put_slice(name.as_bytes());
        body.put_u8(0);
        self.send(b'C', &body).await;
    }

    pub async fn copy_data(&mut self, data: &[u8]) {
        self.send(b'd', data).await;
    }

    pub async fn copy_done(&mut self) {
        self.send(b'c', &[]).await;
    }

    pub async fn copy_fail(&mut self, reason: &str) {
        let mut body = BytesMut::new();
        body.put_slice(reason.as_bytes());
        body.put_u8(0);
        self.send(b'f', &body).await;
    }

    pub async fn terminate(&mut self) {
        self.send(b'X', &[]).await;
    }
}

// ---- frame dissection helpers ----------------------------------------

pub fn tags(frames: &[Frame]) -> Vec<u8> {
    frames.iter().map(|f| f.tag).collect()
}

/// Decode a RowDescription body into (name, type_oid, format) triples.
pub fn parse_row_description(frame: &Frame) -> Vec<(String, i32, i16)> {
    assert_eq!(frame.tag, b'T');
    let mut body = &frame.body[..];
    let count = body.get_i16();
    (0..count)
        .map(|_| {
            let nul = body.iter().position(|&b| b == 0).unwrap();
            let name = String::from_utf8(body[..nul].to_vec()).unwrap();
            body.advance(nul + 1);
            let _table_oid = body.get_i32();
            let _column_id = body.get_i16();
            let type_oid = body.get_i32();
            let _size = body.get_i16();
            let _modifier = body.get_i32();
            let format = body.get_i16();
            (name, type_oid, format)
        })
        .collect()
}

/// Decode a DataRow body into optional raw field values.
pub fn parse_data_row(frame: &Frame) -> Vec<Option<Vec<u8>>> {
    assert_eq!(frame.tag, b'D');
    let mut body = &frame.body[..];
    let count = body.get_i16();
    (0..count)
        .map(|_| {
            let len = body.get_i32();
            if len == -1 {
                None
            } else {
                let value = body[..len as usize].to_vec();
                body.advance(len as usize);
                Some(value)
            }
        })
        .collect()
}

/// Text fields of a DataRow.
pub fn row_text(frame: &Frame) -> Vec<Option<String>> {
    parse_data_row(frame)
        .into_iter()
        .map(|field| field.map(|v| String::from_utf8(v).unwrap()))
        .collect()
}

/// CommandComplete tag text.
pub fn command_tag(frame: &Frame) -> String {
    assert_eq!(frame.tag, b'C');
    let text = String::from_utf8_lossy(&frame.body);
    text.trim_end_matches('\0').to_string()
}

/// SQLSTATE (field C) of an ErrorResponse.
pub fn error_code(frame: &Frame) -> String {
    assert_eq!(frame.tag, b'E');
    error_field(frame, b'C').expect("ErrorResponse carries a SQLSTATE")
}

/// Any field of an ErrorResponse or NoticeResponse.
pub fn error_field(frame: &Frame, wanted: u8) -> Option<String> {
    let mut body = &frame.body[..];
    while body.has_remaining() {
        let field_type = body.get_u8();
        if field_type == 0 {
            break;
        }
        let nul = body.iter().position(|&b| b == 0)?;
        let value = String::from_utf8(body[..nul].to_vec()).ok()?;
        body.advance(nul + 1);
        if field_type == wanted {
            return Some(value);
        }
    }
    None
}

/// ReadyForQuery transaction status byte.
pub fn ready_status(frame: &Frame) -> u8 {
    assert_eq!(frame.tag, b'Z');
    frame.body[0]
}
