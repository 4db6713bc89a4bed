//! Listener-level behavior over real TCP: the SSL/GSS preamble, cancel
//! connections, password authentication, and the connection budget.

use bytes::{Buf, BufMut, BytesMut};
use iris_pgwire::config::{AdapterConfig, AuthSettings};
use iris_pgwire::executor::memory::{MemoryExecutorFactory, Scripted};
use iris_pgwire::{AdapterServer, ExecutorFactory};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;

struct TcpHarness {
    addr: std::net::SocketAddr,
    factory: Arc<MemoryExecutorFactory>,
    _stop: oneshot::Sender<()>,
}

async fn start_server(config: AdapterConfig) -> TcpHarness {
    let factory = Arc::new(MemoryExecutorFactory::new());
    let dyn_factory: Arc<dyn ExecutorFactory> = Arc::clone(&factory) as Arc<dyn ExecutorFactory>;
    let server = Arc::new(AdapterServer::new(config, dyn_factory).unwrap());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        let _ = server
            .run_with_listener(listener, async {
                let _ = stop_rx.await;
            })
            .await;
    });

    TcpHarness {
        addr,
        factory,
        _stop: stop_tx,
    }
}

fn trust_config() -> AdapterConfig {
    AdapterConfig {
        shutdown_grace_secs: 0,
        auth: AuthSettings {
            method: "trust".to_string(),
            users: HashMap::new(),
        },
        ..Default::default()
    }
}

async fn send_startup(stream: &mut TcpStream, user: &str) {
    let mut body = BytesMut::new();
    body.put_i32(196608);
    body.put_slice(b"user\0");
    body.put_slice(user.as_bytes());
    body.put_u8(0);
    body.put_slice(b"database\0USER\0\0");

    let mut packet = BytesMut::new();
    packet.put_i32(body.len() as i32 + 4);
    packet.put_slice(&body);
    stream.write_all(&packet).await.unwrap();
}

async fn read_frame_tcp(stream: &mut TcpStream) -> (u8, Vec<u8>) {
    let tag = stream.read_u8().await.unwrap();
    let len = stream.read_i32().await.unwrap() as usize;
    let mut body = vec![0u8; len - 4];
    stream.read_exact(&mut body).await.unwrap();
    (tag, body)
}

async fn read_until_ready_tcp(stream: &mut TcpStream) -> Vec<(u8, Vec<u8>)> {
    let mut frames = Vec::new();
    loop {
        let frame = read_frame_tcp(stream).await;
        let done = frame.0 == b'Z';
        frames.push(frame);
        if done {
            return frames;
        }
    }
}

#[tokio::test]
async fn ssl_request_is_answered_with_n_without_tls() {
    let harness = start_server(trust_config()).await;
    let mut stream = TcpStream::connect(harness.addr).await.unwrap();

    let mut packet = BytesMut::new();
    packet.put_i32(8);
    packet.put_i32(80877103);
    stream.write_all(&packet).await.unwrap();

    let mut answer = [0u8; 1];
    stream.read_exact(&mut answer).await.unwrap();
    assert_eq!(&answer, b"N");

    // client continues in plaintext
    send_startup(&mut stream, "alice").await;
    let frames = read_until_ready_tcp(&mut stream).await;
    assert_eq!(frames[0].0, b'R');
    assert_eq!(frames.last().unwrap().0, b'Z');
}

#[tokio::test]
async fn gssenc_request_is_answered_with_n() {
    let harness = start_server(trust_config()).await;
    let mut stream = TcpStream::connect(harness.addr).await.unwrap();

    let mut packet = BytesMut::new();
    packet.put_i32(8);
    packet.put_i32(80877104);
    stream.write_all(&packet).await.unwrap();

    let mut answer = [0u8; 1];
    stream.read_exact(&mut answer).await.unwrap();
    assert_eq!(&answer, b"N");
}

#[tokio::test]
async fn cancel_request_over_second_connection() {
    let harness = start_server(trust_config()).await;
    harness
        .factory
        .script("pg_sleep", Scripted::Delay(Duration::from_secs(60)));

    let mut session = TcpStream::connect(harness.addr).await.unwrap();
    send_startup(&mut session, "alice").await;
    let greeting = read_until_ready_tcp(&mut session).await;
    let key = greeting
        .iter()
        .find(|(tag, _)| *tag == b'K')
        .expect("BackendKeyData");
    let mut body = &key.1[..];
    let pid = body.get_i32();
    let secret = body.get_i32();

    // start the long query
    let mut query = BytesMut::new();
    query.put_u8(b'Q');
    let sql = b"SELECT pg_sleep(60)\0";
    query.put_i32(sql.len() as i32 + 4);
    query.put_slice(sql);
    session.write_all(&query).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // the CancelRequest rides its own connection and gets no reply
    let mut cancel_conn = TcpStream::connect(harness.addr).await.unwrap();
    let mut packet = BytesMut::new();
    packet.put_i32(16);
    packet.put_i32(80877102);
    packet.put_i32(pid);
    packet.put_i32(secret);
    cancel_conn.write_all(&packet).await.unwrap();
    drop(cancel_conn);

    let frames = read_until_ready_tcp(&mut session).await;
    assert_eq!(frames[0].0, b'E');
    let text = String::from_utf8_lossy(&frames[0].1);
    assert!(text.contains("57014"));
}

#[tokio::test]
async fn password_authentication_over_the_wire() {
    let mut users = HashMap::new();
    users.insert("alice".to_string(), "secret".to_string());
    let harness = start_server(AdapterConfig {
        shutdown_grace_secs: 0,
        auth: AuthSettings {
            method: "password".to_string(),
            users,
        },
        ..Default::default()
    })
    .await;

    let mut stream = TcpStream::connect(harness.addr).await.unwrap();
    send_startup(&mut stream, "alice").await;

    // AuthenticationCleartextPassword
    let (tag, body) = read_frame_tcp(&mut stream).await;
    assert_eq!(tag, b'R');
    assert_eq!(&body[..4], &3i32.to_be_bytes());

    let mut password = BytesMut::new();
    password.put_u8(b'p');
    password.put_i32(4 + 7);
    password.put_slice(b"secret\0");
    stream.write_all(&password).await.unwrap();

    let frames = read_until_ready_tcp(&mut stream).await;
    assert_eq!(frames[0].0, b'R');
    assert_eq!(&frames[0].1[..4], &0i32.to_be_bytes());
}

#[tokio::test]
async fn wrong_password_is_fatal_28p01() {
    let mut users = HashMap::new();
    users.insert("alice".to_string(), "secret".to_string());
    let harness = start_server(AdapterConfig {
        shutdown_grace_secs: 0,
        auth: AuthSettings {
            method: "password".to_string(),
            users,
        },
        ..Default::default()
    })
    .await;

    let mut stream = TcpStream::connect(harness.addr).await.unwrap();
    send_startup(&mut stream, "alice").await;
    let (tag, _) = read_frame_tcp(&mut stream).await;
    assert_eq!(tag, b'R');

    let mut password = BytesMut::new();
    password.put_u8(b'p');
    password.put_i32(4 + 6);
    password.put_slice(b"wrong\0");
    stream.write_all(&password).await.unwrap();

    let (tag, body) = read_frame_tcp(&mut stream).await;
    assert_eq!(tag, b'E');
    let text = String::from_utf8_lossy(&body);
    assert!(text.contains("28P01"));

    // the server closes after the error
    let mut rest = Vec::new();
    let _ = stream.read_to_end(&mut rest).await;
    assert!(rest.is_empty());
}

#[tokio::test]
async fn connection_budget_is_enforced() {
    let harness = start_server(AdapterConfig {
        max_connections: 1,
        shutdown_grace_secs: 0,
        auth: AuthSettings {
            method: "trust".to_string(),
            users: HashMap::new(),
        },
        ..Default::default()
    })
    .await;

    let mut first = TcpStream::connect(harness.addr).await.unwrap();
    send_startup(&mut first, "alice").await;
    read_until_ready_tcp(&mut first).await;

    let mut second = TcpStream::connect(harness.addr).await.unwrap();
    send_startup(&mut second, "bob").await;
    let (tag, body) = read_frame_tcp(&mut second).await;
    assert_eq!(tag, b'E');
    let text = String::from_utf8_lossy(&body);
    assert!(text.contains("53300"));
}

#[tokio::test]
async fn two_sessions_run_in_parallel() {
    let harness = start_server(trust_config()).await;

    let mut a = TcpStream::connect(harness.addr).await.unwrap();
    let mut b = TcpStream::connect(harness.addr).await.unwrap();
    send_startup(&mut a, "alice").await;
    send_startup(&mut b, "bob").await;
    read_until_ready_tcp(&mut a).await;
    read_until_ready_tcp(&mut b).await;

    for stream in [&mut a, &mut b] {
        let mut query = BytesMut::new();
        query.put_u8(b'Q');
        let sql = b"SELECT 1\0";
        query.put_i32(sql.len() as i32 + 4);
        query.put_slice(sql);
        stream.write_all(&query).await.unwrap();
        let frames = read_until_ready_tcp(stream).await;
        assert_eq!(frames.iter().map(|(t, _)| *t).collect::<Vec<_>>(), vec![
            b'T', b'D', b'C', b'Z'
        ]);
    }
}
