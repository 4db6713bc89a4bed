//! Out-of-band cancellation and statement timeouts.

mod common;

use common::*;
use iris_pgwire::config::{AdapterConfig, AuthSettings};
use iris_pgwire::executor::memory::Scripted;
use std::collections::HashMap;
use std::time::Duration;

#[tokio::test]
async fn cancel_request_aborts_running_query() {
    let backend = TestBackend::new();
    backend
        .factory
        .script("pg_sleep", Scripted::Delay(Duration::from_secs(60)));

    let (mut client, _session) = backend.connect("alice").await;
    let (pid, secret) = client.read_greeting().await;

    client.query("SELECT pg_sleep(60)").await;

    // the cancel arrives on a separate connection; the listener routes it
    // into the registry, which is what we exercise here
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(backend.ctx.cancel_registry.cancel(pid, secret));

    let frames = client.read_until_ready().await;
    assert_eq!(tags(&frames), vec![b'E', b'Z']);
    assert_eq!(error_code(&frames[0]), "57014");
    assert_eq!(ready_status(&frames[1]), b'I');

    // the session remains usable after cancellation
    client.query("SELECT 1").await;
    let frames = client.read_until_ready().await;
    assert_eq!(tags(&frames), vec![b'T', b'D', b'C', b'Z']);
}

#[tokio::test]
async fn cancel_with_wrong_secret_is_ignored() {
    let backend = TestBackend::new();
    backend
        .factory
        .script("pg_sleep", Scripted::Delay(Duration::from_millis(200)));

    let (mut client, _session) = backend.connect("alice").await;
    let (pid, secret) = client.read_greeting().await;

    client.query("SELECT pg_sleep(1)").await;
    assert!(!backend.ctx.cancel_registry.cancel(pid, secret.wrapping_add(1)));

    // the query completes normally
    let frames = client.read_until_ready().await;
    assert_eq!(tags(&frames), vec![b'C', b'Z']);
}

#[tokio::test]
async fn cancel_inside_transaction_leaves_failed_state() {
    let backend = TestBackend::new();
    backend
        .factory
        .script("pg_sleep", Scripted::Delay(Duration::from_secs(60)));

    let (mut client, _session) = backend.connect("alice").await;
    let (pid, secret) = client.read_greeting().await;

    client.query("BEGIN").await;
    client.read_until_ready().await;

    client.query("SELECT pg_sleep(60)").await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    backend.ctx.cancel_registry.cancel(pid, secret);

    let frames = client.read_until_ready().await;
    assert_eq!(error_code(&frames[0]), "57014");
    assert_eq!(ready_status(&frames[1]), b'E');
}

#[tokio::test]
async fn statement_timeout_fires() {
    let backend = TestBackend::with_config(AdapterConfig {
        statement_timeout_ms: Some(50),
        auth: AuthSettings {
            method: "trust".to_string(),
            users: HashMap::new(),
        },
        ..Default::default()
    });
    backend
        .factory
        .script("pg_sleep", Scripted::Delay(Duration::from_secs(60)));

    let (mut client, _session) = backend.connect("alice").await;
    client.read_greeting().await;

    client.query("SELECT pg_sleep(60)").await;
    let frames = client.read_until_ready().await;
    assert_eq!(tags(&frames), vec![b'E', b'Z']);
    assert_eq!(error_code(&frames[0]), "57014");
    assert_eq!(
        error_field(&frames[0], b'D').as_deref(),
        Some("timeout"),
        "timeout errors carry the timeout marker"
    );

    // fast statements still work under the timeout
    client.query("SELECT 1").await;
    let frames = client.read_until_ready().await;
    assert_eq!(tags(&frames), vec![b'T', b'D', b'C', b'Z']);
}

#[tokio::test]
async fn cancel_after_completion_is_a_noop() {
    let backend = TestBackend::new();
    let (mut client, _session) = backend.connect("alice").await;
    let (pid, secret) = client.read_greeting().await;

    client.query("SELECT 1").await;
    client.read_until_ready().await;

    // statement already finished; the signal must not poison the next one
    backend.ctx.cancel_registry.cancel(pid, secret);
    client.query("SELECT 2").await;
    let frames = client.read_until_ready().await;
    assert_eq!(tags(&frames), vec![b'T', b'D', b'C', b'Z']);
}
