//! End-to-end simple-query scenarios over an in-memory transport.

mod common;

use common::*;
use iris_pgwire::executor::memory::Scripted;
use iris_pgwire::executor::ColumnMeta;
use iris_pgwire::PgValue;

#[tokio::test]
async fn startup_and_select_one() {
    let backend = TestBackend::new();
    let (mut client, _session) = backend.connect("alice").await;
    client.read_greeting().await;

    client.query("SELECT 1").await;
    let frames = client.read_until_ready().await;
    assert_eq!(tags(&frames), vec![b'T', b'D', b'C', b'Z']);

    let columns = parse_row_description(&frames[0]);
    assert_eq!(columns, vec![("column1".to_string(), 23, 0)]);
    assert_eq!(row_text(&frames[1]), vec![Some("1".to_string())]);
    assert_eq!(command_tag(&frames[2]), "SELECT 1");
    assert_eq!(ready_status(&frames[3]), b'I');
}

#[tokio::test]
async fn cast_rewrite_end_to_end() {
    let backend = TestBackend::new();
    backend.factory.script(
        "CAST('42' AS INTEGER)",
        Scripted::Rows {
            columns: vec![ColumnMeta::named("n")],
            rows: vec![vec![PgValue::Int(42)]],
        },
    );

    let (mut client, _session) = backend.connect("alice").await;
    client.read_greeting().await;

    client.query("SELECT '42'::int AS n").await;
    let frames = client.read_until_ready().await;
    assert_eq!(tags(&frames), vec![b'T', b'D', b'C', b'Z']);

    let columns = parse_row_description(&frames[0]);
    assert_eq!(columns[0].0, "n");
    assert_eq!(columns[0].1, 23);
    assert_eq!(row_text(&frames[1]), vec![Some("42".to_string())]);
    assert_eq!(command_tag(&frames[2]), "SELECT 1");
}

#[tokio::test]
async fn multi_statement_query() {
    let backend = TestBackend::new();
    let (mut client, _session) = backend.connect("alice").await;
    client.read_greeting().await;

    client
        .query("CREATE TABLE pets (id INT, name VARCHAR(30)); SELECT 7; SELECT 8")
        .await;
    let frames = client.read_until_ready().await;
    assert_eq!(
        tags(&frames),
        vec![b'C', b'T', b'D', b'C', b'T', b'D', b'C', b'Z']
    );
    assert_eq!(command_tag(&frames[0]), "CREATE TABLE");
    assert_eq!(row_text(&frames[2]), vec![Some("7".to_string())]);
    assert_eq!(row_text(&frames[5]), vec![Some("8".to_string())]);
}

#[tokio::test]
async fn error_aborts_remaining_statements() {
    let backend = TestBackend::new();
    let (mut client, _session) = backend.connect("alice").await;
    client.read_greeting().await;

    client.query("SELECT * FROM missing; SELECT 1").await;
    let frames = client.read_until_ready().await;
    assert_eq!(tags(&frames), vec![b'E', b'Z']);
    assert_eq!(error_code(&frames[0]), "42P01");
    assert_eq!(ready_status(&frames[1]), b'I');

    // the session is still usable
    client.query("SELECT 2").await;
    let frames = client.read_until_ready().await;
    assert_eq!(tags(&frames), vec![b'T', b'D', b'C', b'Z']);
}

#[tokio::test]
async fn empty_query_response() {
    let backend = TestBackend::new();
    let (mut client, _session) = backend.connect("alice").await;
    client.read_greeting().await;

    client.query("   ;;  ").await;
    let frames = client.read_until_ready().await;
    assert_eq!(tags(&frames), vec![b'I', b'Z']);
}

#[tokio::test]
async fn show_canned_values() {
    let backend = TestBackend::new();
    let (mut client, _session) = backend.connect("alice").await;
    client.read_greeting().await;

    client.query("SHOW transaction isolation level").await;
    let frames = client.read_until_ready().await;
    assert_eq!(tags(&frames), vec![b'T', b'D', b'C', b'Z']);
    let columns = parse_row_description(&frames[0]);
    assert_eq!(columns[0].0, "transaction_isolation");
    assert_eq!(
        row_text(&frames[1]),
        vec![Some("read committed".to_string())]
    );
    assert_eq!(command_tag(&frames[2]), "SHOW");

    client.query("SHOW server_version").await;
    let frames = client.read_until_ready().await;
    let version = row_text(&frames[1])[0].clone().unwrap();
    assert!(version.starts_with("16"));

    client.query("SHOW application_name").await;
    let frames = client.read_until_ready().await;
    assert_eq!(
        row_text(&frames[1]),
        vec![Some("pgwire-tests".to_string())]
    );
}

#[tokio::test]
async fn show_unknown_parameter_errors_recoverably() {
    let backend = TestBackend::new();
    let (mut client, _session) = backend.connect("alice").await;
    client.read_greeting().await;

    client.query("SHOW wal_level").await;
    let frames = client.read_until_ready().await;
    assert_eq!(tags(&frames), vec![b'E', b'Z']);
    assert_eq!(error_code(&frames[0]), "42704");
}

#[tokio::test]
async fn version_probe_is_shimmed() {
    let backend = TestBackend::new();
    let (mut client, _session) = backend.connect("alice").await;
    client.read_greeting().await;

    client.query("SELECT version()").await;
    let frames = client.read_until_ready().await;
    assert_eq!(tags(&frames), vec![b'T', b'D', b'C', b'Z']);
    let version = row_text(&frames[1])[0].clone().unwrap();
    assert!(version.starts_with("PostgreSQL 16"));
}

#[tokio::test]
async fn set_is_accepted_and_ignored() {
    let backend = TestBackend::new();
    let (mut client, _session) = backend.connect("alice").await;
    client.read_greeting().await;

    client.query("SET extra_float_digits = 3").await;
    let frames = client.read_until_ready().await;
    assert_eq!(tags(&frames), vec![b'C', b'Z']);
    assert_eq!(command_tag(&frames[0]), "SET");
}

#[tokio::test]
async fn transaction_status_byte_lifecycle() {
    let backend = TestBackend::new();
    let (mut client, _session) = backend.connect("alice").await;
    client.read_greeting().await;

    client.query("BEGIN").await;
    let frames = client.read_until_ready().await;
    assert_eq!(command_tag(&frames[0]), "BEGIN");
    assert_eq!(ready_status(frames.last().unwrap()), b'T');

    // an error inside the transaction poisons it
    client.query("SELECT * FROM missing").await;
    let frames = client.read_until_ready().await;
    assert_eq!(error_code(&frames[0]), "42P01");
    assert_eq!(ready_status(frames.last().unwrap()), b'E');

    // ordinary statements are refused until rollback
    client.query("SELECT 1").await;
    let frames = client.read_until_ready().await;
    assert_eq!(error_code(&frames[0]), "25P02");
    assert_eq!(ready_status(frames.last().unwrap()), b'E');

    client.query("ROLLBACK").await;
    let frames = client.read_until_ready().await;
    assert_eq!(command_tag(&frames[0]), "ROLLBACK");
    assert_eq!(ready_status(frames.last().unwrap()), b'I');
}

#[tokio::test]
async fn commit_outside_transaction_warns() {
    let backend = TestBackend::new();
    let (mut client, _session) = backend.connect("alice").await;
    client.read_greeting().await;

    client.query("COMMIT").await;
    let frames = client.read_until_ready().await;
    assert_eq!(tags(&frames), vec![b'N', b'C', b'Z']);
    assert_eq!(command_tag(&frames[1]), "COMMIT");
    assert_eq!(ready_status(&frames[2]), b'I');
}

#[tokio::test]
async fn l2_operator_fails_with_feature_not_supported() {
    let backend = TestBackend::new();
    let (mut client, _session) = backend.connect("alice").await;
    client.read_greeting().await;

    client.query("SELECT embedding <-> '[1,2]' FROM docs").await;
    let frames = client.read_until_ready().await;
    assert_eq!(tags(&frames), vec![b'E', b'Z']);
    assert_eq!(error_code(&frames[0]), "0A000");
}

#[tokio::test]
async fn terminate_closes_cleanly_and_unregisters() {
    let backend = TestBackend::new();
    let (mut client, session) = backend.connect("alice").await;
    client.read_greeting().await;
    assert_eq!(backend.ctx.cancel_registry.len(), 1);

    client.terminate().await;
    let result = session.await.unwrap();
    assert!(result.is_ok());
    assert_eq!(backend.ctx.cancel_registry.len(), 0);
}

#[tokio::test]
async fn insert_and_select_through_the_wire() {
    let backend = TestBackend::new();
    backend.factory.define_table("people", &["id", "name"]);
    let (mut client, _session) = backend.connect("alice").await;
    client.read_greeting().await;

    client
        .query("INSERT INTO people (id, name) VALUES (1, 'Jane')")
        .await;
    let frames = client.read_until_ready().await;
    assert_eq!(command_tag(&frames[0]), "INSERT 0 1");

    client.query("SELECT id, name FROM people").await;
    let frames = client.read_until_ready().await;
    assert_eq!(tags(&frames), vec![b'T', b'D', b'C', b'Z']);
    let columns = parse_row_description(&frames[0]);
    assert_eq!(columns[0].0, "id");
    // no backend type metadata: inferred from the first row
    assert_eq!(columns[0].1, 23);
    assert_eq!(columns[1].1, 25);
    assert_eq!(
        row_text(&frames[1]),
        vec![Some("1".to_string()), Some("Jane".to_string())]
    );
    assert_eq!(command_tag(&frames[2]), "SELECT 1");

    client.query("DELETE FROM people").await;
    let frames = client.read_until_ready().await;
    assert_eq!(command_tag(&frames[0]), "DELETE 1");
}
