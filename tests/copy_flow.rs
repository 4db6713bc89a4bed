//! COPY subprotocol scenarios.

mod common;

use common::*;
use iris_pgwire::PgValue;

#[tokio::test]
async fn copy_from_stdin_csv_with_header() {
    let backend = TestBackend::new();
    backend.factory.define_table("people", &["id", "name"]);
    let (mut client, _session) = backend.connect("alice").await;
    client.read_greeting().await;

    client
        .query("COPY people (id, name) FROM STDIN WITH (FORMAT csv, HEADER true)")
        .await;

    // CopyInResponse: text overall format, one format code per column
    let response = client.read_frame().await;
    assert_eq!(response.tag, b'G');
    assert_eq!(response.body[0], 0);
    assert_eq!(&response.body[1..3], &2i16.to_be_bytes());

    client.copy_data(b"id,name\n1,Alice\n2,Bob\n").await;
    client.copy_done().await;

    let frames = client.read_until_ready().await;
    assert_eq!(tags(&frames), vec![b'C', b'Z']);
    assert_eq!(command_tag(&frames[0]), "COPY 2");
    assert_eq!(ready_status(&frames[1]), b'I');

    let rows = backend.factory.table_rows("people");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0][1], PgValue::Text("Alice".to_string()));
    assert_eq!(rows[1][1], PgValue::Text("Bob".to_string()));
}

#[tokio::test]
async fn copy_malformed_row_reports_line_number() {
    let backend = TestBackend::new();
    backend.factory.define_table("people", &["id", "name"]);
    let (mut client, _session) = backend.connect("alice").await;
    client.read_greeting().await;

    client
        .query("COPY people (id, name) FROM STDIN WITH (FORMAT csv)")
        .await;
    let response = client.read_frame().await;
    assert_eq!(response.tag, b'G');

    // third row has only one column
    client.copy_data(b"1,Alice\n2,Bob\nmangled\n").await;
    client.copy_done().await;

    let frames = client.read_until_ready().await;
    assert_eq!(tags(&frames), vec![b'E', b'Z']);
    assert_eq!(error_code(&frames[0]), "22P02");
    let message = error_field(&frames[0], b'M').unwrap();
    assert!(message.contains("row 3"), "message was: {}", message);
}

#[tokio::test]
async fn copy_fail_aborts() {
    let backend = TestBackend::new();
    backend.factory.define_table("people", &["id", "name"]);
    let (mut client, _session) = backend.connect("alice").await;
    client.read_greeting().await;

    client
        .query("COPY people (id, name) FROM STDIN WITH (FORMAT csv)")
        .await;
    let response = client.read_frame().await;
    assert_eq!(response.tag, b'G');

    client.copy_data(b"1,Alice\n").await;
    client.copy_fail("client changed its mind").await;

    let frames = client.read_until_ready().await;
    assert_eq!(tags(&frames), vec![b'E', b'Z']);
    assert_eq!(error_code(&frames[0]), "57014");
    let message = error_field(&frames[0], b'M').unwrap();
    assert!(message.contains("client changed its mind"));

    // the unflushed batch was dropped
    assert!(backend.factory.table_rows("people").is_empty());
}

#[tokio::test]
async fn copy_null_and_quoted_fields() {
    let backend = TestBackend::new();
    backend.factory.define_table("notes", &["id", "body"]);
    let (mut client, _session) = backend.connect("alice").await;
    client.read_greeting().await;

    client
        .query("COPY notes (id, body) FROM STDIN WITH (FORMAT csv)")
        .await;
    client.read_frame().await;

    client.copy_data(b"1,\"line\nbreak\"\n2,\n").await;
    client.copy_done().await;
    let frames = client.read_until_ready().await;
    assert_eq!(command_tag(&frames[0]), "COPY 2");

    let rows = backend.factory.table_rows("notes");
    assert_eq!(rows[0][1], PgValue::Text("line\nbreak".to_string()));
    assert_eq!(rows[1][1], PgValue::Null);
}

#[tokio::test]
async fn copy_to_stdout_streams_csv() {
    let backend = TestBackend::new();
    backend.factory.define_table("people", &["id", "name"]);
    let (mut client, _session) = backend.connect("alice").await;
    client.read_greeting().await;

    client
        .query("COPY people (id, name) FROM STDIN WITH (FORMAT csv)")
        .await;
    client.read_frame().await; // CopyInResponse
    client.copy_data(b"1,Alice\n2,Bob\n").await;
    client.copy_done().await;
    client.read_until_ready().await;

    client
        .query("COPY people (id, name) TO STDOUT WITH (FORMAT csv, HEADER true)")
        .await;
    let frames = client.read_until_ready().await;

    assert_eq!(frames[0].tag, b'H');
    let data: Vec<u8> = frames
        .iter()
        .filter(|f| f.tag == b'd')
        .flat_map(|f| f.body.to_vec())
        .collect();
    let text = String::from_utf8(data).unwrap();
    assert_eq!(text, "id,name\n1,Alice\n2,Bob\n");

    assert!(frames.iter().any(|f| f.tag == b'c'));
    let complete = frames.iter().find(|f| f.tag == b'C').unwrap();
    assert_eq!(command_tag(complete), "COPY 2");
}

#[tokio::test]
async fn copy_in_text_format_with_escapes() {
    let backend = TestBackend::new();
    backend.factory.define_table("raw", &["a", "b"]);
    let (mut client, _session) = backend.connect("alice").await;
    client.read_greeting().await;

    client.query("COPY raw (a, b) FROM STDIN").await;
    let response = client.read_frame().await;
    assert_eq!(response.tag, b'G');

    client.copy_data(b"tab\\there\t\\N\n\\.\n").await;
    client.copy_done().await;
    let frames = client.read_until_ready().await;
    assert_eq!(command_tag(&frames[0]), "COPY 1");

    let rows = backend.factory.table_rows("raw");
    assert_eq!(rows[0][0], PgValue::Text("tab\there".to_string()));
    assert_eq!(rows[0][1], PgValue::Null);
}

#[tokio::test]
async fn session_survives_copy_error() {
    let backend = TestBackend::new();
    let (mut client, _session) = backend.connect("alice").await;
    client.read_greeting().await;

    // COPY into a table that does not exist fails on the first batch
    client.query("COPY ghosts (a) FROM STDIN WITH (FORMAT csv)").await;
    let response = client.read_frame().await;
    assert_eq!(response.tag, b'G');
    client.copy_data(b"1\n").await;
    client.copy_done().await;

    let frames = client.read_until_ready().await;
    assert_eq!(tags(&frames), vec![b'E', b'Z']);
    assert_eq!(error_code(&frames[0]), "42P01");

    // and the session keeps working
    client.query("SELECT 1").await;
    let frames = client.read_until_ready().await;
    assert_eq!(tags(&frames), vec![b'T', b'D', b'C', b'Z']);
}
