//! Write-then-read tests for table files.
//!
//! These exercise the path a storage backend takes: rows are written with
//! `write_jsonl_atomic` and loaded back with `read_jsonl_resilient`.

use promptkit_jsonl::{read_jsonl_resilient, write_jsonl_atomic, JsonlReader, JsonlWriter};
use rstest::rstest;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use tempfile::TempDir;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct Row {
    key: String,
    value: String,
    timestamp: i64,
}

fn row(key: &str, value: &str) -> Row {
    Row {
        key: key.to_string(),
        value: value.to_string(),
        timestamp: 1_700_000_000_000,
    }
}

#[rstest]
#[case::plain(row("prompt_history", "[]"))]
#[case::nested_json_payload(row("prompt_history", r#"[{"id":"a","version":1}]"#))]
#[case::control_chars(row("notes", "Line1\nLine2\tTabbed\"Quoted\"\\Backslash"))]
#[case::unicode(row("greeting", "Hello, \u{4e16}\u{754c}! \u{1F600}"))]
#[case::empty_value(row("empty", ""))]
#[tokio::test]
async fn value_survives_in_memory_roundtrip(#[case] original: Row) {
    let mut writer = JsonlWriter::new(Cursor::new(Vec::new()));
    writer.write(&original).await.unwrap();
    writer.flush().await.unwrap();

    let data = writer.into_inner().into_inner().into_inner();
    let mut reader = JsonlReader::new(Cursor::new(data));
    let read_back: Row = reader.read_line().await.unwrap().unwrap();
    assert_eq!(original, read_back);
}

#[tokio::test]
async fn table_file_roundtrip_preserves_order() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("records.jsonl");
    let rows: Vec<Row> = (0..25).map(|i| row(&format!("key-{i}"), "v")).collect();

    write_jsonl_atomic(&path, &rows).await.unwrap();
    let (loaded, warnings) = read_jsonl_resilient::<Row, _>(&path).await.unwrap();

    assert!(warnings.is_empty());
    assert_eq!(loaded, rows);
}

#[tokio::test]
async fn rewriting_a_table_replaces_all_rows() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("records.jsonl");

    write_jsonl_atomic(&path, &[row("a", "1"), row("b", "2")])
        .await
        .unwrap();
    write_jsonl_atomic(&path, &[row("c", "3")]).await.unwrap();

    let (loaded, _) = read_jsonl_resilient::<Row, _>(&path).await.unwrap();
    assert_eq!(loaded, vec![row("c", "3")]);
}
