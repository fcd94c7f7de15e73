//! Tests for `schema` module

use super::codec::Encoding;
use super::error::Error;
use super::schema::*;
use super::value::{ColumnType, Value};

fn events() -> Schema {
    Schema::new(
        "events",
        vec![
            Column::new("id", ColumnType::Int),
            Column::new("tag", ColumnType::String).indexed(),
            Column::new("score", ColumnType::Float),
        ],
    )
    .expect("schema")
}

#[test]
fn test_schema_keeps_column_order() {
    let schema = events();

    assert_eq!(schema.table(), "events");
    assert_eq!(schema.column_names(), vec!["id", "tag", "score"]);
    assert_eq!(schema.column_index("score"), Some(2));
    assert_eq!(schema.column_at(1).map(|c| c.indexed), Some(true));
    assert!(schema.column("missing").is_none());
}

#[test]
fn test_schema_rejects_bad_definitions() {
    let duplicate = Schema::new(
        "t",
        vec![Column::new("a", ColumnType::Int), Column::new("a", ColumnType::Int)],
    );
    let empty = Schema::new("t", Vec::new());
    let bad_name = Schema::new("a/b", vec![Column::new("a", ColumnType::Int)]);
    let trie_on_int = Schema::new(
        "t",
        vec![Column::new("a", ColumnType::Int).encoding(Encoding::Trie)],
    );

    assert!(matches!(duplicate, Err(Error::InvalidQuery(_))));
    assert!(matches!(empty, Err(Error::InvalidQuery(_))));
    assert!(matches!(bad_name, Err(Error::InvalidQuery(_))));
    assert!(matches!(trie_on_int, Err(Error::InvalidQuery(_))));
}

#[test]
fn test_partition_column_is_indexed_implicitly() {
    let schema = Schema::new(
        "t",
        vec![Column::new("day", ColumnType::String), Column::new("v", ColumnType::Int)],
    )
    .and_then(|s| s.with_partition_column("day"))
    .expect("schema");

    assert_eq!(schema.partition_column(), Some("day"));
    assert!(schema.column("day").is_some_and(|c| c.indexed));
    assert!(events().with_partition_column("nope").is_err());
}

#[test]
fn test_validate_row_checks_arity_and_types() {
    let schema = events();

    let ok = schema.validate_row(&[Value::Int(1), Value::Null, Value::Float(0.5)]);
    let short = schema.validate_row(&[Value::Int(1)]);
    let wrong = schema.validate_row(&[Value::from("1"), Value::Null, Value::Null]);

    assert!(ok.is_ok());
    assert!(matches!(short, Err(Error::SchemaMismatch { .. })));
    assert!(matches!(wrong, Err(Error::SchemaMismatch { .. })));
}

#[test]
fn test_row_from_json_fills_missing_fields_with_null() {
    // Arrange
    let schema = events();
    let json = serde_json::json!({"id": 4, "tag": "a", "extra": true});

    // Act
    let row = schema.row_from_json(&json).expect("row");

    // Assert
    assert_eq!(row, vec![Value::Int(4), Value::from("a"), Value::Null]);
    assert!(schema.row_from_json(&serde_json::json!([1, 2])).is_err());
    assert!(schema
        .row_from_json(&serde_json::json!({"id": "four"}))
        .is_err());
}
