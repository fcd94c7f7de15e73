//! Reopen tests for log-backed databases.

use colonnade_core::{Column, ColumnType, Database, Predicate, Projection, Query, Schema, Value};
use tempfile::tempdir;

fn schema() -> Schema {
    Schema::new(
        "metrics",
        vec![
            Column::new("host", ColumnType::String).indexed(),
            Column::new("ts", ColumnType::Timestamp),
            Column::new("load", ColumnType::Float),
        ],
    )
    .expect("schema")
}

#[test]
fn test_reopened_database_sees_schemas_and_partitions() {
    // Arrange
    let dir = tempdir().expect("temp dir");
    {
        let db = Database::open(dir.path()).expect("open");
        db.create_table(schema()).expect("create");
        let mut writer = db.writer("metrics").expect("writer");
        for i in 0..50_i64 {
            let host = if i % 2 == 0 { "alpha" } else { "beta" };
            writer
                .append(vec![
                    Value::from(host),
                    Value::Timestamp(1_700_000_000_000 + i),
                    Value::Float(i as f64 / 10.0),
                ])
                .expect("append");
        }
        writer.close().expect("close");
    }

    // Act
    let db = Database::open(dir.path()).expect("reopen");
    let result = db
        .query(
            &Query::from("metrics")
                .select(vec![Projection::col("host"), Projection::count()])
                .filter(Predicate::eq("host", "beta")),
        )
        .expect("query");

    // Assert
    assert_eq!(db.tables(), vec!["metrics"]);
    assert_eq!(db.schema("metrics").expect("schema").as_ref(), &schema());
    assert_eq!(result.rows, vec![vec![Value::from("beta"), Value::Int(25)]]);
}

#[test]
fn test_partition_ids_keep_growing_after_reopen() {
    let dir = tempdir().expect("temp dir");
    let first_id = {
        let db = Database::open(dir.path()).expect("open");
        db.create_table(schema()).expect("create");
        let mut writer = db.writer("metrics").expect("writer");
        writer
            .append(vec![Value::from("a"), Value::Timestamp(1), Value::Float(0.5)])
            .expect("append");
        writer.close().expect("close")[0].id
    };

    let db = Database::open(dir.path()).expect("reopen");
    let mut writer = db.writer("metrics").expect("writer");
    writer
        .append(vec![Value::from("b"), Value::Timestamp(2), Value::Null])
        .expect("append");
    let second_id = writer.close().expect("close")[0].id;

    assert!(second_id > first_id);
    assert_eq!(db.partitions("metrics").expect("partitions").len(), 2);
    let all = db.query(&Query::from("metrics")).expect("query");
    assert_eq!(all.len(), 2);
    assert_eq!(all.rows[1][2], Value::Null);
}

#[test]
fn test_create_existing_table_after_reopen_fails() {
    let dir = tempdir().expect("temp dir");
    Database::open(dir.path())
        .and_then(|db| db.create_table(schema()))
        .expect("create");

    let db = Database::open(dir.path()).expect("reopen");

    assert!(matches!(
        db.create_table(schema()),
        Err(colonnade_core::Error::TableExists(_))
    ));
}
