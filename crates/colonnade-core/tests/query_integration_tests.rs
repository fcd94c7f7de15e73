//! End-to-end query tests through the `Database` facade.
//!
//! Each test writes rows with `PartitionWriter`, then plans and executes
//! queries on the local worker pool.

use colonnade_core::exec::{StageTask, TaskFailure, TaskHandle};
use colonnade_core::{
    Column, ColonnadeConfig, ColumnType, Database, Error, JoinKind, JoinSpec, KvStore,
    LocalSubstrate, MemoryKvStore, Predicate, Projection, Query, Row, Schema, StorageMode, Substrate, Value,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

fn config(max_rows: usize) -> ColonnadeConfig {
    let mut config = ColonnadeConfig::default();
    config.storage.mode = StorageMode::Memory;
    config.writer.max_rows = max_rows;
    config.executor.workers = 4;
    config.executor.join_buckets = 4;
    config
}

fn events_schema() -> Schema {
    Schema::new(
        "events",
        vec![
            Column::new("id", ColumnType::Int),
            Column::new("tag", ColumnType::String).indexed(),
            Column::new("user_id", ColumnType::Int),
        ],
    )
    .expect("schema")
}

fn users_schema() -> Schema {
    Schema::new(
        "users",
        vec![
            Column::new("id", ColumnType::Int),
            Column::new("name", ColumnType::String),
        ],
    )
    .expect("schema")
}

fn write(db: &Database, table: &str, rows: impl IntoIterator<Item = Row>) {
    let mut writer = db.writer(table).expect("writer");
    for row in rows {
        writer.append(row).expect("append");
    }
    writer.close().expect("close");
}

fn ids(rows: &[Row]) -> Vec<i64> {
    rows.iter()
        .filter_map(|row| match row.first() {
            Some(Value::Int(id)) => Some(*id),
            _ => None,
        })
        .collect()
}

#[test]
fn test_indexed_equality_filter_answers_without_decoding() {
    // Arrange
    let db = Database::with_parts(
        config(3),
        Arc::new(MemoryKvStore::new()),
        Arc::new(LocalSubstrate::new(2).expect("substrate")),
    )
    .expect("db");
    db.create_table(
        Schema::new(
            "events",
            vec![
                Column::new("id", ColumnType::Int),
                Column::new("tag", ColumnType::String).indexed(),
            ],
        )
        .expect("schema"),
    )
    .expect("create");
    write(
        &db,
        "events",
        vec![
            vec![Value::Int(1), Value::from("a")],
            vec![Value::Int(2), Value::from("b")],
            vec![Value::Int(3), Value::from("a")],
        ],
    );

    // Act
    let result = db
        .query(&Query::from("events").filter(Predicate::eq("tag", "a")))
        .expect("query");

    // Assert
    assert_eq!(db.partitions("events").expect("partitions").len(), 1);
    assert_eq!(ids(&result.rows), vec![1, 3]);
    assert_eq!(result.stats.full_decodes, 0);
    assert_eq!(result.stats.index_resolved_scans, 1);
}

#[test]
fn test_range_filter_prunes_partitions_by_statistics() {
    // Arrange
    let db = Database::with_config(config(100)).expect("db");
    db.create_table(events_schema()).expect("create");
    write(
        &db,
        "events",
        (0..1_000).map(|i| vec![Value::Int(i), Value::from("t"), Value::Int(i % 7)]),
    );
    let query = Query::from("events")
        .select(["id"])
        .filter(Predicate::and(vec![
            Predicate::gte("id", 420),
            Predicate::lt("id", 430),
        ]));

    // Act
    let plan = db.plan(&query).expect("plan");
    let result = db.query(&query).expect("query");

    // Assert
    assert_eq!(plan.pruned_partitions, 9);
    assert_eq!(result.stats.partitions_scanned, 1);
    assert_eq!(ids(&result.rows), (420..430).collect::<Vec<_>>());
}

#[test]
fn test_join_returns_one_row_per_matching_pair() {
    // Arrange
    let db = Database::with_config(config(4)).expect("db");
    db.create_table(events_schema()).expect("create");
    db.create_table(users_schema()).expect("create");
    write(
        &db,
        "events",
        (0..10).map(|i| vec![Value::Int(i), Value::from("t"), Value::Int(i % 3)]),
    );
    write(
        &db,
        "users",
        vec![
            vec![Value::Int(0), Value::from("ann")],
            vec![Value::Int(1), Value::from("bob")],
            vec![Value::Int(1), Value::from("bob-alias")],
        ],
    );
    let query = Query::from("events")
        .join("users", JoinSpec::inner("events.user_id", "users.id"))
        .select(["events.id", "users.name"])
        .order_by([0usize, 1]);

    // Act
    let result = db.query(&query).expect("query");

    // Assert: user 0 matches ids 0,3,6,9; user 1 twice for ids 1,4,7
    assert_eq!(result.len(), 4 + 2 * 3);
    assert_eq!(
        result.rows[..3].to_vec(),
        vec![
            vec![Value::Int(0), Value::from("ann")],
            vec![Value::Int(1), Value::from("bob")],
            vec![Value::Int(1), Value::from("bob-alias")],
        ]
    );
}

#[test]
fn test_left_join_keeps_events_without_user() {
    let db = Database::with_config(config(10)).expect("db");
    db.create_table(events_schema()).expect("create");
    db.create_table(users_schema()).expect("create");
    write(
        &db,
        "events",
        vec![
            vec![Value::Int(1), Value::from("t"), Value::Int(7)],
            vec![Value::Int(2), Value::from("t"), Value::Int(8)],
        ],
    );
    write(&db, "users", vec![vec![Value::Int(7), Value::from("gus")]]);

    let result = db
        .query(
            &Query::from("events")
                .join(
                    "users",
                    JoinSpec::inner("user_id", "users.id").kind(JoinKind::Left),
                )
                .select(["events.id", "users.name"])
                .order_by(["events.id"]),
        )
        .expect("query");

    assert_eq!(
        result.rows,
        vec![
            vec![Value::Int(1), Value::from("gus")],
            vec![Value::Int(2), Value::Null],
        ]
    );
}

#[test]
fn test_grouped_aggregate_with_order_and_limit() {
    // Arrange
    let db = Database::with_config(config(25)).expect("db");
    db.create_table(events_schema()).expect("create");
    let tags = ["red", "green", "blue"];
    write(
        &db,
        "events",
        (0..90).map(|i| vec![Value::Int(i), Value::from(tags[(i % 3) as usize]), Value::Int(1)]),
    );

    // Act
    let result = db
        .query(
            &Query::from("events")
                .select(vec![
                    Projection::col("tag"),
                    Projection::count(),
                    Projection::min("id"),
                ])
                .filter(Predicate::lt("id", 60))
                .order_by(["tag"])
                .limit(2),
        )
        .expect("query");

    // Assert
    assert_eq!(result.columns, vec!["tag", "count(*)", "min(id)"]);
    assert_eq!(
        result.rows,
        vec![
            vec![Value::from("blue"), Value::Int(20), Value::Int(2)],
            vec![Value::from("green"), Value::Int(20), Value::Int(1)],
        ]
    );
}

#[test]
fn test_aggregate_ordered_by_output_name() {
    let db = Database::with_config(config(7)).expect("db");
    db.create_table(events_schema()).expect("create");
    write(
        &db,
        "events",
        (1..=30).map(|i| vec![Value::Int(i), Value::from(format!("t{}", i % 4)), Value::Int(0)]),
    );

    let result = db
        .query(
            &Query::from("events")
                .select(vec![Projection::col("tag"), Projection::sum("id")])
                .order_by(["sum(id)"])
                .desc(),
        )
        .expect("query");

    // t2: 2+6+..+30 = 128, t1: 1+5+..+29 = 120, t3: 3+..+27 = 105, t0: 4+..+28 = 112
    assert_eq!(
        result.rows,
        vec![
            vec![Value::from("t2"), Value::Int(128)],
            vec![Value::from("t1"), Value::Int(120)],
            vec![Value::from("t0"), Value::Int(112)],
            vec![Value::from("t3"), Value::Int(105)],
        ]
    );
}

#[test]
fn test_query_into_stores_result_as_queryable_table() {
    // Arrange
    let db = Database::with_config(config(6)).expect("db");
    db.create_table(events_schema()).expect("create");
    db.create_table(users_schema()).expect("create");
    write(
        &db,
        "events",
        (0..20).map(|i| vec![Value::Int(i), Value::from("t"), Value::Int(i % 4)]),
    );
    write(
        &db,
        "users",
        (0..3).map(|i| vec![Value::Int(i), Value::from(format!("u{i}"))]),
    );
    let per_user = Query::from("events")
        .join("users", JoinSpec::inner("events.user_id", "users.id"))
        .select(vec![
            Projection::col("users.name"),
            Projection::count(),
            Projection::sum("events.id"),
            Projection::avg("events.id"),
        ]);

    // Act
    let stored = db.query_into(&per_user, "per_user").expect("query_into");
    let nested = db
        .query(
            &Query::from("per_user")
                .select(["users_name", "sum(events_id)"])
                .filter(Predicate::gte("sum(events_id)", 45))
                .order_by(["users_name"]),
        )
        .expect("nested query");

    // Assert
    assert_eq!(stored.len(), 3);
    let schema = db.schema("per_user").expect("schema");
    let columns: Vec<(&str, ColumnType)> = schema
        .columns()
        .map(|c| (c.name.as_str(), c.column_type))
        .collect();
    assert_eq!(
        columns,
        vec![
            ("users_name", ColumnType::String),
            ("count(*)", ColumnType::Int),
            ("sum(events_id)", ColumnType::Int),
            ("avg(events_id)", ColumnType::Float),
        ]
    );
    // u0: 0+4+..+16 = 40, u1: 45, u2: 50
    assert_eq!(
        nested.rows,
        vec![
            vec![Value::from("u1"), Value::Int(45)],
            vec![Value::from("u2"), Value::Int(50)],
        ]
    );
}

#[test]
fn test_query_into_existing_table_fails_without_writing() {
    let db = Database::in_memory().expect("db");
    db.create_table(users_schema()).expect("create");
    write(&db, "users", vec![vec![Value::Int(1), Value::from("ann")]]);

    let result = db.query_into(&Query::from("users"), "users");

    assert!(matches!(result, Err(Error::TableExists(_))));
    assert_eq!(db.partitions("users").expect("partitions").len(), 1);
}

#[test]
fn test_query_on_empty_table_returns_no_rows() {
    let db = Database::in_memory().expect("db");
    db.create_table(users_schema()).expect("create");

    let rows = db.query(&Query::from("users")).expect("query");
    let count = db
        .query(&Query::from("users").select(vec![Projection::count()]))
        .expect("query");

    assert!(rows.is_empty());
    assert_eq!(count.rows, vec![vec![Value::Int(0)]]);
}

#[test]
fn test_concurrent_writers_publish_every_row() {
    // Arrange
    let db = Database::with_config(config(50)).expect("db");
    db.create_table(events_schema()).expect("create");

    // Act
    thread::scope(|scope| {
        for w in 0..4_i64 {
            let db = &db;
            scope.spawn(move || {
                write(
                    db,
                    "events",
                    (0..250).map(|i| vec![Value::Int(w * 1_000 + i), Value::from("t"), Value::Int(w)]),
                );
            });
        }
    });

    // Assert
    let partitions = db.partitions("events").expect("partitions");
    let mut partition_ids: Vec<u64> = partitions.iter().map(|p| p.id).collect();
    partition_ids.sort_unstable();
    partition_ids.dedup();
    assert_eq!(partition_ids.len(), partitions.len());
    assert_eq!(partitions.iter().map(|p| p.row_count).sum::<u64>(), 1_000);
    let count = db
        .query(&Query::from("events").select(vec![Projection::count()]))
        .expect("query");
    assert_eq!(count.rows, vec![vec![Value::Int(1_000)]]);
}

#[test]
fn test_planning_errors_surface_through_query() {
    let db = Database::in_memory().expect("db");
    db.create_table(events_schema()).expect("create");
    db.create_table(users_schema()).expect("create");

    let missing = db.query(&Query::from("nope"));
    let mismatched = db.query(
        &Query::from("events").join("users", JoinSpec::inner("events.tag", "users.id")),
    );

    assert!(matches!(missing, Err(Error::UnresolvableScan { .. })));
    assert!(matches!(mismatched, Err(Error::UnsupportedJoin(_))));
}

/// Fails the first attempt of every task, then delegates.
struct FirstAttemptFails {
    inner: LocalSubstrate,
    failures: AtomicUsize,
}

impl Substrate for FirstAttemptFails {
    fn submit(&self, task: StageTask) -> colonnade_core::Result<TaskHandle> {
        if task.attempt == 1 {
            self.failures.fetch_add(1, Ordering::SeqCst);
            let (handle, completion) = TaskHandle::new(task.stage.id);
            completion.complete(Err(TaskFailure::new(task.stage.id, "worker lost")));
            return Ok(handle);
        }
        self.inner.submit(task)
    }
}

#[test]
fn test_retried_stages_produce_identical_results() {
    // Arrange
    let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
    let mut cfg = config(8);
    cfg.executor.max_retries = 1;
    let reliable = Database::with_parts(
        cfg.clone(),
        Arc::clone(&store),
        Arc::new(LocalSubstrate::new(2).expect("substrate")),
    )
    .expect("db");
    reliable.create_table(events_schema()).expect("create");
    reliable.create_table(users_schema()).expect("create");
    write(
        &reliable,
        "events",
        (0..40).map(|i| vec![Value::Int(i), Value::from("t"), Value::Int(i % 5)]),
    );
    write(
        &reliable,
        "users",
        (0..5).map(|i| vec![Value::Int(i), Value::from(format!("u{i}"))]),
    );
    let flaky = Arc::new(FirstAttemptFails {
        inner: LocalSubstrate::new(2).expect("substrate"),
        failures: AtomicUsize::new(0),
    });
    let unreliable =
        Database::with_parts(cfg, store, Arc::clone(&flaky) as Arc<dyn Substrate>).expect("db");
    let query = Query::from("events")
        .join("users", JoinSpec::inner("events.user_id", "users.id"))
        .select(vec![Projection::col("users.name"), Projection::count()])
        .order_by(["users.name"]);

    // Act
    let expected = reliable.query(&query).expect("query");
    let actual = unreliable.query(&query).expect("query");

    // Assert
    assert_eq!(actual.rows, expected.rows);
    assert_eq!(actual.rows.len(), 5);
    let failures = flaky.failures.load(Ordering::SeqCst) as u64;
    assert_eq!(actual.stats.retries, failures);
    assert_eq!(actual.stats.stages, expected.stats.stages);
}

#[tokio::test]
async fn test_query_async_matches_blocking_query() {
    let db = Database::with_config(config(10)).expect("db");
    db.create_table(events_schema()).expect("create");
    write(
        &db,
        "events",
        (0..30).map(|i| vec![Value::Int(i), Value::from("t"), Value::Int(0)]),
    );
    let query = Query::from("events").filter(Predicate::gte("id", 25));

    let blocking = db.query(&query).expect("query");
    let asynchronous = db.query_async(&query).await.expect("query");

    assert_eq!(asynchronous.rows, blocking.rows);
    assert_eq!(ids(&asynchronous.rows), vec![25, 26, 27, 28, 29]);
}
