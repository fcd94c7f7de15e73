//! Tests for `plan` module

use super::*;
use crate::catalog::Catalog;
use crate::config::{CodecConfig, WriterConfig};
use crate::error::Error;
use crate::expr::Predicate;
use crate::schema::{Column, Schema};
use crate::storage::MemoryKvStore;
use crate::value::{ColumnType, Row, Value};
use crate::writer::PartitionWriter;
use std::sync::Arc;

fn setup() -> Arc<Catalog> {
    let catalog = Arc::new(Catalog::open(Arc::new(MemoryKvStore::new())).expect("catalog"));
    catalog
        .create_table(
            Schema::new(
                "events",
                vec![
                    Column::new("id", ColumnType::Int),
                    Column::new("tag", ColumnType::String).indexed(),
                    Column::new("user_id", ColumnType::Int),
                ],
            )
            .expect("schema"),
        )
        .expect("create events");
    catalog
        .create_table(
            Schema::new(
                "users",
                vec![
                    Column::new("id", ColumnType::Int),
                    Column::new("name", ColumnType::String),
                ],
            )
            .expect("schema"),
        )
        .expect("create users");
    catalog
}

/// Writes `rows` into `table`, `per_partition` rows per flush.
fn load(catalog: &Arc<Catalog>, table: &str, rows: Vec<Row>, per_partition: usize) {
    let limits = WriterConfig {
        max_rows: per_partition,
        ..WriterConfig::default()
    };
    let mut writer = PartitionWriter::new(Arc::clone(catalog), table, limits, CodecConfig::default())
        .expect("writer");
    for row in rows {
        writer.append(row).expect("append");
    }
    writer.close().expect("close");
}

fn event(id: i64, tag: &str, user: i64) -> Row {
    vec![Value::Int(id), Value::from(tag), Value::Int(user)]
}

fn user(id: i64, name: &str) -> Row {
    vec![Value::Int(id), Value::from(name)]
}

fn count(plan: &Plan, name: &str) -> usize {
    plan.stages_named(name).count()
}

#[test]
fn test_single_table_plan_scans_each_partition_then_merges() {
    // Arrange
    let catalog = setup();
    load(&catalog, "events", (0..6).map(|i| event(i, "a", 1)).collect(), 3);
    let planner = Planner::new(Arc::clone(&catalog), 4);

    // Act
    let plan = planner.plan(&Query::from("events")).expect("plan");

    // Assert
    assert_eq!(count(&plan, "scan"), 2);
    assert_eq!(count(&plan, "merge"), 1);
    assert_eq!(count(&plan, "finalize"), 0);
    assert_eq!(plan.columns, vec!["id", "tag", "user_id"]);
    let merge = &plan.stages[plan.output];
    assert_eq!(merge.op.name(), "merge");
    assert_eq!(merge.deps, vec![0, 1]);
    assert!(plan.explain().contains("scan events#"));
}

#[test]
fn test_plan_skips_partitions_excluded_by_statistics() {
    // Arrange
    let catalog = setup();
    load(&catalog, "events", (0..200).map(|i| event(i, "a", 1)).collect(), 100);
    let planner = Planner::new(catalog, 4);

    // Act
    let plan = planner
        .plan(&Query::from("events").filter(Predicate::gte("id", 150)))
        .expect("plan");

    // Assert
    assert_eq!(count(&plan, "scan"), 1);
    assert_eq!(plan.pruned_partitions, 1);
    let StageOp::Scan(scan) = &plan.stages[0].op else {
        panic!("expected a scan, got {:?}", plan.stages[0].op);
    };
    assert_eq!(scan.partition.column("id").and_then(|c| c.min.clone()), Some(Value::Int(100)));
}

#[test]
fn test_plan_skips_partitions_whose_index_lacks_the_value() {
    // Arrange: tag range a..c covers "b" but no row holds it
    let catalog = setup();
    load(
        &catalog,
        "events",
        vec![event(1, "a", 1), event(2, "c", 1), event(3, "b", 1), event(4, "b", 1)],
        2,
    );
    let planner = Planner::new(catalog, 4);

    // Act
    let plan = planner
        .plan(&Query::from("events").filter(Predicate::eq("tag", "b")))
        .expect("plan");

    // Assert
    assert_eq!(count(&plan, "scan"), 1);
    assert_eq!(plan.pruned_partitions, 1);
}

#[test]
fn test_plan_rejects_unknown_tables_and_columns() {
    let planner = Planner::new(setup(), 4);

    let unknown_table = planner.plan(&Query::from("nope"));
    let unknown_column = planner.plan(&Query::from("events").select(["missing"]));
    let unknown_filter =
        planner.plan(&Query::from("events").filter(Predicate::eq("missing", 1)));
    let foreign_filter = planner.plan(
        &Query::from("events").filter_table("users", Predicate::eq("id", 1)),
    );

    assert!(matches!(unknown_table, Err(Error::UnresolvableScan { .. })));
    assert!(matches!(unknown_column, Err(Error::UnresolvableScan { .. })));
    assert!(matches!(unknown_filter, Err(Error::UnresolvableScan { .. })));
    assert!(matches!(foreign_filter, Err(Error::UnresolvableScan { .. })));
}

#[test]
fn test_join_plan_shuffles_both_sides_into_buckets() {
    // Arrange
    let catalog = setup();
    load(&catalog, "events", (0..4).map(|i| event(i, "a", i % 2)).collect(), 2);
    load(&catalog, "users", vec![user(0, "ann"), user(1, "bob")], 10);
    let planner = Planner::new(catalog, 4);
    let query = Query::from("events")
        .join("users", JoinSpec::inner("events.user_id", "users.id"))
        .select(["events.id", "users.name"]);

    // Act
    let plan = planner.plan(&query).expect("plan");

    // Assert
    assert_eq!(count(&plan, "shuffle"), 3);
    assert_eq!(count(&plan, "join"), 4);
    assert!(plan.stages_named("join").all(|s| s.deps.len() == 3));
    let StageOp::Join { left_inputs, left_width, right_width, .. } =
        &plan.stages_named("join").next().expect("join").op
    else {
        panic!("expected a join");
    };
    assert_eq!(*left_inputs, 2);
    assert_eq!((*left_width, *right_width), (2, 2));
    assert_eq!(plan.columns, vec!["events.id", "users.name"]);
}

#[test]
fn test_join_keys_may_be_given_in_either_order() {
    let planner = Planner::new(setup(), 2);
    let query = Query::from("events").join("users", JoinSpec::inner("users.id", "user_id"));

    let plan = planner.plan(&query).expect("plan");

    assert_eq!(count(&plan, "join"), 2);
    assert_eq!(plan.columns.len(), 5);
}

#[test]
fn test_join_rejects_unsupported_shapes() {
    let planner = Planner::new(setup(), 2);

    let mismatched =
        planner.plan(&Query::from("events").join("users", JoinSpec::inner("events.id", "users.name")));
    let same_side =
        planner.plan(&Query::from("events").join("users", JoinSpec::inner("events.id", "events.user_id")));
    let self_join =
        planner.plan(&Query::from("events").join("events", JoinSpec::inner("id", "id")));
    let mut cross = Query::from("events");
    cross.tables.push("users".to_string());

    assert!(matches!(mismatched, Err(Error::UnsupportedJoin(_))));
    assert!(matches!(same_side, Err(Error::UnsupportedJoin(_))));
    assert!(matches!(self_join, Err(Error::UnsupportedJoin(_))));
    assert!(matches!(planner.plan(&cross), Err(Error::UnsupportedJoin(_))));
}

#[test]
fn test_ambiguous_column_in_join_is_invalid() {
    let planner = Planner::new(setup(), 2);
    let query = Query::from("events")
        .join("users", JoinSpec::inner("events.user_id", "users.id"))
        .select(["id"]);

    assert!(matches!(planner.plan(&query), Err(Error::InvalidQuery(_))));
}

#[test]
fn test_aggregate_plan_has_partial_per_partition_and_one_merge() {
    // Arrange
    let catalog = setup();
    load(&catalog, "events", (0..9).map(|i| event(i, "a", 1)).collect(), 3);
    let planner = Planner::new(catalog, 4);
    let query = Query::from("events").select(vec![
        Projection::col("tag"),
        Projection::count(),
        Projection::sum("id"),
    ]);

    // Act
    let plan = planner.plan(&query).expect("plan");

    // Assert
    assert_eq!(count(&plan, "scan"), 3);
    assert_eq!(count(&plan, "partial_aggregate"), 3);
    assert_eq!(count(&plan, "merge_aggregate"), 1);
    assert_eq!(plan.columns, vec!["tag", "count(*)", "sum(id)"]);
    let StageOp::MergeAggregate { global, output, .. } = &plan.stages[plan.output].op else {
        panic!("expected merge_aggregate at the output");
    };
    assert!(!global);
    assert_eq!(
        output,
        &vec![OutputSlot::Group(0), OutputSlot::Aggregate(0), OutputSlot::Aggregate(1)]
    );
}

#[test]
fn test_invalid_aggregates_and_order_keys() {
    let planner = Planner::new(setup(), 4);

    let sum_of_text = planner.plan(&Query::from("events").select(vec![Projection::sum("tag")]));
    let star_with_count = planner.plan(
        &Query::from("events").select(vec![Projection::star("events"), Projection::count()]),
    );
    let unprojected_order = planner.plan(&Query::from("events").select(["id"]).order_by(["tag"]));
    let position_past_end = planner.plan(&Query::from("events").select(["id"]).order_by([3usize]));

    assert!(matches!(sum_of_text, Err(Error::InvalidQuery(_))));
    assert!(matches!(star_with_count, Err(Error::InvalidQuery(_))));
    assert!(matches!(unprojected_order, Err(Error::InvalidQuery(_))));
    assert!(matches!(position_past_end, Err(Error::InvalidQuery(_))));
}

#[test]
fn test_order_by_aggregate_output_name() {
    // Arrange
    let catalog = setup();
    load(&catalog, "events", vec![event(1, "a", 1), event(2, "b", 1)], 10);
    let planner = Planner::new(catalog, 4);
    let query = |key: &str| {
        Query::from("events")
            .select(vec![Projection::col("tag"), Projection::sum("id"), Projection::count()])
            .order_by([key])
            .desc()
    };

    // Act
    let by_sum = planner.plan(&query("sum(id)")).expect("plan");
    let by_count = planner.plan(&query("count(*)")).expect("plan");
    let unknown = planner.plan(&query("max(id)"));

    // Assert
    for (plan, expected) in [(&by_sum, 1), (&by_count, 2)] {
        let StageOp::Finalize(spec) = &plan.stages[plan.output].op else {
            panic!("expected finalize at the output");
        };
        assert_eq!(spec.order_by, vec![expected]);
    }
    assert!(unknown.is_err());
    assert_eq!(
        by_sum.column_types,
        vec![ColumnType::String, ColumnType::Int, ColumnType::Int]
    );
}

#[test]
fn test_finalize_stage_only_when_requested() {
    // Arrange
    let catalog = setup();
    load(&catalog, "events", vec![event(1, "a", 1)], 10);
    let planner = Planner::new(catalog, 4);

    // Act
    let plain = planner.plan(&Query::from("events")).expect("plan");
    let limited = planner
        .plan(&Query::from("events").select(["tag", "id"]).order_by(["id"]).desc().limit(1))
        .expect("plan");

    // Assert
    assert_eq!(count(&plain, "finalize"), 0);
    let StageOp::Finalize(spec) = &limited.stages[limited.output].op else {
        panic!("expected finalize at the output");
    };
    assert_eq!(spec.order_by, vec![1]);
    assert!(spec.descending);
    assert_eq!(spec.limit, Some(1));
}

#[test]
fn test_empty_table_plans_a_merge_without_inputs() {
    let planner = Planner::new(setup(), 4);

    let plan = planner.plan(&Query::from("users")).expect("plan");

    assert_eq!(plan.stages.len(), 1);
    assert!(plan.stages[0].deps.is_empty());
    assert_eq!(plan.columns, vec!["id", "name"]);
}
