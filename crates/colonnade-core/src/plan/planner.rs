//! Turns a [`Query`] into a stage DAG.

use super::query::{AggregateFunc, ColumnRef, JoinSpec, OrderKey, Projection, Query};
use super::{AggregateSpec, FinalizeSpec, OutputSlot, Plan, ScanSpec, Stage, StageId, StageOp};
use crate::catalog::{Catalog, PartitionDescriptor};
use crate::error::{Error, Result};
use crate::expr::Predicate;
use crate::index::BitmapIndex;
use crate::schema::Schema;
use crate::value::ColumnType;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Builds execution plans against a catalog snapshot.
#[derive(Debug, Clone)]
pub struct Planner {
    catalog: Arc<Catalog>,
    join_buckets: usize,
}

/// A resolved select-list item.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Item {
    Column(usize, String),
    Aggregate(AggregateFunc, Option<(usize, String)>),
}

/// Tables visible to a query and their schemas.
struct Scope {
    tables: Vec<(String, Arc<Schema>)>,
}

impl Scope {
    fn joined(&self) -> bool {
        self.tables.len() > 1
    }

    fn position(&self, table: &str) -> Option<usize> {
        self.tables.iter().position(|(name, _)| name == table)
    }

    /// Resolves a column reference to `(table position, column name)`.
    fn resolve(&self, column: &ColumnRef) -> Result<(usize, String)> {
        if let Some(table) = &column.table {
            let idx = self.position(table).ok_or_else(|| {
                Error::unresolvable(table, "table is not part of the query")
            })?;
            if self.tables[idx].1.column(&column.column).is_none() {
                return Err(Error::unresolvable(
                    table,
                    format!("no column '{}'", column.column),
                ));
            }
            return Ok((idx, column.column.clone()));
        }

        let owners: Vec<usize> = self
            .tables
            .iter()
            .enumerate()
            .filter(|(_, (_, schema))| schema.column(&column.column).is_some())
            .map(|(idx, _)| idx)
            .collect();
        match owners.as_slice() {
            [idx] => Ok((*idx, column.column.clone())),
            [] => Err(Error::unresolvable(
                &self.tables[0].0,
                format!("no column '{}'", column.column),
            )),
            _ => Err(Error::InvalidQuery(format!(
                "column '{}' is ambiguous, qualify it with a table",
                column.column
            ))),
        }
    }

    fn display(&self, table: usize, column: &str) -> String {
        if self.joined() {
            format!("{}.{column}", self.tables[table].0)
        } else {
            column.to_string()
        }
    }
}

/// Per-table list of columns the scans must emit.
struct Layout {
    columns: Vec<Vec<String>>,
}

impl Layout {
    fn new(tables: usize) -> Self {
        Self {
            columns: vec![Vec::new(); tables],
        }
    }

    /// Position of `column` within its table's scan rows, adding it if new.
    fn slot(&mut self, table: usize, column: &str) -> usize {
        let columns = &mut self.columns[table];
        match columns.iter().position(|c| c == column) {
            Some(pos) => pos,
            None => {
                columns.push(column.to_string());
                columns.len() - 1
            }
        }
    }

    /// Position of a registered column in the concatenated row of every
    /// table. Only stable once every column has been registered.
    fn working(&self, table: usize, column: &str) -> usize {
        let offset: usize = self.columns[..table].iter().map(Vec::len).sum();
        offset
            + self.columns[table]
                .iter()
                .position(|c| c == column)
                .unwrap_or_default()
    }
}

#[derive(Default)]
struct StageGraph {
    stages: Vec<Stage>,
}

impl StageGraph {
    fn push(&mut self, op: StageOp, deps: Vec<StageId>) -> StageId {
        let id = self.stages.len();
        self.stages.push(Stage { id, op, deps });
        id
    }
}

impl Planner {
    /// Creates a planner; joins use `join_buckets` hash buckets (at least one).
    #[must_use]
    pub fn new(catalog: Arc<Catalog>, join_buckets: usize) -> Self {
        Self {
            catalog,
            join_buckets: join_buckets.max(1),
        }
    }

    /// Plans `query` against the current catalog snapshot.
    ///
    /// # Errors
    ///
    /// - `UnresolvableScan` for an unknown table or column
    /// - `UnsupportedJoin` when the join does not name exactly two distinct
    ///   tables or its key types differ
    /// - `InvalidQuery` for an ambiguous column, a misplaced star or order
    ///   key, or `sum`/`avg` over a non-numeric column
    pub fn plan(&self, query: &Query) -> Result<Plan> {
        let scope = self.scope(query)?;
        self.check_filters(query, &scope)?;

        let items = expand_projection(query, &scope)?;
        let columns: Vec<String> = items.iter().map(|item| output_name(item, &scope)).collect();
        let column_types: Vec<ColumnType> = items.iter().map(|item| output_type(item, &scope)).collect();
        let finalize = finalize_spec(query, &scope, &items, &columns)?;
        let aggregated = items.iter().any(|i| matches!(i, Item::Aggregate(..)));

        let mut layout = Layout::new(scope.tables.len());
        let join_keys = match &query.join {
            Some(spec) => {
                let (left, right) = self.join_keys(spec, &scope)?;
                Some((layout.slot(0, &left), layout.slot(1, &right)))
            }
            None => None,
        };

        let mut pruned = 0;
        let mut partitions = Vec::with_capacity(scope.tables.len());
        for (table, _) in &scope.tables {
            let predicate = query.predicate_for(table);
            let (kept, skipped) = self.surviving_partitions(table, predicate.as_ref())?;
            pruned += skipped;
            partitions.push((predicate, kept));
        }

        for item in &items {
            match item {
                Item::Column(table, column) | Item::Aggregate(_, Some((table, column))) => {
                    layout.slot(*table, column);
                }
                Item::Aggregate(_, None) => {}
            }
        }

        let mut project = Vec::new();
        let mut aggregate = AggregateSpec {
            group_by: Vec::new(),
            aggregates: Vec::new(),
        };
        let mut slots = Vec::with_capacity(items.len());
        for item in &items {
            match item {
                Item::Column(table, column) => {
                    let pos = layout.working(*table, column);
                    project.push(pos);
                    slots.push(OutputSlot::Group(aggregate.group_by.len()));
                    aggregate.group_by.push(pos);
                }
                Item::Aggregate(func, arg) => {
                    let pos = arg
                        .as_ref()
                        .map(|(table, column)| layout.working(*table, column));
                    slots.push(OutputSlot::Aggregate(aggregate.aggregates.len()));
                    aggregate.aggregates.push((*func, pos));
                }
            }
        }

        let mut graph = StageGraph::default();
        let scan = |table: usize, partition: &Arc<PartitionDescriptor>| ScanSpec {
            table: scope.tables[table].0.clone(),
            partition: Arc::clone(partition),
            predicate: partitions[table].0.clone(),
            columns: layout.columns[table].clone(),
        };

        let producers: Vec<StageId> = match join_keys {
            None => partitions[0]
                .1
                .iter()
                .map(|p| graph.push(StageOp::Scan(scan(0, p)), Vec::new()))
                .collect(),
            Some((left_key, right_key)) => {
                let shuffle = |graph: &mut StageGraph, table: usize, key: usize| -> Vec<StageId> {
                    partitions[table]
                        .1
                        .iter()
                        .map(|p| {
                            graph.push(
                                StageOp::Shuffle {
                                    scan: scan(table, p),
                                    key,
                                    buckets: self.join_buckets,
                                },
                                Vec::new(),
                            )
                        })
                        .collect()
                };
                let left = shuffle(&mut graph, 0, left_key);
                let right = shuffle(&mut graph, 1, right_key);
                let kind = query.join.as_ref().map(|j| j.kind).unwrap_or_default();
                let deps: Vec<StageId> = left.iter().chain(&right).copied().collect();
                (0..self.join_buckets)
                    .map(|bucket| {
                        graph.push(
                            StageOp::Join {
                                bucket,
                                kind,
                                left_inputs: left.len(),
                                left_key,
                                right_key,
                                left_width: layout.columns[0].len(),
                                right_width: layout.columns[1].len(),
                            },
                            deps.clone(),
                        )
                    })
                    .collect()
            }
        };

        let mut output = if aggregated {
            let partials: Vec<StageId> = producers
                .iter()
                .map(|&p| graph.push(StageOp::PartialAggregate(aggregate.clone()), vec![p]))
                .collect();
            graph.push(
                StageOp::MergeAggregate {
                    aggregates: aggregate.aggregates.iter().map(|(f, _)| *f).collect(),
                    global: aggregate.group_by.is_empty(),
                    output: slots,
                },
                partials,
            )
        } else {
            graph.push(StageOp::Merge { project }, producers)
        };
        if !finalize.is_noop() {
            output = graph.push(StageOp::Finalize(finalize), vec![output]);
        }

        tracing::debug!(
            tables = ?query.tables,
            stages = graph.stages.len(),
            pruned,
            aggregated,
            "Planned query"
        );
        Ok(Plan {
            stages: graph.stages,
            output,
            columns,
            column_types,
            pruned_partitions: pruned,
        })
    }

    fn scope(&self, query: &Query) -> Result<Scope> {
        let tables = &query.tables;
        if tables.is_empty() {
            return Err(Error::InvalidQuery("query names no table".to_string()));
        }
        match (&query.join, tables.len()) {
            (None, 1) => {}
            (Some(_), 2) if tables[0] != tables[1] => {}
            (Some(_), _) => {
                return Err(Error::UnsupportedJoin(format!(
                    "a join needs exactly two distinct tables, got {tables:?}"
                )))
            }
            (None, _) => {
                return Err(Error::UnsupportedJoin(format!(
                    "tables {tables:?} are not joined on a key"
                )))
            }
        }

        let tables = tables
            .iter()
            .map(|table| match self.catalog.schema(table) {
                Ok(schema) => Ok((table.clone(), schema)),
                Err(Error::TableNotFound(_)) => Err(Error::unresolvable(table, "unknown table")),
                Err(e) => Err(e),
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Scope { tables })
    }

    fn check_filters(&self, query: &Query, scope: &Scope) -> Result<()> {
        for filter in &query.filters {
            let idx = scope.position(&filter.table).ok_or_else(|| {
                Error::unresolvable(&filter.table, "filtered table is not part of the query")
            })?;
            let schema = &scope.tables[idx].1;
            if let Some(missing) = filter
                .predicate
                .columns()
                .into_iter()
                .find(|c| schema.column(c).is_none())
            {
                return Err(Error::unresolvable(
                    &filter.table,
                    format!("predicate references unknown column '{missing}'"),
                ));
            }
        }
        Ok(())
    }

    /// Resolves the join keys to `(left column, right column)`.
    fn join_keys(&self, spec: &JoinSpec, scope: &Scope) -> Result<(String, String)> {
        let a = scope.resolve(&spec.left)?;
        let b = scope.resolve(&spec.right)?;
        let ((_, left), (_, right)) = match (a.0, b.0) {
            (0, 1) => (a, b),
            (1, 0) => (b, a),
            _ => {
                return Err(Error::UnsupportedJoin(format!(
                    "join keys {} and {} must come from different tables",
                    spec.left, spec.right
                )))
            }
        };

        let left_type = scope.tables[0].1.column(&left).map(|c| c.column_type);
        let right_type = scope.tables[1].1.column(&right).map(|c| c.column_type);
        if left_type != right_type {
            return Err(Error::UnsupportedJoin(format!(
                "key types differ: {}.{left} is {}, {}.{right} is {}",
                scope.tables[0].0,
                left_type.map_or("?", |t| t.name()),
                scope.tables[1].0,
                right_type.map_or("?", |t| t.name()),
            )));
        }
        Ok((left, right))
    }

    /// Partitions of `table` that survive statistics and index pruning,
    /// with the number skipped.
    fn surviving_partitions(
        &self,
        table: &str,
        predicate: Option<&Predicate>,
    ) -> Result<(Vec<Arc<PartitionDescriptor>>, usize)> {
        let total = self.catalog.partitions(table)?.len();
        let candidates = self.catalog.list_partitions(table, predicate)?;
        let Some(predicate) = predicate else {
            return Ok((candidates, 0));
        };

        let mut kept = Vec::with_capacity(candidates.len());
        for partition in candidates {
            if self.excluded_by_index(&partition, predicate)? {
                tracing::debug!(
                    table,
                    partition = partition.id,
                    "Skipping partition, index lacks predicate values"
                );
            } else {
                kept.push(partition);
            }
        }
        let skipped = total.saturating_sub(kept.len());
        Ok((kept, skipped))
    }

    fn excluded_by_index(
        &self,
        partition: &PartitionDescriptor,
        predicate: &Predicate,
    ) -> Result<bool> {
        let mut indexes: FxHashMap<String, BitmapIndex> = FxHashMap::default();
        for column in predicate.columns() {
            if let Some(meta) = partition.column(column) {
                if let Some(index) = self.catalog.read_index(meta)? {
                    indexes.insert(column.to_string(), index);
                }
            }
        }
        if indexes.is_empty() {
            return Ok(false);
        }
        Ok(predicate.index_excludes(&|column: &str| indexes.get(column)))
    }
}

fn expand_projection(query: &Query, scope: &Scope) -> Result<Vec<Item>> {
    let star = |items: &mut Vec<Item>, table: usize| {
        for name in scope.tables[table].1.column_names() {
            items.push(Item::Column(table, name));
        }
    };

    let mut items = Vec::new();
    if query.projection.is_empty() {
        for table in 0..scope.tables.len() {
            star(&mut items, table);
        }
        return Ok(items);
    }

    let aggregated = query.projection.iter().any(Projection::is_aggregate);
    for projection in &query.projection {
        match projection {
            Projection::Column { column } => {
                let (table, name) = scope.resolve(column)?;
                items.push(Item::Column(table, name));
            }
            Projection::Star { table } => {
                if aggregated {
                    return Err(Error::InvalidQuery(
                        "star cannot be combined with aggregates".to_string(),
                    ));
                }
                let idx = scope
                    .position(table)
                    .ok_or_else(|| Error::unresolvable(table, "table is not part of the query"))?;
                star(&mut items, idx);
            }
            Projection::Aggregate { func, column } => {
                let arg = match column {
                    Some(column) => Some(scope.resolve(column)?),
                    None if *func == AggregateFunc::Count => None,
                    None => {
                        return Err(Error::InvalidQuery(format!(
                            "{}() needs a column",
                            func.name()
                        )))
                    }
                };
                if let (AggregateFunc::Sum | AggregateFunc::Avg, Some((table, name))) = (func, &arg)
                {
                    let numeric = scope.tables[*table]
                        .1
                        .column(name)
                        .is_some_and(|c| c.column_type.is_numeric());
                    if !numeric {
                        return Err(Error::InvalidQuery(format!(
                            "{}({name}) needs a numeric column",
                            func.name()
                        )));
                    }
                }
                items.push(Item::Aggregate(*func, arg));
            }
        }
    }
    Ok(items)
}

fn output_name(item: &Item, scope: &Scope) -> String {
    match item {
        Item::Column(table, column) => scope.display(*table, column),
        Item::Aggregate(func, None) => format!("{}(*)", func.name()),
        Item::Aggregate(func, Some((table, column))) => {
            format!("{}({})", func.name(), scope.display(*table, column))
        }
    }
}

fn output_type(item: &Item, scope: &Scope) -> ColumnType {
    let source = |table: usize, column: &str| {
        scope.tables[table]
            .1
            .column(column)
            .map_or(ColumnType::Int, |c| c.column_type)
    };
    match item {
        Item::Column(table, column) => source(*table, column),
        Item::Aggregate(AggregateFunc::Count, _) | Item::Aggregate(_, None) => ColumnType::Int,
        Item::Aggregate(AggregateFunc::Avg, _) => ColumnType::Float,
        Item::Aggregate(_, Some((table, column))) => source(*table, column),
    }
}

/// Order keys name a projected source column or, failing that, an output
/// column such as `sum(salary)`.
fn finalize_spec(
    query: &Query,
    scope: &Scope,
    items: &[Item],
    columns: &[String],
) -> Result<FinalizeSpec> {
    let order_by = query
        .order_by
        .iter()
        .map(|key| match key {
            OrderKey::Position { index } if *index < items.len() => Ok(*index),
            OrderKey::Position { index } => Err(Error::InvalidQuery(format!(
                "order by position {index} is past the {} output columns",
                items.len()
            ))),
            OrderKey::Column { column } => {
                let resolved = scope.resolve(column).map(|(table, name)| {
                    let target = Item::Column(table, name);
                    items.iter().position(|i| *i == target)
                });
                if let Ok(Some(index)) = resolved {
                    return Ok(index);
                }
                let display = column.to_string();
                if let Some(index) = columns.iter().position(|name| *name == display) {
                    return Ok(index);
                }
                resolved.and_then(|_| {
                    Err(Error::InvalidQuery(format!(
                        "order by column {column} is not projected"
                    )))
                })
            }
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(FinalizeSpec {
        distinct: query.distinct,
        order_by,
        descending: query.descending,
        offset: query.offset,
        limit: query.limit,
    })
}
