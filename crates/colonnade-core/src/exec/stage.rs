//! Stage operators. Each one is a pure function of its inputs and of
//! immutable partition data.

use super::aggregate::{Accumulator, GroupState};
use super::ExecStats;
use crate::catalog::{Catalog, PartitionDescriptor};
use crate::codec::ColumnBlock;
use crate::error::{Error, Result};
use crate::index::BitmapIndex;
use crate::plan::{AggregateFunc, AggregateSpec, FinalizeSpec, JoinKind, OutputSlot, ScanSpec, StageOp};
use crate::value::{Row, Value};
use indexmap::map::Entry;
use indexmap::{IndexMap, IndexSet};
use rustc_hash::FxHashMap;
use std::cmp::Ordering;
use std::sync::Arc;

/// Selections at or under this size are materialized by point decodes.
pub const POINT_LOOKUP_LIMIT: usize = 64;

static NULL: Value = Value::Null;

/// Data produced by a stage.
#[derive(Debug, Clone, PartialEq)]
pub enum StageData {
    /// Plain rows.
    Rows(Vec<Row>),
    /// Rows routed to hash buckets.
    Buckets(Vec<Vec<Row>>),
    /// Partial aggregation states.
    Groups(Vec<GroupState>),
}

/// Output of one stage, with the work it took.
#[derive(Debug, Clone, PartialEq)]
pub struct StageOutput {
    /// Produced data.
    pub data: StageData,
    /// Counters for this stage only.
    pub stats: ExecStats,
}

impl StageOutput {
    fn rows(rows: Vec<Row>, stats: ExecStats) -> Self {
        Self {
            data: StageData::Rows(rows),
            stats,
        }
    }

    /// Number of rows (or groups) carried.
    #[must_use]
    pub fn len(&self) -> usize {
        match &self.data {
            StageData::Rows(rows) => rows.len(),
            StageData::Buckets(buckets) => buckets.iter().map(Vec::len).sum(),
            StageData::Groups(groups) => groups.len(),
        }
    }

    /// True when nothing was produced.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn as_rows(&self) -> Result<&[Row]> {
        match &self.data {
            StageData::Rows(rows) => Ok(rows),
            other => Err(unexpected("rows", other)),
        }
    }

    fn bucket(&self, bucket: usize) -> Result<&[Row]> {
        match &self.data {
            StageData::Buckets(buckets) => Ok(buckets.get(bucket).map_or(&[][..], Vec::as_slice)),
            other => Err(unexpected("buckets", other)),
        }
    }

    fn groups(&self) -> Result<&[GroupState]> {
        match &self.data {
            StageData::Groups(groups) => Ok(groups),
            other => Err(unexpected("groups", other)),
        }
    }
}

fn unexpected(wanted: &str, got: &StageData) -> Error {
    let got = match got {
        StageData::Rows(_) => "rows",
        StageData::Buckets(_) => "buckets",
        StageData::Groups(_) => "groups",
    };
    Error::Internal(format!("stage input holds {got}, expected {wanted}"))
}

/// Runs one stage operation over its inputs.
pub(crate) fn run(op: &StageOp, inputs: &[Arc<StageOutput>], catalog: &Catalog) -> Result<StageOutput> {
    match op {
        StageOp::Scan(spec) => {
            let (rows, stats) = scan(catalog, spec)?;
            Ok(StageOutput::rows(rows, stats))
        }
        StageOp::Shuffle { scan: spec, key, buckets } => {
            let (rows, stats) = scan(catalog, spec)?;
            Ok(StageOutput {
                data: StageData::Buckets(shuffle(rows, *key, *buckets)),
                stats,
            })
        }
        StageOp::Join {
            bucket,
            kind,
            left_inputs,
            left_key,
            right_key,
            left_width,
            right_width,
        } => {
            let split = (*left_inputs).min(inputs.len());
            let (left, right) = inputs.split_at(split);
            let left = collect_bucket(left, *bucket)?;
            let right = collect_bucket(right, *bucket)?;
            let rows = hash_join(
                &left,
                &right,
                *kind,
                (*left_key, *right_key),
                (*left_width, *right_width),
            );
            Ok(StageOutput::rows(rows, ExecStats::default()))
        }
        StageOp::PartialAggregate(spec) => {
            let mut rows = Vec::new();
            for input in inputs {
                rows.extend(input.as_rows()?);
            }
            Ok(StageOutput {
                data: StageData::Groups(partial_aggregate(spec, rows)),
                stats: ExecStats::default(),
            })
        }
        StageOp::MergeAggregate {
            aggregates,
            global,
            output,
        } => {
            let rows = merge_aggregate(inputs, aggregates, *global, output)?;
            Ok(StageOutput::rows(rows, ExecStats::default()))
        }
        StageOp::Merge { project } => {
            let mut rows = Vec::new();
            for input in inputs {
                rows.extend(input.as_rows()?.iter().map(|row| {
                    project
                        .iter()
                        .map(|&i| row.get(i).unwrap_or(&NULL).clone())
                        .collect::<Row>()
                }));
            }
            Ok(StageOutput::rows(rows, ExecStats::default()))
        }
        StageOp::Finalize(spec) => {
            let mut rows = Vec::new();
            for input in inputs {
                rows.extend_from_slice(input.as_rows()?);
            }
            Ok(StageOutput::rows(finalize(rows, spec), ExecStats::default()))
        }
    }
}

fn column_block(catalog: &Catalog, partition: &PartitionDescriptor, column: &str) -> Result<ColumnBlock> {
    let meta = partition.column(column).ok_or_else(|| {
        Error::CorruptBlock(format!(
            "partition {} of '{}' has no column '{column}'",
            partition.id, partition.table
        ))
    })?;
    let block = catalog.read_block(meta)?;
    if block.row_count() as u64 != partition.row_count {
        return Err(Error::CorruptBlock(format!(
            "block '{}' holds {} rows, partition {} has {}",
            meta.block_key,
            block.row_count(),
            partition.id,
            partition.row_count
        )));
    }
    Ok(block)
}

/// Filters and projects one partition.
///
/// Rows are resolved from bitmap indexes when every predicate column is
/// indexed; otherwise the predicate columns are decoded in full. Output
/// columns of a small selection are then read with point decodes.
fn scan(catalog: &Catalog, spec: &ScanSpec) -> Result<(Vec<Row>, ExecStats)> {
    let partition = &spec.partition;
    let row_count = usize::try_from(partition.row_count)
        .map_err(|_| Error::Internal(format!("partition {} is too large", partition.id)))?;
    let mut stats = ExecStats {
        partitions_scanned: 1,
        rows_scanned: partition.row_count,
        ..ExecStats::default()
    };

    let mut decoded: FxHashMap<String, Vec<Value>> = FxHashMap::default();
    let positions: Vec<usize> = match &spec.predicate {
        None => (0..row_count).collect(),
        Some(predicate) => {
            let mut indexes: FxHashMap<String, BitmapIndex> = FxHashMap::default();
            for column in predicate.columns() {
                if let Some(meta) = partition.column(column) {
                    if let Some(index) = catalog.read_index(meta)? {
                        indexes.insert(column.to_string(), index);
                    }
                }
            }

            match predicate.evaluate_index(&|column: &str| indexes.get(column)) {
                Some(rows) => {
                    stats.index_resolved_scans += 1;
                    rows.iter()
                        .map(|row| row as usize)
                        .filter(|&row| row < row_count)
                        .collect()
                }
                None => {
                    for column in predicate.columns() {
                        let values = column_block(catalog, partition, column)?.decode()?;
                        stats.full_decodes += 1;
                        decoded.insert(column.to_string(), values);
                    }
                    (0..row_count)
                        .filter(|&row| {
                            predicate.matches_with(&|column: &str| {
                                decoded.get(column).and_then(|values| values.get(row))
                            })
                        })
                        .collect()
                }
            }
        }
    };

    let point = spec.predicate.is_some()
        && positions.len() <= POINT_LOOKUP_LIMIT.max(row_count / 16);
    let mut columns: Vec<Vec<Value>> = Vec::with_capacity(spec.columns.len());
    for column in &spec.columns {
        if let Some(values) = decoded.get(column) {
            columns.push(positions.iter().map(|&row| values[row].clone()).collect());
        } else if positions.is_empty() {
            columns.push(Vec::new());
        } else if point {
            let block = column_block(catalog, partition, column)?;
            stats.point_decodes += positions.len() as u64;
            columns.push(block.decode_positions(&positions)?);
        } else {
            let values = column_block(catalog, partition, column)?.decode()?;
            stats.full_decodes += 1;
            columns.push(positions.iter().map(|&row| values[row].clone()).collect());
        }
    }

    let mut rows: Vec<Row> = (0..positions.len())
        .map(|_| Vec::with_capacity(spec.columns.len()))
        .collect();
    for values in columns {
        for (row, value) in rows.iter_mut().zip(values) {
            row.push(value);
        }
    }

    tracing::trace!(
        table = %spec.table,
        partition = partition.id,
        selected = rows.len(),
        point,
        "Scanned partition"
    );
    Ok((rows, stats))
}

/// Bucket a key value routes to.
pub(crate) fn bucket_of(key: &Value, buckets: usize) -> usize {
    (key.stable_hash() % buckets.max(1) as u64) as usize
}

fn shuffle(rows: Vec<Row>, key: usize, buckets: usize) -> Vec<Vec<Row>> {
    let mut out = vec![Vec::new(); buckets.max(1)];
    for row in rows {
        let bucket = bucket_of(row.get(key).unwrap_or(&NULL), buckets);
        out[bucket].push(row);
    }
    out
}

fn collect_bucket(inputs: &[Arc<StageOutput>], bucket: usize) -> Result<Vec<&Row>> {
    let mut rows = Vec::new();
    for input in inputs {
        rows.extend(input.bucket(bucket)?);
    }
    Ok(rows)
}

/// Equi-join of two row sets. Null keys never match; unmatched rows of a
/// preserved side are padded with nulls.
fn hash_join(
    left: &[&Row],
    right: &[&Row],
    kind: JoinKind,
    (left_key, right_key): (usize, usize),
    (left_width, right_width): (usize, usize),
) -> Vec<Row> {
    let mut table: FxHashMap<&Value, Vec<usize>> = FxHashMap::default();
    for (idx, row) in right.iter().enumerate() {
        match row.get(right_key) {
            Some(key) if !key.is_null() => table.entry(key).or_default().push(idx),
            _ => {}
        }
    }

    let concat = |l: Option<&Row>, r: Option<&Row>| -> Row {
        let mut row = Vec::with_capacity(left_width + right_width);
        match l {
            Some(l) => row.extend(l.iter().cloned()),
            None => row.resize(left_width, Value::Null),
        }
        match r {
            Some(r) => row.extend(r.iter().cloned()),
            None => row.resize(left_width + right_width, Value::Null),
        }
        row
    };

    let mut out = Vec::new();
    let mut matched = vec![false; right.len()];
    for &l in left {
        let matches = l
            .get(left_key)
            .filter(|key| !key.is_null())
            .and_then(|key| table.get(key));
        match matches {
            Some(matches) => {
                for &idx in matches {
                    matched[idx] = true;
                    out.push(concat(Some(l), Some(right[idx])));
                }
            }
            None if kind.keeps_left() => out.push(concat(Some(l), None)),
            None => {}
        }
    }
    if kind.keeps_right() {
        for (idx, &r) in right.iter().enumerate() {
            if !matched[idx] {
                out.push(concat(None, Some(r)));
            }
        }
    }
    out
}

fn new_states(aggregates: impl IntoIterator<Item = AggregateFunc>) -> Vec<Accumulator> {
    aggregates.into_iter().map(Accumulator::new).collect()
}

fn partial_aggregate<'a>(spec: &AggregateSpec, rows: impl IntoIterator<Item = &'a Row>) -> Vec<GroupState> {
    let mut groups: IndexMap<Row, Vec<Accumulator>> = IndexMap::new();
    for row in rows {
        let key: Row = spec
            .group_by
            .iter()
            .map(|&i| row.get(i).unwrap_or(&NULL).clone())
            .collect();
        let states = groups
            .entry(key)
            .or_insert_with(|| new_states(spec.aggregates.iter().map(|(f, _)| *f)));
        for (state, (_, arg)) in states.iter_mut().zip(&spec.aggregates) {
            state.update(arg.map(|i| row.get(i).unwrap_or(&NULL)));
        }
    }
    groups
        .into_iter()
        .map(|(key, accumulators)| GroupState { key, accumulators })
        .collect()
}

fn merge_aggregate(
    inputs: &[Arc<StageOutput>],
    aggregates: &[AggregateFunc],
    global: bool,
    output: &[OutputSlot],
) -> Result<Vec<Row>> {
    let mut groups: IndexMap<Row, Vec<Accumulator>> = IndexMap::new();
    for input in inputs {
        for group in input.groups()? {
            match groups.entry(group.key.clone()) {
                Entry::Occupied(mut entry) => {
                    for (state, other) in entry.get_mut().iter_mut().zip(&group.accumulators) {
                        state.merge(other.clone());
                    }
                }
                Entry::Vacant(entry) => {
                    entry.insert(group.accumulators.clone());
                }
            }
        }
    }
    if global && groups.is_empty() {
        groups.insert(Vec::new(), new_states(aggregates.iter().copied()));
    }

    Ok(groups
        .into_iter()
        .map(|(key, states)| {
            let values: Vec<Value> = states.into_iter().map(Accumulator::finish).collect();
            output
                .iter()
                .map(|slot| match slot {
                    OutputSlot::Group(i) => key.get(*i).unwrap_or(&NULL).clone(),
                    OutputSlot::Aggregate(j) => values.get(*j).unwrap_or(&NULL).clone(),
                })
                .collect()
        })
        .collect())
}

fn finalize(mut rows: Vec<Row>, spec: &FinalizeSpec) -> Vec<Row> {
    if spec.distinct {
        let unique: IndexSet<Row> = rows.into_iter().collect();
        rows = unique.into_iter().collect();
    }
    if !spec.order_by.is_empty() {
        rows.sort_by(|a, b| {
            let ord = spec
                .order_by
                .iter()
                .map(|&i| a.get(i).cmp(&b.get(i)))
                .find(|o| o.is_ne())
                .unwrap_or(Ordering::Equal);
            if spec.descending {
                ord.reverse()
            } else {
                ord
            }
        });
    }
    rows.into_iter()
        .skip(spec.offset)
        .take(spec.limit.unwrap_or(usize::MAX))
        .collect()
}
