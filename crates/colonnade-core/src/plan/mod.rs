//! Query planning: logical [`Query`] in, stage DAG ([`Plan`]) out.
//!
//! A plan is a list of [`Stage`]s with explicit dependency edges. Every stage
//! is a pure function of its inputs (and of immutable partition data), so
//! independent stages may run in any order, concurrently, or more than once.
//!
//! Stage shapes:
//!
//! ```text
//! single table      scan* ──────────────────────────────► merge ──► finalize?
//! aggregation       scan* ──► partial_aggregate* ───────► merge_aggregate ──► finalize?
//! join              shuffle(left)*  ┐
//!                   shuffle(right)* ┴► join(bucket)* ──► merge | partial/merge aggregate ──► finalize?
//! ```

mod planner;
mod query;

#[cfg(test)]
mod planner_tests;

pub use planner::Planner;
pub use query::{
    AggregateFunc, ColumnRef, JoinKind, JoinSpec, OrderKey, Projection, Query, TableFilter,
};

use crate::catalog::PartitionDescriptor;
use crate::expr::Predicate;
use crate::value::ColumnType;
use std::fmt::{self, Write as _};
use std::sync::Arc;

/// Index of a stage inside its plan.
pub type StageId = usize;

/// Reads one partition, filters it and projects columns.
#[derive(Debug, Clone)]
pub struct ScanSpec {
    /// Scanned table.
    pub table: String,
    /// Scanned partition.
    pub partition: Arc<PartitionDescriptor>,
    /// Row filter, if any.
    pub predicate: Option<Predicate>,
    /// Emitted columns, in row order.
    pub columns: Vec<String>,
}

/// Grouping and reducers of an aggregation, over the input row layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateSpec {
    /// Grouping column positions.
    pub group_by: Vec<usize>,
    /// Reducers with their argument position (`None` for `count()`).
    pub aggregates: Vec<(AggregateFunc, Option<usize>)>,
}

/// Where an aggregated output column comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputSlot {
    /// The n-th grouping value.
    Group(usize),
    /// The n-th reducer.
    Aggregate(usize),
}

/// Post-processing of the final rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FinalizeSpec {
    /// Drop duplicate rows, keeping first occurrences.
    pub distinct: bool,
    /// Sort key positions in the output row.
    pub order_by: Vec<usize>,
    /// Sort descending.
    pub descending: bool,
    /// Rows skipped after sorting.
    pub offset: usize,
    /// Maximum number of rows kept.
    pub limit: Option<usize>,
}

impl FinalizeSpec {
    fn is_noop(&self) -> bool {
        !self.distinct && self.order_by.is_empty() && self.offset == 0 && self.limit.is_none()
    }
}

/// The operation a stage performs.
#[derive(Debug, Clone)]
pub enum StageOp {
    /// Filter and project one partition.
    Scan(ScanSpec),
    /// Scan one partition and bucket its rows by the hash of column `key`.
    Shuffle {
        /// Partition read
        scan: ScanSpec,
        /// Key position in the scanned row
        key: usize,
        /// Number of buckets
        buckets: usize,
    },
    /// Hash join of one bucket. Inputs are the left shuffles followed by
    /// the right shuffles.
    Join {
        /// Bucket consumed from every input
        bucket: usize,
        /// Join flavour
        kind: JoinKind,
        /// How many inputs belong to the left side
        left_inputs: usize,
        /// Key position in left rows
        left_key: usize,
        /// Key position in right rows
        right_key: usize,
        /// Columns per left row
        left_width: usize,
        /// Columns per right row
        right_width: usize,
    },
    /// Per-input partial aggregation.
    PartialAggregate(AggregateSpec),
    /// Combines partial aggregates into output rows.
    MergeAggregate {
        /// Reducers, as in the partial stages
        aggregates: Vec<AggregateFunc>,
        /// True when the query has no grouping columns
        global: bool,
        /// Output layout
        output: Vec<OutputSlot>,
    },
    /// Concatenates input rows in dependency order and projects them.
    Merge {
        /// Input column positions, in output order
        project: Vec<usize>,
    },
    /// Distinct, order by, offset and limit.
    Finalize(FinalizeSpec),
}

impl StageOp {
    /// Short operation name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Scan(_) => "scan",
            Self::Shuffle { .. } => "shuffle",
            Self::Join { .. } => "join",
            Self::PartialAggregate(_) => "partial_aggregate",
            Self::MergeAggregate { .. } => "merge_aggregate",
            Self::Merge { .. } => "merge",
            Self::Finalize(_) => "finalize",
        }
    }
}

/// One node of the plan DAG.
#[derive(Debug, Clone)]
pub struct Stage {
    /// Position in [`Plan::stages`].
    pub id: StageId,
    /// Operation.
    pub op: StageOp,
    /// Stages whose outputs this stage consumes, in input order.
    pub deps: Vec<StageId>,
}

/// An executable stage DAG.
#[derive(Debug, Clone)]
pub struct Plan {
    /// Stages in topological order.
    pub stages: Vec<Stage>,
    /// Stage producing the result rows.
    pub output: StageId,
    /// Result column names.
    pub columns: Vec<String>,
    /// Declared type of each result column.
    pub column_types: Vec<ColumnType>,
    /// Partitions skipped by statistics or index probing.
    pub pruned_partitions: usize,
}

impl Plan {
    /// Stages with the given operation name.
    pub fn stages_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Stage> + 'a {
        self.stages.iter().filter(move |s| s.op.name() == name)
    }

    /// Human-readable rendering of the DAG, one stage per line.
    #[must_use]
    pub fn explain(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "plan: {} stages, output #{}, columns [{}], pruned {}",
            self.stages.len(),
            self.output,
            self.columns.join(", "),
            self.pruned_partitions
        );
        for stage in &self.stages {
            let _ = write!(out, "  #{} {}", stage.id, stage.op);
            if !stage.deps.is_empty() {
                let deps: Vec<String> = stage.deps.iter().map(|d| format!("#{d}")).collect();
                let _ = write!(out, " <- {}", deps.join(" "));
            }
            out.push('\n');
        }
        out
    }
}

impl fmt::Display for StageOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scan(scan) => write!(f, "scan {}", ScanDisplay(scan)),
            Self::Shuffle { scan, key, buckets } => {
                write!(f, "shuffle {} key={key} buckets={buckets}", ScanDisplay(scan))
            }
            Self::Join { bucket, kind, .. } => write!(f, "join bucket={bucket} kind={kind:?}"),
            Self::PartialAggregate(spec) => write!(
                f,
                "partial_aggregate group_by={:?} aggregates={}",
                spec.group_by,
                spec.aggregates.len()
            ),
            Self::MergeAggregate { aggregates, .. } => {
                let names: Vec<&str> = aggregates.iter().map(|a| a.name()).collect();
                write!(f, "merge_aggregate [{}]", names.join(", "))
            }
            Self::Merge { project } => write!(f, "merge project={project:?}"),
            Self::Finalize(spec) => write!(
                f,
                "finalize distinct={} order_by={:?} desc={} offset={} limit={:?}",
                spec.distinct, spec.order_by, spec.descending, spec.offset, spec.limit
            ),
        }
    }
}

struct ScanDisplay<'a>(&'a ScanSpec);

impl fmt::Display for ScanDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scan = self.0;
        write!(
            f,
            "{}#{} rows={} columns=[{}]",
            scan.table,
            scan.partition.id,
            scan.partition.row_count,
            scan.columns.join(", ")
        )?;
        if scan.predicate.is_some() {
            f.write_str(" filtered")?;
        }
        Ok(())
    }
}
