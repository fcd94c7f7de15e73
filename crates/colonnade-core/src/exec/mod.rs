//! Plan execution over a [`Substrate`].
//!
//! The [`Executor`] submits every stage whose dependencies have completed,
//! waits for whichever task finishes first and feeds completed outputs to
//! their dependents. A failed task is resubmitted up to `max_retries` times;
//! after that the remaining tasks are cancelled and the query fails as a
//! whole.

mod aggregate;
#[cfg(feature = "async")]
pub mod async_ops;
mod stage;
mod substrate;


pub use aggregate::{Accumulator, GroupState, SumState};
pub use stage::{StageData, StageOutput, POINT_LOOKUP_LIMIT};
pub use substrate::{
    Completion, LocalSubstrate, StageTask, Substrate, TaskFailure, TaskHandle, TaskResult,
};

use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::plan::{Plan, Stage, StageId};
use crate::value::Row;
use crossbeam_channel::Select;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

/// Work counters of a query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecStats {
    /// Stages completed.
    pub stages: u64,
    /// Task attempts that failed and were resubmitted.
    pub retries: u64,
    /// Partitions read by scan or shuffle stages.
    pub partitions_scanned: u64,
    /// Scans whose rows were resolved from bitmap indexes alone.
    pub index_resolved_scans: u64,
    /// Column blocks decoded in full.
    pub full_decodes: u64,
    /// Single values decoded by position.
    pub point_decodes: u64,
    /// Rows covered by the scanned partitions.
    pub rows_scanned: u64,
}

impl ExecStats {
    fn absorb(&mut self, other: &Self) {
        self.stages += other.stages;
        self.retries += other.retries;
        self.partitions_scanned += other.partitions_scanned;
        self.index_resolved_scans += other.index_resolved_scans;
        self.full_decodes += other.full_decodes;
        self.point_decodes += other.point_decodes;
        self.rows_scanned += other.rows_scanned;
    }
}

/// Rows returned by a query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    /// Column names.
    pub columns: Vec<String>,
    /// Result rows, laid out like `columns`.
    pub rows: Vec<Row>,
    /// Work done to produce them.
    pub stats: ExecStats,
}

impl QueryResult {
    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when no row matched.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a result column.
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Rows as an array of JSON objects keyed by column name.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .zip(row)
                    .map(|(name, value)| (name.clone(), value.to_json()))
                    .collect::<serde_json::Map<_, _>>()
            })
            .map(serde_json::Value::Object)
            .collect()
    }
}

/// Runs plans against a catalog through a substrate.
#[derive(Clone)]
pub struct Executor {
    catalog: Arc<Catalog>,
    substrate: Arc<dyn Substrate>,
    max_retries: u32,
}

/// Bookkeeping of one `execute` call.
struct Run {
    stages: Vec<Arc<Stage>>,
    outputs: Vec<Option<Arc<StageOutput>>>,
    pending_deps: Vec<usize>,
    pending_consumers: Vec<usize>,
    dependents: Vec<Vec<StageId>>,
    attempts: Vec<u32>,
}

impl Run {
    fn new(plan: &Plan) -> Result<Self> {
        let count = plan.stages.len();
        if plan.output >= count {
            return Err(Error::Internal(format!(
                "plan output #{} is past its {count} stages",
                plan.output
            )));
        }
        let mut dependents = vec![Vec::new(); count];
        let mut pending_deps = vec![0; count];
        for (idx, stage) in plan.stages.iter().enumerate() {
            if stage.id != idx {
                return Err(Error::Internal(format!("stage #{} stored at {idx}", stage.id)));
            }
            for &dep in &stage.deps {
                if dep >= idx {
                    return Err(Error::Internal(format!(
                        "stage #{idx} depends on later stage #{dep}"
                    )));
                }
                dependents[dep].push(idx);
            }
            pending_deps[idx] = stage.deps.len();
        }
        Ok(Self {
            stages: plan.stages.iter().cloned().map(Arc::new).collect(),
            outputs: vec![None; count],
            pending_consumers: dependents.iter().map(Vec::len).collect(),
            pending_deps,
            dependents,
            attempts: vec![0; count],
        })
    }

    fn inputs(&self, stage: StageId) -> Result<Vec<Arc<StageOutput>>> {
        self.stages[stage]
            .deps
            .iter()
            .map(|&dep| {
                self.outputs[dep].clone().ok_or_else(|| {
                    Error::Internal(format!("stage #{stage} scheduled before #{dep}"))
                })
            })
            .collect()
    }

    /// Stores an output and returns the stages it made ready.
    fn complete(&mut self, stage: StageId, output: StageOutput) -> Vec<StageId> {
        self.outputs[stage] = Some(Arc::new(output));
        for &dep in &self.stages[stage].deps {
            self.pending_consumers[dep] -= 1;
            if self.pending_consumers[dep] == 0 {
                self.outputs[dep] = None;
            }
        }
        let mut ready = Vec::new();
        for &next in &self.dependents[stage] {
            self.pending_deps[next] -= 1;
            if self.pending_deps[next] == 0 {
                ready.push(next);
            }
        }
        ready
    }
}

impl Executor {
    /// Creates an executor retrying each failed task up to `max_retries`
    /// times.
    #[must_use]
    pub fn new(catalog: Arc<Catalog>, substrate: Arc<dyn Substrate>, max_retries: u32) -> Self {
        Self {
            catalog,
            substrate,
            max_retries,
        }
    }

    /// Runs `plan` to completion.
    ///
    /// # Errors
    ///
    /// Returns `StageExecution` when a stage still fails after
    /// `max_retries` retries, or `Internal` for a malformed plan. No partial
    /// result is returned.
    pub fn execute(&self, plan: &Plan) -> Result<QueryResult> {
        let mut run = Run::new(plan)?;
        let mut stats = ExecStats::default();
        let mut ready: VecDeque<StageId> = plan
            .stages
            .iter()
            .filter(|s| s.deps.is_empty())
            .map(|s| s.id)
            .collect();
        let mut in_flight: Vec<TaskHandle> = Vec::new();

        loop {
            while let Some(stage) = ready.pop_front() {
                run.attempts[stage] += 1;
                let submitted = run.inputs(stage).and_then(|inputs| {
                    self.substrate.submit(StageTask {
                        stage: Arc::clone(&run.stages[stage]),
                        attempt: run.attempts[stage],
                        inputs,
                        catalog: Arc::clone(&self.catalog),
                    })
                });
                match submitted {
                    Ok(handle) => in_flight.push(handle),
                    Err(e) => {
                        self.cancel_all(&in_flight);
                        return Err(e);
                    }
                }
            }
            if in_flight.is_empty() {
                break;
            }

            let idx = {
                let mut select = Select::new();
                for handle in &in_flight {
                    select.recv(handle.receiver());
                }
                select.ready()
            };
            let handle = in_flight.swap_remove(idx);
            let stage = handle.stage();
            match self.substrate.wait(&handle) {
                Ok(output) => {
                    stats.absorb(&output.stats);
                    stats.stages += 1;
                    ready.extend(run.complete(stage, output));
                }
                Err(failure) if run.attempts[stage] <= self.max_retries => {
                    stats.retries += 1;
                    tracing::warn!(
                        stage,
                        op = run.stages[stage].op.name(),
                        attempt = run.attempts[stage],
                        error = %failure.message,
                        "Stage failed, retrying"
                    );
                    ready.push_back(stage);
                }
                Err(failure) => {
                    tracing::error!(
                        stage,
                        op = run.stages[stage].op.name(),
                        attempts = run.attempts[stage],
                        error = %failure.message,
                        "Stage failed permanently, aborting query"
                    );
                    self.cancel_all(&in_flight);
                    return Err(Error::StageExecution {
                        stage,
                        attempts: run.attempts[stage],
                        cause: failure.message,
                    });
                }
            }
        }

        let output = run.outputs[plan.output].take().ok_or_else(|| {
            Error::Internal(format!("output stage #{} never completed", plan.output))
        })?;
        let rows = match Arc::try_unwrap(output) {
            Ok(output) => match output.data {
                StageData::Rows(rows) => rows,
                _ => return Err(Error::Internal("output stage did not produce rows".to_string())),
            },
            Err(shared) => shared.as_rows()?.to_vec(),
        };

        tracing::debug!(
            stages = stats.stages,
            retries = stats.retries,
            partitions = stats.partitions_scanned,
            rows = rows.len(),
            "Executed plan"
        );
        Ok(QueryResult {
            columns: plan.columns.clone(),
            rows,
            stats,
        })
    }

    fn cancel_all(&self, in_flight: &[TaskHandle]) {
        for handle in in_flight {
            self.substrate.cancel(handle);
        }
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}
