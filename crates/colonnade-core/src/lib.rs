//! # Colonnade Core
//!
//! Append-only columnar partition store with bitmap indexes and a
//! distributed join/aggregate query planner.
//!
//! ## Features
//!
//! - **Column codecs**: generic (LZ4 frames), bitmap dictionary and prefix
//!   trie encodings, chosen per block from the data
//! - **Bitmap indexes**: exact row sets per value, used to prune partitions
//!   and to answer predicates without decoding
//! - **Immutable partitions**: rows are buffered and flushed atomically;
//!   the catalog only ever grows
//! - **Stage DAG planner**: scans, shuffles, bucketed hash joins, partial and
//!   merged aggregation, finalize
//! - **Pluggable substrate**: stages run on a local worker pool or any
//!   [`exec::Substrate`], with per-stage retries
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use colonnade_core::{Column, ColumnType, Database, Predicate, Query, Value};
//!
//! let db = Database::open("./data")?;
//! db.create_table(Schema::new("events", vec![
//!     Column::new("id", ColumnType::Int),
//!     Column::new("tag", ColumnType::String).indexed(),
//! ])?)?;
//!
//! let mut writer = db.writer("events")?;
//! writer.append(vec![Value::Int(1), Value::from("a")])?;
//! writer.close()?;
//!
//! let result = db.query(&Query::from("events").filter(Predicate::eq("tag", "a")))?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::redundant_pub_crate)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::single_match_else)]
#![allow(clippy::manual_let_else)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::unused_async)]

pub mod catalog;
pub mod codec;
pub mod config;
#[cfg(test)]
mod config_tests;
pub mod error;
pub mod exec;
pub mod expr;
pub mod index;
pub mod plan;
pub mod schema;
#[cfg(test)]
mod schema_tests;
pub mod storage;
pub mod value;
pub mod writer;

pub use catalog::{Catalog, ColumnMeta, PartitionDescriptor, PartitionList};
pub use codec::{ColumnBlock, Encoding, Scheme};
pub use config::{ColonnadeConfig, ConfigError, StorageMode};
pub use error::{Error, Result};
pub use exec::{ExecStats, Executor, LocalSubstrate, QueryResult, Substrate};
pub use expr::Predicate;
pub use index::BitmapIndex;
pub use plan::{
    AggregateFunc, ColumnRef, JoinKind, JoinSpec, OrderKey, Plan, Planner, Projection, Query,
};
pub use schema::{Column, Schema};
pub use storage::{KvStore, LogKvStore, MemoryKvStore};
pub use value::{ColumnType, Row, Value};
pub use writer::PartitionWriter;

use std::path::Path;
use std::sync::Arc;

/// Store, catalog, planner and executor wired together.
pub struct Database {
    config: ColonnadeConfig,
    catalog: Arc<Catalog>,
    planner: Planner,
    executor: Executor,
}

impl Database {
    /// Opens or creates a log-backed database in `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or log cannot be opened, or the
    /// persisted catalog cannot be decoded.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = ColonnadeConfig::default();
        config.storage.mode = StorageMode::Log;
        config.storage.data_dir = path.as_ref().to_string_lossy().into_owned();
        Self::with_config(config)
    }

    /// Creates an empty in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker pool cannot start.
    pub fn in_memory() -> Result<Self> {
        let mut config = ColonnadeConfig::default();
        config.storage.mode = StorageMode::Memory;
        Self::with_config(config)
    }

    /// Opens a database as described by `config`.
    ///
    /// # Errors
    ///
    /// Returns `Config` for an invalid configuration, or a storage error.
    pub fn with_config(config: ColonnadeConfig) -> Result<Self> {
        config.validate()?;
        let store: Arc<dyn KvStore> = match config.storage.mode {
            StorageMode::Memory => Arc::new(MemoryKvStore::new()),
            StorageMode::Log => Arc::new(LogKvStore::open(
                &config.storage.data_dir,
                config.storage.sync_writes,
            )?),
        };
        let substrate = Arc::new(LocalSubstrate::new(config.executor.effective_workers())?);
        Self::with_parts(config, store, substrate)
    }

    /// Builds a database over an existing store and substrate.
    ///
    /// # Errors
    ///
    /// Returns `Config` for an invalid configuration, or an error if the
    /// catalog cannot be rebuilt from `store`.
    pub fn with_parts(
        config: ColonnadeConfig,
        store: Arc<dyn KvStore>,
        substrate: Arc<dyn Substrate>,
    ) -> Result<Self> {
        config.validate()?;
        let catalog = Arc::new(Catalog::open(store)?);
        let planner = Planner::new(Arc::clone(&catalog), config.executor.join_buckets);
        let executor = Executor::new(
            Arc::clone(&catalog),
            substrate,
            config.executor.max_retries,
        );
        tracing::info!(
            mode = ?config.storage.mode,
            tables = catalog.tables().len(),
            "Database opened"
        );
        Ok(Self {
            config,
            catalog,
            planner,
            executor,
        })
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &ColonnadeConfig {
        &self.config
    }

    /// The partition catalog.
    #[must_use]
    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Creates a table.
    ///
    /// # Errors
    ///
    /// Returns `TableExists` if the name is taken.
    pub fn create_table(&self, schema: Schema) -> Result<Arc<Schema>> {
        self.catalog.create_table(schema)
    }

    /// Table names in lexicographic order.
    #[must_use]
    pub fn tables(&self) -> Vec<String> {
        self.catalog.tables()
    }

    /// Schema of a table.
    ///
    /// # Errors
    ///
    /// Returns `TableNotFound` for an unknown table.
    pub fn schema(&self, table: &str) -> Result<Arc<Schema>> {
        self.catalog.schema(table)
    }

    /// Current partitions of a table, in registration order.
    ///
    /// # Errors
    ///
    /// Returns `TableNotFound` for an unknown table.
    pub fn partitions(&self, table: &str) -> Result<PartitionList> {
        self.catalog.partitions(table)
    }

    /// A new writer for `table` using the configured thresholds and codec.
    ///
    /// # Errors
    ///
    /// Returns `TableNotFound` for an unknown table.
    pub fn writer(&self, table: &str) -> Result<PartitionWriter> {
        PartitionWriter::new(
            Arc::clone(&self.catalog),
            table,
            self.config.writer.clone(),
            self.config.codec.clone(),
        )
    }

    /// Plans `query` without running it.
    ///
    /// # Errors
    ///
    /// See [`Planner::plan`].
    pub fn plan(&self, query: &Query) -> Result<Plan> {
        self.planner.plan(query)
    }

    /// Plans and runs `query`.
    ///
    /// # Errors
    ///
    /// Planning errors, or `StageExecution` when a stage keeps failing.
    pub fn query(&self, query: &Query) -> Result<QueryResult> {
        let plan = self.planner.plan(query)?;
        self.executor.execute(&plan)
    }

    /// Runs `query` and stores its rows as the new table `table`.
    ///
    /// Column names are the output names with `.` replaced by `_`, so
    /// `users.name` becomes `users_name` while `sum(id)` is kept. Column
    /// types follow [`Plan::column_types`]; a numeric column holding a sum
    /// that left integer range is stored as `Float`.
    ///
    /// # Errors
    ///
    /// Planning and execution errors, `TableExists` if `table` is taken, or
    /// `InvalidQuery` when two output names collide.
    pub fn query_into(&self, query: &Query, table: &str) -> Result<QueryResult> {
        let plan = self.planner.plan(query)?;
        let result = self.executor.execute(&plan)?;

        let mut types = plan.column_types.clone();
        for (idx, ty) in types.iter_mut().enumerate() {
            let widened = ty.is_numeric()
                && result
                    .rows
                    .iter()
                    .any(|row| row.get(idx).is_some_and(|v| !v.fits(*ty)));
            if widened {
                *ty = ColumnType::Float;
            }
        }
        let columns = result
            .columns
            .iter()
            .zip(&types)
            .map(|(name, ty)| Column::new(name.replace('.', "_"), *ty))
            .collect();
        self.catalog.create_table(Schema::new(table, columns)?)?;

        let mut writer = self.writer(table)?;
        for row in &result.rows {
            writer.append(
                row.iter()
                    .zip(&types)
                    .map(|(value, ty)| match (value, ty) {
                        (Value::Int(_) | Value::Timestamp(_), ColumnType::Float) => {
                            value.as_f64().map_or(Value::Null, Value::Float)
                        }
                        _ => value.clone(),
                    })
                    .collect(),
            )?;
        }
        writer.close()?;

        tracing::info!(
            table,
            rows = result.rows.len(),
            columns = result.columns.len(),
            "Query result stored as table"
        );
        Ok(result)
    }

    /// Plans `query` and runs it on Tokio's blocking pool.
    ///
    /// # Errors
    ///
    /// See [`Database::query`].
    #[cfg(feature = "async")]
    pub async fn query_async(&self, query: &Query) -> Result<QueryResult> {
        let plan = self.planner.plan(query)?;
        exec::async_ops::execute_async(self.executor.clone(), plan).await
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("mode", &self.config.storage.mode)
            .field("catalog", &self.catalog)
            .finish_non_exhaustive()
    }
}
