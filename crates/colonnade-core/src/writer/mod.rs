//! Partition writer: buffers rows and flushes them as immutable partitions.
//!
//! A flush encodes one block per column, builds bitmap indexes for indexed
//! columns, writes every blob in one batch and only then registers the
//! partition descriptor. Registration is the commit point: a failure before
//! it leaves nothing visible and the rows stay buffered for a retry.
//!
//! Tables with a partition column are split on flush so every partition
//! holds rows of a single partition value.


use crate::catalog::{Catalog, ColumnMeta, PartitionDescriptor};
use crate::codec;
use crate::config::{CodecConfig, WriterConfig};
use crate::error::Result;
use crate::index::BitmapIndex;
use crate::schema::Schema;
use crate::storage::{column_key, index_key};
use crate::value::{Row, Value};
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Buffers rows for one table and flushes them into the catalog.
///
/// A writer is owned by one thread; run several writers for parallel
/// ingestion into the same table.
pub struct PartitionWriter {
    catalog: Arc<Catalog>,
    schema: Arc<Schema>,
    limits: WriterConfig,
    codec: CodecConfig,
    buffer: Vec<Row>,
    buffered_bytes: usize,
}

impl PartitionWriter {
    /// Creates a writer for `table`.
    ///
    /// # Errors
    ///
    /// Returns `TableNotFound` for an unknown table.
    pub fn new(
        catalog: Arc<Catalog>,
        table: &str,
        limits: WriterConfig,
        codec: CodecConfig,
    ) -> Result<Self> {
        let schema = catalog.schema(table)?;
        Ok(Self {
            catalog,
            schema,
            limits,
            codec,
            buffer: Vec::new(),
            buffered_bytes: 0,
        })
    }

    /// Table this writer appends to.
    #[must_use]
    pub fn table(&self) -> &str {
        self.schema.table()
    }

    /// Number of rows waiting for a flush.
    #[must_use]
    pub fn buffered_rows(&self) -> usize {
        self.buffer.len()
    }

    /// Estimated size of the buffered rows.
    #[must_use]
    pub fn buffered_bytes(&self) -> usize {
        self.buffered_bytes
    }

    /// Buffers one row, flushing when a threshold is crossed.
    ///
    /// Returns the descriptors registered by an automatic flush (usually
    /// none).
    ///
    /// # Errors
    ///
    /// Returns `SchemaMismatch` for a row of the wrong shape; the row is
    /// dropped and buffered rows are untouched. Flush errors are passed
    /// through with the rows still buffered.
    pub fn append(&mut self, row: Row) -> Result<Vec<Arc<PartitionDescriptor>>> {
        self.schema.validate_row(&row)?;
        self.buffered_bytes += row.iter().map(Value::estimated_size).sum::<usize>();
        self.buffer.push(row);

        if self.buffer.len() >= self.limits.max_rows || self.buffered_bytes >= self.limits.max_bytes {
            return self.flush();
        }
        Ok(Vec::new())
    }

    /// Buffers a JSON object, mapping fields to columns by name.
    ///
    /// # Errors
    ///
    /// See [`PartitionWriter::append`] and [`Schema::row_from_json`].
    pub fn append_json(&mut self, json: &serde_json::Value) -> Result<Vec<Arc<PartitionDescriptor>>> {
        let row = self.schema.row_from_json(json)?;
        self.append(row)
    }

    /// Flushes every buffered row.
    ///
    /// Returns the registered descriptors, one per partition value (a single
    /// one for tables without a partition column). An empty buffer
    /// registers nothing.
    ///
    /// # Errors
    ///
    /// Returns the first encode or storage failure. Groups registered before
    /// the failure stay registered; the failing group and the groups after it
    /// stay buffered.
    pub fn flush(&mut self) -> Result<Vec<Arc<PartitionDescriptor>>> {
        if self.buffer.is_empty() {
            return Ok(Vec::new());
        }

        let groups = self.split_by_partition_value();
        let mut registered = Vec::with_capacity(groups.len());
        let mut pending = groups.into_iter();
        while let Some((partition_value, rows)) = pending.next() {
            match self.flush_group(&rows, partition_value) {
                Ok(descriptor) => registered.push(descriptor),
                Err(e) => {
                    self.buffer = rows
                        .into_iter()
                        .chain(pending.by_ref().flat_map(|(_, rows)| rows))
                        .collect();
                    self.buffered_bytes = self
                        .buffer
                        .iter()
                        .flatten()
                        .map(Value::estimated_size)
                        .sum();
                    tracing::warn!(
                        table = %self.schema.table(),
                        buffered = self.buffer.len(),
                        error = %e,
                        "Flush failed, rows kept buffered"
                    );
                    return Err(e);
                }
            }
        }

        self.buffered_bytes = 0;
        Ok(registered)
    }

    /// Flushes the remaining rows and consumes the writer.
    ///
    /// # Errors
    ///
    /// See [`PartitionWriter::flush`].
    pub fn close(mut self) -> Result<Vec<Arc<PartitionDescriptor>>> {
        self.flush()
    }

    /// Takes the buffer, grouped by partition value in value order.
    fn split_by_partition_value(&mut self) -> Vec<(Option<Value>, Vec<Row>)> {
        let rows = std::mem::take(&mut self.buffer);
        let Some(idx) = self
            .schema
            .partition_column()
            .and_then(|name| self.schema.column_index(name))
        else {
            return vec![(None, rows)];
        };

        let mut groups: BTreeMap<Value, Vec<Row>> = BTreeMap::new();
        for row in rows {
            groups.entry(row[idx].clone()).or_default().push(row);
        }
        groups
            .into_iter()
            .map(|(value, rows)| (Some(value), rows))
            .collect()
    }

    fn flush_group(
        &self,
        rows: &[Row],
        partition_value: Option<Value>,
    ) -> Result<Arc<PartitionDescriptor>> {
        let table = self.schema.table();
        let id = self.catalog.next_partition_id();

        let mut blobs: Vec<(String, Bytes)> = Vec::with_capacity(self.schema.len() * 2);
        let mut columns = Vec::with_capacity(self.schema.len());
        for (idx, column) in self.schema.columns().enumerate() {
            let values: Vec<Value> = rows.iter().map(|row| row[idx].clone()).collect();
            let block = codec::encode(&values, column.column_type, column.encoding, &self.codec)?;
            let block_key = column_key(table, id, &column.name);
            blobs.push((block_key.clone(), block.as_bytes().clone()));

            let index_blob_key = if column.indexed {
                let key = index_key(table, id, &column.name);
                let index = BitmapIndex::build(&values)?;
                blobs.push((key.clone(), Bytes::from(index.to_bytes()?)));
                Some(key)
            } else {
                None
            };
            columns.push(ColumnMeta::describe(
                &column.name,
                &values,
                &block,
                block_key,
                index_blob_key,
            ));
        }

        let descriptor = PartitionDescriptor {
            id,
            table: table.to_string(),
            row_count: rows.len() as u64,
            created_at_ms: now_ms(),
            partition_value,
            columns,
        };
        let keys = descriptor.blob_keys();

        let committed = self
            .catalog
            .store()
            .put_batch(blobs)
            .and_then(|()| self.catalog.register(descriptor));
        match committed {
            Ok(descriptor) => {
                tracing::info!(
                    table,
                    partition = descriptor.id,
                    rows = descriptor.row_count,
                    bytes = descriptor.byte_len(),
                    "Flushed partition"
                );
                Ok(descriptor)
            }
            Err(e) => {
                if let Err(cleanup) = self.catalog.store().delete_batch(&keys) {
                    tracing::warn!(
                        table,
                        partition = id,
                        error = %cleanup,
                        "Could not remove orphaned blobs"
                    );
                }
                Err(e)
            }
        }
    }
}

impl Drop for PartitionWriter {
    fn drop(&mut self) {
        if !self.buffer.is_empty() {
            tracing::warn!(
                table = %self.schema.table(),
                rows = self.buffer.len(),
                "Partition writer dropped with unflushed rows"
            );
        }
    }
}

impl std::fmt::Debug for PartitionWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionWriter")
            .field("table", &self.schema.table())
            .field("buffered_rows", &self.buffer.len())
            .field("buffered_bytes", &self.buffered_bytes)
            .finish_non_exhaustive()
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}
