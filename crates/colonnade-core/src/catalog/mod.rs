//! Partition catalog: table schemas and the append-only partition log.
//!
//! The catalog is the only shared mutable structure in the engine.
//! Registration takes a per-table lock, persists the descriptor record and
//! then publishes a new snapshot through an [`ArcSwap`]. Readers load the
//! current snapshot without locking and always see a consistent prefix of
//! the log.
//!
//! Descriptors are never mutated or removed once registered.

mod descriptor;


pub use descriptor::{ColumnMeta, PartitionDescriptor, CATALOG_FORMAT_VERSION};

use crate::codec::ColumnBlock;
use crate::error::{Error, Result};
use crate::expr::Predicate;
use crate::index::BitmapIndex;
use crate::schema::Schema;
use crate::storage::{catalog_key, schema_key, KvStore};
use arc_swap::ArcSwap;
use descriptor::{decode_record, encode_record};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Snapshot of a table's partitions, in registration order.
pub type PartitionList = Arc<Vec<Arc<PartitionDescriptor>>>;

struct TableEntry {
    schema: Arc<Schema>,
    partitions: ArcSwap<Vec<Arc<PartitionDescriptor>>>,
    register_lock: Mutex<()>,
}

impl TableEntry {
    fn new(schema: Schema, partitions: Vec<Arc<PartitionDescriptor>>) -> Self {
        Self {
            schema: Arc::new(schema),
            partitions: ArcSwap::from_pointee(partitions),
            register_lock: Mutex::new(()),
        }
    }
}

/// Catalog of tables and their partitions.
pub struct Catalog {
    store: Arc<dyn KvStore>,
    tables: RwLock<FxHashMap<String, Arc<TableEntry>>>,
    next_id: AtomicU64,
}

impl Catalog {
    /// Rebuilds the catalog from the records persisted in `store`.
    ///
    /// An empty store yields an empty catalog.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if a schema or descriptor record cannot be decoded.
    pub fn open(store: Arc<dyn KvStore>) -> Result<Self> {
        let mut tables: FxHashMap<String, Vec<Arc<PartitionDescriptor>>> = FxHashMap::default();
        let mut schemas = Vec::new();
        for (key, bytes) in store.scan_prefix("schema/")? {
            let schema: Schema = decode_record(&bytes, &key)?;
            tables.insert(schema.table().to_string(), Vec::new());
            schemas.push(schema);
        }

        let mut max_id = 0u64;
        for (key, bytes) in store.scan_prefix("catalog/")? {
            let descriptor: PartitionDescriptor = decode_record(&bytes, &key)?;
            max_id = max_id.max(descriptor.id);
            match tables.get_mut(&descriptor.table) {
                Some(partitions) => partitions.push(Arc::new(descriptor)),
                None => tracing::warn!(
                    key = %key,
                    table = %descriptor.table,
                    "Skipping partition of unknown table"
                ),
            }
        }

        let mut entries = FxHashMap::default();
        for schema in schemas {
            // Records come back in key order, which is registration order
            let partitions = tables.remove(schema.table()).unwrap_or_default();
            tracing::debug!(
                table = %schema.table(),
                partitions = partitions.len(),
                "Loaded table"
            );
            entries.insert(
                schema.table().to_string(),
                Arc::new(TableEntry::new(schema, partitions)),
            );
        }

        Ok(Self {
            store,
            tables: RwLock::new(entries),
            next_id: AtomicU64::new(max_id + 1),
        })
    }

    /// The store holding blocks, indexes and catalog records.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    fn entry(&self, table: &str) -> Result<Arc<TableEntry>> {
        self.tables
            .read()
            .get(table)
            .cloned()
            .ok_or_else(|| Error::TableNotFound(table.to_string()))
    }

    /// Creates a table.
    ///
    /// # Errors
    ///
    /// Returns `TableExists` if the name is taken, or a storage error if the
    /// schema record cannot be written.
    pub fn create_table(&self, schema: Schema) -> Result<Arc<Schema>> {
        let mut tables = self.tables.write();
        if tables.contains_key(schema.table()) {
            return Err(Error::TableExists(schema.table().to_string()));
        }
        self.store
            .put(&schema_key(schema.table()), encode_record(&schema)?)?;

        tracing::debug!(
            table = %schema.table(),
            columns = schema.len(),
            partition_column = ?schema.partition_column(),
            "Created table"
        );
        let entry = Arc::new(TableEntry::new(schema, Vec::new()));
        let schema = Arc::clone(&entry.schema);
        tables.insert(schema.table().to_string(), entry);
        Ok(schema)
    }

    /// Schema of a table.
    ///
    /// # Errors
    ///
    /// Returns `TableNotFound` for an unknown table.
    pub fn schema(&self, table: &str) -> Result<Arc<Schema>> {
        Ok(Arc::clone(&self.entry(table)?.schema))
    }

    /// Table names in lexicographic order.
    #[must_use]
    pub fn tables(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Allocates a fresh partition id.
    pub fn next_partition_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Persists and publishes a partition descriptor at the end of the
    /// table's log.
    ///
    /// After this returns, every subsequent [`Catalog::partitions`] call
    /// observes the descriptor, after everything registered before it.
    ///
    /// # Errors
    ///
    /// Returns `TableNotFound` for an unknown table, `SchemaMismatch` if the
    /// descriptor's columns disagree with the schema, `Internal` if the id
    /// is already registered, or a storage error.
    pub fn register(&self, descriptor: PartitionDescriptor) -> Result<Arc<PartitionDescriptor>> {
        let entry = self.entry(&descriptor.table)?;
        check_columns(&entry.schema, &descriptor)?;

        let _guard = entry.register_lock.lock();
        let current = entry.partitions.load_full();
        if current.iter().any(|p| p.id == descriptor.id) {
            return Err(Error::Internal(format!(
                "partition {} of '{}' registered twice",
                descriptor.id, descriptor.table
            )));
        }

        let sequence = current.len() as u64;
        self.store.put(
            &catalog_key(&descriptor.table, sequence),
            encode_record(&descriptor)?,
        )?;

        let descriptor = Arc::new(descriptor);
        let mut next = Vec::with_capacity(current.len() + 1);
        next.extend(current.iter().cloned());
        next.push(Arc::clone(&descriptor));
        entry.partitions.store(Arc::new(next));

        tracing::debug!(
            table = %descriptor.table,
            partition = descriptor.id,
            sequence,
            rows = descriptor.row_count,
            bytes = descriptor.byte_len(),
            "Registered partition"
        );
        Ok(descriptor)
    }

    /// Current snapshot of a table's partitions.
    ///
    /// # Errors
    ///
    /// Returns `TableNotFound` for an unknown table.
    pub fn partitions(&self, table: &str) -> Result<PartitionList> {
        Ok(self.entry(table)?.partitions.load_full())
    }

    /// Partitions of `table` that may hold rows matching `predicate`.
    ///
    /// Partitions are dropped only when their statistics prove the
    /// predicate cannot match. Order is registration order.
    ///
    /// # Errors
    ///
    /// Returns `TableNotFound` for an unknown table.
    pub fn list_partitions(
        &self,
        table: &str,
        predicate: Option<&Predicate>,
    ) -> Result<Vec<Arc<PartitionDescriptor>>> {
        let snapshot = self.partitions(table)?;
        let Some(predicate) = predicate else {
            return Ok(snapshot.as_ref().clone());
        };
        let kept: Vec<Arc<PartitionDescriptor>> = snapshot
            .iter()
            .filter(|p| predicate.might_match(p))
            .cloned()
            .collect();
        tracing::debug!(
            table,
            total = snapshot.len(),
            kept = kept.len(),
            "Pruned partitions by statistics"
        );
        Ok(kept)
    }

    /// Reads and verifies the column block described by `meta`.
    ///
    /// # Errors
    ///
    /// Returns `CorruptBlock` if the block is missing or fails verification.
    pub fn read_block(&self, meta: &ColumnMeta) -> Result<ColumnBlock> {
        let bytes = self
            .store
            .get(&meta.block_key)?
            .ok_or_else(|| Error::CorruptBlock(format!("missing block '{}'", meta.block_key)))?;
        ColumnBlock::parse(bytes)
    }

    /// Reads the bitmap index of an indexed column, `None` otherwise.
    ///
    /// # Errors
    ///
    /// Returns `CorruptBlock` if a declared index is missing or invalid.
    pub fn read_index(&self, meta: &ColumnMeta) -> Result<Option<BitmapIndex>> {
        let Some(key) = &meta.index_key else {
            return Ok(None);
        };
        let bytes = self
            .store
            .get(key)?
            .ok_or_else(|| Error::CorruptBlock(format!("missing index '{key}'")))?;
        BitmapIndex::from_bytes(&bytes).map(Some)
    }
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog")
            .field("tables", &self.tables())
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

fn check_columns(schema: &Schema, descriptor: &PartitionDescriptor) -> Result<()> {
    if descriptor.columns.len() != schema.len() {
        return Err(Error::schema_mismatch(
            schema.table(),
            format!(
                "partition {} describes {} columns, schema has {}",
                descriptor.id,
                descriptor.columns.len(),
                schema.len()
            ),
        ));
    }
    for (meta, column) in descriptor.columns.iter().zip(schema.columns()) {
        if meta.name != column.name || meta.column_type != column.column_type {
            return Err(Error::schema_mismatch(
                schema.table(),
                format!(
                    "partition {} column '{}' ({}) does not match '{}' ({})",
                    descriptor.id, meta.name, meta.column_type, column.name, column.column_type
                ),
            ));
        }
    }
    Ok(())
}
