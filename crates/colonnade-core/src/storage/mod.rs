//! Key-value substrate for column blocks, indexes and catalog records.
//!
//! Everything the engine persists goes through [`KvStore`]. Keys are
//! `/`-separated strings so a prefix scan lists a table or a partition.
//!
//! # Key layout
//!
//! ```text
//! schema/<table>                          table schema
//! catalog/<table>/<partition id>          partition descriptor
//! data/<table>/<partition id>/col/<name>  column block
//! data/<table>/<partition id>/idx/<name>  bitmap index
//! ```

mod log;
mod memory;

pub use log::{LogKvStore, LOG_FILE_NAME};
pub use memory::MemoryKvStore;

use crate::error::Result;
use bytes::Bytes;

/// Ordered key-value store.
///
/// Implementations must be safe to share between writer threads and
/// executor workers. `put_batch` is all-or-nothing with respect to
/// crash recovery: after a restart either every entry of the batch is
/// visible or none is.
pub trait KvStore: Send + Sync {
    /// Writes a batch of entries atomically.
    ///
    /// # Errors
    ///
    /// Returns `Io` or `Storage` if the batch could not be made durable.
    fn put_batch(&self, entries: Vec<(String, Bytes)>) -> Result<()>;

    /// Reads one key.
    ///
    /// # Errors
    ///
    /// Returns `Io` or `Storage` on a read failure.
    fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Returns every entry whose key starts with `prefix`, in key order.
    ///
    /// # Errors
    ///
    /// Returns `Io` or `Storage` on a read failure.
    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Bytes)>>;

    /// Removes keys. Unknown keys are ignored.
    ///
    /// # Errors
    ///
    /// Returns `Io` or `Storage` if the removal could not be recorded.
    fn delete_batch(&self, keys: &[String]) -> Result<()>;

    /// Writes one entry.
    ///
    /// # Errors
    ///
    /// See [`KvStore::put_batch`].
    fn put(&self, key: &str, value: Bytes) -> Result<()> {
        self.put_batch(vec![(key.to_string(), value)])
    }

    /// Removes one key.
    ///
    /// # Errors
    ///
    /// See [`KvStore::delete_batch`].
    fn delete(&self, key: &str) -> Result<()> {
        self.delete_batch(&[key.to_string()])
    }
}

/// Key of a table schema record.
#[must_use]
pub fn schema_key(table: &str) -> String {
    format!("schema/{table}")
}

/// Prefix of every catalog record of a table.
#[must_use]
pub fn catalog_prefix(table: &str) -> String {
    format!("catalog/{table}/")
}

/// Key of the `sequence`-th descriptor registered for a table. Sequence
/// numbers are zero-padded so key order is registration order.
#[must_use]
pub fn catalog_key(table: &str, sequence: u64) -> String {
    format!("catalog/{table}/{sequence:016x}")
}

/// Key of a column block.
#[must_use]
pub fn column_key(table: &str, partition_id: u64, column: &str) -> String {
    format!("data/{table}/{partition_id:016x}/col/{column}")
}

/// Key of a bitmap index.
#[must_use]
pub fn index_key(table: &str, partition_id: u64, column: &str) -> String {
    format!("data/{table}/{partition_id:016x}/idx/{column}")
}
