//! Partition descriptors and their persisted record format.

use crate::codec::{ColumnBlock, Scheme};
use crate::error::{Error, Result};
use crate::value::{ColumnType, Value};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Version byte prefixed to every catalog and schema record.
pub const CATALOG_FORMAT_VERSION: u8 = 1;

/// Per-column metadata of one partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMeta {
    /// Column name.
    pub name: String,
    /// Column type.
    pub column_type: ColumnType,
    /// Scheme the block was encoded with.
    pub scheme: Scheme,
    /// Store key of the column block.
    pub block_key: String,
    /// Store key of the bitmap index, for indexed columns.
    pub index_key: Option<String>,
    /// Smallest non-null value, `None` when every value is null.
    pub min: Option<Value>,
    /// Largest non-null value, `None` when every value is null.
    pub max: Option<Value>,
    /// Number of null rows.
    pub null_count: u64,
    /// Encoded block size in bytes.
    pub byte_len: u64,
}

impl ColumnMeta {
    /// Computes statistics for `values` encoded as `block`.
    #[must_use]
    pub fn describe(
        name: &str,
        values: &[Value],
        block: &ColumnBlock,
        block_key: String,
        index_key: Option<String>,
    ) -> Self {
        let mut min: Option<&Value> = None;
        let mut max: Option<&Value> = None;
        let mut null_count = 0u64;
        for value in values {
            if value.is_null() {
                null_count += 1;
                continue;
            }
            if min.is_none_or(|m| value < m) {
                min = Some(value);
            }
            if max.is_none_or(|m| value > m) {
                max = Some(value);
            }
        }
        Self {
            name: name.to_string(),
            column_type: block.column_type(),
            scheme: block.scheme(),
            block_key,
            index_key,
            min: min.cloned(),
            max: max.cloned(),
            null_count,
            byte_len: block.len() as u64,
        }
    }
}

/// Immutable metadata of one flushed partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionDescriptor {
    /// Partition id, unique across the catalog.
    pub id: u64,
    /// Owning table.
    pub table: String,
    /// Number of rows.
    pub row_count: u64,
    /// Flush time in milliseconds since the Unix epoch.
    pub created_at_ms: u64,
    /// Value of the table's partition column shared by every row, if the
    /// table declares one.
    pub partition_value: Option<Value>,
    /// Column metadata in schema order.
    pub columns: Vec<ColumnMeta>,
}

impl PartitionDescriptor {
    /// Metadata of a column by name.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ColumnMeta> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Store keys of every block and index owned by this partition.
    #[must_use]
    pub fn blob_keys(&self) -> Vec<String> {
        self.columns
            .iter()
            .flat_map(|c| std::iter::once(c.block_key.clone()).chain(c.index_key.clone()))
            .collect()
    }

    /// Total encoded size of the column blocks.
    #[must_use]
    pub fn byte_len(&self) -> u64 {
        self.columns.iter().map(|c| c.byte_len).sum()
    }
}

/// Serializes a record as `[version][bincode body]`.
pub(crate) fn encode_record<T: Serialize>(record: &T) -> Result<Bytes> {
    let mut out = vec![CATALOG_FORMAT_VERSION];
    bincode::serialize_into(&mut out, record)?;
    Ok(Bytes::from(out))
}

/// Restores a record written by [`encode_record`].
pub(crate) fn decode_record<T: DeserializeOwned>(bytes: &[u8], key: &str) -> Result<T> {
    let Some((&version, body)) = bytes.split_first() else {
        return Err(Error::Storage(format!("empty record at '{key}'")));
    };
    if version != CATALOG_FORMAT_VERSION {
        return Err(Error::Storage(format!(
            "record at '{key}' has unsupported version {version}"
        )));
    }
    bincode::deserialize(body).map_err(|e| Error::Storage(format!("record at '{key}': {e}")))
}
