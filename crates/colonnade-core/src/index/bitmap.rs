//! Per-partition bitmap index.
//!
//! Maps every distinct value of a column to the roaring bitmap of row
//! positions holding it. Dictionary entries are kept in sorted value order
//! (`Null` first) so range lookups and dictionary dumps are reproducible.
//!
//! # Invariant
//!
//! The value bitmaps are pairwise disjoint and their union is exactly
//! `0..row_count`: every row is indexed once, including null rows.
//!
//! # Layout
//!
//! ```text
//! [version: u8][bincode(BitmapIndex)]
//! ```

use crate::error::{Error, Result};
use crate::value::Value;
use roaring::RoaringBitmap;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::ops::Bound;

/// Current persisted index format version.
pub const INDEX_FORMAT_VERSION: u8 = 1;

/// Value → row-position bitmap mapping for one column of one partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BitmapIndex {
    row_count: u32,
    entries: Vec<(Value, RoaringBitmap)>,
}

impl BitmapIndex {
    /// Builds the index in one pass over the column values.
    ///
    /// A column where every value is distinct degenerates to one
    /// single-row bitmap per value; that is still a valid index.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the column has more than `u32::MAX` rows.
    pub fn build(values: &[Value]) -> Result<Self> {
        let row_count = u32::try_from(values.len()).map_err(|_| {
            Error::Internal(format!(
                "cannot index {} rows, bitmap positions are u32",
                values.len()
            ))
        })?;

        let mut groups: FxHashMap<&Value, RoaringBitmap> = FxHashMap::default();
        for (pos, value) in (0..row_count).zip(values) {
            groups.entry(value).or_default().insert(pos);
        }

        let mut entries: Vec<(Value, RoaringBitmap)> = groups
            .into_iter()
            .map(|(value, bitmap)| (value.clone(), bitmap))
            .collect();
        entries.sort_unstable_by(|a, b| a.0.cmp(&b.0));

        Ok(Self { row_count, entries })
    }

    /// Number of rows covered.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.row_count as usize
    }

    /// Number of distinct values (including `Null` if present).
    #[must_use]
    pub fn distinct_count(&self) -> usize {
        self.entries.len()
    }

    /// True when every value occurs exactly once.
    #[must_use]
    pub fn is_degenerate(&self) -> bool {
        self.entries.len() == self.row_count as usize
    }

    /// Dictionary entries in sorted value order.
    pub fn entries(&self) -> impl Iterator<Item = (&Value, &RoaringBitmap)> {
        self.entries.iter().map(|(v, b)| (v, b))
    }

    /// Dictionary values in sorted order.
    pub fn values(&self) -> impl DoubleEndedIterator<Item = &Value> {
        self.entries.iter().map(|(v, _)| v)
    }

    /// Bitmap of rows equal to `value`.
    #[must_use]
    pub fn lookup(&self, value: &Value) -> Option<&RoaringBitmap> {
        self.entries
            .binary_search_by(|(v, _)| v.cmp(value))
            .ok()
            .map(|idx| &self.entries[idx].1)
    }

    /// True when the dictionary contains `value`.
    #[must_use]
    pub fn contains_value(&self, value: &Value) -> bool {
        self.lookup(value).is_some()
    }

    /// Rows whose value equals `value` under predicate comparison semantics.
    ///
    /// Unlike [`lookup`](Self::lookup) this matches across numeric types
    /// (an `Int(3)` literal finds `Float(3.0)` rows).
    #[must_use]
    pub fn rows_equal(&self, value: &Value) -> RoaringBitmap {
        if let Some(bitmap) = self.lookup(value) {
            return bitmap.clone();
        }
        self.union_where(|v| v.sql_cmp(value) == Some(Ordering::Equal))
    }

    /// Rows whose value lies within the bounds. Null rows never match.
    #[must_use]
    pub fn range(&self, lower: Bound<&Value>, upper: Bound<&Value>) -> RoaringBitmap {
        self.union_where(|v| {
            let above = match lower {
                Bound::Unbounded => !v.is_null(),
                Bound::Included(lo) => {
                    matches!(v.sql_cmp(lo), Some(Ordering::Greater | Ordering::Equal))
                }
                Bound::Excluded(lo) => v.sql_cmp(lo) == Some(Ordering::Greater),
            };
            let below = match upper {
                Bound::Unbounded => !v.is_null(),
                Bound::Included(hi) => {
                    matches!(v.sql_cmp(hi), Some(Ordering::Less | Ordering::Equal))
                }
                Bound::Excluded(hi) => v.sql_cmp(hi) == Some(Ordering::Less),
            };
            above && below
        })
    }

    /// Rows holding `Null`.
    #[must_use]
    pub fn nulls(&self) -> RoaringBitmap {
        self.lookup(&Value::Null).cloned().unwrap_or_default()
    }

    /// Rows holding any non-null value.
    #[must_use]
    pub fn not_null(&self) -> RoaringBitmap {
        let mut rows = self.all_rows();
        rows -= self.nulls();
        rows
    }

    /// Every row position of the partition.
    #[must_use]
    pub fn all_rows(&self) -> RoaringBitmap {
        let mut rows = RoaringBitmap::new();
        rows.insert_range(0..self.row_count);
        rows
    }

    /// Union of the bitmaps of all dictionary values accepted by `keep`.
    pub fn union_where<F>(&self, mut keep: F) -> RoaringBitmap
    where
        F: FnMut(&Value) -> bool,
    {
        let mut rows = RoaringBitmap::new();
        for (value, bitmap) in &self.entries {
            if keep(value) {
                rows |= bitmap;
            }
        }
        rows
    }

    /// Value stored at `position`, found by probing each bitmap.
    #[must_use]
    pub fn value_at(&self, position: u32) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(_, bitmap)| bitmap.contains(position))
            .map(|(v, _)| v)
    }

    /// Smallest non-null value.
    #[must_use]
    pub fn min_value(&self) -> Option<&Value> {
        self.values().find(|v| !v.is_null())
    }

    /// Largest non-null value.
    #[must_use]
    pub fn max_value(&self) -> Option<&Value> {
        self.values().rev().find(|v| !v.is_null())
    }

    /// Checks the completeness invariant: bitmaps disjoint, union = all rows.
    #[must_use]
    pub fn covers_exactly(&self) -> bool {
        let total: u64 = self.entries.iter().map(|(_, b)| b.len()).sum();
        if total != u64::from(self.row_count) {
            return false;
        }
        let mut union = RoaringBitmap::new();
        for (_, bitmap) in &self.entries {
            union |= bitmap;
        }
        union.len() == u64::from(self.row_count)
            && union.max().is_none_or(|max| max < self.row_count)
    }

    /// Serializes the index with its version envelope.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if encoding fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = vec![INDEX_FORMAT_VERSION];
        bincode::serialize_into(&mut out, self)?;
        Ok(out)
    }

    /// Restores an index written by [`to_bytes`](Self::to_bytes).
    ///
    /// # Errors
    ///
    /// Returns `CorruptBlock` for an unknown version, undecodable body, or
    /// an index that violates the completeness invariant.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let Some((&version, body)) = bytes.split_first() else {
            return Err(Error::CorruptBlock("empty index blob".to_string()));
        };
        if version != INDEX_FORMAT_VERSION {
            return Err(Error::CorruptBlock(format!(
                "unsupported index version {version}"
            )));
        }
        let index: Self = bincode::deserialize(body)
            .map_err(|e| Error::CorruptBlock(format!("index body: {e}")))?;
        if !index.covers_exactly() {
            return Err(Error::CorruptBlock(
                "index bitmaps do not cover every row exactly once".to_string(),
            ));
        }
        Ok(index)
    }
}
