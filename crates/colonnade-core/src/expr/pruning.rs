//! Partition pruning and index-only evaluation.

use super::matching::compare;
use super::Predicate;
use crate::catalog::{ColumnMeta, PartitionDescriptor};
use crate::index::BitmapIndex;
use crate::value::Value;
use roaring::RoaringBitmap;
use std::cmp::Ordering;

/// True unless `bound` proves no value can satisfy `test` against `value`.
///
/// A missing bound means every value is null. Incomparable bounds prove
/// nothing.
fn bound_allows(bound: Option<&Value>, value: &Value, test: fn(Ordering) -> bool) -> bool {
    match bound {
        None => false,
        Some(bound) => bound.sql_cmp(value).is_none_or(test),
    }
}

fn range_allows(meta: &ColumnMeta, row_count: u64, predicate: &Predicate) -> bool {
    match predicate {
        Predicate::Eq { value, .. } => {
            !value.is_null()
                && bound_allows(meta.min.as_ref(), value, Ordering::is_le)
                && bound_allows(meta.max.as_ref(), value, Ordering::is_ge)
        }
        Predicate::Neq { value, .. } => {
            if value.is_null() {
                return false;
            }
            match (&meta.min, &meta.max) {
                (Some(min), Some(max)) => {
                    !(compare(min, value, Ordering::is_eq) && compare(max, value, Ordering::is_eq))
                }
                _ => false,
            }
        }
        Predicate::Gt { value, .. } => {
            !value.is_null() && bound_allows(meta.max.as_ref(), value, Ordering::is_gt)
        }
        Predicate::Gte { value, .. } => {
            !value.is_null() && bound_allows(meta.max.as_ref(), value, Ordering::is_ge)
        }
        Predicate::Lt { value, .. } => {
            !value.is_null() && bound_allows(meta.min.as_ref(), value, Ordering::is_lt)
        }
        Predicate::Lte { value, .. } => {
            !value.is_null() && bound_allows(meta.min.as_ref(), value, Ordering::is_le)
        }
        Predicate::In { values, .. } => values.iter().any(|value| {
            !value.is_null()
                && bound_allows(meta.min.as_ref(), value, Ordering::is_le)
                && bound_allows(meta.max.as_ref(), value, Ordering::is_ge)
        }),
        Predicate::IsNull { .. } => meta.null_count > 0,
        Predicate::IsNotNull { .. } => meta.null_count < row_count,
        Predicate::And { .. } | Predicate::Or { .. } | Predicate::Not { .. } => true,
    }
}

impl Predicate {
    /// Returns false only when the partition's statistics prove that no row
    /// can satisfy the predicate.
    ///
    /// Uses per-column min/max and null counts. Negations are never pruned.
    #[must_use]
    pub fn might_match(&self, partition: &PartitionDescriptor) -> bool {
        match self {
            Self::And { predicates } => predicates.iter().all(|p| p.might_match(partition)),
            Self::Or { predicates } => predicates.iter().any(|p| p.might_match(partition)),
            Self::Not { .. } => true,
            Self::Eq { column, .. }
            | Self::Neq { column, .. }
            | Self::Gt { column, .. }
            | Self::Gte { column, .. }
            | Self::Lt { column, .. }
            | Self::Lte { column, .. }
            | Self::In { column, .. }
            | Self::IsNull { column }
            | Self::IsNotNull { column } => partition
                .column(column)
                .is_none_or(|meta| range_allows(meta, partition.row_count, self)),
        }
    }

    /// Resolves the exact matching row set from bitmap indexes alone.
    ///
    /// Returns `None` when some referenced column has no index; the caller
    /// then has to decode and evaluate row by row.
    pub fn evaluate_index<'a, F>(&self, index_for: &F) -> Option<RoaringBitmap>
    where
        F: Fn(&str) -> Option<&'a BitmapIndex>,
    {
        match self {
            Self::Eq { value, .. } if value.is_null() => Some(RoaringBitmap::new()),
            Self::Eq { column, value } => Some(index_for(column)?.rows_equal(value)),
            Self::Neq { column, value } => {
                Some(index_for(column)?.union_where(|v| compare(v, value, Ordering::is_ne)))
            }
            Self::Gt { column, value } => {
                Some(index_for(column)?.union_where(|v| compare(v, value, Ordering::is_gt)))
            }
            Self::Gte { column, value } => {
                Some(index_for(column)?.union_where(|v| compare(v, value, Ordering::is_ge)))
            }
            Self::Lt { column, value } => {
                Some(index_for(column)?.union_where(|v| compare(v, value, Ordering::is_lt)))
            }
            Self::Lte { column, value } => {
                Some(index_for(column)?.union_where(|v| compare(v, value, Ordering::is_le)))
            }
            Self::In { column, values } => {
                let index = index_for(column)?;
                Some(values.iter().filter(|v| !v.is_null()).map(|v| index.rows_equal(v)).fold(
                    RoaringBitmap::new(),
                    |mut acc, rows| {
                        acc |= rows;
                        acc
                    },
                ))
            }
            Self::IsNull { column } => Some(index_for(column)?.nulls()),
            Self::IsNotNull { column } => Some(index_for(column)?.not_null()),
            Self::And { predicates } => {
                let mut iter = predicates.iter();
                let mut acc = iter.next()?.evaluate_index(index_for)?;
                for p in iter {
                    acc &= p.evaluate_index(index_for)?;
                }
                Some(acc)
            }
            Self::Or { predicates } => {
                let mut acc = RoaringBitmap::new();
                for p in predicates {
                    acc |= p.evaluate_index(index_for)?;
                }
                Some(acc)
            }
            Self::Not { predicate } => {
                let inner = predicate.evaluate_index(index_for)?;
                let all = predicate
                    .columns()
                    .first()
                    .and_then(|c| index_for(c))?
                    .all_rows();
                Some(all - inner)
            }
        }
    }

    /// True when bitmap indexes prove that no row matches.
    ///
    /// Unlike [`Predicate::evaluate_index`] this works when only some
    /// columns are indexed: one excluding conjunct is enough for `And`.
    pub fn index_excludes<'a, F>(&self, index_for: &F) -> bool
    where
        F: Fn(&str) -> Option<&'a BitmapIndex>,
    {
        match self {
            Self::And { predicates } => predicates.iter().any(|p| p.index_excludes(index_for)),
            Self::Or { predicates } => predicates.iter().all(|p| p.index_excludes(index_for)),
            _ => self
                .evaluate_index(index_for)
                .is_some_and(|rows| rows.is_empty()),
        }
    }
}
