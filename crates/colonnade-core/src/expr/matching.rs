//! Row-level predicate evaluation.

use super::Predicate;
use crate::schema::Schema;
use crate::value::Value;
use std::cmp::Ordering;

static NULL: Value = Value::Null;

impl Predicate {
    /// Evaluates the predicate against a full row laid out in schema order.
    #[must_use]
    pub fn matches(&self, row: &[Value], schema: &Schema) -> bool {
        self.matches_with(&|column: &str| schema.column_index(column).and_then(|idx| row.get(idx)))
    }

    /// Evaluates the predicate with a column accessor.
    ///
    /// A column the accessor does not know reads as `Null`.
    pub fn matches_with<'v, F>(&self, lookup: &F) -> bool
    where
        F: Fn(&str) -> Option<&'v Value>,
    {
        let get = |column: &str| lookup(column).unwrap_or(&NULL);
        match self {
            Self::Eq { column, value } => compare(get(column), value, Ordering::is_eq),
            Self::Neq { column, value } => compare(get(column), value, Ordering::is_ne),
            Self::Gt { column, value } => compare(get(column), value, Ordering::is_gt),
            Self::Gte { column, value } => compare(get(column), value, Ordering::is_ge),
            Self::Lt { column, value } => compare(get(column), value, Ordering::is_lt),
            Self::Lte { column, value } => compare(get(column), value, Ordering::is_le),
            Self::In { column, values } => {
                let actual = get(column);
                values.iter().any(|v| compare(actual, v, Ordering::is_eq))
            }
            Self::IsNull { column } => get(column).is_null(),
            Self::IsNotNull { column } => !get(column).is_null(),
            Self::And { predicates } => predicates.iter().all(|p| p.matches_with(lookup)),
            Self::Or { predicates } => predicates.iter().any(|p| p.matches_with(lookup)),
            Self::Not { predicate } => !predicate.matches_with(lookup),
        }
    }
}

/// Applies `test` to the ordering of `actual` against `expected`.
///
/// Incomparable pairs (including any `Null`) never satisfy a comparison.
pub(crate) fn compare(actual: &Value, expected: &Value, test: fn(Ordering) -> bool) -> bool {
    actual.sql_cmp(expected).is_some_and(test)
}
