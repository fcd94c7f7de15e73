//! Logical query structure, built with typed builders.

use crate::expr::Predicate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A column reference, optionally qualified by its table.
///
/// An unqualified reference resolves against every table of the query and
/// must match exactly one of them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnRef {
    /// Owning table, `None` when unqualified.
    pub table: Option<String>,
    /// Column name.
    pub column: String,
}

impl ColumnRef {
    /// Unqualified reference.
    #[must_use]
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            table: None,
            column: column.into(),
        }
    }

    /// Reference qualified by table.
    #[must_use]
    pub fn qualified(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: Some(table.into()),
            column: column.into(),
        }
    }
}

impl From<&str> for ColumnRef {
    /// Parses `"column"` or `"table.column"`.
    fn from(s: &str) -> Self {
        match s.split_once('.') {
            Some((table, column)) => Self::qualified(table, column),
            None => Self::new(s),
        }
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.table {
            Some(table) => write!(f, "{table}.{}", self.column),
            None => f.write_str(&self.column),
        }
    }
}

/// Join flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinKind {
    /// Matching pairs only.
    #[default]
    Inner,
    /// Plus unmatched left rows, right side null.
    Left,
    /// Plus unmatched right rows, left side null.
    Right,
    /// Plus unmatched rows of both sides.
    Full,
}

impl JoinKind {
    pub(crate) const fn keeps_left(self) -> bool {
        matches!(self, Self::Left | Self::Full)
    }

    pub(crate) const fn keeps_right(self) -> bool {
        matches!(self, Self::Right | Self::Full)
    }
}

/// Equi-join between two tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinSpec {
    /// Key on the left table.
    pub left: ColumnRef,
    /// Key on the right table.
    pub right: ColumnRef,
    /// Join flavour.
    pub kind: JoinKind,
}

impl JoinSpec {
    /// Inner join on `left = right`. Both keys must be qualified.
    #[must_use]
    pub fn inner(left: impl Into<ColumnRef>, right: impl Into<ColumnRef>) -> Self {
        Self {
            left: left.into(),
            right: right.into(),
            kind: JoinKind::Inner,
        }
    }

    /// Sets the join flavour.
    #[must_use]
    pub fn kind(mut self, kind: JoinKind) -> Self {
        self.kind = kind;
        self
    }
}

/// Aggregate function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateFunc {
    /// Row count (`count()`) or non-null count (`count(col)`).
    Count,
    /// Numeric sum.
    Sum,
    /// Smallest value.
    Min,
    /// Largest value.
    Max,
    /// Arithmetic mean.
    Avg,
}

impl AggregateFunc {
    /// Lower-case function name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Sum => "sum",
            Self::Min => "min",
            Self::Max => "max",
            Self::Avg => "avg",
        }
    }
}

/// One item of the select list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Projection {
    /// A single column.
    Column {
        /// Referenced column
        column: ColumnRef,
    },
    /// Every column of a table, in schema order.
    Star {
        /// Table to expand
        table: String,
    },
    /// An aggregate; `column` is `None` only for `count()`.
    Aggregate {
        /// Function
        func: AggregateFunc,
        /// Argument
        column: Option<ColumnRef>,
    },
}

impl Projection {
    /// Projects a column.
    #[must_use]
    pub fn col(column: impl Into<ColumnRef>) -> Self {
        Self::Column {
            column: column.into(),
        }
    }

    /// Projects every column of `table`.
    #[must_use]
    pub fn star(table: impl Into<String>) -> Self {
        Self::Star {
            table: table.into(),
        }
    }

    /// `count()` over rows.
    #[must_use]
    pub fn count() -> Self {
        Self::Aggregate {
            func: AggregateFunc::Count,
            column: None,
        }
    }

    /// `count(column)`, non-null values only.
    #[must_use]
    pub fn count_of(column: impl Into<ColumnRef>) -> Self {
        Self::aggregate(AggregateFunc::Count, column)
    }

    /// `sum(column)`.
    #[must_use]
    pub fn sum(column: impl Into<ColumnRef>) -> Self {
        Self::aggregate(AggregateFunc::Sum, column)
    }

    /// `min(column)`.
    #[must_use]
    pub fn min(column: impl Into<ColumnRef>) -> Self {
        Self::aggregate(AggregateFunc::Min, column)
    }

    /// `max(column)`.
    #[must_use]
    pub fn max(column: impl Into<ColumnRef>) -> Self {
        Self::aggregate(AggregateFunc::Max, column)
    }

    /// `avg(column)`.
    #[must_use]
    pub fn avg(column: impl Into<ColumnRef>) -> Self {
        Self::aggregate(AggregateFunc::Avg, column)
    }

    fn aggregate(func: AggregateFunc, column: impl Into<ColumnRef>) -> Self {
        Self::Aggregate {
            func,
            column: Some(column.into()),
        }
    }

    pub(crate) fn is_aggregate(&self) -> bool {
        matches!(self, Self::Aggregate { .. })
    }
}

impl From<&str> for Projection {
    fn from(s: &str) -> Self {
        Self::col(s)
    }
}

/// Sort key of an `order by`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderKey {
    /// Zero-based position in the output columns.
    Position {
        /// Output column index
        index: usize,
    },
    /// A projected column.
    Column {
        /// Referenced column
        column: ColumnRef,
    },
}

impl From<usize> for OrderKey {
    fn from(index: usize) -> Self {
        Self::Position { index }
    }
}

impl From<&str> for OrderKey {
    fn from(s: &str) -> Self {
        Self::Column { column: s.into() }
    }
}

/// Predicate attached to one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableFilter {
    /// Filtered table.
    pub table: String,
    /// Condition over that table's columns.
    pub predicate: Predicate,
}

/// A parsed logical query.
///
/// ```rust,ignore
/// let query = Query::from("events")
///     .select(["tag", "id"])
///     .filter(Predicate::eq("tag", "a"))
///     .order_by(["id"])
///     .limit(10);
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Query {
    /// Scanned tables; the first is the primary table.
    pub tables: Vec<String>,
    /// Per-table predicates, AND-ed per table.
    pub filters: Vec<TableFilter>,
    /// Select list; empty means every column of every table.
    pub projection: Vec<Projection>,
    /// Join between the first and the second table.
    pub join: Option<JoinSpec>,
    /// Sort keys.
    pub order_by: Vec<OrderKey>,
    /// Sort descending instead of ascending.
    pub descending: bool,
    /// Remove duplicate output rows.
    pub distinct: bool,
    /// Skip this many output rows.
    pub offset: usize,
    /// Return at most this many output rows.
    pub limit: Option<usize>,
}

impl Query {
    /// Starts a query over `table`.
    #[must_use]
    #[allow(clippy::should_implement_trait)]
    pub fn from(table: impl Into<String>) -> Self {
        Self {
            tables: vec![table.into()],
            ..Self::default()
        }
    }

    /// Sets the select list.
    #[must_use]
    pub fn select<P: Into<Projection>>(mut self, items: impl IntoIterator<Item = P>) -> Self {
        self.projection = items.into_iter().map(Into::into).collect();
        self
    }

    /// Adds a predicate on the primary table.
    #[must_use]
    pub fn filter(self, predicate: Predicate) -> Self {
        let table = self.tables.first().cloned().unwrap_or_default();
        self.filter_table(table, predicate)
    }

    /// Adds a predicate on `table`.
    #[must_use]
    pub fn filter_table(mut self, table: impl Into<String>, predicate: Predicate) -> Self {
        self.filters.push(TableFilter {
            table: table.into(),
            predicate,
        });
        self
    }

    /// Joins `table` on `spec`.
    #[must_use]
    pub fn join(mut self, table: impl Into<String>, spec: JoinSpec) -> Self {
        self.tables.push(table.into());
        self.join = Some(spec);
        self
    }

    /// Sorts by the given keys.
    #[must_use]
    pub fn order_by<K: Into<OrderKey>>(mut self, keys: impl IntoIterator<Item = K>) -> Self {
        self.order_by = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Sorts descending.
    #[must_use]
    pub fn desc(mut self) -> Self {
        self.descending = true;
        self
    }

    /// Removes duplicate rows.
    #[must_use]
    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// Caps the number of rows.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skips leading rows.
    #[must_use]
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Conjunction of every predicate on `table`.
    pub(crate) fn predicate_for(&self, table: &str) -> Option<Predicate> {
        let mut preds: Vec<Predicate> = self
            .filters
            .iter()
            .filter(|f| f.table == table)
            .map(|f| f.predicate.clone())
            .collect();
        match preds.len() {
            0 => None,
            1 => preds.pop(),
            _ => Some(Predicate::and(preds)),
        }
    }
}
