//! Mergeable reducers for partial and final aggregation.
//!
//! Every accumulator is associative and commutative: partial states built on
//! any split of the input merge into the same final value.

use crate::plan::AggregateFunc;
use crate::value::{Row, Value};

/// Running state of one reducer.
#[derive(Debug, Clone, PartialEq)]
pub enum Accumulator {
    /// Rows (`count()`) or non-null values (`count(col)`).
    Count(u64),
    /// Running sum; `None` before the first numeric value.
    Sum(Option<SumState>),
    /// Smallest non-null value.
    Min(Option<Value>),
    /// Largest non-null value.
    Max(Option<Value>),
    /// Float sum and count of non-null values.
    Avg {
        /// Running sum
        sum: f64,
        /// Values seen
        count: u64,
    },
}

impl Accumulator {
    /// Empty state for `func`.
    #[must_use]
    pub fn new(func: AggregateFunc) -> Self {
        match func {
            AggregateFunc::Count => Self::Count(0),
            AggregateFunc::Sum => Self::Sum(None),
            AggregateFunc::Min => Self::Min(None),
            AggregateFunc::Max => Self::Max(None),
            AggregateFunc::Avg => Self::Avg { sum: 0.0, count: 0 },
        }
    }

    /// Folds one input. `None` is a bare row, only meaningful for `count()`.
    pub fn update(&mut self, value: Option<&Value>) {
        let value = match value {
            None => {
                if let Self::Count(n) = self {
                    *n += 1;
                }
                return;
            }
            Some(v) if v.is_null() => return,
            Some(v) => v,
        };

        match self {
            Self::Count(n) => *n += 1,
            Self::Sum(sum) => {
                if let Some(term) = SumState::of(value) {
                    *sum = Some(sum.take().map_or(term, |acc| acc.combine(term)));
                }
            }
            Self::Min(min) => {
                if min.as_ref().is_none_or(|m| value < m) {
                    *min = Some(value.clone());
                }
            }
            Self::Max(max) => {
                if max.as_ref().is_none_or(|m| value > m) {
                    *max = Some(value.clone());
                }
            }
            Self::Avg { sum, count } => {
                if let Some(v) = value.as_f64() {
                    *sum += v;
                    *count += 1;
                }
            }
        }
    }

    /// Combines another partial state of the same reducer into this one.
    pub fn merge(&mut self, other: Self) {
        match (self, other) {
            (Self::Count(a), Self::Count(b)) => *a += b,
            (Self::Sum(a), Self::Sum(b)) => {
                *a = match (a.take(), b) {
                    (Some(x), Some(y)) => Some(x.combine(y)),
                    (x, y) => x.or(y),
                };
            }
            (Self::Min(a), Self::Min(Some(b))) => {
                if a.as_ref().is_none_or(|m| &b < m) {
                    *a = Some(b);
                }
            }
            (Self::Max(a), Self::Max(Some(b))) => {
                if a.as_ref().is_none_or(|m| &b > m) {
                    *a = Some(b);
                }
            }
            (
                Self::Avg { sum, count },
                Self::Avg {
                    sum: other_sum,
                    count: other_count,
                },
            ) => {
                *sum += other_sum;
                *count += other_count;
            }
            _ => {}
        }
    }

    /// Final value; `Null` for an empty `sum`, `min`, `max` or `avg`.
    #[must_use]
    pub fn finish(self) -> Value {
        match self {
            Self::Count(n) => Value::Int(i64::try_from(n).unwrap_or(i64::MAX)),
            Self::Sum(sum) => sum.map_or(Value::Null, SumState::finish),
            Self::Min(v) | Self::Max(v) => v.unwrap_or(Value::Null),
            Self::Avg { count: 0, .. } => Value::Null,
            Self::Avg { sum, count } => Value::Float(sum / count as f64),
        }
    }
}

/// Partial sum.
///
/// Integer and timestamp inputs add up exactly in an `i128`, apart from
/// float inputs, so the result does not depend on how rows were split
/// across partitions. Sums of timestamps stay timestamps.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SumState {
    exact: i128,
    float: f64,
    saw_float: bool,
    timestamps_only: bool,
}

impl SumState {
    fn of(value: &Value) -> Option<Self> {
        let (exact, float, saw_float, timestamps_only) = match value {
            Value::Int(v) => (i128::from(*v), 0.0, false, false),
            Value::Timestamp(v) => (i128::from(*v), 0.0, false, true),
            Value::Float(v) => (0, *v, true, false),
            _ => return None,
        };
        Some(Self {
            exact,
            float,
            saw_float,
            timestamps_only,
        })
    }

    fn combine(self, other: Self) -> Self {
        Self {
            exact: self.exact.saturating_add(other.exact),
            float: self.float + other.float,
            saw_float: self.saw_float || other.saw_float,
            timestamps_only: self.timestamps_only && other.timestamps_only,
        }
    }

    fn finish(self) -> Value {
        if self.saw_float {
            return Value::Float(self.exact as f64 + self.float);
        }
        match i64::try_from(self.exact) {
            Ok(v) if self.timestamps_only => Value::Timestamp(v),
            Ok(v) => Value::Int(v),
            Err(_) => Value::Float(self.exact as f64),
        }
    }
}

/// Partial aggregate of one group.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupState {
    /// Grouping values.
    pub key: Row,
    /// One state per reducer.
    pub accumulators: Vec<Accumulator>,
}
