//! Builder methods for creating Predicate instances.

use super::Predicate;
use crate::value::Value;

impl Predicate {
    /// Creates an equality predicate.
    #[must_use]
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq {
            column: column.into(),
            value: value.into(),
        }
    }

    /// Creates a not-equal predicate.
    #[must_use]
    pub fn neq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Neq {
            column: column.into(),
            value: value.into(),
        }
    }

    /// Creates a greater-than predicate.
    #[must_use]
    pub fn gt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Gt {
            column: column.into(),
            value: value.into(),
        }
    }

    /// Creates a greater-than-or-equal predicate.
    #[must_use]
    pub fn gte(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Gte {
            column: column.into(),
            value: value.into(),
        }
    }

    /// Creates a less-than predicate.
    #[must_use]
    pub fn lt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Lt {
            column: column.into(),
            value: value.into(),
        }
    }

    /// Creates a less-than-or-equal predicate.
    #[must_use]
    pub fn lte(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Lte {
            column: column.into(),
            value: value.into(),
        }
    }

    /// Creates an IN predicate.
    #[must_use]
    pub fn is_in<V: Into<Value>>(column: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Self::In {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Creates an is-null predicate.
    #[must_use]
    pub fn is_null(column: impl Into<String>) -> Self {
        Self::IsNull {
            column: column.into(),
        }
    }

    /// Creates an is-not-null predicate.
    #[must_use]
    pub fn is_not_null(column: impl Into<String>) -> Self {
        Self::IsNotNull {
            column: column.into(),
        }
    }

    /// Creates an AND predicate.
    #[must_use]
    pub fn and(predicates: Vec<Predicate>) -> Self {
        Self::And { predicates }
    }

    /// Creates an OR predicate.
    #[must_use]
    pub fn or(predicates: Vec<Predicate>) -> Self {
        Self::Or { predicates }
    }

    /// Creates a NOT predicate.
    #[must_use]
    #[allow(clippy::should_implement_trait)]
    pub fn not(predicate: Predicate) -> Self {
        Self::Not {
            predicate: Box::new(predicate),
        }
    }
}
