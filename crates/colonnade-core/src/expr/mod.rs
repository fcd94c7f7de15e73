//! Predicate expressions over table rows.
//!
//! A [`Predicate`] is plain data: it can be serialized, shipped inside a
//! stage descriptor and evaluated three ways:
//!
//! - against a decoded row ([`Predicate::matches`]),
//! - against partition statistics, to prune partitions
//!   ([`Predicate::might_match`]),
//! - against bitmap indexes, to resolve matching rows without decoding
//!   ([`Predicate::evaluate_index`]).
//!
//! Comparisons involving `Null` are false, so `Null` only satisfies
//! `IsNull` (and the negation of a predicate it fails).
//!
//! ## Usage
//!
//! ```rust,ignore
//! use colonnade_core::expr::Predicate;
//!
//! let p = Predicate::and(vec![
//!     Predicate::eq("tag", "a"),
//!     Predicate::gte("id", 10),
//! ]);
//! ```

mod builders;
mod matching;
mod pruning;


use crate::value::Value;
use serde::{Deserialize, Serialize};

/// A boolean condition over the columns of one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Predicate {
    /// column == value
    Eq {
        /// Column name
        column: String,
        /// Value to compare against
        value: Value,
    },
    /// column != value
    Neq {
        /// Column name
        column: String,
        /// Value to compare against
        value: Value,
    },
    /// column > value
    Gt {
        /// Column name
        column: String,
        /// Value to compare against
        value: Value,
    },
    /// column >= value
    Gte {
        /// Column name
        column: String,
        /// Value to compare against
        value: Value,
    },
    /// column < value
    Lt {
        /// Column name
        column: String,
        /// Value to compare against
        value: Value,
    },
    /// column <= value
    Lte {
        /// Column name
        column: String,
        /// Value to compare against
        value: Value,
    },
    /// column is one of `values`
    In {
        /// Column name
        column: String,
        /// Accepted values
        values: Vec<Value>,
    },
    /// column is null
    IsNull {
        /// Column name
        column: String,
    },
    /// column is not null
    IsNotNull {
        /// Column name
        column: String,
    },
    /// All predicates hold
    And {
        /// Conjuncts
        predicates: Vec<Predicate>,
    },
    /// At least one predicate holds
    Or {
        /// Disjuncts
        predicates: Vec<Predicate>,
    },
    /// The predicate does not hold
    Not {
        /// Negated predicate
        predicate: Box<Predicate>,
    },
}

impl Predicate {
    /// Every column name referenced, in first-use order without repeats.
    #[must_use]
    pub fn columns(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Eq { column, .. }
            | Self::Neq { column, .. }
            | Self::Gt { column, .. }
            | Self::Gte { column, .. }
            | Self::Lt { column, .. }
            | Self::Lte { column, .. }
            | Self::In { column, .. }
            | Self::IsNull { column }
            | Self::IsNotNull { column } => {
                if !out.contains(&column.as_str()) {
                    out.push(column);
                }
            }
            Self::And { predicates } | Self::Or { predicates } => {
                for p in predicates {
                    p.collect_columns(out);
                }
            }
            Self::Not { predicate } => predicate.collect_columns(out),
        }
    }
}
