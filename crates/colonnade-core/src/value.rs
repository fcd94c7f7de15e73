//! Typed column values.
//!
//! [`Value`] is the closed set of values that flow through the codec, the
//! indexes and the planner. It has a total order (used for dictionaries,
//! min/max statistics and `ORDER BY`) and a stable hash (used to route rows
//! to shuffle buckets, so it must not depend on process-local state).

use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Semantic type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    /// 64-bit signed integer
    Int,
    /// 64-bit floating point
    Float,
    /// UTF-8 string
    String,
    /// Boolean
    Bool,
    /// Milliseconds since the Unix epoch
    Timestamp,
}

impl ColumnType {
    /// Stable one-byte tag used in block headers.
    #[must_use]
    pub const fn tag(self) -> u8 {
        match self {
            Self::Int => 1,
            Self::Float => 2,
            Self::String => 3,
            Self::Bool => 4,
            Self::Timestamp => 5,
        }
    }

    /// Inverse of [`ColumnType::tag`].
    #[must_use]
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::Int),
            2 => Some(Self::Float),
            3 => Some(Self::String),
            4 => Some(Self::Bool),
            5 => Some(Self::Timestamp),
            _ => None,
        }
    }

    /// Lower-case type name for messages.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::Float => "float",
            Self::String => "string",
            Self::Bool => "bool",
            Self::Timestamp => "timestamp",
        }
    }

    /// True for types that support arithmetic aggregation.
    #[must_use]
    pub const fn is_numeric(self) -> bool {
        matches!(self, Self::Int | Self::Float | Self::Timestamp)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single column value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    /// Integer value
    Int(i64),
    /// Float value
    Float(f64),
    /// String value
    String(String),
    /// Boolean value
    Bool(bool),
    /// Timestamp in milliseconds since the Unix epoch
    Timestamp(i64),
    /// Missing value
    Null,
}

impl Value {
    /// Returns the column type this value belongs to, `None` for `Null`.
    #[must_use]
    pub fn column_type(&self) -> Option<ColumnType> {
        match self {
            Self::Int(_) => Some(ColumnType::Int),
            Self::Float(_) => Some(ColumnType::Float),
            Self::String(_) => Some(ColumnType::String),
            Self::Bool(_) => Some(ColumnType::Bool),
            Self::Timestamp(_) => Some(ColumnType::Timestamp),
            Self::Null => None,
        }
    }

    /// Type name for messages ("null" for `Null`).
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.column_type().map_or("null", ColumnType::name)
    }

    /// Returns true if the value is `Null`.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// True when the value may be stored in a column of type `ty`.
    #[must_use]
    pub fn fits(&self, ty: ColumnType) -> bool {
        self.column_type().is_none_or(|own| own == ty)
    }

    /// Numeric view used by aggregations.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) | Self::Timestamp(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// String view.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Approximate in-memory footprint, used by the writer's byte threshold.
    #[must_use]
    pub fn estimated_size(&self) -> usize {
        match self {
            Self::String(s) => 24 + s.len(),
            Self::Null => 1,
            _ => 9,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Bool(_) => 1,
            Self::Int(_) => 2,
            Self::Float(_) => 3,
            Self::Timestamp(_) => 4,
            Self::String(_) => 5,
        }
    }

    /// Comparison with predicate semantics.
    ///
    /// `Null` is incomparable. `Int`, `Float` and `Timestamp` compare
    /// numerically with each other; other cross-type pairs are incomparable.
    #[must_use]
    pub fn sql_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Null, _) | (_, Self::Null) => None,
            (Self::Int(a), Self::Int(b))
            | (Self::Timestamp(a), Self::Timestamp(b))
            | (Self::Int(a), Self::Timestamp(b))
            | (Self::Timestamp(a), Self::Int(b)) => Some(a.cmp(b)),
            (Self::Float(a), Self::Float(b)) => a.partial_cmp(b),
            (Self::Int(a) | Self::Timestamp(a), Self::Float(b)) => (*a as f64).partial_cmp(b),
            (Self::Float(a), Self::Int(b) | Self::Timestamp(b)) => a.partial_cmp(&(*b as f64)),
            (Self::String(a), Self::String(b)) => Some(a.cmp(b)),
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Process-independent hash, used for shuffle bucket routing.
    #[must_use]
    pub fn stable_hash(&self) -> u64 {
        let mut hasher = FxHasher::default();
        self.hash(&mut hasher);
        hasher.finish()
    }

    /// Converts a JSON value to a value of the given column type.
    ///
    /// Returns `None` when the JSON value cannot represent the type.
    #[must_use]
    pub fn from_json(json: &serde_json::Value, ty: ColumnType) -> Option<Self> {
        use serde_json::Value as J;
        match (json, ty) {
            (J::Null, _) => Some(Self::Null),
            (J::Number(n), ColumnType::Int) => n.as_i64().map(Self::Int),
            (J::Number(n), ColumnType::Timestamp) => n.as_i64().map(Self::Timestamp),
            (J::Number(n), ColumnType::Float) => n.as_f64().map(Self::Float),
            (J::String(s), ColumnType::String) => Some(Self::String(s.clone())),
            (J::Bool(b), ColumnType::Bool) => Some(Self::Bool(*b)),
            _ => None,
        }
    }

    /// Converts the value to JSON for result export.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Int(v) | Self::Timestamp(v) => serde_json::json!(v),
            Self::Float(v) => serde_json::json!(v),
            Self::String(s) => serde_json::json!(s),
            Self::Bool(b) => serde_json::json!(b),
            Self::Null => serde_json::Value::Null,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Total order: `Null` first, then by type, then by value (floats by
/// `total_cmp`).
impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) | (Self::Timestamp(a), Self::Timestamp(b)) => a.cmp(b),
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b),
            (Self::String(a), Self::String(b)) => a.cmp(b),
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Self::Int(v) | Self::Timestamp(v) => v.hash(state),
            Self::Float(v) => v.to_bits().hash(state),
            Self::String(s) => s.hash(state),
            Self::Bool(b) => b.hash(state),
            Self::Null => {}
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Timestamp(v) => write!(f, "ts({v})"),
            Self::Null => f.write_str("null"),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// One row: values in schema column order.
pub type Row = Vec<Value>;
