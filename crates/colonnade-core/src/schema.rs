//! Table schemas.
//!
//! A schema is fixed at table creation and never changes afterwards. Besides
//! name and type, each column carries two physical hints: whether a bitmap
//! index is built for it, and which encoding the codec should use.

use crate::codec::Encoding;
use crate::error::{Error, Result};
use crate::value::{ColumnType, Value};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A column definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    /// Column name, unique within the table.
    pub name: String,
    /// Semantic type.
    pub column_type: ColumnType,
    /// Build a bitmap index for this column on every flush.
    pub indexed: bool,
    /// Encoding hint for the codec.
    pub encoding: Encoding,
}

impl Column {
    /// Creates an unindexed column with automatic encoding.
    #[must_use]
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            indexed: false,
            encoding: Encoding::Auto,
        }
    }

    /// Marks the column as indexed.
    #[must_use]
    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    /// Pins the encoding instead of letting the codec choose.
    #[must_use]
    pub fn encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }
}

/// Ordered schema of a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    table: String,
    columns: IndexMap<String, Column>,
    partition_column: Option<String>,
}

impl Schema {
    /// Builds a schema from an ordered column list.
    ///
    /// # Errors
    ///
    /// Returns `InvalidQuery` if the table name is empty, there are no
    /// columns, or a column name repeats.
    pub fn new(table: impl Into<String>, columns: Vec<Column>) -> Result<Self> {
        let table = table.into();
        if table.is_empty() || table.contains('/') {
            return Err(Error::InvalidQuery(format!(
                "invalid table name '{table}'"
            )));
        }
        if columns.is_empty() {
            return Err(Error::InvalidQuery(format!(
                "table '{table}' needs at least one column"
            )));
        }

        let mut map = IndexMap::with_capacity(columns.len());
        for column in columns {
            if column.name.is_empty() || column.name.contains('/') {
                return Err(Error::InvalidQuery(format!(
                    "invalid column name '{}' in table '{table}'",
                    column.name
                )));
            }
            if map.contains_key(&column.name) {
                return Err(Error::InvalidQuery(format!(
                    "duplicate column '{}' in table '{table}'",
                    column.name
                )));
            }
            if !column.encoding.supports(column.column_type) {
                return Err(Error::InvalidQuery(format!(
                    "column '{}' of type {} cannot use {:?} encoding",
                    column.name, column.column_type, column.encoding
                )));
            }
            map.insert(column.name.clone(), column);
        }

        Ok(Self {
            table,
            columns: map,
            partition_column: None,
        })
    }

    /// Declares `column` as the partition column.
    ///
    /// Every flushed partition then holds rows of a single value of that
    /// column. The column is indexed implicitly.
    ///
    /// # Errors
    ///
    /// Returns `InvalidQuery` if the column does not exist.
    pub fn with_partition_column(mut self, column: &str) -> Result<Self> {
        let Some(col) = self.columns.get_mut(column) else {
            return Err(Error::InvalidQuery(format!(
                "partition column '{column}' not in table '{}'",
                self.table
            )));
        };
        col.indexed = true;
        self.partition_column = Some(column.to_string());
        Ok(self)
    }

    /// Table name.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Columns in schema order.
    pub fn columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.values()
    }

    /// Column names in schema order.
    #[must_use]
    pub fn column_names(&self) -> Vec<String> {
        self.columns.keys().cloned().collect()
    }

    /// Number of columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Always false for a valid schema.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Column by name.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    /// Position of a column in schema order.
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.get_index_of(name)
    }

    /// Column at a position.
    #[must_use]
    pub fn column_at(&self, idx: usize) -> Option<&Column> {
        self.columns.get_index(idx).map(|(_, c)| c)
    }

    /// Partition column, if any.
    #[must_use]
    pub fn partition_column(&self) -> Option<&str> {
        self.partition_column.as_deref()
    }

    /// Checks a row against the schema.
    ///
    /// `Null` is accepted in any column.
    ///
    /// # Errors
    ///
    /// Returns `SchemaMismatch` on wrong arity or a value of the wrong type.
    pub fn validate_row(&self, row: &[Value]) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(Error::schema_mismatch(
                &self.table,
                format!("expected {} columns, got {}", self.columns.len(), row.len()),
            ));
        }
        for (value, column) in row.iter().zip(self.columns.values()) {
            if !value.fits(column.column_type) {
                return Err(Error::schema_mismatch(
                    &self.table,
                    format!(
                        "column '{}' expects {}, got {}",
                        column.name,
                        column.column_type,
                        value.type_name()
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Maps a JSON object onto a row by column name.
    ///
    /// Missing fields become `Null`; unknown fields are ignored.
    ///
    /// # Errors
    ///
    /// Returns `SchemaMismatch` if the JSON is not an object or a field has
    /// the wrong type.
    pub fn row_from_json(&self, json: &serde_json::Value) -> Result<Vec<Value>> {
        let Some(object) = json.as_object() else {
            return Err(Error::schema_mismatch(
                &self.table,
                "JSON row must be an object",
            ));
        };

        self.columns
            .values()
            .map(|column| match object.get(&column.name) {
                None => Ok(Value::Null),
                Some(field) => Value::from_json(field, column.column_type).ok_or_else(|| {
                    Error::schema_mismatch(
                        &self.table,
                        format!(
                            "field '{}' is not a valid {}",
                            column.name, column.column_type
                        ),
                    )
                }),
            })
            .collect()
    }
}
