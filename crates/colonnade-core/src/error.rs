//! Error types for Colonnade.
//!
//! A single error enum covers the whole engine. Each variant carries a stable
//! `COL-XXX` code so failures can be matched on across process boundaries
//! (stage failures travel back from workers as text).

use thiserror::Error;

/// Result type alias for Colonnade operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Colonnade operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Row shape or value type disagrees with the table schema (COL-001).
    ///
    /// Raised by the partition writer at append time. The offending row is
    /// rejected; rows already buffered are kept.
    #[error("[COL-001] Schema mismatch on table '{table}': {message}")]
    SchemaMismatch {
        /// Table the row was appended to.
        table: String,
        /// What disagreed.
        message: String,
    },

    /// A column block failed an integrity check while decoding (COL-002).
    #[error("[COL-002] Corrupt block: {0}")]
    CorruptBlock(String),

    /// Planning could not resolve a scan over a table (COL-003).
    #[error("[COL-003] Unresolvable scan on table '{table}': {message}")]
    UnresolvableScan {
        /// Table that could not be scanned.
        table: String,
        /// Why the scan could not be resolved.
        message: String,
    },

    /// Join keys cannot be compared (COL-004).
    #[error("[COL-004] Unsupported join: {0}")]
    UnsupportedJoin(String),

    /// A plan stage exhausted its retries (COL-005).
    ///
    /// The whole query is aborted; no partial result is returned.
    #[error("[COL-005] Stage {stage} failed after {attempts} attempt(s): {cause}")]
    StageExecution {
        /// Id of the failing stage.
        stage: usize,
        /// Number of attempts made.
        attempts: u32,
        /// Last failure reported by the substrate.
        cause: String,
    },

    /// Table already exists (COL-006).
    #[error("[COL-006] Table '{0}' already exists")]
    TableExists(String),

    /// Table not found (COL-007).
    #[error("[COL-007] Table '{0}' not found")]
    TableNotFound(String),

    /// Logical query is malformed (COL-008).
    #[error("[COL-008] Invalid query: {0}")]
    InvalidQuery(String),

    /// Random access past the end of a block (COL-009).
    #[error("[COL-009] Position {position} out of bounds for block of {row_count} rows")]
    PositionOutOfBounds {
        /// Requested row position.
        position: usize,
        /// Rows in the block.
        row_count: usize,
    },

    /// Storage engine error (COL-010).
    #[error("[COL-010] Storage error: {0}")]
    Storage(String),

    /// IO error (COL-011).
    #[error("[COL-011] IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error (COL-012).
    #[error("[COL-012] Serialization error: {0}")]
    Serialization(String),

    /// Configuration error (COL-013).
    #[error("[COL-013] Configuration error: {0}")]
    Config(String),

    /// Internal error (COL-014).
    ///
    /// Indicates an unexpected internal error. Please report if encountered.
    #[error("[COL-014] Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns the error code (e.g., "COL-001").
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::SchemaMismatch { .. } => "COL-001",
            Self::CorruptBlock(_) => "COL-002",
            Self::UnresolvableScan { .. } => "COL-003",
            Self::UnsupportedJoin(_) => "COL-004",
            Self::StageExecution { .. } => "COL-005",
            Self::TableExists(_) => "COL-006",
            Self::TableNotFound(_) => "COL-007",
            Self::InvalidQuery(_) => "COL-008",
            Self::PositionOutOfBounds { .. } => "COL-009",
            Self::Storage(_) => "COL-010",
            Self::Io(_) => "COL-011",
            Self::Serialization(_) => "COL-012",
            Self::Config(_) => "COL-013",
            Self::Internal(_) => "COL-014",
        }
    }

    /// Returns true if this error is recoverable.
    ///
    /// A rejected row or a bad query can simply be corrected and resubmitted;
    /// corruption, exhausted retries and internal errors cannot.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::CorruptBlock(_) | Self::StageExecution { .. } | Self::Internal(_)
        )
    }

    /// Shorthand for building a [`Error::SchemaMismatch`].
    pub(crate) fn schema_mismatch(table: &str, message: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            table: table.to_string(),
            message: message.into(),
        }
    }

    /// Shorthand for building a [`Error::UnresolvableScan`].
    pub(crate) fn unresolvable(table: &str, message: impl Into<String>) -> Self {
        Self::UnresolvableScan {
            table: table.to_string(),
            message: message.into(),
        }
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<crate::config::ConfigError> for Error {
    fn from(err: crate::config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
