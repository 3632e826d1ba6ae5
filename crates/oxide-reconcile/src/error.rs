//! Error types for the reconciliation run.
//!
//! Every error is fatal to the run. The variants follow the phase in which
//! the failure happened so the binary can report (and exit) per class.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

/// A row reported by `PRAGMA foreign_key_check`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForeignKeyViolation {
    /// Table holding the offending row.
    pub table: String,
    /// Rowid of the offending row (`None` for `WITHOUT ROWID` tables).
    pub rowid: Option<i64>,
    /// Referenced (parent) table.
    pub parent: String,
    /// Index of the foreign key within the child table.
    pub fk_id: i64,
}

impl fmt::Display for ForeignKeyViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.rowid {
            Some(rowid) => write!(
                f,
                "{} rowid {} -> {} (fk #{})",
                self.table, rowid, self.parent, self.fk_id
            ),
            None => write!(f, "{} -> {} (fk #{})", self.table, self.parent, self.fk_id),
        }
    }
}

/// Errors that can occur while reconciling a database.
#[derive(Debug, thiserror::Error)]
pub enum MigrateError {
    /// The database could not be opened.
    #[error("Cannot connect to '{dsn}': {source}")]
    Connection {
        /// Connection string handed to the driver.
        dsn: String,
        /// Driver error.
        #[source]
        source: sqlx::Error,
    },

    /// A catalog or column-info query failed.
    #[error("Introspection of {object} failed: {source}")]
    Introspection {
        /// Catalog object being read.
        object: String,
        /// Driver error.
        #[source]
        source: sqlx::Error,
    },

    /// A DDL/DML statement failed.
    #[error("Statement failed: {statement}: {source}")]
    Execution {
        /// The statement text as sent to the engine.
        statement: String,
        /// Driver error.
        #[source]
        source: sqlx::Error,
    },

    /// `PRAGMA foreign_key_check` reported violations after a rebuild.
    #[error(
        "Foreign key check failed after rebuilding '{table}':\n{}",
        .violations.iter().map(|v| format!("  - {}", v)).collect::<Vec<_>>().join("\n")
    )]
    ConsistencyViolation {
        /// Table whose rebuild was being verified.
        table: String,
        /// Rows reported by the check.
        violations: Vec<ForeignKeyViolation>,
    },

    /// A creation statement could not be rewritten for the shadow table.
    #[error("Cannot derive shadow table for '{table}': {message}")]
    InvalidDefinition {
        /// Table being rebuilt.
        table: String,
        /// What went wrong.
        message: String,
    },

    /// Reading the schema definition failed.
    #[error("Cannot read '{path}': {source}")]
    Io {
        /// File being read.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MigrateError {
    pub(crate) fn execution(statement: impl Into<String>, source: sqlx::Error) -> Self {
        Self::Execution {
            statement: statement.into(),
            source,
        }
    }

    pub(crate) fn introspection(object: impl Into<String>, source: sqlx::Error) -> Self {
        Self::Introspection {
            object: object.into(),
            source,
        }
    }

    /// Process exit code for this error class.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Io { .. } | Self::Serialization(_) => 1,
            Self::Connection { .. } => 2,
            Self::Introspection { .. } => 3,
            Self::Execution { .. } => 4,
            Self::ConsistencyViolation { .. } => 5,
            Self::InvalidDefinition { .. } => 6,
        }
    }
}

/// Result type for reconciliation operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
