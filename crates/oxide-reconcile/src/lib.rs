//! Schema reconciliation for SQLite.
//!
//! `oxide-reconcile` converges a live database on a desired schema written as
//! plain SQL. There is no migration history: every run introspects both
//! sides and applies only the difference.
//!
//! - Tables and indices missing from the database are created from their
//!   verbatim definitions.
//! - Tables and indices absent from the definition are dropped.
//! - Tables whose column set changed are rebuilt (create shadow, copy shared
//!   columns, drop, rename, recreate indices) in one transaction each, so
//!   rows survive in every column both shapes share.
//!
//! Only column names are compared. A column whose type or constraints change
//! is left as it is.
//!
//! # Architecture
//!
//! - **Schema** - Immutable snapshot of tables, columns and indices
//! - **Introspect** - Reads a snapshot from a live connection
//! - **Diff** - Keyed set differences and intersections
//! - **Rebuild** - The per-table recreation procedure
//! - **Engine** - Orchestrates a run and owns the foreign key pragmas
//!
//! # Example
//!
//! ```rust,ignore
//! use oxide_reconcile::prelude::*;
//!
//! let engine = MigrationEngine::new();
//! let report = engine
//!     .migrate("sqlite:app.db", "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT);")
//!     .await?;
//! println!("rebuilt: {:?}", report.tables_rebuilt);
//! ```
//!
//! # CLI Usage
//!
//! ```bash
//! # Bring app.db in line with schema.sql
//! oxide-reconcile -d sqlite:app.db -s schema.sql migrate
//!
//! # Show the statements without executing them
//! oxide-reconcile -d sqlite:app.db -s schema.sql migrate --dry-run
//!
//! # Print the plan as JSON
//! oxide-reconcile -d sqlite:app.db -s schema.sql plan --json
//! ```

pub mod dialect;
pub mod diff;
pub mod engine;
pub mod error;
pub mod introspect;
pub mod plan;
pub mod rebuild;
pub mod schema;
pub mod source;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::dialect::SqliteDialect;
    pub use crate::diff::{diff, intersect_keys, intersect_keys_ignore_case, Delta};
    pub use crate::engine::{
        connect, desired_from_definition, find_altered_tables, MigrationEngine, MigrationOptions,
    };
    pub use crate::error::{ForeignKeyViolation, MigrateError, Result};
    pub use crate::introspect::introspect;
    pub use crate::plan::{ChangeKind, MigrationPlan, MigrationReport, StructuralChange};
    pub use crate::rebuild::{rebuild_table, RebuildPlan, RebuildStage, RebuildStep};
    pub use crate::schema::{Column, Index, SchemaModel, Table};
    pub use crate::source::load_definition;
}
