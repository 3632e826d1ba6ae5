//! Schema snapshot types.
//!
//! A [`SchemaModel`] is an immutable picture of one database at one point of
//! the run. It is produced by introspection and never patched afterwards; a
//! fresher view means introspecting again.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// A column as reported by the engine.
///
/// Only [`Column::name`] takes part in diffing. Type and flags are carried
/// for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Position within the table definition.
    pub ordinal: i64,
    /// Declared type, verbatim (may be empty).
    pub declared_type: String,
    /// Whether the column is declared NOT NULL.
    pub not_null: bool,
    /// Default value expression, verbatim.
    pub default_value: Option<String>,
    /// Whether the column is part of the primary key.
    pub primary_key: bool,
}

impl Column {
    /// Creates a nullable, untyped column.
    #[must_use]
    pub fn new(name: impl Into<String>, ordinal: i64) -> Self {
        Self {
            name: name.into(),
            ordinal,
            declared_type: String::new(),
            not_null: false,
            default_value: None,
            primary_key: false,
        }
    }

    /// Sets the declared type.
    #[must_use]
    pub fn declared_type(mut self, declared_type: impl Into<String>) -> Self {
        self.declared_type = declared_type.into();
        self
    }

    /// Marks the column as part of the primary key.
    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Marks the column NOT NULL.
    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }
}

/// A table and the statement that created it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    /// Table name.
    pub name: String,
    /// Creation statement as stored in the catalog.
    pub sql: String,
    /// Columns keyed by name.
    pub columns: BTreeMap<String, Column>,
    /// Tables this table references through foreign keys.
    pub references: BTreeSet<String>,
}

impl Table {
    /// Creates a table with no columns.
    #[must_use]
    pub fn new(name: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql: sql.into(),
            columns: BTreeMap::new(),
            references: BTreeSet::new(),
        }
    }

    /// Adds a column.
    #[must_use]
    pub fn column(mut self, column: Column) -> Self {
        self.columns.insert(column.name.clone(), column);
        self
    }

    /// Adds a referenced parent table.
    #[must_use]
    pub fn references(mut self, parent: impl Into<String>) -> Self {
        self.references.insert(parent.into());
        self
    }

    /// Column names in declaration order.
    #[must_use]
    pub fn column_names(&self) -> Vec<&str> {
        let mut columns: Vec<&Column> = self.columns.values().collect();
        columns.sort_by_key(|c| c.ordinal);
        columns.iter().map(|c| c.name.as_str()).collect()
    }
}

/// An index and the statement that created it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    /// Index name.
    pub name: String,
    /// Owning table.
    pub table: String,
    /// Creation statement as stored in the catalog.
    pub sql: String,
}

impl Index {
    /// Creates an index entry.
    #[must_use]
    pub fn new(name: impl Into<String>, table: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            sql: sql.into(),
        }
    }
}

/// Tables and indices of one database, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaModel {
    /// Tables keyed by name.
    pub tables: BTreeMap<String, Table>,
    /// Indices keyed by name.
    pub indices: BTreeMap<String, Index>,
}

impl SchemaModel {
    /// Creates an empty model.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a table.
    #[must_use]
    pub fn table(mut self, table: Table) -> Self {
        self.tables.insert(table.name.clone(), table);
        self
    }

    /// Adds an index.
    #[must_use]
    pub fn index(mut self, index: Index) -> Self {
        self.indices.insert(index.name.clone(), index);
        self
    }

    /// Gets a table by name.
    #[must_use]
    pub fn get_table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    /// Columns of a table, if the table exists.
    #[must_use]
    pub fn columns_of(&self, table: &str) -> Option<&BTreeMap<String, Column>> {
        self.tables.get(table).map(|t| &t.columns)
    }

    /// Indices owned by `table`, ordered by index name.
    pub fn indices_on<'a>(&'a self, table: &'a str) -> impl Iterator<Item = &'a Index> + 'a {
        self.indices.values().filter(move |i| i.table == table)
    }

    /// Returns true when the model holds no tables and no indices.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty() && self.indices.is_empty()
    }
}
