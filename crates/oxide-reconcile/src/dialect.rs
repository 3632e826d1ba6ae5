//! SQLite statement text.
//!
//! SQLite has limited ALTER TABLE support, so column-set changes use the
//! "table recreation" strategy: create a new table, copy data, drop the old
//! table, rename the new table. This module only builds the statements; the
//! rebuilder and the engine run them.

use crate::error::{MigrateError, Result};

/// Disables foreign key enforcement for the connection.
pub const FOREIGN_KEYS_OFF: &str = "PRAGMA foreign_keys = OFF";

/// Re-enables foreign key enforcement for the connection.
pub const FOREIGN_KEYS_ON: &str = "PRAGMA foreign_keys = ON";

/// Reports rows violating foreign key constraints.
pub const FOREIGN_KEY_CHECK: &str = "PRAGMA foreign_key_check";

/// SQLite statement builder.
#[derive(Debug, Clone, Default)]
pub struct SqliteDialect;

impl SqliteDialect {
    /// Creates a new SQLite dialect.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Quote an identifier (table name, column name, etc.).
    #[must_use]
    pub fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    /// Generates SQL for dropping a table.
    #[must_use]
    pub fn drop_table_sql(&self, name: &str) -> String {
        format!("DROP TABLE IF EXISTS {}", self.quote_identifier(name))
    }

    /// Generates SQL for dropping an index.
    #[must_use]
    pub fn drop_index_sql(&self, name: &str) -> String {
        format!("DROP INDEX IF EXISTS {}", self.quote_identifier(name))
    }

    /// Generates SQL for renaming a table.
    #[must_use]
    pub fn rename_table_sql(&self, old_name: &str, new_name: &str) -> String {
        format!(
            "ALTER TABLE {} RENAME TO {}",
            self.quote_identifier(old_name),
            self.quote_identifier(new_name)
        )
    }

    /// Generates the row copy from `source` into `target`.
    ///
    /// The same column list is used on both sides.
    #[must_use]
    pub fn copy_rows_sql(&self, target: &str, source: &str, columns: &[String]) -> String {
        let quoted: Vec<String> = columns.iter().map(|c| self.quote_identifier(c)).collect();
        let cols = quoted.join(", ");
        format!(
            "INSERT INTO {} ({}) SELECT {} FROM {}",
            self.quote_identifier(target),
            cols,
            cols,
            self.quote_identifier(source)
        )
    }

    /// Rewrites a `CREATE TABLE` statement so it creates `shadow` instead of
    /// `table`.
    ///
    /// Only the first occurrence of the name after the `TABLE` keyword is
    /// replaced, so references to the table inside the body (self-referencing
    /// foreign keys) keep pointing at the original name.
    pub fn shadow_create_sql(&self, table: &str, shadow: &str, create_sql: &str) -> Result<String> {
        let invalid = |message: &str| MigrateError::InvalidDefinition {
            table: table.to_string(),
            message: message.to_string(),
        };

        let keyword = find_keyword(create_sql, "TABLE")
            .ok_or_else(|| invalid("no TABLE keyword in creation statement"))?;
        let offset = keyword + "TABLE".len();

        let pos = create_sql[offset..]
            .find(table)
            .map(|p| p + offset)
            .ok_or_else(|| invalid("table name not found in creation statement"))?;

        let mut sql = String::with_capacity(create_sql.len() + shadow.len());
        sql.push_str(&create_sql[..pos]);
        sql.push_str(shadow);
        sql.push_str(&create_sql[pos + table.len()..]);
        Ok(sql)
    }
}

/// Byte offset of the first standalone, case-insensitive `keyword`.
fn find_keyword(sql: &str, keyword: &str) -> Option<usize> {
    let upper = sql.to_ascii_uppercase();
    let is_ident = |b: u8| b.is_ascii_alphanumeric() || b == b'_';
    let bytes = upper.as_bytes();

    let mut starts = upper.match_indices(keyword).map(|(i, _)| i);
    starts.find(|&i| {
        let before = i == 0 || !is_ident(bytes[i - 1]);
        let end = i + keyword.len();
        let after = end >= bytes.len() || !is_ident(bytes[end]);
        before && after
    })
}
