//! Schema introspection.
//!
//! Reads `sqlite_master` plus per-table pragmas into a [`SchemaModel`].
//! Everything is read in one pass; the returned model is a snapshot and is
//! not refreshed behind the caller's back.

use std::collections::{BTreeMap, BTreeSet};

use sqlx::sqlite::SqliteConnection;
use tracing::debug;

use crate::error::{MigrateError, Result};
use crate::schema::{Column, Index, SchemaModel, Table};

/// Catalog objects the model is built from.
///
/// Internal objects (`sqlite_sequence`, `sqlite_stat1`, auto-indices) are
/// skipped, as are views and triggers.
const CATALOG_SQL: &str = r"
SELECT type, name, tbl_name, sql
FROM sqlite_master
WHERE type IN ('table', 'index')
  AND sql IS NOT NULL
  AND name NOT LIKE 'sqlite\_%' ESCAPE '\'
ORDER BY name
";

const COLUMNS_SQL: &str = r#"
SELECT cid, name, type, "notnull", dflt_value, pk
FROM pragma_table_info(?1)
ORDER BY cid
"#;

const REFERENCES_SQL: &str = r#"
SELECT DISTINCT "table"
FROM pragma_foreign_key_list(?1)
"#;

/// Reads the full schema of the database behind `conn`.
pub async fn introspect(conn: &mut SqliteConnection) -> Result<SchemaModel> {
    let rows: Vec<(String, String, String, String)> = sqlx::query_as(CATALOG_SQL)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| MigrateError::introspection("sqlite_master", e))?;

    let mut model = SchemaModel::new();
    for (kind, name, table_name, sql) in rows {
        match kind.as_str() {
            "table" => {
                let table = Table {
                    columns: read_columns(conn, &name).await?,
                    references: read_references(conn, &name).await?,
                    ..Table::new(name.clone(), sql)
                };
                model.tables.insert(name, table);
            }
            "index" => {
                model
                    .indices
                    .insert(name.clone(), Index::new(name, table_name, sql));
            }
            _ => {}
        }
    }

    debug!(
        tables = model.tables.len(),
        indices = model.indices.len(),
        "Introspected schema"
    );

    Ok(model)
}

/// Reads the column metadata of one table.
pub async fn read_columns(
    conn: &mut SqliteConnection,
    table: &str,
) -> Result<BTreeMap<String, Column>> {
    let rows: Vec<(i64, String, String, i64, Option<String>, i64)> = sqlx::query_as(COLUMNS_SQL)
        .bind(table)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| MigrateError::introspection(format!("columns of '{}'", table), e))?;

    Ok(rows
        .into_iter()
        .map(|(ordinal, name, declared_type, not_null, default_value, pk)| {
            let column = Column {
                name: name.clone(),
                ordinal,
                declared_type,
                not_null: not_null != 0,
                default_value,
                primary_key: pk > 0,
            };
            (name, column)
        })
        .collect())
}

/// Reads the parent tables referenced by foreign keys of `table`.
async fn read_references(conn: &mut SqliteConnection, table: &str) -> Result<BTreeSet<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(REFERENCES_SQL)
        .bind(table)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| MigrateError::introspection(format!("foreign keys of '{}'", table), e))?;

    Ok(rows.into_iter().map(|(parent,)| parent).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::Connection;

    async fn memory() -> SqliteConnection {
        SqliteConnection::connect("sqlite::memory:")
            .await
            .expect("Failed to open in-memory SQLite connection")
    }

    #[tokio::test]
    async fn test_introspect_empty_database() {
        let mut conn = memory().await;
        let model = introspect(&mut conn).await.unwrap();
        assert!(model.is_empty());
    }

    #[tokio::test]
    async fn test_introspect_tables_columns_and_indices() {
        let mut conn = memory().await;
        sqlx::raw_sql(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL DEFAULT 'anon');
             CREATE TABLE posts (id INTEGER PRIMARY KEY, user_id INTEGER REFERENCES users(id), body);
             CREATE INDEX idx_posts_user ON posts (user_id);",
        )
        .execute(&mut conn)
        .await
        .unwrap();

        let model = introspect(&mut conn).await.unwrap();
        assert_eq!(
            model.tables.keys().map(String::as_str).collect::<Vec<_>>(),
            vec!["posts", "users"]
        );

        let users = model.get_table("users").unwrap();
        assert!(users.sql.starts_with("CREATE TABLE users"));
        assert_eq!(users.column_names(), vec!["id", "name"]);

        let id = &users.columns["id"];
        assert_eq!(id.declared_type, "INTEGER");
        assert!(id.primary_key);

        let name = &users.columns["name"];
        assert!(name.not_null);
        assert_eq!(name.default_value.as_deref(), Some("'anon'"));

        let posts = model.get_table("posts").unwrap();
        assert_eq!(posts.columns["body"].declared_type, "");
        assert!(posts.references.contains("users"));

        let index = &model.indices["idx_posts_user"];
        assert_eq!(index.table, "posts");
        assert_eq!(index.sql, "CREATE INDEX idx_posts_user ON posts (user_id)");
    }

    #[tokio::test]
    async fn test_introspect_skips_internal_objects() {
        let mut conn = memory().await;
        sqlx::raw_sql(
            "CREATE TABLE tags (id INTEGER PRIMARY KEY AUTOINCREMENT, label TEXT UNIQUE);
             INSERT INTO tags (label) VALUES ('rust');
             CREATE VIEW tag_labels AS SELECT label FROM tags;",
        )
        .execute(&mut conn)
        .await
        .unwrap();

        let model = introspect(&mut conn).await.unwrap();
        assert_eq!(model.tables.keys().collect::<Vec<_>>(), vec!["tags"]);
        assert!(model.indices.is_empty());
    }

    #[tokio::test]
    async fn test_read_columns_of_missing_table_is_empty() {
        let mut conn = memory().await;
        assert!(read_columns(&mut conn, "nope").await.unwrap().is_empty());
    }
}
