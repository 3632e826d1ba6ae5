//! Table rebuild ("create, copy, drop, rename").
//!
//! SQLite cannot add or drop arbitrary columns in place, so a table whose
//! column set changed is rebuilt:
//!
//! 1. create `<table>_new` (or the first free `<table>_new_<n>`) from the
//!    desired definition
//! 2. copy the columns both shapes share
//! 3. drop the original
//! 4. rename the shadow to the original name
//! 5. recreate the desired indices on it
//! 6. run `PRAGMA foreign_key_check`
//!
//! All of it runs in one transaction per table. Foreign key enforcement must
//! already be off; the engine toggles it around the whole rebuild loop
//! because the pragma is a no-op inside a transaction.

use serde::Serialize;
use sqlx::sqlite::SqliteConnection;
use sqlx::Connection;
use tracing::{debug, info, warn};

use crate::dialect::{SqliteDialect, FOREIGN_KEY_CHECK};
use crate::diff::intersect_keys_ignore_case;
use crate::error::{ForeignKeyViolation, MigrateError, Result};
use crate::schema::SchemaModel;

/// Progress of one table through its rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RebuildStage {
    /// Nothing executed yet.
    Pending,
    /// Shadow table created.
    ShadowCreated,
    /// Shared columns copied into the shadow.
    DataCopied,
    /// Original table dropped.
    OriginalDropped,
    /// Shadow renamed to the original name.
    Renamed,
    /// Desired indices created on the renamed table.
    IndicesRestored,
    /// Foreign key check passed.
    Verified,
    /// Transaction committed.
    Committed,
}

/// One statement of a rebuild and the stage it completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RebuildStep {
    /// Stage reached once `sql` succeeds.
    pub stage: RebuildStage,
    /// Statement text.
    pub sql: String,
}

/// The statements that rebuild one altered table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RebuildPlan {
    /// Table being rebuilt.
    pub table: String,
    /// Temporary name of the new table.
    pub shadow: String,
    /// Columns present in both shapes, matched ignoring case; their data
    /// survives.
    pub transferable_columns: Vec<String>,
    /// Statements in execution order.
    pub steps: Vec<RebuildStep>,
}

impl RebuildPlan {
    /// Builds the rebuild of `table` from its `current` shape to its
    /// `desired` shape.
    ///
    /// Indices are always taken from `desired`; whatever indices the table
    /// had before are dropped along with it.
    pub fn new(
        dialect: &SqliteDialect,
        table: &str,
        desired: &SchemaModel,
        current: &SchemaModel,
        shadow_suffix: &str,
    ) -> Result<Self> {
        let missing = |side: &str| MigrateError::InvalidDefinition {
            table: table.to_string(),
            message: format!("table is not present in the {} schema", side),
        };
        let target = desired.get_table(table).ok_or_else(|| missing("desired"))?;
        let existing = current.get_table(table).ok_or_else(|| missing("current"))?;

        let shadow = shadow_name(table, shadow_suffix, [desired, current]);
        let transferable_columns = intersect_keys_ignore_case(&target.columns, &existing.columns);

        let mut steps = vec![RebuildStep {
            stage: RebuildStage::ShadowCreated,
            sql: dialect.shadow_create_sql(table, &shadow, &target.sql)?,
        }];

        if transferable_columns.is_empty() {
            warn!(table = %table, "No shared columns, existing rows will be discarded");
        } else {
            steps.push(RebuildStep {
                stage: RebuildStage::DataCopied,
                sql: dialect.copy_rows_sql(&shadow, table, &transferable_columns),
            });
        }

        steps.push(RebuildStep {
            stage: RebuildStage::OriginalDropped,
            sql: dialect.drop_table_sql(table),
        });
        steps.push(RebuildStep {
            stage: RebuildStage::Renamed,
            sql: dialect.rename_table_sql(&shadow, table),
        });
        steps.extend(desired.indices_on(table).map(|index| RebuildStep {
            stage: RebuildStage::IndicesRestored,
            sql: index.sql.clone(),
        }));

        Ok(Self {
            table: table.to_string(),
            shadow,
            transferable_columns,
            steps,
        })
    }

    /// Statement texts in execution order.
    pub fn statements(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(|s| s.sql.as_str())
    }
}

/// First `<table><suffix>`, then `<table><suffix>_1`, `_2`, ... that names
/// no table or index in either model. Tables and indices share one namespace
/// and names compare case-insensitively.
fn shadow_name(table: &str, suffix: &str, models: [&SchemaModel; 2]) -> String {
    let taken = |name: &str| {
        models.iter().any(|model| {
            model
                .tables
                .keys()
                .chain(model.indices.keys())
                .any(|existing| existing.eq_ignore_ascii_case(name))
        })
    };

    let base = format!("{}{}", table, suffix);
    let mut shadow = base.clone();
    let mut n = 1;
    while taken(&shadow) {
        shadow = format!("{}_{}", base, n);
        n += 1;
    }
    shadow
}

/// Runs a rebuild in its own transaction.
///
/// On any failure the transaction is rolled back and the error returned.
pub async fn rebuild_table(conn: &mut SqliteConnection, plan: &RebuildPlan) -> Result<()> {
    info!(table = %plan.table, "Rebuilding table");
    debug!(table = %plan.table, stage = ?RebuildStage::Pending, "Rebuild stage reached");

    let mut tx = conn
        .begin()
        .await
        .map_err(|e| MigrateError::execution("BEGIN", e))?;

    match apply_steps(&mut tx, plan).await {
        Ok(()) => {
            tx.commit()
                .await
                .map_err(|e| MigrateError::execution("COMMIT", e))?;
            debug!(table = %plan.table, stage = ?RebuildStage::Committed, "Rebuild stage reached");
            info!(table = %plan.table, "Table rebuilt");
            Ok(())
        }
        Err(err) => {
            if let Err(rollback) = tx.rollback().await {
                warn!(table = %plan.table, error = %rollback, "Rollback failed");
            }
            Err(err)
        }
    }
}

async fn apply_steps(conn: &mut SqliteConnection, plan: &RebuildPlan) -> Result<()> {
    for step in &plan.steps {
        debug!(sql = %step.sql, "Executing SQL");
        sqlx::raw_sql(&step.sql)
            .execute(&mut *conn)
            .await
            .map_err(|e| MigrateError::execution(step.sql.clone(), e))?;
        debug!(table = %plan.table, stage = ?step.stage, "Rebuild stage reached");
    }

    let violations = foreign_key_violations(conn).await?;
    if !violations.is_empty() {
        return Err(MigrateError::ConsistencyViolation {
            table: plan.table.clone(),
            violations,
        });
    }
    debug!(table = %plan.table, stage = ?RebuildStage::Verified, "Rebuild stage reached");

    Ok(())
}

/// Runs `PRAGMA foreign_key_check` over the whole database.
pub async fn foreign_key_violations(
    conn: &mut SqliteConnection,
) -> Result<Vec<ForeignKeyViolation>> {
    let rows: Vec<(String, Option<i64>, String, i64)> = sqlx::query_as(FOREIGN_KEY_CHECK)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| MigrateError::execution(FOREIGN_KEY_CHECK, e))?;

    Ok(rows
        .into_iter()
        .map(|(table, rowid, parent, fk_id)| ForeignKeyViolation {
            table,
            rowid,
            parent,
            fk_id,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::introspect::introspect;
    use crate::schema::{Column, Index, Table};

    async fn memory() -> SqliteConnection {
        SqliteConnection::connect("sqlite::memory:")
            .await
            .expect("Failed to open in-memory SQLite connection")
    }

    async fn database(sql: &str) -> SqliteConnection {
        let mut conn = memory().await;
        sqlx::raw_sql(sql).execute(&mut conn).await.unwrap();
        conn
    }

    fn users(sql: &str, columns: &[&str]) -> Table {
        columns
            .iter()
            .enumerate()
            .fold(Table::new("users", sql), |t, (i, c)| {
                t.column(Column::new(*c, i64::try_from(i).unwrap()))
            })
    }

    fn users_plan(desired: &SchemaModel, current: &SchemaModel) -> Result<RebuildPlan> {
        RebuildPlan::new(&SqliteDialect::new(), "users", desired, current, "_new")
    }

    #[test]
    fn test_plan_steps_in_order() {
        let desired = SchemaModel::new()
            .table(users(
                "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)",
                &["id", "name"],
            ))
            .index(Index::new(
                "idx_users_name",
                "users",
                "CREATE INDEX idx_users_name ON users (name)",
            ));
        let current = SchemaModel::new()
            .table(users(
                "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT, age INT)",
                &["id", "name", "age"],
            ))
            .index(Index::new(
                "idx_users_age",
                "users",
                "CREATE INDEX idx_users_age ON users (age)",
            ));

        let plan = users_plan(&desired, &current).unwrap();

        assert_eq!(plan.shadow, "users_new");
        assert_eq!(plan.transferable_columns, vec!["id", "name"]);
        let stages: Vec<RebuildStage> = plan.steps.iter().map(|s| s.stage).collect();
        assert_eq!(
            stages,
            vec![
                RebuildStage::ShadowCreated,
                RebuildStage::DataCopied,
                RebuildStage::OriginalDropped,
                RebuildStage::Renamed,
                RebuildStage::IndicesRestored,
            ]
        );
        assert_eq!(
            plan.statements().collect::<Vec<_>>(),
            vec![
                "CREATE TABLE users_new (id INTEGER PRIMARY KEY, name TEXT)",
                "INSERT INTO \"users_new\" (\"id\", \"name\") SELECT \"id\", \"name\" FROM \"users\"",
                "DROP TABLE IF EXISTS \"users\"",
                "ALTER TABLE \"users_new\" RENAME TO \"users\"",
                "CREATE INDEX idx_users_name ON users (name)",
            ]
        );
    }

    #[test]
    fn test_plan_without_shared_columns_skips_copy() {
        let wanted = users("CREATE TABLE users (uid, label)", &["uid", "label"]);
        let existing = users("CREATE TABLE users (id, name)", &["id", "name"]);
        let desired = SchemaModel::new().table(wanted);
        let current = SchemaModel::new().table(existing);

        let plan = users_plan(&desired, &current).unwrap();
        assert!(plan.transferable_columns.is_empty());
        let stages: Vec<RebuildStage> = plan.steps.iter().map(|s| s.stage).collect();
        assert!(!stages.contains(&RebuildStage::DataCopied));
    }

    #[test]
    fn test_plan_requires_table_on_both_sides() {
        let desired = SchemaModel::new().table(users("CREATE TABLE users (id)", &["id"]));
        let err = users_plan(&desired, &SchemaModel::new()).unwrap_err();
        assert!(matches!(err, MigrateError::InvalidDefinition { .. }));
    }

    #[test]
    fn test_plan_copies_columns_renamed_only_in_case() {
        let wanted = users("CREATE TABLE users (id, name)", &["id", "name"]);
        let existing = users("CREATE TABLE users (ID, Name)", &["ID", "Name"]);
        let desired = SchemaModel::new().table(wanted);
        let current = SchemaModel::new().table(existing);

        let plan = users_plan(&desired, &current).unwrap();
        assert_eq!(plan.transferable_columns, vec!["id", "name"]);
    }

    #[test]
    fn test_shadow_name_skips_taken_names() {
        let sql = "CREATE TABLE users (id, name)";
        let desired = SchemaModel::new()
            .table(users(sql, &["id", "name"]))
            .table(Table::new("users_new", "CREATE TABLE users_new (id)"))
            .index(Index::new(
                "users_new_1",
                "users_new",
                "CREATE INDEX users_new_1 ON users_new (id)",
            ));
        let current = SchemaModel::new()
            .table(users("CREATE TABLE users (id)", &["id"]))
            .table(Table::new("USERS_NEW_2", "CREATE TABLE USERS_NEW_2 (id)"));

        let plan = users_plan(&desired, &current).unwrap();
        assert_eq!(plan.shadow, "users_new_3");
        assert_eq!(plan.steps[0].sql, "CREATE TABLE users_new_3 (id, name)");
    }

    #[tokio::test]
    async fn test_rebuild_drops_column_and_keeps_rows() {
        let mut conn = database(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT, age INT);
             CREATE INDEX idx_users_age ON users (age);
             INSERT INTO users VALUES (1, 'ada', 36), (2, 'bob', 54);",
        )
        .await;
        let current = introspect(&mut conn).await.unwrap();

        let mut target = database(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT);
             CREATE INDEX idx_users_name ON users (name);",
        )
        .await;
        let desired = introspect(&mut target).await.unwrap();

        let plan = users_plan(&desired, &current).unwrap();
        rebuild_table(&mut conn, &plan).await.unwrap();

        let after = introspect(&mut conn).await.unwrap();
        assert_eq!(
            after.get_table("users").unwrap().column_names(),
            vec!["id", "name"]
        );
        assert!(after.get_table("users_new").is_none());
        assert_eq!(
            after.indices.keys().collect::<Vec<_>>(),
            vec!["idx_users_name"]
        );

        let rows: Vec<(i64, String)> = sqlx::query_as("SELECT id, name FROM users ORDER BY id")
            .fetch_all(&mut conn)
            .await
            .unwrap();
        assert_eq!(rows, vec![(1, "ada".to_string()), (2, "bob".to_string())]);
    }

    #[tokio::test]
    async fn test_rebuild_keeps_existing_table_named_like_shadow() {
        let mut conn = database(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT, age INT);
             CREATE TABLE users_new (id INTEGER PRIMARY KEY, note TEXT);
             INSERT INTO users VALUES (1, 'ada', 36);
             INSERT INTO users_new VALUES (7, 'keep me');",
        )
        .await;
        let current = introspect(&mut conn).await.unwrap();

        let mut target = database(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT);
             CREATE TABLE users_new (id INTEGER PRIMARY KEY, note TEXT);",
        )
        .await;
        let desired = introspect(&mut target).await.unwrap();

        let plan = users_plan(&desired, &current).unwrap();
        assert_eq!(plan.shadow, "users_new_1");
        rebuild_table(&mut conn, &plan).await.unwrap();

        let after = introspect(&mut conn).await.unwrap();
        assert_eq!(
            after.tables.keys().collect::<Vec<_>>(),
            vec!["users", "users_new"]
        );
        let (note,): (String,) = sqlx::query_as("SELECT note FROM users_new WHERE id = 7")
            .fetch_one(&mut conn)
            .await
            .unwrap();
        assert_eq!(note, "keep me");
    }

    #[tokio::test]
    async fn test_rebuild_keeps_data_of_column_renamed_in_case() {
        let mut conn = database(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, Name TEXT, age INT);
             INSERT INTO users VALUES (1, 'ada', 36);",
        )
        .await;
        let current = introspect(&mut conn).await.unwrap();

        let mut target = database("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT);").await;
        let desired = introspect(&mut target).await.unwrap();

        let plan = users_plan(&desired, &current).unwrap();
        rebuild_table(&mut conn, &plan).await.unwrap();

        let (name,): (String,) = sqlx::query_as("SELECT name FROM users WHERE id = 1")
            .fetch_one(&mut conn)
            .await
            .unwrap();
        assert_eq!(name, "ada");
    }

    #[tokio::test]
    async fn test_failed_rebuild_rolls_back() {
        let mut conn = database(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT);
             INSERT INTO users VALUES (1, NULL);",
        )
        .await;
        let current = introspect(&mut conn).await.unwrap();

        // The NOT NULL constraint rejects the copied row.
        let desired = SchemaModel::new().table(users(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL, email TEXT)",
            &["id", "name", "email"],
        ));

        let plan = users_plan(&desired, &current).unwrap();
        let err = rebuild_table(&mut conn, &plan).await.unwrap_err();
        assert!(matches!(err, MigrateError::Execution { .. }));

        let after = introspect(&mut conn).await.unwrap();
        assert_eq!(after, current);
    }

    #[tokio::test]
    async fn test_foreign_key_violations_reported() {
        let mut conn = database(
            "PRAGMA foreign_keys = OFF;
             CREATE TABLE users (id INTEGER PRIMARY KEY);
             CREATE TABLE posts (id INTEGER PRIMARY KEY, user_id INTEGER REFERENCES users(id));
             INSERT INTO posts VALUES (10, 99);",
        )
        .await;

        let violations = foreign_key_violations(&mut conn).await.unwrap();
        assert_eq!(
            violations,
            vec![ForeignKeyViolation {
                table: "posts".to_string(),
                rowid: Some(10),
                parent: "users".to_string(),
                fk_id: 0,
            }]
        );
    }
}
